use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "inbound" => Some(Self::Inbound),
            "outbound" => Some(Self::Outbound),
            _ => None,
        }
    }
}

/// Immutable message record. Append-only; never mutated after creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub owner_phone: String,
    pub content: String,
    pub direction: MessageDirection,
    pub encrypted: bool,
    pub timestamp: DateTime<Utc>,
}

impl MessageRecord {
    pub fn inbound(owner_phone: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(owner_phone, content, MessageDirection::Inbound, false)
    }

    pub fn outbound(owner_phone: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(owner_phone, content, MessageDirection::Outbound, false)
    }

    pub fn new(
        owner_phone: impl Into<String>,
        content: impl Into<String>,
        direction: MessageDirection,
        encrypted: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner_phone: owner_phone.into(),
            content: content.into(),
            direction,
            encrypted,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MessageDirection, MessageRecord};

    #[test]
    fn direction_round_trips_from_storage_encoding() {
        for direction in [MessageDirection::Inbound, MessageDirection::Outbound] {
            assert_eq!(MessageDirection::parse(direction.as_str()), Some(direction));
        }
        assert_eq!(MessageDirection::parse("sideways"), None);
    }

    #[test]
    fn constructors_set_direction_and_plain_encryption_flag() {
        let inbound = MessageRecord::inbound("+34600111222", "hola");
        assert_eq!(inbound.direction, MessageDirection::Inbound);
        assert!(!inbound.encrypted);

        let outbound = MessageRecord::outbound("+34600111222", "¿a qué hora?");
        assert_eq!(outbound.direction, MessageDirection::Outbound);
    }
}
