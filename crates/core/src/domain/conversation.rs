use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversation::states::ConversationStep;
use crate::domain::client::ClientId;

/// Structured data accumulated across a conversation.
///
/// Well-known booking fields are typed; everything else the dialogue picks up
/// (a name correction, an allergy note) lands in `extras`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectedData {
    pub selected_service: Option<String>,
    pub preferred_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub extras: BTreeMap<String, String>,
}

impl CollectedData {
    /// Merge newly captured fields into the accumulated set. Present values
    /// win over absent ones; extras are unioned key-by-key.
    pub fn merge(&mut self, incoming: CollectedData) {
        if incoming.selected_service.is_some() {
            self.selected_service = incoming.selected_service;
        }
        if incoming.preferred_time.is_some() {
            self.preferred_time = incoming.preferred_time;
        }
        for (key, value) in incoming.extras {
            self.extras.insert(key, value);
        }
    }

    /// Drop booking selections while keeping free-form extras. Used when a
    /// flow restarts.
    pub fn clear_selections(&mut self) {
        self.selected_service = None;
        self.preferred_time = None;
    }

    /// Required fields still missing before a booking can be confirmed.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.selected_service.is_none() {
            missing.push("selected_service");
        }
        if self.preferred_time.is_none() {
            missing.push("preferred_time");
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }
}

/// Per-contact progress record, keyed 1:1 by canonical phone number.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub phone: String,
    pub step: ConversationStep,
    pub data: CollectedData,
    pub attempts_count: u32,
    pub language: String,
    pub last_updated: DateTime<Utc>,
    pub client_ref: Option<ClientId>,
    pub booking_ref: Option<String>,
    /// Provider id of the most recent inbound message, used to ignore
    /// duplicate webhook deliveries.
    pub last_message_id: Option<String>,
}

impl ConversationState {
    /// Fresh state for a phone number that has never talked to us.
    pub fn opened(phone: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            phone: phone.into(),
            step: ConversationStep::Initial,
            data: CollectedData::default(),
            attempts_count: 0,
            language: language.into(),
            last_updated: Utc::now(),
            client_ref: None,
            booking_ref: None,
            last_message_id: None,
        }
    }

    pub fn is_duplicate_delivery(&self, message_id: &str) -> bool {
        self.last_message_id.as_deref() == Some(message_id)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{CollectedData, ConversationState};
    use crate::conversation::states::ConversationStep;

    #[test]
    fn merge_keeps_existing_values_when_incoming_is_empty() {
        let mut data = CollectedData {
            selected_service: Some("corte".to_string()),
            preferred_time: Some(Utc::now()),
            ..CollectedData::default()
        };
        data.merge(CollectedData::default());
        assert!(data.is_complete());
    }

    #[test]
    fn merge_unions_extras_and_overwrites_selections() {
        let mut data = CollectedData::default();
        data.extras.insert("note".to_string(), "first".to_string());

        let mut incoming = CollectedData::default();
        incoming.selected_service = Some("tinte".to_string());
        incoming.extras.insert("note".to_string(), "second".to_string());
        incoming.extras.insert("stylist".to_string(), "ana".to_string());

        data.merge(incoming);
        assert_eq!(data.selected_service.as_deref(), Some("tinte"));
        assert_eq!(data.extras.get("note").map(String::as_str), Some("second"));
        assert_eq!(data.extras.len(), 2);
    }

    #[test]
    fn clear_selections_preserves_extras() {
        let mut data = CollectedData {
            selected_service: Some("corte".to_string()),
            preferred_time: Some(Utc::now()),
            ..CollectedData::default()
        };
        data.extras.insert("note".to_string(), "kept".to_string());

        data.clear_selections();
        assert_eq!(data.missing_fields(), vec!["selected_service", "preferred_time"]);
        assert_eq!(data.extras.len(), 1);
    }

    #[test]
    fn opened_state_starts_at_initial_with_no_linkage() {
        let state = ConversationState::opened("+34600111222", "es");
        assert_eq!(state.step, ConversationStep::Initial);
        assert_eq!(state.attempts_count, 0);
        assert!(state.client_ref.is_none());
        assert!(state.last_message_id.is_none());
    }

    #[test]
    fn duplicate_delivery_matches_only_the_stored_message_id() {
        let mut state = ConversationState::opened("+34600111222", "es");
        assert!(!state.is_duplicate_delivery("wamid.1"));
        state.last_message_id = Some("wamid.1".to_string());
        assert!(state.is_duplicate_delivery("wamid.1"));
        assert!(!state.is_duplicate_delivery("wamid.2"));
    }
}
