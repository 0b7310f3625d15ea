use chrono::{DateTime, Utc};
use serde::Deserialize;

/// A message delivered by the messaging provider's webhook. The phone is
/// raw provider input; normalization happens in the orchestrator.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct InboundMessage {
    pub from_phone: String,
    pub body: String,
    pub provider_message_id: String,
    #[serde(default)]
    pub has_media: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingEventKind {
    Created,
    Canceled,
    NoShow,
}

impl SchedulingEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Canceled => "canceled",
            Self::NoShow => "no_show",
        }
    }
}

/// A booking lifecycle callback from the scheduling provider. Invitees are
/// matched by phone when present, by email otherwise.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SchedulingCallback {
    pub kind: SchedulingEventKind,
    pub invitee_name: Option<String>,
    pub invitee_email: Option<String>,
    pub invitee_phone: Option<String>,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub event_reference: String,
}
