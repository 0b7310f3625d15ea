use serde::{Deserialize, Serialize};

/// Closed set of steps a conversation can be in. New steps require updating
/// the transition table, which matches exhaustively.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStep {
    Initial,
    CollectingInfo,
    Confirming,
    AwaitingProvider,
    Completed,
    Abandoned,
    Escalated,
}

impl ConversationStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::CollectingInfo => "collecting_info",
            Self::Confirming => "confirming",
            Self::AwaitingProvider => "awaiting_provider",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
            Self::Escalated => "escalated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "initial" => Some(Self::Initial),
            "collecting_info" => Some(Self::CollectingInfo),
            "confirming" => Some(Self::Confirming),
            "awaiting_provider" => Some(Self::AwaitingProvider),
            "completed" => Some(Self::Completed),
            "abandoned" => Some(Self::Abandoned),
            "escalated" => Some(Self::Escalated),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned | Self::Escalated)
    }
}

/// Inputs that drive a transition: inbound message interpretation, provider
/// callback results, and timeout signals.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationEvent {
    ContactOpened,
    DetailsCaptured { complete: bool },
    ConfirmationGiven,
    ConfirmationDeclined,
    ProviderConfirmed,
    ProviderFailed,
    EscalationRequested,
    RestartRequested,
    ConversationTimedOut,
}

/// Per-transition context the engine needs beyond the current step.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransitionContext {
    /// Attempt count carried by the conversation before this event.
    pub attempts: u32,
    /// Ceiling at which unproductive rounds abandon and provider failures
    /// escalate.
    pub attempt_ceiling: u32,
}

/// Side effects the orchestrator must run after a transition is accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationAction {
    SendGreeting,
    PromptForDetails,
    SendConfirmationSummary,
    RequestBooking,
    SendBookingConfirmation,
    ResetCollectedData,
    NotifyHumanOperator,
    SendHandoffNotice,
    SendAbandonmentNotice,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub from: ConversationStep,
    pub to: ConversationStep,
    pub event: ConversationEvent,
    /// Attempt counter after the transition. Resets to zero whenever the
    /// step changes; never exceeds the configured ceiling.
    pub attempts: u32,
    pub actions: Vec<ConversationAction>,
}
