use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditSeverity, AuditSink};
use crate::conversation::states::{
    ConversationAction, ConversationEvent, ConversationStep, TransitionContext, TransitionOutcome,
};

/// A conversation flow: which step it starts in and how steps react to
/// events. Implemented as a trait so tests can plug reduced flows.
pub trait ConversationFlow {
    fn initial_step(&self) -> ConversationStep;
    fn transition(
        &self,
        current: &ConversationStep,
        event: &ConversationEvent,
        context: &TransitionContext,
    ) -> Result<TransitionOutcome, TransitionError>;
}

/// The appointment-booking flow used in production.
#[derive(Clone, Debug, Default)]
pub struct BookingFlow;

impl ConversationFlow for BookingFlow {
    fn initial_step(&self) -> ConversationStep {
        ConversationStep::Initial
    }

    fn transition(
        &self,
        current: &ConversationStep,
        event: &ConversationEvent,
        context: &TransitionContext,
    ) -> Result<TransitionOutcome, TransitionError> {
        transition_booking(current, event, context)
    }
}

pub struct ConversationEngine<F> {
    flow: F,
}

impl<F> ConversationEngine<F>
where
    F: ConversationFlow,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_step(&self) -> ConversationStep {
        self.flow.initial_step()
    }

    pub fn apply(
        &self,
        current: &ConversationStep,
        event: &ConversationEvent,
        context: &TransitionContext,
    ) -> Result<TransitionOutcome, TransitionError> {
        self.flow.transition(current, event, context)
    }

    /// Like [`apply`](Self::apply), emitting an audit event for the accepted
    /// or rejected transition.
    pub fn apply_with_audit<S>(
        &self,
        current: &ConversationStep,
        event: &ConversationEvent,
        context: &TransitionContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, TransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                let mut record = AuditEvent::new(
                    "conversation.transition_applied",
                    AuditCategory::Conversation,
                    AuditSeverity::Info,
                    audit.actor.clone(),
                )
                .with_detail("from", outcome.from.as_str())
                .with_detail("to", outcome.to.as_str())
                .with_detail("event", format!("{:?}", outcome.event))
                .with_detail("correlation_id", audit.correlation_id.clone());
                if let Some(subject) = &audit.subject {
                    record = record.with_subject(subject.clone());
                }
                sink.emit(record);
            }
            Err(error) => {
                let mut record = AuditEvent::new(
                    "conversation.transition_rejected",
                    AuditCategory::Conversation,
                    AuditSeverity::Warning,
                    audit.actor.clone(),
                )
                .with_detail("error", error.to_string())
                .with_detail("correlation_id", audit.correlation_id.clone());
                if let Some(subject) = &audit.subject {
                    record = record.with_subject(subject.clone());
                }
                sink.emit(record);
            }
        }
        result
    }
}

impl Default for ConversationEngine<BookingFlow> {
    fn default() -> Self {
        Self::new(BookingFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid transition from {step:?} using event {event:?}")]
    InvalidTransition { step: ConversationStep, event: ConversationEvent },
    #[error("conversation is terminal in step {step:?}; event {event:?} requires a new conversation")]
    TerminalStep { step: ConversationStep, event: ConversationEvent },
}

fn transition_booking(
    current: &ConversationStep,
    event: &ConversationEvent,
    context: &TransitionContext,
) -> Result<TransitionOutcome, TransitionError> {
    use ConversationAction::{
        NotifyHumanOperator, PromptForDetails, RequestBooking, ResetCollectedData,
        SendAbandonmentNotice, SendBookingConfirmation, SendConfirmationSummary, SendGreeting,
        SendHandoffNotice,
    };
    use ConversationEvent::{
        ConfirmationDeclined, ConfirmationGiven, ContactOpened, ConversationTimedOut,
        DetailsCaptured, EscalationRequested, ProviderConfirmed, ProviderFailed, RestartRequested,
    };
    use ConversationStep::{
        Abandoned, AwaitingProvider, CollectingInfo, Completed, Confirming, Escalated, Initial,
    };

    if current.is_terminal() {
        return Err(TransitionError::TerminalStep { step: *current, event: *event });
    }

    let ceiling = context.attempt_ceiling.max(1);
    let (to, attempts, actions) = match (current, event) {
        // Escalation and restart are reachable from every non-terminal step.
        (_, EscalationRequested) => {
            (Escalated, 0, vec![NotifyHumanOperator, SendHandoffNotice])
        }
        (_, RestartRequested) => (CollectingInfo, 0, vec![ResetCollectedData, PromptForDetails]),

        (Initial, ContactOpened) => (CollectingInfo, 0, vec![SendGreeting, PromptForDetails]),

        (CollectingInfo, DetailsCaptured { complete: true }) => {
            (Confirming, 0, vec![SendConfirmationSummary])
        }
        (CollectingInfo, DetailsCaptured { complete: false }) => {
            let next = context.attempts.saturating_add(1).min(ceiling);
            if next >= ceiling {
                (Abandoned, next, vec![SendAbandonmentNotice])
            } else {
                (CollectingInfo, next, vec![PromptForDetails])
            }
        }

        (Confirming, ConfirmationGiven) => (AwaitingProvider, 0, vec![RequestBooking]),
        (Confirming, ConfirmationDeclined) => {
            (CollectingInfo, 0, vec![ResetCollectedData, PromptForDetails])
        }
        // Changed or unclear details while confirming: merge upstream, then
        // summarize again.
        (Confirming, DetailsCaptured { .. }) => {
            let next = context.attempts.saturating_add(1).min(ceiling);
            if next >= ceiling {
                (Abandoned, next, vec![SendAbandonmentNotice])
            } else {
                (Confirming, next, vec![SendConfirmationSummary])
            }
        }

        (AwaitingProvider, ProviderConfirmed) => (Completed, 0, vec![SendBookingConfirmation]),
        (AwaitingProvider, ProviderFailed) => {
            let next = context.attempts.saturating_add(1).min(ceiling);
            if next >= ceiling {
                (Escalated, next, vec![NotifyHumanOperator, SendHandoffNotice])
            } else {
                (AwaitingProvider, next, vec![RequestBooking])
            }
        }

        // A silent contact is abandoned; a booking possibly in flight at the
        // provider is handed to a human instead.
        (Initial | CollectingInfo | Confirming, ConversationTimedOut) => {
            (Abandoned, context.attempts, Vec::new())
        }
        (AwaitingProvider, ConversationTimedOut) => {
            (Escalated, context.attempts, vec![NotifyHumanOperator])
        }

        _ => {
            return Err(TransitionError::InvalidTransition { step: *current, event: *event });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: *event, attempts, actions })
}
