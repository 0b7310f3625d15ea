use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use citabot_core::audit::{
    data_access_event, AuditCategory, AuditContext, AuditEvent, AuditSeverity, AuditSink,
};
use citabot_core::config::ConversationConfig;
use citabot_core::conversation::{
    BookingFlow, ConversationAction, ConversationEngine, ConversationEvent, ConversationStep,
    TransitionContext, TransitionError,
};
use citabot_core::domain::appointment::{Appointment, AppointmentStatus};
use citabot_core::domain::client::Client;
use citabot_core::domain::conversation::ConversationState;
use citabot_core::domain::message::{MessageDirection, MessageRecord};
use citabot_core::phone::{normalize, PhoneError, PhoneNumber};
use citabot_db::repositories::{
    AppointmentRepository, ClientRepository, ConversationRepository, MessageRepository,
    RepositoryError, SqlAppointmentRepository, SqlClientRepository, SqlConversationRepository,
    SqlMessageRepository,
};
use citabot_db::DbPool;
use citabot_providers::{
    IntegrationHub, InteractionContext, ProviderError, StepOutcome,
};

use crate::inbound::{InboundMessage, SchedulingCallback, SchedulingEventKind};
use crate::intent::IntentAnalyzer;
use crate::retry::RetryPolicy;
use crate::single_flight::PhoneLockArena;

const ACTOR: &str = "orchestrator";

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    InvalidPhone(#[from] PhoneError),
    #[error(transparent)]
    Storage(#[from] RepositoryError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Second delivery of an already-handled message id. Accepted, ignored.
    Duplicate,
    Handled { step: ConversationStep, reply_sent: bool },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// No client matched the invitee; the callback is audited and dropped.
    Unmatched,
    AppointmentConfirmed { appointment_id: String },
    AppointmentCancelled { appointment_id: String },
    NoShowRecorded { appointment_id: String },
}

/// Drives inbound events through phone normalization, the conversation state
/// machine, the Integration Façade, and the audit ledger.
pub struct Orchestrator {
    hub: Arc<IntegrationHub>,
    clients: Arc<dyn ClientRepository>,
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    appointments: Arc<dyn AppointmentRepository>,
    audit: Arc<dyn AuditSink>,
    engine: ConversationEngine<BookingFlow>,
    analyzer: IntentAnalyzer,
    policy: RetryPolicy,
    locks: PhoneLockArena,
    attempt_ceiling: u32,
    default_language: String,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        hub: Arc<IntegrationHub>,
        clients: Arc<dyn ClientRepository>,
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        appointments: Arc<dyn AppointmentRepository>,
        audit: Arc<dyn AuditSink>,
        config: &ConversationConfig,
    ) -> Self {
        Self {
            hub,
            clients,
            conversations,
            messages,
            appointments,
            audit,
            engine: ConversationEngine::default(),
            analyzer: IntentAnalyzer::new(),
            policy: RetryPolicy::from_config(config),
            locks: PhoneLockArena::new(),
            attempt_ceiling: config.attempt_ceiling,
            default_language: config.default_language.clone(),
        }
    }

    /// Wire the SQL repositories over one pool.
    pub fn from_pool(
        hub: Arc<IntegrationHub>,
        pool: DbPool,
        audit: Arc<dyn AuditSink>,
        config: &ConversationConfig,
    ) -> Self {
        Self::new(
            hub,
            Arc::new(SqlClientRepository::new(pool.clone())),
            Arc::new(SqlConversationRepository::new(pool.clone())),
            Arc::new(SqlMessageRepository::new(pool.clone())),
            Arc::new(SqlAppointmentRepository::new(pool)),
            audit,
            config,
        )
    }

    /// One inbound message: normalize, serialize per phone, dedup, transition,
    /// side effects, persist, audit.
    pub async fn handle_inbound_message(
        &self,
        inbound: InboundMessage,
    ) -> Result<InboundOutcome, OrchestratorError> {
        let phone = normalize(&inbound.from_phone)?;
        let correlation_id = Uuid::new_v4().to_string();
        let _guard = self.locks.acquire(&phone.canonical).await;

        let client = self.load_or_create_client(&phone, &correlation_id).await?;

        let mut state = match self.conversations.find_by_phone(&phone.canonical).await? {
            Some(state) => state,
            None => ConversationState::opened(&phone.canonical, &self.default_language),
        };
        self.audit_data_access(&phone.canonical, "conversations", "read", &correlation_id);

        if state.is_duplicate_delivery(&inbound.provider_message_id) {
            info!(
                event_name = "orchestrator.duplicate_ignored",
                phone = %phone.redacted(),
                provider_message_id = %inbound.provider_message_id,
                correlation_id = %correlation_id,
                "duplicate webhook delivery ignored"
            );
            self.audit.emit(
                AuditEvent::new(
                    "duplicate_delivery_ignored",
                    AuditCategory::Conversation,
                    AuditSeverity::Info,
                    ACTOR,
                )
                .with_subject(phone.canonical.clone())
                .with_detail("provider_message_id", inbound.provider_message_id),
            );
            return Ok(InboundOutcome::Duplicate);
        }

        if state.client_ref.is_none() {
            state.client_ref = Some(client.id.clone());
        }

        self.messages
            .append(MessageRecord::new(
                &phone.canonical,
                &inbound.body,
                MessageDirection::Inbound,
                inbound.has_media,
            ))
            .await?;
        self.audit_data_access(&phone.canonical, "messages", "write", &correlation_id);

        let intent = self.analyzer.analyze(&inbound.body);
        if let Some(language) = &intent.language_hint {
            state.language = language.clone();
        }

        // A message after a closed conversation starts a fresh flow; the new
        // message's own details are merged after the reset.
        if state.step.is_terminal() {
            state.step = ConversationStep::Initial;
            state.attempts_count = 0;
            state.data.clear_selections();
        }
        state.data.merge(intent.as_collected_data());

        let event = self.select_event(&state, &intent);
        let reply_guidance = match event {
            Some(event) => {
                let context = TransitionContext {
                    attempts: state.attempts_count,
                    attempt_ceiling: self.attempt_ceiling,
                };
                let outcome = self.engine.apply_with_audit(
                    &state.step,
                    &event,
                    &context,
                    self.audit.as_ref(),
                    &AuditContext::new(
                        Some(phone.canonical.clone()),
                        ACTOR,
                        correlation_id.clone(),
                    ),
                )?;

                state.step = outcome.to;
                state.attempts_count = outcome.attempts;
                if outcome.actions.contains(&ConversationAction::ResetCollectedData) {
                    state.data.clear_selections();
                }
                if outcome.actions.contains(&ConversationAction::NotifyHumanOperator) {
                    self.notify_human(&phone, &correlation_id);
                }

                self.compose_reply(&outcome.actions, &state, &client)
            }
            // No transition applies (e.g. chatter while the provider is
            // booking): acknowledge without touching the step.
            None => Some(waiting_ack(&state.language)),
        };

        state.last_message_id = Some(inbound.provider_message_id.clone());
        state.last_updated = chrono::Utc::now();

        let mut reply_sent = false;
        if let Some(canned) = reply_guidance {
            reply_sent = self
                .send_reply(&phone, &inbound.body, canned, &mut state, &correlation_id)
                .await?;
        }

        self.conversations.upsert(state.clone()).await?;
        self.audit_data_access(&phone.canonical, "conversations", "write", &correlation_id);

        Ok(InboundOutcome::Handled { step: state.step, reply_sent })
    }

    /// One scheduling-provider callback: locate the client by phone or email,
    /// update the appointment, advance the conversation, notify, audit.
    pub async fn handle_scheduling_event(
        &self,
        callback: SchedulingCallback,
    ) -> Result<CallbackOutcome, OrchestratorError> {
        let correlation_id = Uuid::new_v4().to_string();

        let phone = callback.invitee_phone.as_deref().and_then(|raw| normalize(raw).ok());
        let mut client = match &phone {
            Some(phone) => self.clients.find_by_phone(&phone.canonical).await?,
            None => None,
        };
        if client.is_none() {
            if let Some(email) = &callback.invitee_email {
                client = self.clients.find_by_email(email).await?;
            }
        }
        let Some(client) = client else {
            warn!(
                event_name = "orchestrator.unmatched_callback",
                kind = callback.kind.as_str(),
                event_reference = %callback.event_reference,
                correlation_id = %correlation_id,
                "scheduling callback matched no client"
            );
            self.audit.emit(
                AuditEvent::new(
                    "scheduling_callback_unmatched",
                    AuditCategory::Provider,
                    AuditSeverity::Warning,
                    ACTOR,
                )
                .with_detail("kind", callback.kind.as_str())
                .with_detail("event_reference", callback.event_reference.clone()),
            );
            return Ok(CallbackOutcome::Unmatched);
        };

        self.audit_data_access(&client.phone, "clients", "read", &correlation_id);
        let _guard = self.locks.acquire(&client.phone).await;

        let existing =
            self.appointments.find_by_external_ref(&callback.event_reference).await?;

        match callback.kind {
            SchedulingEventKind::Created => {
                let mut appointment = existing.unwrap_or_else(|| {
                    Appointment::scheduled(client.id.clone(), "external_booking", callback.start)
                        .with_external_ref(callback.event_reference.clone())
                });
                appointment.scheduled_at = callback.start;
                appointment.end_at = callback.end;
                appointment.set_status(AppointmentStatus::Confirmed);
                self.appointments.save(appointment.clone()).await?;
                self.audit_data_access(&client.phone, "appointments", "write", &correlation_id);

                self.complete_awaiting_conversation(&client, &appointment, &correlation_id)
                    .await?;

                Ok(CallbackOutcome::AppointmentConfirmed { appointment_id: appointment.id.0 })
            }
            SchedulingEventKind::Canceled => {
                let Some(mut appointment) = existing else {
                    return Ok(CallbackOutcome::Unmatched);
                };
                appointment.set_status(AppointmentStatus::Cancelled);
                self.appointments.save(appointment.clone()).await?;
                self.audit_data_access(&client.phone, "appointments", "write", &correlation_id);

                self.notify_client_best_effort(&client, cancellation_notice(&self.default_language))
                    .await;

                Ok(CallbackOutcome::AppointmentCancelled { appointment_id: appointment.id.0 })
            }
            SchedulingEventKind::NoShow => {
                let Some(mut appointment) = existing else {
                    return Ok(CallbackOutcome::Unmatched);
                };
                appointment.notes = Some("no_show reported by scheduling provider".to_string());
                appointment.set_status(AppointmentStatus::Completed);
                self.appointments.save(appointment.clone()).await?;
                self.audit_data_access(&client.phone, "appointments", "write", &correlation_id);

                Ok(CallbackOutcome::NoShowRecorded { appointment_id: appointment.id.0 })
            }
        }
    }

    async fn load_or_create_client(
        &self,
        phone: &PhoneNumber,
        correlation_id: &str,
    ) -> Result<Client, OrchestratorError> {
        let client = match self.clients.find_by_phone(&phone.canonical).await? {
            Some(mut client) => {
                client.touch();
                self.clients.upsert(client.clone()).await?;
                client
            }
            None => {
                let client = Client::first_contact(phone.canonical.clone(), None);
                self.clients.upsert(client.clone()).await?;
                self.audit.emit(
                    AuditEvent::new(
                        "client_created",
                        AuditCategory::DataAccess,
                        AuditSeverity::Info,
                        ACTOR,
                    )
                    .with_subject(phone.canonical.clone())
                    .with_detail("correlation_id", correlation_id.to_string()),
                );
                client
            }
        };
        self.audit_data_access(&phone.canonical, "clients", "read", correlation_id);
        Ok(client)
    }

    /// Map message intent to a state-machine event, or `None` when the step
    /// has no transition for a plain message.
    fn select_event(
        &self,
        state: &ConversationState,
        intent: &crate::intent::ExtractedIntent,
    ) -> Option<ConversationEvent> {
        if intent.wants_human {
            return Some(ConversationEvent::EscalationRequested);
        }
        if intent.wants_restart && state.step != ConversationStep::Initial {
            return Some(ConversationEvent::RestartRequested);
        }

        match state.step {
            ConversationStep::Initial => Some(ConversationEvent::ContactOpened),
            ConversationStep::CollectingInfo => {
                Some(ConversationEvent::DetailsCaptured { complete: state.data.is_complete() })
            }
            ConversationStep::Confirming => match intent.confirmation {
                Some(true) => Some(ConversationEvent::ConfirmationGiven),
                Some(false) => Some(ConversationEvent::ConfirmationDeclined),
                None => {
                    Some(ConversationEvent::DetailsCaptured { complete: state.data.is_complete() })
                }
            },
            ConversationStep::AwaitingProvider => None,
            // Terminal steps were reopened before event selection.
            ConversationStep::Completed
            | ConversationStep::Abandoned
            | ConversationStep::Escalated => None,
        }
    }

    /// Deliver a reply. With AI configured the façade composite generates a
    /// personalized message; a delivery-only failure retries just delivery,
    /// and a generation failure degrades to the canned text.
    async fn send_reply(
        &self,
        phone: &PhoneNumber,
        inbound_body: &str,
        canned: String,
        state: &mut ConversationState,
        correlation_id: &str,
    ) -> Result<bool, OrchestratorError> {
        if self.hub.ai_configured() {
            let report = self
                .hub
                .process_client_interaction(
                    phone,
                    inbound_body,
                    &InteractionContext {
                        current_step: state.step.as_str().to_string(),
                        language: state.language.clone(),
                        context_note: Some(canned.clone()),
                    },
                )
                .await;

            match (&report.generation, &report.delivery) {
                (StepOutcome::Completed, StepOutcome::Completed) => {
                    if let Some(text) = &report.reply_text {
                        self.messages
                            .append(MessageRecord::outbound(&phone.canonical, text))
                            .await?;
                        self.audit_data_access(
                            &phone.canonical,
                            "messages",
                            "write",
                            correlation_id,
                        );
                    }
                    return Ok(true);
                }
                (StepOutcome::Completed, _) => {
                    // Generated but undelivered: retry only the delivery step.
                    let text = report.reply_text.unwrap_or(canned);
                    let escalated =
                        self.record_provider_failure(state, phone, correlation_id)?;
                    if escalated {
                        return Ok(false);
                    }
                    return self
                        .deliver_with_policy(phone, &text, state, correlation_id, 1)
                        .await;
                }
                _ => {
                    // Generation failed: fall through to the canned reply.
                    self.audit.emit(
                        AuditEvent::new(
                            "reply_generation_degraded",
                            AuditCategory::Provider,
                            AuditSeverity::Warning,
                            ACTOR,
                        )
                        .with_subject(phone.canonical.clone())
                        .with_detail("correlation_id", correlation_id.to_string()),
                    );
                }
            }
        }

        self.deliver_with_policy(phone, &canned, state, correlation_id, 0).await
    }

    /// Bounded-retry delivery with explicit per-call timeouts. Failures while
    /// the conversation awaits the provider drive `ProviderFailed`
    /// transitions, escalating at the ceiling.
    async fn deliver_with_policy(
        &self,
        phone: &PhoneNumber,
        body: &str,
        state: &mut ConversationState,
        correlation_id: &str,
        mut failed_attempts: u32,
    ) -> Result<bool, OrchestratorError> {
        loop {
            let send = tokio::time::timeout(
                self.policy.call_timeout,
                self.hub.send_message(phone, body),
            )
            .await;

            let error = match send {
                Ok(Ok(receipt)) => {
                    self.messages
                        .append(MessageRecord::outbound(&phone.canonical, body))
                        .await?;
                    self.audit.emit(
                        AuditEvent::new(
                            "message_delivered",
                            AuditCategory::Provider,
                            AuditSeverity::Info,
                            ACTOR,
                        )
                        .with_subject(phone.canonical.clone())
                        .with_detail("provider_message_id", receipt.provider_message_id)
                        .with_detail("correlation_id", correlation_id.to_string()),
                    );
                    return Ok(true);
                }
                Ok(Err(error)) => error,
                Err(_elapsed) => ProviderError::Timeout {
                    provider: "messaging",
                    secs: self.policy.call_timeout.as_secs(),
                },
            };

            failed_attempts += 1;
            self.audit.emit(
                AuditEvent::new(
                    "delivery_failed",
                    AuditCategory::Provider,
                    AuditSeverity::Warning,
                    ACTOR,
                )
                .with_subject(phone.canonical.clone())
                .with_detail("error", error.to_string())
                .with_detail("attempt", failed_attempts.to_string())
                .with_detail("correlation_id", correlation_id.to_string()),
            );

            let escalated = self.record_provider_failure(state, phone, correlation_id)?;
            if escalated {
                return Ok(false);
            }

            if !error.is_retryable() || self.policy.attempts_exhausted(failed_attempts) {
                return Ok(false);
            }
            tokio::time::sleep(self.policy.delay_for(failed_attempts)).await;
        }
    }

    /// Apply one `ProviderFailed` transition when the conversation is waiting
    /// on the provider. Returns whether the conversation escalated.
    fn record_provider_failure(
        &self,
        state: &mut ConversationState,
        phone: &PhoneNumber,
        correlation_id: &str,
    ) -> Result<bool, OrchestratorError> {
        if state.step != ConversationStep::AwaitingProvider {
            return Ok(false);
        }

        let context = TransitionContext {
            attempts: state.attempts_count,
            attempt_ceiling: self.attempt_ceiling,
        };
        let outcome =
            self.engine.apply(&state.step, &ConversationEvent::ProviderFailed, &context)?;
        state.step = outcome.to;
        state.attempts_count = outcome.attempts;

        if state.step == ConversationStep::Escalated {
            self.notify_human(phone, correlation_id);
            return Ok(true);
        }
        Ok(false)
    }

    fn notify_human(&self, phone: &PhoneNumber, correlation_id: &str) {
        warn!(
            event_name = "orchestrator.escalated",
            phone = %phone.redacted(),
            correlation_id = %correlation_id,
            "conversation handed off to a human operator"
        );
        self.audit.emit(
            AuditEvent::new(
                "conversation_escalated",
                AuditCategory::Conversation,
                AuditSeverity::High,
                ACTOR,
            )
            .with_subject(phone.canonical.clone())
            .with_detail("correlation_id", correlation_id.to_string()),
        );
    }

    async fn complete_awaiting_conversation(
        &self,
        client: &Client,
        appointment: &Appointment,
        correlation_id: &str,
    ) -> Result<(), OrchestratorError> {
        let Some(mut state) = self.conversations.find_by_phone(&client.phone).await? else {
            return Ok(());
        };
        if state.step != ConversationStep::AwaitingProvider {
            return Ok(());
        }

        let context = TransitionContext {
            attempts: state.attempts_count,
            attempt_ceiling: self.attempt_ceiling,
        };
        let outcome = self.engine.apply_with_audit(
            &state.step,
            &ConversationEvent::ProviderConfirmed,
            &context,
            self.audit.as_ref(),
            &AuditContext::new(Some(client.phone.clone()), ACTOR, correlation_id.to_string()),
        )?;

        state.step = outcome.to;
        state.attempts_count = outcome.attempts;
        state.booking_ref = Some(appointment.id.0.clone());
        state.last_updated = chrono::Utc::now();
        self.conversations.upsert(state.clone()).await?;
        self.audit_data_access(&client.phone, "conversations", "write", correlation_id);

        self.notify_client_best_effort(
            client,
            booking_confirmed_notice(&state.language, &state.data),
        )
        .await;
        Ok(())
    }

    /// One delivery attempt, no retries: used for courtesy notifications
    /// where the primary operation already succeeded.
    async fn notify_client_best_effort(&self, client: &Client, body: String) {
        let Ok(phone) = normalize(&client.phone) else {
            return;
        };
        match self.hub.send_message(&phone, &body).await {
            Ok(_) => {
                let _ = self
                    .messages
                    .append(MessageRecord::outbound(&phone.canonical, &body))
                    .await;
            }
            Err(error) => {
                warn!(
                    event_name = "orchestrator.notification_failed",
                    phone = %phone.redacted(),
                    error = %error,
                    "courtesy notification not delivered"
                );
            }
        }
    }

    fn compose_reply(
        &self,
        actions: &[ConversationAction],
        state: &ConversationState,
        client: &Client,
    ) -> Option<String> {
        use ConversationAction::*;

        let spanish = state.language != "en";
        let name = client.display_name.as_deref();

        if actions.contains(&SendBookingConfirmation) {
            return Some(booking_confirmed_notice(&state.language, &state.data));
        }
        if actions.contains(&SendHandoffNotice) {
            return Some(if spanish {
                "Te pongo en contacto con una persona del equipo; te escribirá en breve."
                    .to_string()
            } else {
                "I'm handing this over to a member of our team; they will write to you shortly."
                    .to_string()
            });
        }
        if actions.contains(&SendAbandonmentNotice) {
            return Some(if spanish {
                "Cierro esta conversación por ahora. Escríbenos cuando quieras retomarla."
                    .to_string()
            } else {
                "I'm closing this conversation for now. Message us whenever you want to pick it up."
                    .to_string()
            });
        }
        if actions.contains(&SendConfirmationSummary) {
            let service = state.data.selected_service.as_deref().unwrap_or("tu cita");
            let time = state
                .data
                .preferred_time
                .map(|time| time.format("%d/%m a las %H:%M").to_string())
                .unwrap_or_else(|| "la hora pendiente".to_string());
            return Some(if spanish {
                format!("¿Confirmo tu cita de {service} para el {time}? Responde sí o no.")
            } else {
                format!("Shall I confirm your {service} appointment for {time}? Reply yes or no.")
            });
        }
        if actions.contains(&RequestBooking) {
            return Some(if spanish {
                "Un momento, estoy reservando tu cita…".to_string()
            } else {
                "One moment, I'm booking your appointment…".to_string()
            });
        }
        if actions.contains(&PromptForDetails) {
            let missing = state.data.missing_fields();
            let ask = if spanish {
                match (missing.contains(&"selected_service"), missing.contains(&"preferred_time"))
                {
                    (true, true) => "¿Qué servicio necesitas y para qué día?",
                    (true, false) => "¿Qué servicio necesitas?",
                    (false, true) => "¿Para qué día y hora te viene bien?",
                    (false, false) => "¿Me das algún detalle más?",
                }
            } else {
                match (missing.contains(&"selected_service"), missing.contains(&"preferred_time"))
                {
                    (true, true) => "Which service do you need, and for which day?",
                    (true, false) => "Which service do you need?",
                    (false, true) => "Which day and time suit you?",
                    (false, false) => "Could you give me one more detail?",
                }
            };
            let greeting = if actions.contains(&SendGreeting) {
                match name {
                    Some(name) if spanish => format!("¡Hola, {name}! "),
                    Some(name) => format!("Hi {name}! "),
                    None if spanish => "¡Hola! ".to_string(),
                    None => "Hi! ".to_string(),
                }
            } else {
                String::new()
            };
            return Some(format!("{greeting}{ask}"));
        }

        None
    }

    fn audit_data_access(
        &self,
        subject: &str,
        resource: &str,
        operation: &str,
        correlation_id: &str,
    ) {
        if let Ok(event) = data_access_event(
            subject,
            resource,
            "appointment conversation handling",
            "performance_of_contract",
            ACTOR,
        ) {
            self.audit.emit(
                event
                    .with_detail("operation", operation.to_string())
                    .with_detail("correlation_id", correlation_id.to_string()),
            );
        }
    }
}

fn waiting_ack(language: &str) -> String {
    if language == "en" {
        "I'm still confirming your appointment; I'll message you as soon as I hear back."
            .to_string()
    } else {
        "Sigo confirmando tu cita; te escribo en cuanto tenga respuesta.".to_string()
    }
}

fn cancellation_notice(language: &str) -> String {
    if language == "en" {
        "Your appointment was cancelled. Message us if you want to book a new one.".to_string()
    } else {
        "Tu cita ha sido cancelada. Escríbenos si quieres reservar otra.".to_string()
    }
}

fn booking_confirmed_notice(
    language: &str,
    data: &citabot_core::domain::conversation::CollectedData,
) -> String {
    let service = data.selected_service.as_deref().unwrap_or("tu cita");
    let time = data
        .preferred_time
        .map(|time| time.format("%d/%m a las %H:%M").to_string());
    match (language == "en", time) {
        (false, Some(time)) => format!("¡Confirmado! Tu cita de {service} queda para el {time}."),
        (false, None) => format!("¡Confirmado! Tu cita de {service} queda reservada."),
        (true, Some(time)) => format!("Confirmed! Your {service} appointment is set for {time}."),
        (true, None) => format!("Confirmed! Your {service} appointment is booked."),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{Duration, Utc};

    use citabot_core::audit::InMemoryAuditSink;
    use citabot_core::config::AppConfig;
    use citabot_core::conversation::ConversationStep;
    use citabot_core::domain::appointment::{Appointment, AppointmentStatus};
    use citabot_core::domain::client::Client;
    use citabot_core::domain::conversation::ConversationState;
    use citabot_core::domain::message::MessageDirection;
    use citabot_core::phone::PhoneNumber;
    use citabot_db::repositories::{
        AppointmentRepository, ClientRepository, ConversationRepository,
        InMemoryAppointmentRepository, InMemoryClientRepository, InMemoryConversationRepository,
        InMemoryMessageRepository,
    };
    use citabot_db::{connect_with_settings, migrations};
    use citabot_providers::{
        IntegrationHub, MessageReceipt, MessagingClient, NoopMessagingClient, ProviderError,
    };

    use crate::inbound::{InboundMessage, SchedulingCallback, SchedulingEventKind};
    use crate::runtime::{CallbackOutcome, InboundOutcome, Orchestrator, OrchestratorError};

    struct RateLimitedMessaging {
        calls: AtomicU32,
    }

    #[async_trait]
    impl MessagingClient for RateLimitedMessaging {
        async fn send_message(
            &self,
            _to: &PhoneNumber,
            _body: &str,
        ) -> Result<MessageReceipt, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::RateLimited { provider: "messaging", retry_after_secs: None })
        }

        async fn probe(&self) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    struct Harness {
        orchestrator: Arc<Orchestrator>,
        clients: Arc<InMemoryClientRepository>,
        conversations: Arc<InMemoryConversationRepository>,
        messages: Arc<InMemoryMessageRepository>,
        appointments: Arc<InMemoryAppointmentRepository>,
        audit: InMemoryAuditSink,
    }

    async fn harness(messaging: Arc<dyn MessagingClient>) -> Harness {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");

        let mut config = AppConfig::default();
        // Keep the AI capability unwired so replies stay canned and offline,
        // and make retries fast.
        config.llm.api_key = None;
        config.llm.base_url = None;
        config.conversation.retry_base_delay_ms = 1;
        config.conversation.retry_max_delay_ms = 2;

        let hub = Arc::new(
            IntegrationHub::from_config(&config, pool).expect("hub builds").with_messaging(messaging),
        );
        let clients = Arc::new(InMemoryClientRepository::default());
        let conversations = Arc::new(InMemoryConversationRepository::default());
        let messages = Arc::new(InMemoryMessageRepository::default());
        let appointments = Arc::new(InMemoryAppointmentRepository::default());
        let audit = InMemoryAuditSink::default();

        let orchestrator = Arc::new(Orchestrator::new(
            hub,
            Arc::clone(&clients) as Arc<dyn ClientRepository>,
            Arc::clone(&conversations) as Arc<dyn ConversationRepository>,
            Arc::clone(&messages) as _,
            Arc::clone(&appointments) as Arc<dyn AppointmentRepository>,
            Arc::new(audit.clone()),
            &config.conversation,
        ));

        Harness { orchestrator, clients, conversations, messages, appointments, audit }
    }

    fn inbound(body: &str, message_id: &str) -> InboundMessage {
        InboundMessage {
            from_phone: "+34600111222".to_string(),
            body: body.to_string(),
            provider_message_id: message_id.to_string(),
            has_media: false,
        }
    }

    #[tokio::test]
    async fn first_message_creates_client_and_moves_to_collecting_info() {
        let h = harness(Arc::new(NoopMessagingClient)).await;

        let outcome =
            h.orchestrator.handle_inbound_message(inbound("hola", "wamid.1")).await.expect("handle");

        assert_eq!(
            outcome,
            InboundOutcome::Handled { step: ConversationStep::CollectingInfo, reply_sent: true }
        );

        let client =
            h.clients.find_by_phone("+34600111222").await.expect("find").expect("client created");
        assert_eq!(client.phone, "+34600111222");

        let state = h
            .conversations
            .find_by_phone("+34600111222")
            .await
            .expect("find")
            .expect("state created");
        assert_eq!(state.step, ConversationStep::CollectingInfo);
        assert_eq!(state.last_message_id.as_deref(), Some("wamid.1"));
        assert_eq!(state.client_ref, Some(client.id));

        let messages = h.messages.all().await;
        assert_eq!(messages.len(), 2, "one inbound record plus one reply");
        assert!(messages.iter().any(|m| m.direction == MessageDirection::Inbound));
        assert!(messages.iter().any(|m| m.direction == MessageDirection::Outbound));

        let audit = h.audit.events();
        assert!(audit.iter().any(|e| e.event_type == "client_created"));
        assert!(audit.iter().any(|e| e.event_type == "conversation.transition_applied"));
        assert!(audit.iter().any(|e| e.event_type == "data_access"));
    }

    #[tokio::test]
    async fn duplicate_delivery_causes_no_second_transition_or_send() {
        let h = harness(Arc::new(NoopMessagingClient)).await;

        let first =
            h.orchestrator.handle_inbound_message(inbound("hola", "wamid.1")).await.expect("first");
        assert!(matches!(first, InboundOutcome::Handled { .. }));

        let second = h
            .orchestrator
            .handle_inbound_message(inbound("hola", "wamid.1"))
            .await
            .expect("second");
        assert_eq!(second, InboundOutcome::Duplicate);

        let messages = h.messages.all().await;
        assert_eq!(messages.len(), 2, "the duplicate must append nothing and send nothing");

        let state = h
            .conversations
            .find_by_phone("+34600111222")
            .await
            .expect("find")
            .expect("state present");
        assert_eq!(state.step, ConversationStep::CollectingInfo);

        let audit = h.audit.events();
        assert!(audit.iter().any(|e| e.event_type == "duplicate_delivery_ignored"));
    }

    #[tokio::test]
    async fn concurrent_duplicate_deliveries_produce_exactly_one_effect() {
        let h = harness(Arc::new(NoopMessagingClient)).await;

        let a = {
            let orchestrator = Arc::clone(&h.orchestrator);
            tokio::spawn(
                async move { orchestrator.handle_inbound_message(inbound("hola", "wamid.9")).await },
            )
        };
        let b = {
            let orchestrator = Arc::clone(&h.orchestrator);
            tokio::spawn(
                async move { orchestrator.handle_inbound_message(inbound("hola", "wamid.9")).await },
            )
        };

        let outcomes = [
            a.await.expect("join").expect("handle"),
            b.await.expect("join").expect("handle"),
        ];
        let duplicates =
            outcomes.iter().filter(|outcome| **outcome == InboundOutcome::Duplicate).count();
        assert_eq!(duplicates, 1, "exactly one delivery wins, the other is a handled no-op");

        let outbound = h
            .messages
            .all()
            .await
            .into_iter()
            .filter(|m| m.direction == MessageDirection::Outbound)
            .count();
        assert_eq!(outbound, 1, "at most one outbound send for one message id");
    }

    #[tokio::test]
    async fn booking_flow_reaches_awaiting_provider_and_completes_on_callback() {
        let h = harness(Arc::new(NoopMessagingClient)).await;

        h.orchestrator.handle_inbound_message(inbound("hola", "wamid.1")).await.expect("open");
        let details = h
            .orchestrator
            .handle_inbound_message(inbound("quiero un corte mañana a las 10:00", "wamid.2"))
            .await
            .expect("details");
        assert_eq!(
            details,
            InboundOutcome::Handled { step: ConversationStep::Confirming, reply_sent: true }
        );

        let confirmed = h
            .orchestrator
            .handle_inbound_message(inbound("sí", "wamid.3"))
            .await
            .expect("confirmation");
        assert_eq!(
            confirmed,
            InboundOutcome::Handled { step: ConversationStep::AwaitingProvider, reply_sent: true }
        );

        let outcome = h
            .orchestrator
            .handle_scheduling_event(SchedulingCallback {
                kind: SchedulingEventKind::Created,
                invitee_name: Some("Marta".to_string()),
                invitee_email: None,
                invitee_phone: Some("+34 600 111 222".to_string()),
                start: Utc::now() + Duration::days(1),
                end: None,
                event_reference: "cal-evt-1".to_string(),
            })
            .await
            .expect("callback");
        assert!(matches!(outcome, CallbackOutcome::AppointmentConfirmed { .. }));

        let state = h
            .conversations
            .find_by_phone("+34600111222")
            .await
            .expect("find")
            .expect("state present");
        assert_eq!(state.step, ConversationStep::Completed);
        assert!(state.booking_ref.is_some());

        let appointment = h
            .appointments
            .find_by_external_ref("cal-evt-1")
            .await
            .expect("find")
            .expect("appointment stored");
        assert_eq!(appointment.status, AppointmentStatus::Confirmed);
    }

    #[tokio::test]
    async fn escalation_keywords_hand_the_conversation_to_a_human() {
        let h = harness(Arc::new(NoopMessagingClient)).await;

        h.orchestrator.handle_inbound_message(inbound("hola", "wamid.1")).await.expect("open");
        let outcome = h
            .orchestrator
            .handle_inbound_message(inbound("quiero hablar con una persona", "wamid.2"))
            .await
            .expect("escalate");

        assert_eq!(
            outcome,
            InboundOutcome::Handled { step: ConversationStep::Escalated, reply_sent: true }
        );
        let audit = h.audit.events();
        assert!(audit.iter().any(|e| e.event_type == "conversation_escalated"));
    }

    #[tokio::test]
    async fn three_rate_limited_sends_escalate_the_conversation() {
        let messaging = Arc::new(RateLimitedMessaging { calls: AtomicU32::new(0) });
        let h = harness(Arc::clone(&messaging) as Arc<dyn MessagingClient>).await;

        // Seed a conversation that is one confirmation away from the
        // provider wait.
        let client = Client::first_contact("+34600111222", None);
        h.clients.upsert(client.clone()).await.expect("seed client");
        let mut state = ConversationState::opened("+34600111222", "es");
        state.step = ConversationStep::Confirming;
        state.client_ref = Some(client.id);
        state.data.selected_service = Some("corte".to_string());
        state.data.preferred_time = Some(Utc::now() + Duration::days(1));
        h.conversations.upsert(state).await.expect("seed state");

        let outcome =
            h.orchestrator.handle_inbound_message(inbound("sí", "wamid.5")).await.expect("handle");

        assert_eq!(
            outcome,
            InboundOutcome::Handled { step: ConversationStep::Escalated, reply_sent: false }
        );
        assert_eq!(messaging.calls.load(Ordering::SeqCst), 3, "ceiling of three attempts");

        let state = h
            .conversations
            .find_by_phone("+34600111222")
            .await
            .expect("find")
            .expect("state present");
        assert_eq!(state.step, ConversationStep::Escalated);
        assert_eq!(state.attempts_count, 3);

        let audit = h.audit.events();
        assert_eq!(
            audit.iter().filter(|e| e.event_type == "delivery_failed").count(),
            3,
            "each failed attempt is audited"
        );
        assert!(audit.iter().any(|e| e.event_type == "conversation_escalated"));
    }

    #[tokio::test]
    async fn invalid_phone_is_rejected_synchronously() {
        let h = harness(Arc::new(NoopMessagingClient)).await;

        let error = h
            .orchestrator
            .handle_inbound_message(InboundMessage {
                from_phone: "600111222".to_string(),
                body: "hola".to_string(),
                provider_message_id: "wamid.1".to_string(),
                has_media: false,
            })
            .await
            .expect_err("phone without country prefix must be rejected");

        assert!(matches!(error, OrchestratorError::InvalidPhone(_)));
        assert!(h.clients.find_by_phone("600111222").await.expect("find").is_none());
    }

    #[tokio::test]
    async fn cancellation_callback_matches_by_email_when_phone_is_absent() {
        let h = harness(Arc::new(NoopMessagingClient)).await;

        let mut client = Client::first_contact("+34600111222", Some("Marta".to_string()));
        client.email = Some("marta@example.com".to_string());
        h.clients.upsert(client.clone()).await.expect("seed client");

        let appointment = Appointment::scheduled(
            client.id.clone(),
            "corte",
            Utc::now() + Duration::days(2),
        )
        .with_external_ref("cal-evt-9");
        h.appointments.save(appointment).await.expect("seed appointment");

        let outcome = h
            .orchestrator
            .handle_scheduling_event(SchedulingCallback {
                kind: SchedulingEventKind::Canceled,
                invitee_name: Some("Marta".to_string()),
                invitee_email: Some("marta@example.com".to_string()),
                invitee_phone: None,
                start: Utc::now() + Duration::days(2),
                end: None,
                event_reference: "cal-evt-9".to_string(),
            })
            .await
            .expect("callback");

        assert!(matches!(outcome, CallbackOutcome::AppointmentCancelled { .. }));
        let stored = h
            .appointments
            .find_by_external_ref("cal-evt-9")
            .await
            .expect("find")
            .expect("appointment present");
        assert_eq!(stored.status, AppointmentStatus::Cancelled);
    }

    #[tokio::test]
    async fn unmatched_callback_is_accepted_and_audited() {
        let h = harness(Arc::new(NoopMessagingClient)).await;

        let outcome = h
            .orchestrator
            .handle_scheduling_event(SchedulingCallback {
                kind: SchedulingEventKind::Created,
                invitee_name: None,
                invitee_email: Some("nobody@example.com".to_string()),
                invitee_phone: None,
                start: Utc::now(),
                end: None,
                event_reference: "cal-evt-404".to_string(),
            })
            .await
            .expect("callback");

        assert_eq!(outcome, CallbackOutcome::Unmatched);
        let audit = h.audit.events();
        assert!(audit.iter().any(|e| e.event_type == "scheduling_callback_unmatched"));
    }

    #[tokio::test]
    async fn message_after_completion_reopens_a_fresh_flow() {
        let h = harness(Arc::new(NoopMessagingClient)).await;

        let client = Client::first_contact("+34600111222", None);
        h.clients.upsert(client.clone()).await.expect("seed client");
        let mut state = ConversationState::opened("+34600111222", "es");
        state.step = ConversationStep::Completed;
        state.client_ref = Some(client.id);
        state.data.selected_service = Some("corte".to_string());
        h.conversations.upsert(state).await.expect("seed state");

        let outcome = h
            .orchestrator
            .handle_inbound_message(inbound("hola otra vez", "wamid.7"))
            .await
            .expect("reopen");

        assert_eq!(
            outcome,
            InboundOutcome::Handled { step: ConversationStep::CollectingInfo, reply_sent: true }
        );
        let state = h
            .conversations
            .find_by_phone("+34600111222")
            .await
            .expect("find")
            .expect("state present");
        assert!(state.data.selected_service.is_none(), "reopening clears prior selections");
    }
}
