use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use citabot_core::config::AppConfig;
use citabot_core::domain::client::Client;
use citabot_core::phone::PhoneNumber;
use citabot_db::repositories::{ClientRepository, SqlClientRepository};
use citabot_db::DbPool;

use crate::ai::{GeneratedReply, GenerationOptions, HttpReplyGenerator, ReplyGenerator};
use crate::error::ProviderError;
use crate::messaging::{MessageReceipt, MessagingClient, WhatsAppClient};
use crate::prompt::{PromptBuilder, PromptInput};
use crate::scheduling::{CalendarApiClient, ScheduledEvent, SchedulingClient};

/// Liveness of the required storage backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StorageProbe {
    pub status: &'static str,
    pub detail: String,
}

/// Health of one optional capability.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityStatus {
    NotConfigured,
    Ready,
    Unreachable { reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HubHealth {
    pub storage: StorageProbe,
    pub messaging: CapabilityStatus,
    pub ai: CapabilityStatus,
    pub scheduling: CapabilityStatus,
}

impl HubHealth {
    /// Storage is the only hard requirement; optional capabilities degrade
    /// independently.
    pub fn is_ready(&self) -> bool {
        self.storage.status == "ready"
    }
}

/// Outcome of one sub-step of a composite operation. Sub-steps succeed and
/// fail independently so callers can retry just the failed one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    Failed(String),
    Skipped,
}

impl StepOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

#[derive(Clone, Debug)]
pub struct InteractionContext {
    pub current_step: String,
    pub language: String,
    pub context_note: Option<String>,
}

/// Per-step result of `process_client_interaction`. Deliberately not an
/// all-or-nothing `Result`: a generated-but-undelivered reply only needs the
/// delivery step retried.
#[derive(Clone, Debug)]
pub struct InteractionReport {
    pub client_created: bool,
    pub lookup: StepOutcome,
    pub generation: StepOutcome,
    pub delivery: StepOutcome,
    pub reply_text: Option<String>,
    pub receipt: Option<MessageReceipt>,
}

impl InteractionReport {
    pub fn fully_succeeded(&self) -> bool {
        self.lookup.succeeded() && self.generation.succeeded() && self.delivery.succeeded()
    }
}

/// Single entry point over every capability provider. Clients are wired at
/// construction from whatever credentials config carries; the hub itself is
/// immutable and shared by handle.
pub struct IntegrationHub {
    pool: DbPool,
    clients: Arc<dyn ClientRepository>,
    messaging: Option<Arc<dyn MessagingClient>>,
    ai: Option<Arc<dyn ReplyGenerator>>,
    scheduling: Option<Arc<dyn SchedulingClient>>,
    prompts: PromptBuilder,
    generation_defaults: GenerationOptions,
}

impl IntegrationHub {
    pub fn from_config(config: &AppConfig, pool: DbPool) -> Result<Self, tera::Error> {
        let messaging = WhatsAppClient::from_config(&config.whatsapp)
            .map(|client| Arc::new(client) as Arc<dyn MessagingClient>);
        let ai = HttpReplyGenerator::from_config(&config.llm)
            .map(|client| Arc::new(client) as Arc<dyn ReplyGenerator>);
        let scheduling = CalendarApiClient::from_config(&config.scheduling)
            .map(|client| Arc::new(client) as Arc<dyn SchedulingClient>);

        Ok(Self {
            clients: Arc::new(SqlClientRepository::new(pool.clone())),
            pool,
            messaging,
            ai,
            scheduling,
            prompts: PromptBuilder::new()?,
            generation_defaults: GenerationOptions {
                max_tokens: config.llm.max_reply_tokens,
                ..GenerationOptions::default()
            },
        })
    }

    pub fn with_messaging(mut self, client: Arc<dyn MessagingClient>) -> Self {
        self.messaging = Some(client);
        self
    }

    pub fn with_ai(mut self, client: Arc<dyn ReplyGenerator>) -> Self {
        self.ai = Some(client);
        self
    }

    pub fn with_scheduling(mut self, client: Arc<dyn SchedulingClient>) -> Self {
        self.scheduling = Some(client);
        self
    }

    pub fn with_client_repository(mut self, clients: Arc<dyn ClientRepository>) -> Self {
        self.clients = clients;
        self
    }

    pub fn messaging_configured(&self) -> bool {
        self.messaging.is_some()
    }

    pub fn ai_configured(&self) -> bool {
        self.ai.is_some()
    }

    pub fn scheduling_configured(&self) -> bool {
        self.scheduling.is_some()
    }

    pub fn generation_defaults(&self) -> GenerationOptions {
        self.generation_defaults
    }

    pub async fn send_message(
        &self,
        to: &PhoneNumber,
        body: &str,
    ) -> Result<MessageReceipt, ProviderError> {
        let messaging = self
            .messaging
            .as_ref()
            .ok_or(ProviderError::NotConfigured { provider: "messaging" })?;
        messaging.send_message(to, body).await
    }

    pub async fn generate_reply(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GeneratedReply, ProviderError> {
        let ai = self.ai.as_ref().ok_or(ProviderError::NotConfigured { provider: "ai" })?;
        ai.generate_reply(prompt, options).await
    }

    pub async fn list_scheduled_events(
        &self,
        subject_uri: &str,
    ) -> Result<Vec<ScheduledEvent>, ProviderError> {
        let scheduling = self
            .scheduling
            .as_ref()
            .ok_or(ProviderError::NotConfigured { provider: "scheduling" })?;
        scheduling.list_scheduled_events(subject_uri).await
    }

    pub async fn health_check(&self) -> HubHealth {
        let storage = match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => StorageProbe {
                status: "ready",
                detail: "database query succeeded".to_string(),
            },
            Err(error) => StorageProbe {
                status: "degraded",
                detail: format!("database query failed: {error}"),
            },
        };

        let messaging = match &self.messaging {
            None => CapabilityStatus::NotConfigured,
            Some(client) => match client.probe().await {
                Ok(()) => CapabilityStatus::Ready,
                Err(error) => CapabilityStatus::Unreachable { reason: error.to_string() },
            },
        };
        let ai = match &self.ai {
            None => CapabilityStatus::NotConfigured,
            Some(client) => match client.probe().await {
                Ok(()) => CapabilityStatus::Ready,
                Err(error) => CapabilityStatus::Unreachable { reason: error.to_string() },
            },
        };
        let scheduling = match &self.scheduling {
            None => CapabilityStatus::NotConfigured,
            Some(client) => match client.probe().await {
                Ok(()) => CapabilityStatus::Ready,
                Err(error) => CapabilityStatus::Unreachable { reason: error.to_string() },
            },
        };

        HubHealth { storage, messaging, ai, scheduling }
    }

    /// Composite: look up or create the client, generate a reply bound to
    /// client + context, and deliver it. Each sub-step reports its own
    /// outcome; a failed step skips the steps depending on it and nothing is
    /// rolled back.
    pub async fn process_client_interaction(
        &self,
        phone: &PhoneNumber,
        message: &str,
        context: &InteractionContext,
    ) -> InteractionReport {
        let mut report = InteractionReport {
            client_created: false,
            lookup: StepOutcome::Skipped,
            generation: StepOutcome::Skipped,
            delivery: StepOutcome::Skipped,
            reply_text: None,
            receipt: None,
        };

        let client = match self.lookup_or_create_client(phone).await {
            Ok((client, created)) => {
                report.client_created = created;
                report.lookup = StepOutcome::Completed;
                client
            }
            Err(reason) => {
                report.lookup = StepOutcome::Failed(reason);
                return report;
            }
        };

        let display_name = client.display_name.clone().unwrap_or_else(|| phone.redacted());
        let prompt = match self.prompts.reply_prompt(&PromptInput {
            client_name: &display_name,
            language: &context.language,
            current_step: &context.current_step,
            inbound_message: message,
            context_note: context.context_note.as_deref(),
        }) {
            Ok(prompt) => prompt,
            Err(error) => {
                report.generation = StepOutcome::Failed(format!("prompt render failed: {error}"));
                return report;
            }
        };

        let reply = match self.generate_reply(&prompt, &self.generation_defaults).await {
            Ok(reply) => {
                report.generation = StepOutcome::Completed;
                report.reply_text = Some(reply.text.clone());
                reply
            }
            Err(error) => {
                report.generation = StepOutcome::Failed(error.to_string());
                return report;
            }
        };

        match self.send_message(phone, &reply.text).await {
            Ok(receipt) => {
                report.delivery = StepOutcome::Completed;
                report.receipt = Some(receipt);
            }
            Err(error) => {
                warn!(
                    event_name = "facade.delivery_failed",
                    to = %phone.redacted(),
                    error = %error,
                    "reply generated but not delivered"
                );
                report.delivery = StepOutcome::Failed(error.to_string());
            }
        }

        report
    }

    async fn lookup_or_create_client(
        &self,
        phone: &PhoneNumber,
    ) -> Result<(Client, bool), String> {
        match self.clients.find_by_phone(&phone.canonical).await {
            Ok(Some(mut client)) => {
                client.touch();
                if let Err(error) = self.clients.upsert(client.clone()).await {
                    return Err(format!("client activity update failed: {error}"));
                }
                Ok((client, false))
            }
            Ok(None) => {
                let client = Client::first_contact(phone.canonical.clone(), None);
                match self.clients.upsert(client.clone()).await {
                    Ok(()) => Ok((client, true)),
                    Err(error) => Err(format!("client creation failed: {error}")),
                }
            }
            Err(error) => Err(format!("client lookup failed: {error}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use citabot_core::config::AppConfig;
    use citabot_core::phone::normalize;
    use citabot_db::repositories::ClientRepository;
    use citabot_db::{connect_with_settings, migrations, DbPool};

    use crate::ai::{GeneratedReply, GenerationOptions, ReplyGenerator, TokenUsage};
    use crate::error::ProviderError;
    use crate::facade::{CapabilityStatus, IntegrationHub, InteractionContext, StepOutcome};
    use crate::messaging::NoopMessagingClient;

    struct CannedGenerator {
        fail: bool,
    }

    #[async_trait]
    impl ReplyGenerator for CannedGenerator {
        async fn generate_reply(
            &self,
            _prompt: &str,
            _options: &GenerationOptions,
        ) -> Result<GeneratedReply, ProviderError> {
            if self.fail {
                return Err(ProviderError::Unavailable {
                    provider: "ai",
                    reason: "canned outage".to_string(),
                });
            }
            Ok(GeneratedReply {
                text: "¡Hola! ¿Qué servicio necesitas?".to_string(),
                usage: TokenUsage { prompt_tokens: 42, completion_tokens: 12 },
            })
        }

        async fn probe(&self) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    async fn pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        pool
    }

    async fn bare_hub() -> IntegrationHub {
        let mut config = AppConfig::default();
        config.llm.api_key = None;
        config.llm.base_url = None;
        IntegrationHub::from_config(&config, pool().await).expect("hub builds")
    }

    fn context() -> InteractionContext {
        InteractionContext {
            current_step: "collecting_info".to_string(),
            language: "es".to_string(),
            context_note: None,
        }
    }

    #[tokio::test]
    async fn unconfigured_capabilities_surface_as_not_configured() {
        let hub = bare_hub().await;
        let phone = normalize("+34600111222").expect("valid phone");

        let error = hub.send_message(&phone, "hola").await.expect_err("messaging unwired");
        assert_eq!(error, ProviderError::NotConfigured { provider: "messaging" });

        let error = hub
            .list_scheduled_events("https://sched.example/invitees/1")
            .await
            .expect_err("scheduling unwired");
        assert_eq!(error, ProviderError::NotConfigured { provider: "scheduling" });
    }

    #[tokio::test]
    async fn health_reports_storage_ready_and_capabilities_not_configured() {
        let hub = bare_hub().await;
        let health = hub.health_check().await;

        assert!(health.is_ready());
        assert_eq!(health.storage.status, "ready");
        assert_eq!(health.messaging, CapabilityStatus::NotConfigured);
        assert_eq!(health.ai, CapabilityStatus::NotConfigured);
        assert_eq!(health.scheduling, CapabilityStatus::NotConfigured);
    }

    #[tokio::test]
    async fn health_degrades_when_storage_is_gone_but_capabilities_stand_alone() {
        let mut config = AppConfig::default();
        config.llm.api_key = None;
        config.llm.base_url = None;
        let pool = pool().await;
        let hub = IntegrationHub::from_config(&config, pool.clone())
            .expect("hub builds")
            .with_messaging(Arc::new(NoopMessagingClient));
        pool.close().await;

        let health = hub.health_check().await;
        assert!(!health.is_ready());
        assert_eq!(health.storage.status, "degraded");
        assert_eq!(health.messaging, CapabilityStatus::Ready);
    }

    #[tokio::test]
    async fn interaction_creates_client_and_reports_every_step_completed() {
        let hub = bare_hub()
            .await
            .with_messaging(Arc::new(NoopMessagingClient))
            .with_ai(Arc::new(CannedGenerator { fail: false }));
        let phone = normalize("+34600111222").expect("valid phone");

        let report = hub.process_client_interaction(&phone, "hola", &context()).await;

        assert!(report.fully_succeeded());
        assert!(report.client_created);
        assert!(report.reply_text.as_deref().unwrap_or("").contains("servicio"));
        assert!(report.receipt.is_some());
    }

    #[tokio::test]
    async fn second_interaction_reuses_the_client() {
        let hub = bare_hub()
            .await
            .with_messaging(Arc::new(NoopMessagingClient))
            .with_ai(Arc::new(CannedGenerator { fail: false }));
        let phone = normalize("+34600111222").expect("valid phone");

        let first = hub.process_client_interaction(&phone, "hola", &context()).await;
        let second = hub.process_client_interaction(&phone, "sigo aquí", &context()).await;

        assert!(first.client_created);
        assert!(!second.client_created);
    }

    #[tokio::test]
    async fn generation_failure_keeps_lookup_success_and_skips_delivery() {
        let hub = bare_hub()
            .await
            .with_messaging(Arc::new(NoopMessagingClient))
            .with_ai(Arc::new(CannedGenerator { fail: true }));
        let phone = normalize("+34600111222").expect("valid phone");

        let report = hub.process_client_interaction(&phone, "hola", &context()).await;

        assert!(report.lookup.succeeded());
        assert!(matches!(report.generation, StepOutcome::Failed(_)));
        assert_eq!(report.delivery, StepOutcome::Skipped);
        assert!(!report.fully_succeeded());

        // The partial failure must not roll back the client creation.
        let second = hub.process_client_interaction(&phone, "hola otra vez", &context()).await;
        assert!(!second.client_created);
    }

    #[tokio::test]
    async fn missing_ai_marks_generation_failed_not_panicking() {
        let hub = bare_hub().await.with_messaging(Arc::new(NoopMessagingClient));
        let phone = normalize("+34600111222").expect("valid phone");

        let report = hub.process_client_interaction(&phone, "hola", &context()).await;
        assert!(report.lookup.succeeded());
        assert!(matches!(report.generation, StepOutcome::Failed(_)));
        assert_eq!(report.delivery, StepOutcome::Skipped);
    }

    #[tokio::test]
    async fn client_repository_can_be_replaced_for_tests() {
        use citabot_core::domain::client::Client;
        use citabot_db::repositories::InMemoryClientRepository;

        let clients: Arc<dyn ClientRepository> = Arc::new(InMemoryClientRepository::default());
        clients
            .upsert(Client::first_contact("+34600111222", Some("Marta".to_string())))
            .await
            .expect("seed");

        let hub = bare_hub()
            .await
            .with_client_repository(Arc::clone(&clients))
            .with_messaging(Arc::new(NoopMessagingClient))
            .with_ai(Arc::new(CannedGenerator { fail: false }));
        let phone = normalize("+34600111222").expect("valid phone");

        let report = hub.process_client_interaction(&phone, "hola", &context()).await;
        assert!(!report.client_created, "seeded client must be found, not recreated");
    }
}
