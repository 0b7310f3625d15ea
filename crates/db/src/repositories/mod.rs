use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use citabot_core::audit::{AuditEvent, AuditPage, AuditQuery};
use citabot_core::domain::appointment::Appointment;
use citabot_core::domain::client::{Client, ClientId};
use citabot_core::domain::conversation::ConversationState;
use citabot_core::domain::message::MessageRecord;

pub mod appointments;
pub mod audit;
pub mod clients;
pub mod conversations;
pub mod memory;
pub mod messages;

pub use appointments::SqlAppointmentRepository;
pub use audit::SqlAuditLogRepository;
pub use clients::SqlClientRepository;
pub use conversations::SqlConversationRepository;
pub use memory::{
    InMemoryAppointmentRepository, InMemoryClientRepository, InMemoryConversationRepository,
    InMemoryMessageRepository,
};
pub use messages::SqlMessageRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait ClientRepository: Send + Sync {
    async fn find_by_phone(&self, phone: &str) -> Result<Option<Client>, RepositoryError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<Client>, RepositoryError>;
    /// Insert or update keyed on phone. The stored `id` and `created_at`
    /// survive updates.
    async fn upsert(&self, client: Client) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find_by_phone(&self, phone: &str)
        -> Result<Option<ConversationState>, RepositoryError>;
    /// Upsert keyed on phone, the sole serialization point for racing
    /// webhook deliveries. `client_ref`, `booking_ref`, and
    /// `last_message_id` are preserved when the incoming record leaves them
    /// unset.
    async fn upsert(&self, state: ConversationState) -> Result<(), RepositoryError>;
    /// Remove conversations idle since before `cutoff`, up to `limit` rows.
    /// Returns the number removed; used by the retention sweeper.
    async fn purge_idle_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn append(&self, message: MessageRecord) -> Result<(), RepositoryError>;
    async fn list_for_owner(
        &self,
        owner_phone: &str,
        limit: u32,
    ) -> Result<Vec<MessageRecord>, RepositoryError>;
}

#[async_trait]
pub trait AppointmentRepository: Send + Sync {
    async fn find_by_external_ref(
        &self,
        external_ref: &str,
    ) -> Result<Option<Appointment>, RepositoryError>;
    async fn list_for_client(
        &self,
        client_ref: &ClientId,
    ) -> Result<Vec<Appointment>, RepositoryError>;
    async fn save(&self, appointment: Appointment) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn append(&self, event: AuditEvent) -> Result<(), RepositoryError>;
    async fn query(&self, query: &AuditQuery) -> Result<AuditPage, RepositoryError>;
    /// All events touching a subject inside a window, oldest first. Feeds
    /// the GDPR report builder.
    async fn events_for_subject(
        &self,
        subject: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AuditEvent>, RepositoryError>;
    /// Events since `since`, oldest first. Feeds the suspicious-pattern
    /// detector.
    async fn events_since(&self, since: DateTime<Utc>)
        -> Result<Vec<AuditEvent>, RepositoryError>;
}
