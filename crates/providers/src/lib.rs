//! Capability providers and the Integration Façade
//!
//! This crate wraps every external service citabot talks to behind a narrow
//! async trait, and aggregates them into one [`IntegrationHub`]:
//! - **Messaging** (`messaging`) - WhatsApp Business Cloud API send path
//! - **AI generation** (`ai`) - reply text generation with usage metadata
//! - **Scheduling** (`scheduling`) - scheduled-event reads
//! - **Prompts** (`prompt`) - tera templates binding client + context
//! - **Façade** (`facade`) - lazy wiring, per-provider health, composite ops
//!
//! # Architecture
//!
//! ```text
//! Orchestrator → IntegrationHub → { MessagingClient | ReplyGenerator | SchedulingClient }
//!                     ↓
//!                storage (required) + per-capability health
//! ```
//!
//! Each capability is wired only when its credentials are present in config;
//! a missing capability surfaces as `ProviderError::NotConfigured`, never as
//! a panic. The façade does not retry; retry policy belongs to the
//! orchestrator, where it is observable and testable.

pub mod ai;
pub mod error;
pub mod facade;
pub mod messaging;
pub mod prompt;
pub mod scheduling;

pub use ai::{GeneratedReply, GenerationOptions, HttpReplyGenerator, ReplyGenerator, TokenUsage};
pub use error::ProviderError;
pub use facade::{
    CapabilityStatus, HubHealth, IntegrationHub, InteractionContext, InteractionReport,
    StepOutcome, StorageProbe,
};
pub use messaging::{MessageReceipt, MessagingClient, NoopMessagingClient, WhatsAppClient};
pub use prompt::{PromptBuilder, PromptInput};
pub use scheduling::{
    CalendarApiClient, NoopSchedulingClient, ScheduledEvent, SchedulingClient,
};
