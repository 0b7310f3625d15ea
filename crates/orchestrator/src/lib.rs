//! Orchestration runtime - inbound events to conversation effects
//!
//! This crate is the driver of the citabot system. For each inbound webhook
//! event it:
//! - normalizes the sender phone into the canonical identity key
//! - serializes work per phone number (`single_flight`) so racing webhook
//!   deliveries cannot interleave transitions
//! - analyzes message intent (`intent`) - language, restart and human-handoff
//!   signals, service and time mentions
//! - drives the conversation state machine and persists the result
//! - runs outbound side effects through the Integration Façade with a
//!   bounded retry policy (`retry`)
//! - records an audit event for every personal-data read and write
//!
//! # Key Types
//!
//! - `Orchestrator` - the pipeline (see `runtime` module)
//! - `IntentAnalyzer` - deterministic keyword/heuristic extractor
//! - `RetryPolicy` - capped exponential backoff, configuration-driven
//!
//! # Failure Principle
//!
//! Provider failures never advance a conversation. They increment the
//! attempt counter and, past the configured ceiling, hand the conversation
//! to a human instead of looping.

pub mod inbound;
pub mod intent;
pub mod retry;
pub mod runtime;
pub mod single_flight;

pub use inbound::{InboundMessage, SchedulingCallback, SchedulingEventKind};
pub use intent::{ExtractedIntent, IntentAnalyzer};
pub use retry::RetryPolicy;
pub use runtime::{CallbackOutcome, InboundOutcome, Orchestrator, OrchestratorError};
pub use single_flight::PhoneLockArena;
