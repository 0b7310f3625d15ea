pub mod audit;
pub mod config;
pub mod conversation;
pub mod domain;
pub mod errors;
pub mod phone;

pub use audit::{
    build_gdpr_report, consent_event, data_access_event, detect_suspicious_patterns,
    security_incident_event, AuditCategory, AuditContext, AuditEvent, AuditPage, AuditQuery,
    AuditSeverity, AuditSink, FindingSeverity, GdprReport, InMemoryAuditSink, SuspicionThresholds,
    SuspiciousFinding, ValidationError,
};
pub use conversation::{
    BookingFlow, ConversationAction, ConversationEngine, ConversationEvent, ConversationFlow,
    ConversationStep, TransitionContext, TransitionError, TransitionOutcome,
};
pub use domain::appointment::{Appointment, AppointmentId, AppointmentStatus};
pub use domain::client::{Client, ClientId, ClientStatus};
pub use domain::conversation::{CollectedData, ConversationState};
pub use domain::message::{MessageDirection, MessageRecord};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use phone::{normalize, PhoneError, PhoneNumber};
