pub mod audit_sink;
pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod retention;

pub use audit_sink::SqlAuditSink;
pub use connection::{connect, connect_with_settings, DbPool};
pub use retention::{PurgeSummary, RetentionSweeper};
