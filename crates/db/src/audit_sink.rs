//! Storage-backed audit sink.
//!
//! `emit` hands the event to a background writer over an unbounded channel,
//! so the message-delivery path never waits on audit I/O. A failed write is
//! logged to the tracing fallback channel and dropped; it never propagates.

use tokio::sync::mpsc;
use tracing::warn;

use citabot_core::audit::{AuditEvent, AuditSink};

use crate::repositories::audit::insert_event;
use crate::DbPool;

#[derive(Clone)]
pub struct SqlAuditSink {
    sender: mpsc::UnboundedSender<AuditEvent>,
}

impl SqlAuditSink {
    /// Start the background writer on the current tokio runtime.
    pub fn spawn(pool: DbPool) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<AuditEvent>();

        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                if let Err(error) = insert_event(&pool, &event).await {
                    warn!(
                        event_name = "audit.sink.fallback",
                        event_type = %event.event_type,
                        subject = event.subject.as_deref().unwrap_or("none"),
                        error = %error,
                        "audit write failed; event recorded to fallback log only"
                    );
                }
            }
        });

        Self { sender }
    }
}

impl AuditSink for SqlAuditSink {
    fn emit(&self, event: AuditEvent) {
        if let Err(error) = self.sender.send(event) {
            let event = error.0;
            warn!(
                event_name = "audit.sink.writer_stopped",
                event_type = %event.event_type,
                "audit writer is gone; event recorded to fallback log only"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use citabot_core::audit::{AuditQuery, AuditSink};
    use citabot_core::data_access_event;

    use super::SqlAuditSink;
    use crate::repositories::{AuditLogRepository, SqlAuditLogRepository};
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn emitted_events_land_in_the_audit_table() {
        let pool =
            connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");

        let sink = SqlAuditSink::spawn(pool.clone());
        let repo = SqlAuditLogRepository::new(pool);

        sink.emit(
            data_access_event("+34600111222", "messages", "support", "consent", "agent-1")
                .expect("valid event"),
        );

        // The writer drains asynchronously; poll briefly.
        let mut total = 0;
        for _ in 0..50 {
            total = repo.query(&AuditQuery::default()).await.expect("query").total;
            if total == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn emit_on_closed_pool_does_not_error_toward_the_caller() {
        let pool =
            connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");

        let sink = SqlAuditSink::spawn(pool.clone());
        pool.close().await;

        // Must not panic or surface an error; the failure goes to the
        // fallback channel.
        sink.emit(
            data_access_event("+34600111222", "messages", "support", "consent", "agent-1")
                .expect("valid event"),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
