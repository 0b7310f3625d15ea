//! Retention-driven purge of personal data.
//!
//! Ordinary conversation data (messages, idle conversations, finished
//! appointments) is removed after `conversation_days`; audit and incident
//! rows obey a strictly longer floor. Deletes run in independently-committed
//! batches so the job can be aborted between batches without leaving a
//! half-applied sweep, and a second consecutive run removes nothing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::info;

use citabot_core::config::RetentionConfig;

use crate::repositories::RepositoryError;
use crate::DbPool;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PurgeSummary {
    pub messages_removed: u64,
    pub conversations_removed: u64,
    pub appointments_removed: u64,
    pub audit_removed: u64,
    pub aborted: bool,
}

pub struct RetentionSweeper {
    pool: DbPool,
    conversation_days: i64,
    audit_floor_days: i64,
    batch_size: u32,
    abort: Arc<AtomicBool>,
}

impl RetentionSweeper {
    pub fn new(pool: DbPool, config: &RetentionConfig) -> Self {
        Self {
            pool,
            conversation_days: i64::from(config.conversation_days),
            audit_floor_days: i64::from(config.audit_floor_days),
            batch_size: config.purge_batch_size,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for cancelling a running sweep between batches.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    pub async fn cleanup_old_logs(&self) -> Result<PurgeSummary, RepositoryError> {
        let conversation_cutoff = Utc::now() - Duration::days(self.conversation_days);
        let audit_cutoff = Utc::now() - Duration::days(self.audit_floor_days);

        let mut summary = PurgeSummary::default();

        if !self.aborted(&mut summary) {
            summary.messages_removed = self
                .purge_batched(
                    "DELETE FROM messages WHERE rowid IN (
                         SELECT rowid FROM messages WHERE timestamp < ?1 LIMIT ?2
                     )",
                    conversation_cutoff,
                )
                .await?;
        }

        if !self.aborted(&mut summary) {
            summary.conversations_removed = self
                .purge_batched(
                    "DELETE FROM conversations WHERE phone IN (
                         SELECT phone FROM conversations WHERE last_updated < ?1 LIMIT ?2
                     )",
                    conversation_cutoff,
                )
                .await?;
        }

        if !self.aborted(&mut summary) {
            summary.appointments_removed = self
                .purge_batched(
                    "DELETE FROM appointments WHERE rowid IN (
                         SELECT rowid FROM appointments
                         WHERE updated_at < ?1 AND status IN ('cancelled', 'completed')
                         LIMIT ?2
                     )",
                    conversation_cutoff,
                )
                .await?;
        }

        if !self.aborted(&mut summary) {
            summary.audit_removed = self
                .purge_batched(
                    "DELETE FROM audit_log WHERE rowid IN (
                         SELECT rowid FROM audit_log WHERE timestamp < ?1 LIMIT ?2
                     )",
                    audit_cutoff,
                )
                .await?;
        }

        info!(
            event_name = "retention.purge_completed",
            messages_removed = summary.messages_removed,
            conversations_removed = summary.conversations_removed,
            appointments_removed = summary.appointments_removed,
            audit_removed = summary.audit_removed,
            aborted = summary.aborted,
            "retention purge finished"
        );

        Ok(summary)
    }

    fn aborted(&self, summary: &mut PurgeSummary) -> bool {
        if self.abort.load(Ordering::SeqCst) {
            summary.aborted = true;
            return true;
        }
        false
    }

    async fn purge_batched(
        &self,
        statement: &str,
        cutoff: chrono::DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let mut total = 0u64;
        loop {
            if self.abort.load(Ordering::SeqCst) {
                break;
            }

            let affected = sqlx::query(statement)
                .bind(cutoff)
                .bind(i64::from(self.batch_size))
                .execute(&self.pool)
                .await?
                .rows_affected();
            total += affected;

            if affected < u64::from(self.batch_size) {
                break;
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use citabot_core::audit::AuditEvent;
    use citabot_core::config::RetentionConfig;
    use citabot_core::domain::conversation::ConversationState;
    use citabot_core::domain::message::MessageRecord;
    use citabot_core::{AuditCategory, AuditSeverity};

    use super::RetentionSweeper;
    use crate::repositories::{
        AuditLogRepository, ConversationRepository, MessageRepository, SqlAuditLogRepository,
        SqlConversationRepository, SqlMessageRepository,
    };
    use crate::{connect_with_settings, migrations, DbPool};

    fn retention_config() -> RetentionConfig {
        RetentionConfig {
            conversation_days: 365,
            audit_floor_days: 730,
            purge_batch_size: 2,
            suspicion_window_minutes: 15,
            suspicion_medium: 3,
            suspicion_high: 5,
            suspicion_critical: 10,
        }
    }

    async fn pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        pool
    }

    fn aged_message(days_old: i64, index: usize) -> MessageRecord {
        let mut message = MessageRecord::inbound("+34600111222", format!("m{index}"));
        message.timestamp = Utc::now() - Duration::days(days_old);
        message
    }

    fn aged_audit(days_old: i64) -> AuditEvent {
        let mut event = AuditEvent::new(
            "data_access",
            AuditCategory::DataAccess,
            AuditSeverity::Info,
            "agent-1",
        );
        event.occurred_at = Utc::now() - Duration::days(days_old);
        event
    }

    #[tokio::test]
    async fn purge_removes_expired_rows_and_reports_counts_per_category() {
        let pool = pool().await;
        let messages = SqlMessageRepository::new(pool.clone());
        let conversations = SqlConversationRepository::new(pool.clone());
        let audit = SqlAuditLogRepository::new(pool.clone());

        for index in 0..5 {
            messages.append(aged_message(400, index)).await.expect("old message");
        }
        messages.append(aged_message(1, 99)).await.expect("fresh message");

        let mut stale_conversation = ConversationState::opened("+34600111333", "es");
        stale_conversation.last_updated = Utc::now() - Duration::days(400);
        conversations.upsert(stale_conversation).await.expect("stale conversation");
        conversations
            .upsert(ConversationState::opened("+34600111222", "es"))
            .await
            .expect("fresh conversation");

        // Audit rows older than conversation retention but inside the audit
        // floor must survive.
        audit.append(aged_audit(400)).await.expect("mid-age audit");
        audit.append(aged_audit(800)).await.expect("expired audit");

        let sweeper = RetentionSweeper::new(pool, &retention_config());
        let summary = sweeper.cleanup_old_logs().await.expect("purge");

        assert_eq!(summary.messages_removed, 5);
        assert_eq!(summary.conversations_removed, 1);
        assert_eq!(summary.audit_removed, 1);
        assert!(!summary.aborted);

        let remaining = messages.list_for_owner("+34600111222", 50).await.expect("list");
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test]
    async fn second_consecutive_run_removes_nothing() {
        let pool = pool().await;
        let messages = SqlMessageRepository::new(pool.clone());
        for index in 0..3 {
            messages.append(aged_message(400, index)).await.expect("old message");
        }

        let sweeper = RetentionSweeper::new(pool, &retention_config());
        let first = sweeper.cleanup_old_logs().await.expect("first run");
        assert_eq!(first.messages_removed, 3);

        let second = sweeper.cleanup_old_logs().await.expect("second run");
        assert_eq!(second.messages_removed, 0);
        assert_eq!(second.conversations_removed, 0);
        assert_eq!(second.appointments_removed, 0);
        assert_eq!(second.audit_removed, 0);
    }

    #[tokio::test]
    async fn abort_skips_remaining_batches_and_leaves_data_consistent() {
        let pool = pool().await;
        let messages = SqlMessageRepository::new(pool.clone());
        for index in 0..4 {
            messages.append(aged_message(400, index)).await.expect("old message");
        }

        let sweeper = RetentionSweeper::new(pool, &retention_config());
        let handle = sweeper.abort_handle();

        handle.store(true, std::sync::atomic::Ordering::SeqCst);
        let aborted = sweeper.cleanup_old_logs().await.expect("aborted run");
        assert!(aborted.aborted);
        assert_eq!(aborted.messages_removed, 0, "no batch runs after an abort");

        handle.store(false, std::sync::atomic::Ordering::SeqCst);
        let resumed = sweeper.cleanup_old_logs().await.expect("resumed run");
        assert!(!resumed.aborted);
        assert_eq!(resumed.messages_removed, 4, "a resumed run completes the sweep");
    }
}
