use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite};

use citabot_core::audit::{AuditCategory, AuditEvent, AuditPage, AuditQuery, AuditSeverity};

use super::{AuditLogRepository, RepositoryError};
use crate::DbPool;

/// Append and query access to the `audit_log` table. There is deliberately
/// no update or single-row delete here; rows leave only through the
/// retention sweeper.
pub struct SqlAuditLogRepository {
    pool: DbPool,
}

impl SqlAuditLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub(crate) async fn insert_event(
    pool: &DbPool,
    event: &AuditEvent,
) -> Result<(), RepositoryError> {
    let details = serde_json::to_string(&event.details)
        .map_err(|error| RepositoryError::Decode(error.to_string()))?;

    sqlx::query(
        "INSERT INTO audit_log
           (event_id, event_type, category, severity, subject, actor, ip_address, user_agent,
            details, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )
    .bind(&event.event_id)
    .bind(&event.event_type)
    .bind(event.category.as_str())
    .bind(event.severity.as_str())
    .bind(&event.subject)
    .bind(&event.actor)
    .bind(&event.ip_address)
    .bind(&event.user_agent)
    .bind(details)
    .bind(event.occurred_at)
    .execute(pool)
    .await?;

    Ok(())
}

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, query: &AuditQuery) {
    builder.push(" WHERE 1 = 1");
    if let Some(event_type) = &query.event_type {
        builder.push(" AND event_type = ").push_bind(event_type.clone());
    }
    if let Some(category) = query.category {
        builder.push(" AND category = ").push_bind(category.as_str());
    }
    if let Some(severity) = query.severity {
        builder.push(" AND severity = ").push_bind(severity.as_str());
    }
    if let Some(subject) = &query.subject {
        builder.push(" AND subject = ").push_bind(subject.clone());
    }
    if let Some(actor) = &query.actor {
        builder.push(" AND actor = ").push_bind(actor.clone());
    }
    if let Some(ip_address) = &query.ip_address {
        builder.push(" AND ip_address = ").push_bind(ip_address.clone());
    }
    if let Some(start) = query.start {
        builder.push(" AND timestamp >= ").push_bind(start);
    }
    if let Some(end) = query.end {
        builder.push(" AND timestamp <= ").push_bind(end);
    }
}

#[async_trait::async_trait]
impl AuditLogRepository for SqlAuditLogRepository {
    async fn append(&self, event: AuditEvent) -> Result<(), RepositoryError> {
        insert_event(&self.pool, &event).await
    }

    async fn query(&self, query: &AuditQuery) -> Result<AuditPage, RepositoryError> {
        let mut count_builder = QueryBuilder::new("SELECT COUNT(*) AS total FROM audit_log");
        push_filters(&mut count_builder, query);
        let total: i64 =
            count_builder.build().fetch_one(&self.pool).await?.try_get("total")?;

        let mut page_builder = QueryBuilder::new(
            "SELECT event_id, event_type, category, severity, subject, actor, ip_address,
                    user_agent, details, timestamp
             FROM audit_log",
        );
        push_filters(&mut page_builder, query);
        page_builder
            .push(" ORDER BY timestamp DESC LIMIT ")
            .push_bind(i64::from(query.effective_limit()))
            .push(" OFFSET ")
            .push_bind(i64::from(query.effective_offset()));

        let rows = page_builder.build().fetch_all(&self.pool).await?;
        let events =
            rows.into_iter().map(decode_event).collect::<Result<Vec<_>, _>>()?;

        Ok(AuditPage { total: u64::try_from(total).unwrap_or(0), events })
    }

    async fn events_for_subject(
        &self,
        subject: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AuditEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT event_id, event_type, category, severity, subject, actor, ip_address,
                    user_agent, details, timestamp
             FROM audit_log
             WHERE subject = ?1 AND timestamp >= ?2 AND timestamp <= ?3
             ORDER BY timestamp",
        )
        .bind(subject)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(decode_event).collect()
    }

    async fn events_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<AuditEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT event_id, event_type, category, severity, subject, actor, ip_address,
                    user_agent, details, timestamp
             FROM audit_log WHERE timestamp >= ?1
             ORDER BY timestamp",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(decode_event).collect()
    }
}

fn decode_event(row: sqlx::sqlite::SqliteRow) -> Result<AuditEvent, RepositoryError> {
    let category_raw: String = row.try_get("category")?;
    let category = AuditCategory::parse(&category_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown audit category `{category_raw}`"))
    })?;

    let severity_raw: String = row.try_get("severity")?;
    let severity = AuditSeverity::parse(&severity_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown audit severity `{severity_raw}`"))
    })?;

    let details_raw: String = row.try_get("details")?;
    let details: BTreeMap<String, String> = serde_json::from_str(&details_raw)
        .map_err(|error| RepositoryError::Decode(format!("bad details payload: {error}")))?;

    Ok(AuditEvent {
        event_id: row.try_get("event_id")?,
        event_type: row.try_get("event_type")?,
        category,
        severity,
        subject: row.try_get("subject")?,
        actor: row.try_get("actor")?,
        ip_address: row.try_get("ip_address")?,
        user_agent: row.try_get("user_agent")?,
        details,
        occurred_at: row.try_get::<DateTime<Utc>, _>("timestamp")?,
    })
}
