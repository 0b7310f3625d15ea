use chrono::{DateTime, Utc};
use sqlx::Row;

use citabot_core::conversation::ConversationStep;
use citabot_core::domain::client::ClientId;
use citabot_core::domain::conversation::{CollectedData, ConversationState};

use super::{ConversationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn find_by_phone(
        &self,
        phone: &str,
    ) -> Result<Option<ConversationState>, RepositoryError> {
        let row = sqlx::query(
            "SELECT phone, current_step, user_data, attempts_count, language, last_updated,
                    client_ref, booking_ref, last_message_id
             FROM conversations WHERE phone = ?1",
        )
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;

        row.map(decode_state).transpose()
    }

    async fn upsert(&self, state: ConversationState) -> Result<(), RepositoryError> {
        let user_data = serde_json::to_string(&state.data)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        // Linkage and dedup columns fall back to the stored value so a racing
        // writer that loaded before them cannot blank them out.
        sqlx::query(
            "INSERT INTO conversations
               (phone, current_step, user_data, attempts_count, language, last_updated,
                client_ref, booking_ref, last_message_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(phone) DO UPDATE SET
               current_step = excluded.current_step,
               user_data = excluded.user_data,
               attempts_count = excluded.attempts_count,
               language = excluded.language,
               last_updated = excluded.last_updated,
               client_ref = COALESCE(excluded.client_ref, conversations.client_ref),
               booking_ref = COALESCE(excluded.booking_ref, conversations.booking_ref),
               last_message_id = COALESCE(excluded.last_message_id, conversations.last_message_id)",
        )
        .bind(&state.phone)
        .bind(state.step.as_str())
        .bind(user_data)
        .bind(i64::from(state.attempts_count))
        .bind(&state.language)
        .bind(state.last_updated)
        .bind(state.client_ref.as_ref().map(|id| id.0.clone()))
        .bind(&state.booking_ref)
        .bind(&state.last_message_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn purge_idle_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<u64, RepositoryError> {
        let affected = sqlx::query(
            "DELETE FROM conversations WHERE phone IN (
                 SELECT phone FROM conversations WHERE last_updated < ?1 LIMIT ?2
             )",
        )
        .bind(cutoff)
        .bind(i64::from(limit))
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(affected)
    }
}

fn decode_state(row: sqlx::sqlite::SqliteRow) -> Result<ConversationState, RepositoryError> {
    let step_raw: String = row.try_get("current_step")?;
    let step = ConversationStep::parse(&step_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown conversation step `{step_raw}`"))
    })?;

    let user_data_raw: String = row.try_get("user_data")?;
    let data: CollectedData = serde_json::from_str(&user_data_raw)
        .map_err(|error| RepositoryError::Decode(format!("bad user_data payload: {error}")))?;

    let attempts: i64 = row.try_get("attempts_count")?;

    Ok(ConversationState {
        phone: row.try_get("phone")?,
        step,
        data,
        attempts_count: u32::try_from(attempts).unwrap_or(0),
        language: row.try_get("language")?,
        last_updated: row.try_get::<DateTime<Utc>, _>("last_updated")?,
        client_ref: row.try_get::<Option<String>, _>("client_ref")?.map(ClientId),
        booking_ref: row.try_get("booking_ref")?,
        last_message_id: row.try_get("last_message_id")?,
    })
}
