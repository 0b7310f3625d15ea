use chrono::{DateTime, Utc};
use sqlx::Row;

use citabot_core::domain::message::{MessageDirection, MessageRecord};

use super::{MessageRepository, RepositoryError};
use crate::DbPool;

pub struct SqlMessageRepository {
    pool: DbPool,
}

impl SqlMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MessageRepository for SqlMessageRepository {
    async fn append(&self, message: MessageRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO messages (id, owner, content, direction, encrypted, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&message.id)
        .bind(&message.owner_phone)
        .bind(&message.content)
        .bind(message.direction.as_str())
        .bind(message.encrypted)
        .bind(message.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_owner(
        &self,
        owner_phone: &str,
        limit: u32,
    ) -> Result<Vec<MessageRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, owner, content, direction, encrypted, timestamp
             FROM messages WHERE owner = ?1
             ORDER BY timestamp DESC LIMIT ?2",
        )
        .bind(owner_phone)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(decode_message).collect()
    }
}

fn decode_message(row: sqlx::sqlite::SqliteRow) -> Result<MessageRecord, RepositoryError> {
    let direction_raw: String = row.try_get("direction")?;
    let direction = MessageDirection::parse(&direction_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown message direction `{direction_raw}`"))
    })?;

    Ok(MessageRecord {
        id: row.try_get("id")?,
        owner_phone: row.try_get("owner")?,
        content: row.try_get("content")?,
        direction,
        encrypted: row.try_get("encrypted")?,
        timestamp: row.try_get::<DateTime<Utc>, _>("timestamp")?,
    })
}

#[cfg(test)]
mod tests {
    use citabot_core::domain::message::{MessageDirection, MessageRecord};

    use crate::repositories::{MessageRepository, SqlMessageRepository};
    use crate::{connect_with_settings, migrations};

    async fn repo() -> SqlMessageRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        SqlMessageRepository::new(pool)
    }

    #[tokio::test]
    async fn appended_messages_come_back_newest_first() {
        let repo = repo().await;
        repo.append(MessageRecord::inbound("+34600111222", "hola")).await.expect("first");
        repo.append(MessageRecord::outbound("+34600111222", "¡hola! ¿qué servicio?"))
            .await
            .expect("second");

        let messages = repo.list_for_owner("+34600111222", 10).await.expect("list");
        assert_eq!(messages.len(), 2);
        assert!(messages[0].timestamp >= messages[1].timestamp);
        assert_eq!(messages[1].direction, MessageDirection::Inbound);
    }

    #[tokio::test]
    async fn listing_respects_owner_and_limit() {
        let repo = repo().await;
        for index in 0..5 {
            repo.append(MessageRecord::inbound("+34600111222", format!("m{index}")))
                .await
                .expect("append");
        }
        repo.append(MessageRecord::inbound("+34600999888", "other")).await.expect("append");

        let messages = repo.list_for_owner("+34600111222", 3).await.expect("list");
        assert_eq!(messages.len(), 3);
        assert!(messages.iter().all(|message| message.owner_phone == "+34600111222"));
    }

    #[tokio::test]
    async fn encrypted_flag_round_trips() {
        let repo = repo().await;
        let record = MessageRecord::new(
            "+34600111222",
            "[media]",
            MessageDirection::Inbound,
            true,
        );
        repo.append(record).await.expect("append");

        let messages = repo.list_for_owner("+34600111222", 1).await.expect("list");
        assert!(messages[0].encrypted);
    }
}
