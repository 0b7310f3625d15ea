use chrono::{DateTime, Utc};
use sqlx::Row;

use citabot_core::domain::client::{Client, ClientId, ClientStatus};

use super::{ClientRepository, RepositoryError};
use crate::DbPool;

pub struct SqlClientRepository {
    pool: DbPool,
}

impl SqlClientRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ClientRepository for SqlClientRepository {
    async fn find_by_phone(&self, phone: &str) -> Result<Option<Client>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, phone, display_name, email, status, created_at, last_activity
             FROM clients WHERE phone = ?1",
        )
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;

        row.map(decode_client).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Client>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, phone, display_name, email, status, created_at, last_activity
             FROM clients WHERE email = ?1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.map(decode_client).transpose()
    }

    async fn upsert(&self, client: Client) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO clients (id, phone, display_name, email, status, created_at, last_activity)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(phone) DO UPDATE SET
               display_name = COALESCE(excluded.display_name, clients.display_name),
               email = COALESCE(excluded.email, clients.email),
               status = excluded.status,
               last_activity = excluded.last_activity",
        )
        .bind(&client.id.0)
        .bind(&client.phone)
        .bind(&client.display_name)
        .bind(&client.email)
        .bind(client.status.as_str())
        .bind(client.created_at)
        .bind(client.last_activity)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn decode_client(row: sqlx::sqlite::SqliteRow) -> Result<Client, RepositoryError> {
    let status_raw: String = row.try_get("status").map_err(RepositoryError::Database)?;
    let status = ClientStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown client status `{status_raw}`")))?;

    Ok(Client {
        id: ClientId(row.try_get("id")?),
        phone: row.try_get("phone")?,
        display_name: row.try_get("display_name")?,
        email: row.try_get("email")?,
        status,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        last_activity: row.try_get::<DateTime<Utc>, _>("last_activity")?,
    })
}

#[cfg(test)]
mod tests {
    use citabot_core::domain::client::{Client, ClientStatus};

    use crate::repositories::{ClientRepository, SqlClientRepository};
    use crate::{connect_with_settings, migrations};

    async fn repo() -> SqlClientRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        SqlClientRepository::new(pool)
    }

    #[tokio::test]
    async fn round_trips_a_first_contact_client() {
        let repo = repo().await;
        let client = Client::first_contact("+34600111222", Some("Marta".to_string()));

        repo.upsert(client.clone()).await.expect("upsert");
        let found = repo.find_by_phone("+34600111222").await.expect("find").expect("present");

        assert_eq!(found.id, client.id);
        assert_eq!(found.display_name.as_deref(), Some("Marta"));
        assert_eq!(found.status, ClientStatus::Active);
    }

    #[tokio::test]
    async fn upsert_on_same_phone_preserves_id_and_created_at() {
        let repo = repo().await;
        let original = Client::first_contact("+34600111222", None);
        repo.upsert(original.clone()).await.expect("first upsert");

        let mut second = Client::first_contact("+34600111222", Some("Marta".to_string()));
        second.touch();
        repo.upsert(second).await.expect("second upsert");

        let found = repo.find_by_phone("+34600111222").await.expect("find").expect("present");
        assert_eq!(found.id, original.id, "identity must survive re-contact");
        assert_eq!(found.display_name.as_deref(), Some("Marta"));
    }

    #[tokio::test]
    async fn email_lookup_finds_the_client() {
        let repo = repo().await;
        let mut client = Client::first_contact("+34600111222", None);
        client.email = Some("marta@example.com".to_string());
        repo.upsert(client.clone()).await.expect("upsert");

        let found =
            repo.find_by_email("marta@example.com").await.expect("find").expect("present");
        assert_eq!(found.phone, "+34600111222");

        let missing = repo.find_by_email("nobody@example.com").await.expect("find");
        assert!(missing.is_none());
    }
}
