use chrono::{DateTime, Utc};
use sqlx::Row;

use citabot_core::domain::appointment::{Appointment, AppointmentId, AppointmentStatus};
use citabot_core::domain::client::ClientId;

use super::{AppointmentRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAppointmentRepository {
    pool: DbPool,
}

impl SqlAppointmentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AppointmentRepository for SqlAppointmentRepository {
    async fn find_by_external_ref(
        &self,
        external_ref: &str,
    ) -> Result<Option<Appointment>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, client_ref, service_ref, scheduled_at, end_at, status, external_ref,
                    notes, created_at, updated_at
             FROM appointments WHERE external_ref = ?1",
        )
        .bind(external_ref)
        .fetch_optional(&self.pool)
        .await?;

        row.map(decode_appointment).transpose()
    }

    async fn list_for_client(
        &self,
        client_ref: &ClientId,
    ) -> Result<Vec<Appointment>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, client_ref, service_ref, scheduled_at, end_at, status, external_ref,
                    notes, created_at, updated_at
             FROM appointments WHERE client_ref = ?1
             ORDER BY scheduled_at",
        )
        .bind(&client_ref.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(decode_appointment).collect()
    }

    async fn save(&self, appointment: Appointment) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO appointments
               (id, client_ref, service_ref, scheduled_at, end_at, status, external_ref, notes,
                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
               service_ref = excluded.service_ref,
               scheduled_at = excluded.scheduled_at,
               end_at = excluded.end_at,
               status = excluded.status,
               external_ref = excluded.external_ref,
               notes = excluded.notes,
               updated_at = excluded.updated_at",
        )
        .bind(&appointment.id.0)
        .bind(&appointment.client_ref.0)
        .bind(&appointment.service_ref)
        .bind(appointment.scheduled_at)
        .bind(appointment.end_at)
        .bind(appointment.status.as_str())
        .bind(&appointment.external_ref)
        .bind(&appointment.notes)
        .bind(appointment.created_at)
        .bind(appointment.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn decode_appointment(row: sqlx::sqlite::SqliteRow) -> Result<Appointment, RepositoryError> {
    let status_raw: String = row.try_get("status")?;
    let status = AppointmentStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown appointment status `{status_raw}`"))
    })?;

    Ok(Appointment {
        id: AppointmentId(row.try_get("id")?),
        client_ref: ClientId(row.try_get("client_ref")?),
        service_ref: row.try_get("service_ref")?,
        scheduled_at: row.try_get::<DateTime<Utc>, _>("scheduled_at")?,
        end_at: row.try_get::<Option<DateTime<Utc>>, _>("end_at")?,
        status,
        external_ref: row.try_get("external_ref")?,
        notes: row.try_get("notes")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use citabot_core::domain::appointment::{Appointment, AppointmentStatus};
    use citabot_core::domain::client::Client;

    use crate::repositories::{
        AppointmentRepository, ClientRepository, SqlAppointmentRepository, SqlClientRepository,
    };
    use crate::{connect_with_settings, migrations, DbPool};

    async fn pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        pool
    }

    #[tokio::test]
    async fn save_and_lookup_by_external_ref() {
        let pool = pool().await;
        let clients = SqlClientRepository::new(pool.clone());
        let appointments = SqlAppointmentRepository::new(pool);

        let client = Client::first_contact("+34600111222", None);
        clients.upsert(client.clone()).await.expect("client upsert");

        let appointment = Appointment::scheduled(client.id.clone(), "corte", Utc::now())
            .with_external_ref("cal-evt-77");
        appointments.save(appointment.clone()).await.expect("save");

        let found = appointments
            .find_by_external_ref("cal-evt-77")
            .await
            .expect("find")
            .expect("present");
        assert_eq!(found.id, appointment.id);
        assert_eq!(found.status, AppointmentStatus::Scheduled);

        let listed = appointments.list_for_client(&client.id).await.expect("list");
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn status_update_is_persisted_on_resave() {
        let pool = pool().await;
        let clients = SqlClientRepository::new(pool.clone());
        let appointments = SqlAppointmentRepository::new(pool);

        let client = Client::first_contact("+34600111222", None);
        clients.upsert(client.clone()).await.expect("client upsert");

        let mut appointment = Appointment::scheduled(client.id, "tinte", Utc::now())
            .with_external_ref("cal-evt-78");
        appointments.save(appointment.clone()).await.expect("save");

        appointment.set_status(AppointmentStatus::Cancelled);
        appointments.save(appointment).await.expect("resave");

        let found = appointments
            .find_by_external_ref("cal-evt-78")
            .await
            .expect("find")
            .expect("present");
        assert_eq!(found.status, AppointmentStatus::Cancelled);
    }
}
