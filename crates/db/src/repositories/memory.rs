use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use citabot_core::domain::appointment::Appointment;
use citabot_core::domain::client::{Client, ClientId};
use citabot_core::domain::conversation::ConversationState;
use citabot_core::domain::message::MessageRecord;

use super::{
    AppointmentRepository, ClientRepository, ConversationRepository, MessageRepository,
    RepositoryError,
};

#[derive(Default)]
pub struct InMemoryClientRepository {
    clients: RwLock<HashMap<String, Client>>,
}

#[async_trait::async_trait]
impl ClientRepository for InMemoryClientRepository {
    async fn find_by_phone(&self, phone: &str) -> Result<Option<Client>, RepositoryError> {
        let clients = self.clients.read().await;
        Ok(clients.get(phone).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Client>, RepositoryError> {
        let clients = self.clients.read().await;
        Ok(clients.values().find(|client| client.email.as_deref() == Some(email)).cloned())
    }

    async fn upsert(&self, client: Client) -> Result<(), RepositoryError> {
        let mut clients = self.clients.write().await;
        match clients.get_mut(&client.phone) {
            Some(existing) => {
                if client.display_name.is_some() {
                    existing.display_name = client.display_name;
                }
                if client.email.is_some() {
                    existing.email = client.email;
                }
                existing.status = client.status;
                existing.last_activity = client.last_activity;
            }
            None => {
                clients.insert(client.phone.clone(), client);
            }
        }
        Ok(())
    }
}

/// Mirrors the SQL upsert's preservation rules so orchestrator tests observe
/// the same racing-writer behavior as the real store.
#[derive(Default)]
pub struct InMemoryConversationRepository {
    states: RwLock<HashMap<String, ConversationState>>,
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn find_by_phone(
        &self,
        phone: &str,
    ) -> Result<Option<ConversationState>, RepositoryError> {
        let states = self.states.read().await;
        Ok(states.get(phone).cloned())
    }

    async fn upsert(&self, state: ConversationState) -> Result<(), RepositoryError> {
        let mut states = self.states.write().await;
        match states.get_mut(&state.phone) {
            Some(existing) => {
                existing.step = state.step;
                existing.data = state.data;
                existing.attempts_count = state.attempts_count;
                existing.language = state.language;
                existing.last_updated = state.last_updated;
                if state.client_ref.is_some() {
                    existing.client_ref = state.client_ref;
                }
                if state.booking_ref.is_some() {
                    existing.booking_ref = state.booking_ref;
                }
                if state.last_message_id.is_some() {
                    existing.last_message_id = state.last_message_id;
                }
            }
            None => {
                states.insert(state.phone.clone(), state);
            }
        }
        Ok(())
    }

    async fn purge_idle_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<u64, RepositoryError> {
        let mut states = self.states.write().await;
        let stale: Vec<String> = states
            .values()
            .filter(|state| state.last_updated < cutoff)
            .take(limit as usize)
            .map(|state| state.phone.clone())
            .collect();
        for phone in &stale {
            states.remove(phone);
        }
        Ok(stale.len() as u64)
    }
}

#[derive(Default)]
pub struct InMemoryMessageRepository {
    messages: RwLock<Vec<MessageRecord>>,
}

impl InMemoryMessageRepository {
    pub async fn all(&self) -> Vec<MessageRecord> {
        self.messages.read().await.clone()
    }
}

#[async_trait::async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn append(&self, message: MessageRecord) -> Result<(), RepositoryError> {
        self.messages.write().await.push(message);
        Ok(())
    }

    async fn list_for_owner(
        &self,
        owner_phone: &str,
        limit: u32,
    ) -> Result<Vec<MessageRecord>, RepositoryError> {
        let messages = self.messages.read().await;
        let mut owned: Vec<MessageRecord> = messages
            .iter()
            .filter(|message| message.owner_phone == owner_phone)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        owned.truncate(limit as usize);
        Ok(owned)
    }
}

#[derive(Default)]
pub struct InMemoryAppointmentRepository {
    appointments: RwLock<HashMap<String, Appointment>>,
}

#[async_trait::async_trait]
impl AppointmentRepository for InMemoryAppointmentRepository {
    async fn find_by_external_ref(
        &self,
        external_ref: &str,
    ) -> Result<Option<Appointment>, RepositoryError> {
        let appointments = self.appointments.read().await;
        Ok(appointments
            .values()
            .find(|appointment| appointment.external_ref.as_deref() == Some(external_ref))
            .cloned())
    }

    async fn list_for_client(
        &self,
        client_ref: &ClientId,
    ) -> Result<Vec<Appointment>, RepositoryError> {
        let appointments = self.appointments.read().await;
        let mut owned: Vec<Appointment> = appointments
            .values()
            .filter(|appointment| appointment.client_ref == *client_ref)
            .cloned()
            .collect();
        owned.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at));
        Ok(owned)
    }

    async fn save(&self, appointment: Appointment) -> Result<(), RepositoryError> {
        let mut appointments = self.appointments.write().await;
        appointments.insert(appointment.id.0.clone(), appointment);
        Ok(())
    }
}
