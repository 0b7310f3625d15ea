use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use citabot_core::config::SchedulingConfig;

use crate::error::ProviderError;

const PROVIDER: &str = "scheduling";

/// An event read from the scheduling provider. The invitee phone is raw;
/// normalization happens in the orchestrator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduledEvent {
    pub reference: String,
    pub invitee_name: Option<String>,
    pub invitee_email: Option<String>,
    pub invitee_phone: Option<String>,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub status: String,
}

#[async_trait]
pub trait SchedulingClient: Send + Sync {
    /// Fetch the finite list of scheduled events for a subject. Each call
    /// re-fetches; nothing is cached.
    async fn list_scheduled_events(
        &self,
        subject_uri: &str,
    ) -> Result<Vec<ScheduledEvent>, ProviderError>;

    async fn probe(&self) -> Result<(), ProviderError>;
}

/// Calendly-style REST client: paginated `scheduled_events` listing plus a
/// `users/me` reachability probe.
pub struct CalendarApiClient {
    http: reqwest::Client,
    api_base_url: String,
    api_token: SecretString,
    timeout_secs: u64,
}

impl CalendarApiClient {
    pub fn from_config(config: &SchedulingConfig) -> Option<Self> {
        if !config.is_configured() {
            return None;
        }
        let api_token = config.api_token.clone()?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .ok()?;

        Some(Self {
            http,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_token,
            timeout_secs: config.timeout_secs,
        })
    }

    fn map_transport_error(&self, error: reqwest::Error) -> ProviderError {
        if error.is_timeout() {
            ProviderError::Timeout { provider: PROVIDER, secs: self.timeout_secs }
        } else {
            ProviderError::Unavailable { provider: PROVIDER, reason: error.to_string() }
        }
    }
}

#[derive(Debug, Deserialize)]
struct EventsPage {
    collection: Vec<RemoteEvent>,
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    next_page: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemoteEvent {
    uri: String,
    status: Option<String>,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    invitee: Option<RemoteInvitee>,
}

#[derive(Debug, Deserialize)]
struct RemoteInvitee {
    name: Option<String>,
    email: Option<String>,
    phone_number: Option<String>,
}

impl RemoteEvent {
    fn into_event(self) -> ScheduledEvent {
        let invitee = self.invitee;
        ScheduledEvent {
            reference: self.uri,
            invitee_name: invitee.as_ref().and_then(|i| i.name.clone()),
            invitee_email: invitee.as_ref().and_then(|i| i.email.clone()),
            invitee_phone: invitee.and_then(|i| i.phone_number),
            start: self.start_time,
            end: self.end_time,
            status: self.status.unwrap_or_else(|| "active".to_string()),
        }
    }
}

#[async_trait]
impl SchedulingClient for CalendarApiClient {
    async fn list_scheduled_events(
        &self,
        subject_uri: &str,
    ) -> Result<Vec<ScheduledEvent>, ProviderError> {
        let mut events = Vec::new();
        let mut next_url =
            Some(format!("{}/scheduled_events?invitee={subject_uri}", self.api_base_url));

        while let Some(url) = next_url.take() {
            let response = self
                .http
                .get(&url)
                .bearer_auth(self.api_token.expose_secret())
                .send()
                .await
                .map_err(|error| self.map_transport_error(error))?;

            let status = response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(ProviderError::RateLimited {
                    provider: PROVIDER,
                    retry_after_secs: None,
                });
            }
            if !status.is_success() {
                return Err(ProviderError::Unavailable {
                    provider: PROVIDER,
                    reason: format!("http status {status}"),
                });
            }

            let page: EventsPage =
                response.json().await.map_err(|error| self.map_transport_error(error))?;
            events.extend(page.collection.into_iter().map(RemoteEvent::into_event));
            next_url = page.pagination.and_then(|pagination| pagination.next_page);
        }

        Ok(events)
    }

    async fn probe(&self) -> Result<(), ProviderError> {
        let url = format!("{}/users/me", self.api_base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(self.api_token.expose_secret())
            .send()
            .await
            .map_err(|error| self.map_transport_error(error))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProviderError::Unavailable {
                provider: PROVIDER,
                reason: format!("probe returned http status {}", response.status()),
            })
        }
    }
}

/// Used when no scheduling provider is wired: always an empty calendar.
#[derive(Clone, Debug, Default)]
pub struct NoopSchedulingClient;

#[async_trait]
impl SchedulingClient for NoopSchedulingClient {
    async fn list_scheduled_events(
        &self,
        _subject_uri: &str,
    ) -> Result<Vec<ScheduledEvent>, ProviderError> {
        Ok(Vec::new())
    }

    async fn probe(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use citabot_core::config::SchedulingConfig;

    use super::{CalendarApiClient, NoopSchedulingClient, SchedulingClient};

    #[test]
    fn client_is_not_built_without_a_token() {
        let config = SchedulingConfig {
            api_base_url: "https://api.calendly.com".to_string(),
            api_token: None,
            timeout_secs: 10,
        };
        assert!(CalendarApiClient::from_config(&config).is_none());
    }

    #[test]
    fn client_is_built_with_a_token() {
        let config = SchedulingConfig {
            api_base_url: "https://api.calendly.com/".to_string(),
            api_token: Some("cal-token".to_string().into()),
            timeout_secs: 10,
        };
        let client = CalendarApiClient::from_config(&config).expect("client builds");
        assert_eq!(client.api_base_url, "https://api.calendly.com");
    }

    #[tokio::test]
    async fn noop_client_reports_an_empty_calendar() {
        let client = NoopSchedulingClient;
        let events =
            client.list_scheduled_events("https://sched.example/invitees/1").await.expect("list");
        assert!(events.is_empty());
    }
}
