use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use citabot_core::config::WhatsAppConfig;
use citabot_core::phone::PhoneNumber;

use crate::error::ProviderError;

const PROVIDER: &str = "messaging";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageReceipt {
    pub provider_message_id: String,
}

#[async_trait]
pub trait MessagingClient: Send + Sync {
    async fn send_message(
        &self,
        to: &PhoneNumber,
        body: &str,
    ) -> Result<MessageReceipt, ProviderError>;

    /// Cheap reachability check for health reporting.
    async fn probe(&self) -> Result<(), ProviderError>;
}

/// WhatsApp Business Cloud API client. One send per call, no internal
/// retries.
pub struct WhatsAppClient {
    http: reqwest::Client,
    api_base_url: String,
    access_token: SecretString,
    phone_number_id: String,
    timeout_secs: u64,
}

impl WhatsAppClient {
    /// Returns `None` when credentials are absent: the capability stays
    /// unwired rather than half-configured.
    pub fn from_config(config: &WhatsAppConfig) -> Option<Self> {
        if !config.is_configured() {
            return None;
        }
        let access_token = config.access_token.clone()?;
        let phone_number_id = config.phone_number_id.clone()?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .ok()?;

        Some(Self {
            http,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            access_token,
            phone_number_id,
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
struct SendResponse {
    messages: Vec<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    code: Option<i64>,
}

/// Graph API error codes for undeliverable recipients.
const INVALID_RECIPIENT_CODES: &[i64] = &[131_026, 131_030];

#[async_trait]
impl MessagingClient for WhatsAppClient {
    async fn send_message(
        &self,
        to: &PhoneNumber,
        body: &str,
    ) -> Result<MessageReceipt, ProviderError> {
        let url = format!("{}/{}/messages", self.api_base_url, self.phone_number_id);
        let payload = json!({
            "messaging_product": "whatsapp",
            "to": to.canonical,
            "type": "text",
            "text": { "body": body },
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(self.access_token.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|error| self.map_transport_error(error))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse().ok());
            return Err(ProviderError::RateLimited { provider: PROVIDER, retry_after_secs });
        }

        if !status.is_success() {
            let parsed: ErrorResponse = response.json().await.unwrap_or(ErrorResponse {
                error: None,
            });
            if let Some(error) = &parsed.error {
                if error.code.map(|code| INVALID_RECIPIENT_CODES.contains(&code)).unwrap_or(false)
                {
                    return Err(ProviderError::InvalidRecipient(to.canonical.clone()));
                }
            }
            let reason = parsed
                .error
                .and_then(|error| error.message)
                .unwrap_or_else(|| format!("http status {status}"));
            return Err(ProviderError::Unavailable { provider: PROVIDER, reason });
        }

        let parsed: SendResponse = response
            .json()
            .await
            .map_err(|error| self.map_transport_error(error))?;
        let provider_message_id = parsed
            .messages
            .into_iter()
            .next()
            .map(|message| message.id)
            .ok_or_else(|| ProviderError::Unavailable {
                provider: PROVIDER,
                reason: "send response carried no message id".to_string(),
            })?;

        debug!(
            event_name = "messaging.sent",
            to = %to.redacted(),
            provider_message_id = %provider_message_id,
            "outbound message accepted by provider"
        );

        Ok(MessageReceipt { provider_message_id })
    }

    async fn probe(&self) -> Result<(), ProviderError> {
        let url = format!("{}/{}", self.api_base_url, self.phone_number_id);
        let response = self
            .http
            .get(&url)
            .bearer_auth(self.access_token.expose_secret())
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

/// Stand-in used in tests and preview deployments without WhatsApp
/// credentials: logs the message and fabricates a receipt.
#[derive(Clone, Debug, Default)]
pub struct NoopMessagingClient;

#[async_trait]
impl MessagingClient for NoopMessagingClient {
    async fn send_message(
        &self,
        to: &PhoneNumber,
        body: &str,
    ) -> Result<MessageReceipt, ProviderError> {
        info!(
            event_name = "messaging.noop_send",
            to = %to.redacted(),
            chars = body.len(),
            "messaging is in preview mode; message not delivered"
        );
        Ok(MessageReceipt { provider_message_id: format!("noop-{}", Uuid::new_v4()) })
    }

    async fn probe(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}
