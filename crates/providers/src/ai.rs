use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use citabot_core::config::{LlmConfig, LlmProvider};

use crate::error::ProviderError;

const PROVIDER: &str = "ai";

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenerationOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self { max_tokens: 512, temperature: 0.4 }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedReply {
    pub text: String,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// Generate reply text for a bounded prompt. Oversized prompts fail with
    /// `PromptTooLarge` before any network call; nothing is truncated.
    async fn generate_reply(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GeneratedReply, ProviderError>;

    async fn probe(&self) -> Result<(), ProviderError>;
}

/// HTTP reply generator speaking the OpenAI, Anthropic, or Ollama API,
/// selected by config.
pub struct HttpReplyGenerator {
    http: reqwest::Client,
    provider: LlmProvider,
    api_key: Option<SecretString>,
    base_url: String,
    model: String,
    timeout_secs: u64,
    max_prompt_chars: usize,
}

impl HttpReplyGenerator {
    pub fn from_config(config: &LlmConfig) -> Option<Self> {
        if !config.is_configured() {
            return None;
        }

        let base_url = match (config.provider, config.base_url.as_deref()) {
            (_, Some(url)) if !url.trim().is_empty() => url.trim_end_matches('/').to_string(),
            (LlmProvider::OpenAi, None) => "https://api.openai.com".to_string(),
            (LlmProvider::Anthropic, None) => "https://api.anthropic.com".to_string(),
            (LlmProvider::Ollama, None) => return None,
            (_, Some(_)) => return None,
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .ok()?;

        Some(Self {
            http,
            provider: config.provider,
            api_key: config.api_key.clone(),
            base_url,
            model: config.model.clone(),
            timeout_secs: config.timeout_secs,
            max_prompt_chars: config.max_prompt_chars,
        })
    }

    fn map_transport_error(&self, error: reqwest::Error) -> ProviderError {
        if error.is_timeout() {
            ProviderError::Timeout { provider: PROVIDER, secs: self.timeout_secs }
        } else {
            ProviderError::Unavailable { provider: PROVIDER, reason: error.to_string() }
        }
    }

    fn api_key(&self) -> &str {
        self.api_key.as_ref().map(|key| key.expose_secret()).unwrap_or("")
    }

    async fn complete_openai(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GeneratedReply, ProviderError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let payload = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(self.api_key())
            .json(&payload)
            .send()
            .await
            .map_err(|error| self.map_transport_error(error))?;
        let response = check_generation_status(response).await?;

        let parsed: OpenAiResponse =
            response.json().await.map_err(|error| self.map_transport_error(error))?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::Unavailable {
                provider: PROVIDER,
                reason: "completion carried no choices".to_string(),
            })?;

        Ok(GeneratedReply {
            text,
            usage: TokenUsage {
                prompt_tokens: parsed.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0),
                completion_tokens: parsed
                    .usage
                    .as_ref()
                    .map(|u| u.completion_tokens)
                    .unwrap_or(0),
            },
        })
    }

    async fn complete_anthropic(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GeneratedReply, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let payload = json!({
            "model": self.model,
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = self
            .http
            .post(&url)
            .header("x-api-key", self.api_key())
            .header("anthropic-version", "2023-06-01")
            .json(&payload)
            .send()
            .await
            .map_err(|error| self.map_transport_error(error))?;
        let response = check_generation_status(response).await?;

        let parsed: AnthropicResponse =
            response.json().await.map_err(|error| self.map_transport_error(error))?;
        let text = parsed
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        if text.is_empty() {
            return Err(ProviderError::Unavailable {
                provider: PROVIDER,
                reason: "completion carried no text blocks".to_string(),
            });
        }

        Ok(GeneratedReply {
            text,
            usage: TokenUsage {
                prompt_tokens: parsed.usage.as_ref().map(|u| u.input_tokens).unwrap_or(0),
                completion_tokens: parsed.usage.as_ref().map(|u| u.output_tokens).unwrap_or(0),
            },
        })
    }

    async fn complete_ollama(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GeneratedReply, ProviderError> {
        let url = format!("{}/api/generate", self.base_url);
        let payload = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": { "num_predict": options.max_tokens, "temperature": options.temperature },
        });

        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|error| self.map_transport_error(error))?;
        let response = check_generation_status(response).await?;

        let parsed: OllamaResponse =
            response.json().await.map_err(|error| self.map_transport_error(error))?;

        Ok(GeneratedReply {
            text: parsed.response,
            usage: TokenUsage {
                prompt_tokens: parsed.prompt_eval_count.unwrap_or(0),
                completion_tokens: parsed.eval_count.unwrap_or(0),
            },
        })
    }
}

async fn check_generation_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let body = response.text().await.unwrap_or_default();
        if body.contains("insufficient_quota") || body.contains("billing") {
            return Err(ProviderError::QuotaExceeded);
        }
        return Err(ProviderError::RateLimited { provider: PROVIDER, retry_after_secs: None });
    }

    if status == reqwest::StatusCode::PAYMENT_REQUIRED {
        return Err(ProviderError::QuotaExceeded);
    }

    Err(ProviderError::Unavailable {
        provider: PROVIDER,
        reason: format!("http status {status}"),
    })
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[async_trait]
impl ReplyGenerator for HttpReplyGenerator {
    async fn generate_reply(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GeneratedReply, ProviderError> {
        let chars = prompt.chars().count();
        if chars > self.max_prompt_chars {
            return Err(ProviderError::PromptTooLarge {
                chars,
                limit: self.max_prompt_chars,
            });
        }

        let reply = match self.provider {
            LlmProvider::OpenAi => self.complete_openai(prompt, options).await?,
            LlmProvider::Anthropic => self.complete_anthropic(prompt, options).await?,
            LlmProvider::Ollama => self.complete_ollama(prompt, options).await?,
        };

        debug!(
            event_name = "ai.reply_generated",
            prompt_tokens = reply.usage.prompt_tokens,
            completion_tokens = reply.usage.completion_tokens,
            "reply generated"
        );
        Ok(reply)
    }

    async fn probe(&self) -> Result<(), ProviderError> {
        let url = match self.provider {
            LlmProvider::OpenAi => format!("{}/v1/models", self.base_url),
            LlmProvider::Anthropic => format!("{}/v1/models", self.base_url),
            LlmProvider::Ollama => format!("{}/api/tags", self.base_url),
        };

        let mut request = self.http.get(&url);
        request = match self.provider {
            LlmProvider::OpenAi => request.bearer_auth(self.api_key()),
            LlmProvider::Anthropic => request
                .header("x-api-key", self.api_key())
                .header("anthropic-version", "2023-06-01"),
            LlmProvider::Ollama => request,
        };

        let response =
            request.send().await.map_err(|error| self.map_transport_error(error))?;
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
