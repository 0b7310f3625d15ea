use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audit::SuspicionThresholds;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub whatsapp: WhatsAppConfig,
    pub llm: LlmConfig,
    pub scheduling: SchedulingConfig,
    pub server: ServerConfig,
    pub conversation: ConversationConfig,
    pub retention: RetentionConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// WhatsApp Business Cloud API credentials. The capability is wired only
/// when both the token and the sender phone-number id are present.
#[derive(Clone, Debug)]
pub struct WhatsAppConfig {
    pub api_base_url: String,
    pub access_token: Option<SecretString>,
    pub phone_number_id: Option<String>,
    pub timeout_secs: u64,
}

impl WhatsAppConfig {
    pub fn is_configured(&self) -> bool {
        let has_token = self
            .access_token
            .as_ref()
            .map(|token| !token.expose_secret().trim().is_empty())
            .unwrap_or(false);
        has_token && self.phone_number_id.as_deref().map(|id| !id.trim().is_empty()).unwrap_or(false)
    }
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Prompts above this size are rejected, never truncated.
    pub max_prompt_chars: usize,
    pub max_reply_tokens: u32,
}

impl LlmConfig {
    pub fn is_configured(&self) -> bool {
        match self.provider {
            LlmProvider::OpenAi | LlmProvider::Anthropic => self
                .api_key
                .as_ref()
                .map(|key| !key.expose_secret().trim().is_empty())
                .unwrap_or(false),
            LlmProvider::Ollama => {
                self.base_url.as_ref().map(|url| !url.trim().is_empty()).unwrap_or(false)
            }
        }
    }
}

/// Scheduling provider (Calendly-style) read access.
#[derive(Clone, Debug)]
pub struct SchedulingConfig {
    pub api_base_url: String,
    pub api_token: Option<SecretString>,
    pub timeout_secs: u64,
}

impl SchedulingConfig {
    pub fn is_configured(&self) -> bool {
        self.api_token
            .as_ref()
            .map(|token| !token.expose_secret().trim().is_empty())
            .unwrap_or(false)
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ConversationConfig {
    /// Unproductive rounds before a conversation is abandoned, and provider
    /// failures before it escalates.
    pub attempt_ceiling: u32,
    pub provider_retry_max: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub provider_timeout_secs: u64,
    pub default_language: String,
}

#[derive(Clone, Debug)]
pub struct RetentionConfig {
    pub conversation_days: u32,
    /// Compliance floor for audit/incident records; must exceed
    /// `conversation_days`.
    pub audit_floor_days: u32,
    pub purge_batch_size: u32,
    pub suspicion_window_minutes: i64,
    pub suspicion_medium: usize,
    pub suspicion_high: usize,
    pub suspicion_critical: usize,
}

impl RetentionConfig {
    pub fn suspicion_thresholds(&self) -> SuspicionThresholds {
        SuspicionThresholds {
            window_minutes: self.suspicion_window_minutes,
            medium: self.suspicion_medium,
            high: self.suspicion_high,
            critical: self.suspicion_critical,
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub whatsapp_access_token: Option<String>,
    pub whatsapp_phone_number_id: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub scheduling_api_token: Option<String>,
    pub retention_conversation_days: Option<u32>,
    pub retention_audit_floor_days: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://citabot.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            whatsapp: WhatsAppConfig {
                api_base_url: "https://graph.facebook.com/v19.0".to_string(),
                access_token: None,
                phone_number_id: None,
                timeout_secs: 10,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 30,
                max_retries: 2,
                max_prompt_chars: 8_000,
                max_reply_tokens: 512,
            },
            scheduling: SchedulingConfig {
                api_base_url: "https://api.calendly.com".to_string(),
                api_token: None,
                timeout_secs: 10,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            conversation: ConversationConfig {
                attempt_ceiling: 3,
                provider_retry_max: 3,
                retry_base_delay_ms: 500,
                retry_max_delay_ms: 15_000,
                provider_timeout_secs: 10,
                default_language: "es".to_string(),
            },
            retention: RetentionConfig {
                conversation_days: 365,
                audit_floor_days: 730,
                purge_batch_size: 500,
                suspicion_window_minutes: 15,
                suspicion_medium: 3,
                suspicion_high: 5,
                suspicion_critical: 10,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|anthropic|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("citabot.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(whatsapp) = patch.whatsapp {
            if let Some(api_base_url) = whatsapp.api_base_url {
                self.whatsapp.api_base_url = api_base_url;
            }
            if let Some(access_token_value) = whatsapp.access_token {
                self.whatsapp.access_token = Some(secret_value(access_token_value));
            }
            if let Some(phone_number_id) = whatsapp.phone_number_id {
                self.whatsapp.phone_number_id = Some(phone_number_id);
            }
            if let Some(timeout_secs) = whatsapp.timeout_secs {
                self.whatsapp.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
            if let Some(max_prompt_chars) = llm.max_prompt_chars {
                self.llm.max_prompt_chars = max_prompt_chars;
            }
            if let Some(max_reply_tokens) = llm.max_reply_tokens {
                self.llm.max_reply_tokens = max_reply_tokens;
            }
        }

        if let Some(scheduling) = patch.scheduling {
            if let Some(api_base_url) = scheduling.api_base_url {
                self.scheduling.api_base_url = api_base_url;
            }
            if let Some(api_token_value) = scheduling.api_token {
                self.scheduling.api_token = Some(secret_value(api_token_value));
            }
            if let Some(timeout_secs) = scheduling.timeout_secs {
                self.scheduling.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(conversation) = patch.conversation {
            if let Some(attempt_ceiling) = conversation.attempt_ceiling {
                self.conversation.attempt_ceiling = attempt_ceiling;
            }
            if let Some(provider_retry_max) = conversation.provider_retry_max {
                self.conversation.provider_retry_max = provider_retry_max;
            }
            if let Some(retry_base_delay_ms) = conversation.retry_base_delay_ms {
                self.conversation.retry_base_delay_ms = retry_base_delay_ms;
            }
            if let Some(retry_max_delay_ms) = conversation.retry_max_delay_ms {
                self.conversation.retry_max_delay_ms = retry_max_delay_ms;
            }
            if let Some(provider_timeout_secs) = conversation.provider_timeout_secs {
                self.conversation.provider_timeout_secs = provider_timeout_secs;
            }
            if let Some(default_language) = conversation.default_language {
                self.conversation.default_language = default_language;
            }
        }

        if let Some(retention) = patch.retention {
            if let Some(conversation_days) = retention.conversation_days {
                self.retention.conversation_days = conversation_days;
            }
            if let Some(audit_floor_days) = retention.audit_floor_days {
                self.retention.audit_floor_days = audit_floor_days;
            }
            if let Some(purge_batch_size) = retention.purge_batch_size {
                self.retention.purge_batch_size = purge_batch_size;
            }
            if let Some(suspicion_window_minutes) = retention.suspicion_window_minutes {
                self.retention.suspicion_window_minutes = suspicion_window_minutes;
            }
            if let Some(suspicion_medium) = retention.suspicion_medium {
                self.retention.suspicion_medium = suspicion_medium;
            }
            if let Some(suspicion_high) = retention.suspicion_high {
                self.retention.suspicion_high = suspicion_high;
            }
            if let Some(suspicion_critical) = retention.suspicion_critical {
                self.retention.suspicion_critical = suspicion_critical;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CITABOT_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CITABOT_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("CITABOT_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CITABOT_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("CITABOT_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CITABOT_WHATSAPP_API_BASE_URL") {
            self.whatsapp.api_base_url = value;
        }
        if let Some(value) = read_env("CITABOT_WHATSAPP_ACCESS_TOKEN") {
            self.whatsapp.access_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("CITABOT_WHATSAPP_PHONE_NUMBER_ID") {
            self.whatsapp.phone_number_id = Some(value);
        }
        if let Some(value) = read_env("CITABOT_WHATSAPP_TIMEOUT_SECS") {
            self.whatsapp.timeout_secs = parse_u64("CITABOT_WHATSAPP_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CITABOT_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("CITABOT_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CITABOT_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("CITABOT_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("CITABOT_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("CITABOT_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CITABOT_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("CITABOT_LLM_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("CITABOT_LLM_MAX_PROMPT_CHARS") {
            self.llm.max_prompt_chars =
                parse_u32("CITABOT_LLM_MAX_PROMPT_CHARS", &value)? as usize;
        }
        if let Some(value) = read_env("CITABOT_LLM_MAX_REPLY_TOKENS") {
            self.llm.max_reply_tokens = parse_u32("CITABOT_LLM_MAX_REPLY_TOKENS", &value)?;
        }

        if let Some(value) = read_env("CITABOT_SCHEDULING_API_BASE_URL") {
            self.scheduling.api_base_url = value;
        }
        if let Some(value) = read_env("CITABOT_SCHEDULING_API_TOKEN") {
            self.scheduling.api_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("CITABOT_SCHEDULING_TIMEOUT_SECS") {
            self.scheduling.timeout_secs = parse_u64("CITABOT_SCHEDULING_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CITABOT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CITABOT_SERVER_PORT") {
            self.server.port = parse_u16("CITABOT_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("CITABOT_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("CITABOT_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("CITABOT_CONVERSATION_ATTEMPT_CEILING") {
            self.conversation.attempt_ceiling =
                parse_u32("CITABOT_CONVERSATION_ATTEMPT_CEILING", &value)?;
        }
        if let Some(value) = read_env("CITABOT_CONVERSATION_PROVIDER_RETRY_MAX") {
            self.conversation.provider_retry_max =
                parse_u32("CITABOT_CONVERSATION_PROVIDER_RETRY_MAX", &value)?;
        }
        if let Some(value) = read_env("CITABOT_CONVERSATION_RETRY_BASE_DELAY_MS") {
            self.conversation.retry_base_delay_ms =
                parse_u64("CITABOT_CONVERSATION_RETRY_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("CITABOT_CONVERSATION_RETRY_MAX_DELAY_MS") {
            self.conversation.retry_max_delay_ms =
                parse_u64("CITABOT_CONVERSATION_RETRY_MAX_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("CITABOT_CONVERSATION_PROVIDER_TIMEOUT_SECS") {
            self.conversation.provider_timeout_secs =
                parse_u64("CITABOT_CONVERSATION_PROVIDER_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CITABOT_CONVERSATION_DEFAULT_LANGUAGE") {
            self.conversation.default_language = value;
        }

        if let Some(value) = read_env("CITABOT_RETENTION_CONVERSATION_DAYS") {
            self.retention.conversation_days =
                parse_u32("CITABOT_RETENTION_CONVERSATION_DAYS", &value)?;
        }
        if let Some(value) = read_env("CITABOT_RETENTION_AUDIT_FLOOR_DAYS") {
            self.retention.audit_floor_days =
                parse_u32("CITABOT_RETENTION_AUDIT_FLOOR_DAYS", &value)?;
        }
        if let Some(value) = read_env("CITABOT_RETENTION_PURGE_BATCH_SIZE") {
            self.retention.purge_batch_size =
                parse_u32("CITABOT_RETENTION_PURGE_BATCH_SIZE", &value)?;
        }

        let log_level = read_env("CITABOT_LOGGING_LEVEL").or_else(|| read_env("CITABOT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CITABOT_LOGGING_FORMAT").or_else(|| read_env("CITABOT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(access_token) = overrides.whatsapp_access_token {
            self.whatsapp.access_token = Some(secret_value(access_token));
        }
        if let Some(phone_number_id) = overrides.whatsapp_phone_number_id {
            self.whatsapp.phone_number_id = Some(phone_number_id);
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(api_token) = overrides.scheduling_api_token {
            self.scheduling.api_token = Some(secret_value(api_token));
        }
        if let Some(conversation_days) = overrides.retention_conversation_days {
            self.retention.conversation_days = conversation_days;
        }
        if let Some(audit_floor_days) = overrides.retention_audit_floor_days {
            self.retention.audit_floor_days = audit_floor_days;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_whatsapp(&self.whatsapp)?;
        validate_llm(&self.llm)?;
        validate_scheduling(&self.scheduling)?;
        validate_server(&self.server)?;
        validate_conversation(&self.conversation)?;
        validate_retention(&self.retention)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("citabot.toml"), PathBuf::from("config/citabot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_whatsapp(whatsapp: &WhatsAppConfig) -> Result<(), ConfigError> {
    if !whatsapp.api_base_url.starts_with("http://")
        && !whatsapp.api_base_url.starts_with("https://")
    {
        return Err(ConfigError::Validation(
            "whatsapp.api_base_url must start with http:// or https://".to_string(),
        ));
    }

    if whatsapp.timeout_secs == 0 || whatsapp.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "whatsapp.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    // Half-configured credentials are a deployment mistake, not an optional
    // capability.
    let has_token = whatsapp.access_token.is_some();
    let has_sender = whatsapp.phone_number_id.is_some();
    if has_token != has_sender {
        return Err(ConfigError::Validation(
            "whatsapp.access_token and whatsapp.phone_number_id must be set together".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.max_prompt_chars == 0 {
        return Err(ConfigError::Validation(
            "llm.max_prompt_chars must be greater than zero".to_string(),
        ));
    }

    if llm.max_reply_tokens == 0 {
        return Err(ConfigError::Validation(
            "llm.max_reply_tokens must be greater than zero".to_string(),
        ));
    }

    if llm.provider == LlmProvider::Ollama {
        let missing = llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "llm.base_url is required for the ollama provider".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_scheduling(scheduling: &SchedulingConfig) -> Result<(), ConfigError> {
    if !scheduling.api_base_url.starts_with("http://")
        && !scheduling.api_base_url.starts_with("https://")
    {
        return Err(ConfigError::Validation(
            "scheduling.api_base_url must start with http:// or https://".to_string(),
        ));
    }

    if scheduling.timeout_secs == 0 || scheduling.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "scheduling.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_conversation(conversation: &ConversationConfig) -> Result<(), ConfigError> {
    if conversation.attempt_ceiling == 0 || conversation.attempt_ceiling > 10 {
        return Err(ConfigError::Validation(
            "conversation.attempt_ceiling must be in range 1..=10".to_string(),
        ));
    }

    if conversation.provider_retry_max == 0 || conversation.provider_retry_max > 10 {
        return Err(ConfigError::Validation(
            "conversation.provider_retry_max must be in range 1..=10".to_string(),
        ));
    }

    if conversation.retry_base_delay_ms == 0 {
        return Err(ConfigError::Validation(
            "conversation.retry_base_delay_ms must be greater than zero".to_string(),
        ));
    }

    if conversation.retry_max_delay_ms < conversation.retry_base_delay_ms {
        return Err(ConfigError::Validation(
            "conversation.retry_max_delay_ms must not be below retry_base_delay_ms".to_string(),
        ));
    }

    if conversation.provider_timeout_secs == 0 || conversation.provider_timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "conversation.provider_timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    if conversation.default_language.trim().len() != 2 {
        return Err(ConfigError::Validation(
            "conversation.default_language must be a two-letter language tag".to_string(),
        ));
    }

    Ok(())
}

fn validate_retention(retention: &RetentionConfig) -> Result<(), ConfigError> {
    if retention.conversation_days == 0 {
        return Err(ConfigError::Validation(
            "retention.conversation_days must be greater than zero".to_string(),
        ));
    }

    if retention.audit_floor_days <= retention.conversation_days {
        return Err(ConfigError::Validation(
            "retention.audit_floor_days must be strictly greater than conversation_days"
                .to_string(),
        ));
    }

    if retention.purge_batch_size == 0 || retention.purge_batch_size > 10_000 {
        return Err(ConfigError::Validation(
            "retention.purge_batch_size must be in range 1..=10000".to_string(),
        ));
    }

    if retention.suspicion_window_minutes <= 0 {
        return Err(ConfigError::Validation(
            "retention.suspicion_window_minutes must be greater than zero".to_string(),
        ));
    }

    if retention.suspicion_medium > retention.suspicion_high
        || retention.suspicion_high > retention.suspicion_critical
    {
        return Err(ConfigError::Validation(
            "retention suspicion thresholds must satisfy medium <= high <= critical".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    whatsapp: Option<WhatsAppPatch>,
    llm: Option<LlmPatch>,
    scheduling: Option<SchedulingPatch>,
    server: Option<ServerPatch>,
    conversation: Option<ConversationPatch>,
    retention: Option<RetentionPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WhatsAppPatch {
    api_base_url: Option<String>,
    access_token: Option<String>,
    phone_number_id: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    max_prompt_chars: Option<usize>,
    max_reply_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct SchedulingPatch {
    api_base_url: Option<String>,
    api_token: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ConversationPatch {
    attempt_ceiling: Option<u32>,
    provider_retry_max: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    retry_max_delay_ms: Option<u64>,
    provider_timeout_secs: Option<u64>,
    default_language: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RetentionPatch {
    conversation_days: Option<u32>,
    audit_floor_days: Option<u32>,
    purge_batch_size: Option<u32>,
    suspicion_window_minutes: Option<i64>,
    suspicion_medium: Option<usize>,
    suspicion_high: Option<usize>,
    suspicion_critical: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_validate_and_leave_optional_capabilities_unconfigured() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(!config.whatsapp.is_configured(), "whatsapp should be unconfigured by default")?;
        ensure(!config.scheduling.is_configured(), "scheduling should be unconfigured by default")?;
        ensure(config.llm.is_configured(), "default ollama llm should count as configured")?;
        ensure(config.retention.conversation_days == 365, "default retention should be a year")?;
        ensure(
            config.retention.audit_floor_days == 730,
            "default audit floor should be two years",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_WA_ACCESS_TOKEN", "EAAG-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("citabot.toml");
            fs::write(
                &path,
                r#"
[whatsapp]
access_token = "${TEST_WA_ACCESS_TOKEN}"
phone_number_id = "493120001"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            let token = config
                .whatsapp
                .access_token
                .as_ref()
                .ok_or_else(|| "access token should be set".to_string())?;
            ensure(
                token.expose_secret() == "EAAG-from-env",
                "access token should be loaded from environment",
            )?;
            ensure(config.whatsapp.is_configured(), "whatsapp should be configured")?;
            Ok(())
        })();

        clear_vars(&["TEST_WA_ACCESS_TOKEN"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CITABOT_LOG_LEVEL", "warn");
        env::set_var("CITABOT_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warn log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["CITABOT_LOG_LEVEL", "CITABOT_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CITABOT_DATABASE_URL", "sqlite://from-env.db");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("citabot.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win over env and file",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            Ok(())
        })();

        clear_vars(&["CITABOT_DATABASE_URL"]);
        result
    }

    #[test]
    fn half_configured_whatsapp_credentials_fail_validation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CITABOT_WHATSAPP_ACCESS_TOKEN", "EAAG-token-without-sender");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("phone_number_id")
            );
            ensure(has_message, "validation failure should mention phone_number_id")
        })();

        clear_vars(&["CITABOT_WHATSAPP_ACCESS_TOKEN"]);
        result
    }

    #[test]
    fn audit_floor_must_exceed_conversation_retention() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let error = match AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                retention_conversation_days: Some(365),
                retention_audit_floor_days: Some(365),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("equal retention windows must be rejected".to_string()),
            Err(error) => error,
        };

        ensure(
            matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("audit_floor_days")
            ),
            "validation failure should mention audit_floor_days",
        )
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CITABOT_WHATSAPP_ACCESS_TOKEN", "EAAG-secret-value");
        env::set_var("CITABOT_WHATSAPP_PHONE_NUMBER_ID", "493120001");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("EAAG-secret-value"),
                "debug output should not contain the access token",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["CITABOT_WHATSAPP_ACCESS_TOKEN", "CITABOT_WHATSAPP_PHONE_NUMBER_ID"]);
        result
    }
}
