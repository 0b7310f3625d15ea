use thiserror::Error;

/// Typed failures from capability providers. The façade surfaces these as-is;
/// the orchestrator decides which are worth retrying.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("{provider} capability is not configured")]
    NotConfigured { provider: &'static str },
    #[error("{provider} is unavailable: {reason}")]
    Unavailable { provider: &'static str, reason: String },
    #[error("recipient `{0}` was rejected by the messaging provider")]
    InvalidRecipient(String),
    #[error("{provider} rate limited the request")]
    RateLimited { provider: &'static str, retry_after_secs: Option<u64> },
    #[error("generation quota is exhausted")]
    QuotaExceeded,
    #[error("{provider} timed out after {secs}s")]
    Timeout { provider: &'static str, secs: u64 },
    #[error("prompt of {chars} chars exceeds the {limit} char ceiling")]
    PromptTooLarge { chars: usize, limit: usize },
}

impl ProviderError {
    /// Transient failures that a bounded retry may resolve. Validation-class
    /// failures (bad recipient, oversized prompt, exhausted quota) are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable { .. } | Self::RateLimited { .. } | Self::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::ProviderError;

    #[test]
    fn transient_failures_are_retryable() {
        assert!(ProviderError::Unavailable {
            provider: "messaging",
            reason: "503".to_string()
        }
        .is_retryable());
        assert!(ProviderError::RateLimited { provider: "messaging", retry_after_secs: Some(30) }
            .is_retryable());
        assert!(ProviderError::Timeout { provider: "ai", secs: 10 }.is_retryable());
    }

    #[test]
    fn validation_failures_are_terminal() {
        assert!(!ProviderError::InvalidRecipient("+34".to_string()).is_retryable());
        assert!(!ProviderError::QuotaExceeded.is_retryable());
        assert!(!ProviderError::PromptTooLarge { chars: 9000, limit: 8000 }.is_retryable());
        assert!(!ProviderError::NotConfigured { provider: "scheduling" }.is_retryable());
    }
}
