//! Unified gateway error handling
//!
//! Single typed error for the whole request path. Every fallible operation
//! yields one of these kinds; there is no exceptions-for-control-flow.
//!
//! | Variant | HTTP status | Retryable |
//! |---------|-------------|-----------|
//! | Network | 502 | Yes |
//! | Timeout | 504 | Once, then surfaced |
//! | RateLimit | 429 | Yes (honoring backoff) |
//! | Auth | 401 | No |
//! | InvalidRequest | 400 | No |
//! | ModelNotFound | 404 | No (triggers fallback chain) |
//! | ServerError | upstream status | Yes |
//! | UnhealthyProvider | 503 | No (skipped in selection) |
//! | QualityFailed | 502 | No (cascade tries next stage) |
//! | Cancelled | 499 | No |
//! | Configuration | 500 | No |
//! | Serialization | 502 | No |
//! | Internal | 500 | No |

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Unified gateway error type
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("network error for {provider}: {message}")]
    Network { provider: String, message: String },

    #[error("timeout for {provider}: {message}")]
    Timeout { provider: String, message: String },

    #[error("rate limit exceeded for {provider}")]
    RateLimit {
        provider: String,
        /// Upstream-suggested delay in seconds, honored before retrying
        retry_after: Option<u64>,
    },

    #[error("authentication failed for {provider}: {message}")]
    Auth { provider: String, message: String },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("model '{model}' not found")]
    ModelNotFound { model: String },

    #[error("server error for {provider} (status {status}): {message}")]
    ServerError {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("provider '{provider}' is unhealthy")]
    UnhealthyProvider { provider: String },

    #[error("quality check failed at stage '{stage}': {message}")]
    QualityFailed { stage: String, message: String },

    #[error("request cancelled")]
    Cancelled,

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("serialization error: {message}")]
    Serialization { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    pub fn network(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn timeout(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Timeout {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn rate_limit(provider: impl Into<String>, retry_after: Option<u64>) -> Self {
        Self::RateLimit {
            provider: provider.into(),
            retry_after,
        }
    }

    pub fn auth(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Auth {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn model_not_found(model: impl Into<String>) -> Self {
        Self::ModelNotFound {
            model: model.into(),
        }
    }

    pub fn server_error(
        provider: impl Into<String>,
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        Self::ServerError {
            provider: provider.into(),
            status,
            message: message.into(),
        }
    }

    pub fn unhealthy_provider(provider: impl Into<String>) -> Self {
        Self::UnhealthyProvider {
            provider: provider.into(),
        }
    }

    pub fn quality_failed(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::QualityFailed {
            stage: stage.into(),
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Map an upstream HTTP status code to the matching error kind.
    pub fn from_status(provider: &str, status: u16, body: &str) -> Self {
        match status {
            400 => Self::invalid_request(body.to_string()),
            401 | 403 => Self::auth(provider, body.to_string()),
            404 => Self::model_not_found(body.to_string()),
            408 => Self::timeout(provider, "upstream reported request timeout"),
            429 => Self::rate_limit(provider, None),
            500..=599 => Self::server_error(provider, status, body.to_string()),
            _ => Self::server_error(provider, status, body.to_string()),
        }
    }

    /// Whether a retry may succeed.
    ///
    /// Timeout counts as retryable here; the single-retry cap on timeouts
    /// is enforced by the retry loop, not the classification.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network { .. }
                | Self::Timeout { .. }
                | Self::RateLimit { .. }
                | Self::ServerError { .. }
        )
    }

    /// Upstream-suggested retry delay, if any.
    pub fn retry_delay(&self) -> Option<u64> {
        match self {
            Self::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Errors that push model selection onto the fallback chain.
    pub fn triggers_fallback(&self) -> bool {
        self.is_retryable()
            || matches!(
                self,
                Self::ModelNotFound { .. } | Self::UnhealthyProvider { .. }
            )
    }

    /// HTTP status to report downstream.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Network { .. } => 502,
            Self::Timeout { .. } => 504,
            Self::RateLimit { .. } => 429,
            Self::Auth { .. } => 401,
            Self::InvalidRequest { .. } => 400,
            Self::ModelNotFound { .. } => 404,
            Self::ServerError { status, .. } => *status,
            Self::UnhealthyProvider { .. } => 503,
            Self::QualityFailed { .. } => 502,
            Self::Cancelled => 499,
            Self::Configuration { .. } | Self::Internal { .. } => 500,
            Self::Serialization { .. } => 502,
        }
    }

    /// OpenAI-style error `type` string for the error envelope.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "authentication_error",
            Self::InvalidRequest { .. } => "invalid_request_error",
            Self::ModelNotFound { .. } => "not_found_error",
            Self::RateLimit { .. } => "rate_limit_error",
            _ => "api_error",
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        let provider = err
            .url()
            .and_then(|u| u.host_str())
            .unwrap_or("upstream")
            .to_string();
        if err.is_timeout() {
            Self::Timeout {
                provider,
                message: err.to_string(),
            }
        } else {
            Self::Network {
                provider,
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_taxonomy() {
        assert!(matches!(
            GatewayError::from_status("p", 400, "bad"),
            GatewayError::InvalidRequest { .. }
        ));
        assert!(matches!(
            GatewayError::from_status("p", 401, "no"),
            GatewayError::Auth { .. }
        ));
        assert!(matches!(
            GatewayError::from_status("p", 404, "missing"),
            GatewayError::ModelNotFound { .. }
        ));
        assert!(matches!(
            GatewayError::from_status("p", 429, ""),
            GatewayError::RateLimit { .. }
        ));
        assert!(matches!(
            GatewayError::from_status("p", 503, "down"),
            GatewayError::ServerError { status: 503, .. }
        ));
    }

    #[test]
    fn retryability() {
        assert!(GatewayError::network("p", "reset").is_retryable());
        assert!(GatewayError::rate_limit("p", Some(5)).is_retryable());
        assert!(GatewayError::server_error("p", 502, "").is_retryable());
        assert!(!GatewayError::auth("p", "denied").is_retryable());
        assert!(!GatewayError::invalid_request("bad").is_retryable());
        assert!(!GatewayError::Cancelled.is_retryable());
    }

    #[test]
    fn model_not_found_triggers_fallback_without_retry() {
        let err = GatewayError::model_not_found("gpt-x");
        assert!(!err.is_retryable());
        assert!(err.triggers_fallback());
    }

    #[test]
    fn http_status_round_trip() {
        assert_eq!(GatewayError::invalid_request("x").http_status(), 400);
        assert_eq!(GatewayError::rate_limit("p", None).http_status(), 429);
        assert_eq!(GatewayError::Cancelled.http_status(), 499);
        assert_eq!(GatewayError::server_error("p", 503, "").http_status(), 503);
    }
}
