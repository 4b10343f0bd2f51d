use thiserror::Error;

/// Main error type for the orchestration core
#[derive(Error, Debug)]
pub enum ConclaveError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown plugin: {0}")]
    UnknownPlugin(String),

    #[error("Workflow error: {0}")]
    Workflow(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Exchange errors
    #[error("Exchange not available: {0}")]
    ExchangeUnavailable(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Order submission failed: {0}")]
    OrderSubmission(String),

    #[error("Market data unavailable: {0}")]
    MarketDataUnavailable(String),

    // Risk management errors
    #[error("Risk limit exceeded: {0}")]
    RiskLimitExceeded(String),

    // Node / pipeline errors
    #[error("Node '{node}' failed: {message}")]
    NodeFailed { node: String, message: String },

    #[error("Cycle aborted: {0}")]
    CycleAborted(String),

    // LLM errors
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    // Timeout is first-class so fallback machinery can match on it
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Operation cancelled")]
    Cancelled,

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for ConclaveError
pub type Result<T> = std::result::Result<T, ConclaveError>;

/// Coarse error classification driving recovery policy.
///
/// Recovery happens at the lowest layer capable of it: Transient errors are
/// retried locally, Validation errors skip the symbol or cycle, Configuration
/// and Fatal errors stop the bot and wait for operator action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Validation,
    Configuration,
    Timeout,
    Cancelled,
    Fatal,
}

impl ConclaveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConclaveError::Http(_)
            | ConclaveError::Stream(_)
            | ConclaveError::RateLimited(_)
            | ConclaveError::ExchangeUnavailable(_)
            | ConclaveError::MarketDataUnavailable(_) => ErrorKind::Transient,

            ConclaveError::Json(_)
            | ConclaveError::Validation(_)
            | ConclaveError::RiskLimitExceeded(_)
            | ConclaveError::InsufficientFunds(_)
            | ConclaveError::OrderSubmission(_) => ErrorKind::Validation,

            ConclaveError::Config(_)
            | ConclaveError::InvalidConfig(_)
            | ConclaveError::UnknownPlugin(_)
            | ConclaveError::Workflow(_) => ErrorKind::Configuration,

            ConclaveError::Timeout(_) => ErrorKind::Timeout,
            ConclaveError::Cancelled => ErrorKind::Cancelled,

            ConclaveError::Llm(e) => e.kind(),

            ConclaveError::Database(_)
            | ConclaveError::Auth(_)
            | ConclaveError::InvalidRequest(_)
            | ConclaveError::InvalidState(_)
            | ConclaveError::NodeFailed { .. }
            | ConclaveError::CycleAborted(_)
            | ConclaveError::Io(_)
            | ConclaveError::Internal(_)
            | ConclaveError::Other(_) => ErrorKind::Fatal,
        }
    }

    /// Whether a retry with backoff is worth attempting.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::Timeout)
    }
}

/// Specific error types for LLM provider calls
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("LLM request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("LLM provider returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("LLM rate limited: {0}")]
    RateLimited(String),

    #[error("LLM authentication failed: {0}")]
    Auth(String),

    #[error("LLM rejected request: {0}")]
    InvalidRequest(String),

    #[error("LLM output did not match schema: {0}")]
    Schema(String),

    #[error("LLM network error: {0}")]
    Network(String),

    #[error("All LLM fallbacks exhausted (attempts: {attempts})")]
    FallbacksExhausted { attempts: usize },
}

impl LlmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LlmError::Timeout(_) => ErrorKind::Timeout,
            LlmError::Server { .. } | LlmError::RateLimited(_) | LlmError::Network(_) => {
                ErrorKind::Transient
            }
            LlmError::Schema(_) => ErrorKind::Validation,
            LlmError::Auth(_) | LlmError::InvalidRequest(_) => ErrorKind::Configuration,
            LlmError::FallbacksExhausted { .. } => ErrorKind::Fatal,
        }
    }

    /// Whether the fallback chain should try the next adapter.
    ///
    /// Auth and invalid-request failures are configuration problems the next
    /// adapter in the chain is allowed to paper over (a different provider may
    /// have working credentials); only schema failures after a successful call
    /// stay with the adapter that produced them.
    pub fn triggers_fallback(&self) -> bool {
        !matches!(self, LlmError::FallbacksExhausted { .. })
    }
}

/// Specific error types for risk management
#[derive(Error, Debug, Clone)]
pub enum RiskError {
    #[error("Total allocation {requested:.1}% exceeds limit {limit:.1}%")]
    TotalAllocationExceeded { limit: f64, requested: f64 },

    #[error("{symbol}: allocation {requested:.1}% exceeds per-symbol limit {limit:.1}%")]
    SingleAllocationExceeded {
        symbol: String,
        limit: f64,
        requested: f64,
    },

    #[error("{symbol}: position size ${size} outside [${min}, ${max}]")]
    PositionSizeOutOfBounds {
        symbol: String,
        size: rust_decimal::Decimal,
        min: rust_decimal::Decimal,
        max: rust_decimal::Decimal,
    },

    #[error("{symbol}: risk/reward {ratio:.2} below minimum {min:.2}")]
    RiskRewardTooLow {
        symbol: String,
        ratio: f64,
        min: f64,
    },

    #[error("{symbol}: funding rate {rate:.4}% exceeds limit {limit:.4}%")]
    FundingRateExceeded {
        symbol: String,
        rate: f64,
        limit: f64,
    },

    #[error("Consecutive losses: {count} >= {threshold}")]
    ConsecutiveLosses { count: u32, threshold: u32 },

    #[error("Drawdown {current:.1}% >= limit {limit:.1}%")]
    DrawdownExceeded { current: f64, limit: f64 },

    #[error("{symbol}: leverage missing and defaulting disabled")]
    LeverageMissing { symbol: String },
}

impl From<RiskError> for ConclaveError {
    fn from(err: RiskError) -> Self {
        ConclaveError::RiskLimitExceeded(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            ConclaveError::RateLimited("x".into()).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            ConclaveError::Timeout(Duration::from_secs(1)).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            ConclaveError::UnknownPlugin("nope".into()).kind(),
            ErrorKind::Configuration
        );
        assert!(ConclaveError::Stream("reset".into()).is_retryable());
        assert!(!ConclaveError::Validation("bad".into()).is_retryable());
    }

    #[test]
    fn test_llm_error_routing() {
        let timeout = LlmError::Timeout(Duration::from_secs(120));
        assert_eq!(timeout.kind(), ErrorKind::Timeout);
        assert!(timeout.triggers_fallback());

        let exhausted = LlmError::FallbacksExhausted { attempts: 3 };
        assert!(!exhausted.triggers_fallback());
    }

    #[test]
    fn test_risk_error_conversion() {
        let err: ConclaveError = RiskError::ConsecutiveLosses {
            count: 5,
            threshold: 5,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
