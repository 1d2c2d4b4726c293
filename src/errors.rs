use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("bucket type must be a non-empty string")]
    InvalidBucketType,

    #[error("Unknown bucket type: {0}")]
    UnknownBucketType(String),

    #[error("key must be a non-empty string")]
    InvalidKey,

    #[error("count must be 'all' or a non-negative integer")]
    InvalidCount,

    #[error("Invalid bucket override: {0}")]
    InvalidOverride(String),

    #[error("erlIsActiveKey is required for elevated limits")]
    ErlKeyRequired,

    #[error("Attempted to takeElevated() for a bucket with no elevated config")]
    NoElevatedConfig,

    #[error("Redis connection error: {0}")]
    Connection(#[from] redis::RedisError),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Script execution error: {0}")]
    ScriptExecution(String),

    #[error("Failed to decode store reply: {0}")]
    Decode(String),

    #[error("Command timed out after {0:?}")]
    Timeout(Duration),
}

impl RateLimitError {
    /// Stable numeric code for validation failures, kept aligned with the
    /// wire-protocol error table. Transport and store errors carry no code.
    pub fn code(&self) -> Option<u16> {
        match self {
            RateLimitError::InvalidBucketType => Some(102),
            RateLimitError::UnknownBucketType(_) => Some(103),
            RateLimitError::InvalidKey => Some(104),
            RateLimitError::InvalidCount => Some(105),
            RateLimitError::InvalidOverride(_) => Some(106),
            RateLimitError::ErlKeyRequired => Some(107),
            RateLimitError::NoElevatedConfig => Some(108),
            _ => None,
        }
    }

    /// Whether the failure came from the store or the transport rather than
    /// from request validation.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RateLimitError::Connection(_)
                | RateLimitError::Pool(_)
                | RateLimitError::ScriptExecution(_)
                | RateLimitError::Timeout(_)
        )
    }
}

/// Result type alias for rate limiter operations
pub type Result<T> = std::result::Result<T, RateLimitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_carry_stable_codes() {
        assert_eq!(RateLimitError::UnknownBucketType("ip".into()).code(), Some(103));
        assert_eq!(RateLimitError::InvalidCount.code(), Some(105));
        assert_eq!(RateLimitError::ErlKeyRequired.code(), Some(107));
        assert_eq!(RateLimitError::NoElevatedConfig.code(), Some(108));
        assert_eq!(RateLimitError::Pool("exhausted".into()).code(), None);
    }

    #[test]
    fn elevated_errors_render_the_documented_messages() {
        assert_eq!(
            RateLimitError::ErlKeyRequired.to_string(),
            "erlIsActiveKey is required for elevated limits"
        );
        assert_eq!(
            RateLimitError::NoElevatedConfig.to_string(),
            "Attempted to takeElevated() for a bucket with no elevated config"
        );
    }
}
