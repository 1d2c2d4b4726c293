//! Request parameter types and fail-fast validation.

use crate::config::RawBucket;
use crate::errors::{RateLimitError, Result};

/// Token count for a request. `All` coerces to the bucket size at dispatch
/// time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Count {
    All,
    Tokens(i64),
}

impl Default for Count {
    fn default() -> Self {
        Count::Tokens(1)
    }
}

impl From<i64> for Count {
    fn from(n: i64) -> Self {
        Count::Tokens(n)
    }
}

#[derive(Debug, Clone)]
pub struct TakeParams {
    pub bucket_type: String,
    pub key: String,
    pub count: Count,
    pub config_override: Option<RawBucket>,
}

impl TakeParams {
    pub fn new(bucket_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket_type: bucket_type.into(),
            key: key.into(),
            count: Count::default(),
            config_override: None,
        }
    }

    pub fn count(mut self, count: i64) -> Self {
        self.count = Count::Tokens(count);
        self
    }

    pub fn all(mut self) -> Self {
        self.count = Count::All;
        self
    }

    pub fn config_override(mut self, raw: RawBucket) -> Self {
        self.config_override = Some(raw);
        self
    }
}

/// Elevated-limits parameters accompanying a take.
#[derive(Debug, Clone)]
pub struct ErlParams {
    /// Store key whose presence marks the elevation as active for this scope
    pub is_active_key: String,

    /// When false the call behaves exactly like a standard take
    pub allow_erl: bool,
}

impl ErlParams {
    pub fn new(is_active_key: impl Into<String>) -> Self {
        Self {
            is_active_key: is_active_key.into(),
            allow_erl: true,
        }
    }

    pub fn allow_erl(mut self, allow: bool) -> Self {
        self.allow_erl = allow;
        self
    }
}

#[derive(Debug, Clone)]
pub struct PutParams {
    pub bucket_type: String,
    pub key: String,
    /// Defaults to `All`: refill to capacity
    pub count: Count,
    pub config_override: Option<RawBucket>,
}

impl PutParams {
    pub fn new(bucket_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket_type: bucket_type.into(),
            key: key.into(),
            count: Count::All,
            config_override: None,
        }
    }

    pub fn count(mut self, count: i64) -> Self {
        self.count = Count::Tokens(count);
        self
    }

    pub fn config_override(mut self, raw: RawBucket) -> Self {
        self.config_override = Some(raw);
        self
    }
}

#[derive(Debug, Clone)]
pub struct GetParams {
    pub bucket_type: String,
    pub key: String,
    pub config_override: Option<RawBucket>,
}

impl GetParams {
    pub fn new(bucket_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket_type: bucket_type.into(),
            key: key.into(),
            config_override: None,
        }
    }

    pub fn config_override(mut self, raw: RawBucket) -> Self {
        self.config_override = Some(raw);
        self
    }
}

pub(crate) fn validate_type(bucket_type: &str) -> Result<()> {
    if bucket_type.is_empty() {
        return Err(RateLimitError::InvalidBucketType);
    }
    Ok(())
}

pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(RateLimitError::InvalidKey);
    }
    Ok(())
}

/// A caller-supplied override must provide a capacity source of its own.
pub(crate) fn validate_override(raw: &RawBucket) -> Result<()> {
    if !raw.has_capacity_source() {
        return Err(RateLimitError::InvalidOverride(
            "override needs a size, a rate, or the unlimited flag".to_string(),
        ));
    }
    Ok(())
}

/// Coerce a take count against the effective size. Negative counts never
/// reach the store.
pub(crate) fn take_count(count: Count, size: u64) -> Result<u64> {
    match count {
        Count::All => Ok(size),
        Count::Tokens(n) if n >= 0 => Ok(n as u64),
        Count::Tokens(_) => Err(RateLimitError::InvalidCount),
    }
}

/// Coerce a put count; negative values are allowed and flow through to the
/// store unclamped.
pub(crate) fn put_count(count: Count, size: u64) -> i64 {
    match count {
        Count::All => size as i64,
        Count::Tokens(n) => n,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_count_coerces_all_to_size() {
        assert_eq!(take_count(Count::All, 10).unwrap(), 10);
        assert_eq!(take_count(Count::Tokens(3), 10).unwrap(), 3);
        assert_eq!(take_count(Count::Tokens(0), 10).unwrap(), 0);
    }

    #[test]
    fn negative_take_count_is_rejected() {
        let err = take_count(Count::Tokens(-1), 10).unwrap_err();
        assert_eq!(err.code(), Some(105));
    }

    #[test]
    fn put_count_defaults_to_size_and_allows_negatives() {
        assert_eq!(put_count(Count::All, 10), 10);
        assert_eq!(put_count(Count::Tokens(-4), 10), -4);
    }

    #[test]
    fn empty_names_are_rejected() {
        assert_eq!(validate_type("").unwrap_err().code(), Some(102));
        assert_eq!(validate_key("").unwrap_err().code(), Some(104));
        assert!(validate_type("ip").is_ok());
    }

    #[test]
    fn override_without_capacity_is_rejected() {
        let err = validate_override(&RawBucket::default()).unwrap_err();
        assert_eq!(err.code(), Some(106));
    }
}
