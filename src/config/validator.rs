use crate::config::{LimiterConfig, RawBucket};
use crate::errors::{RateLimitError, Result};
use tracing::{debug, warn};

/// Validate the entire client configuration.
pub fn validate_config(config: &LimiterConfig) -> Result<()> {
    debug!("Validating configuration...");

    validate_transport(config)?;

    for (name, bucket) in &config.buckets {
        validate_bucket(name, bucket)?;
    }

    debug!("Configuration validation successful");
    Ok(())
}

fn validate_transport(config: &LimiterConfig) -> Result<()> {
    if config.uri.is_empty() {
        return Err(RateLimitError::Configuration(
            "Redis URI cannot be empty".to_string(),
        ));
    }

    if !config.uri.starts_with("redis://") && !config.uri.starts_with("rediss://") {
        return Err(RateLimitError::Configuration(format!(
            "Invalid Redis URI format: {}. Must start with redis:// or rediss://",
            config.uri
        )));
    }

    if config.max_connections == 0 {
        return Err(RateLimitError::Configuration(
            "max_connections must be greater than 0".to_string(),
        ));
    }

    if config.command_timeout.is_zero() {
        return Err(RateLimitError::Configuration(
            "command_timeout must be greater than 0".to_string(),
        ));
    }

    if config.global_ttl_ms == 0 {
        return Err(RateLimitError::Configuration(
            "global_ttl_ms must be greater than 0".to_string(),
        ));
    }

    if let Some(ping) = &config.ping {
        if ping.interval.is_zero() {
            return Err(RateLimitError::Configuration(
                "ping.interval must be greater than 0".to_string(),
            ));
        }
        if ping.max_failed_attempts == 0 {
            return Err(RateLimitError::Configuration(
                "ping.max_failed_attempts must be greater than 0".to_string(),
            ));
        }
    }

    Ok(())
}

/// Validate a single bucket type definition.
pub fn validate_bucket(name: &str, bucket: &RawBucket) -> Result<()> {
    if name.is_empty() {
        return Err(RateLimitError::Configuration(
            "Bucket type name cannot be empty".to_string(),
        ));
    }

    if !bucket.has_capacity_source() {
        return Err(RateLimitError::Configuration(format!(
            "Bucket '{}' needs a size, a rate, or the unlimited flag",
            name
        )));
    }

    if let Some(interval) = bucket.interval {
        if interval == 0 {
            return Err(RateLimitError::Configuration(format!(
                "Bucket '{}' has a zero refill interval",
                name
            )));
        }
    }

    if bucket.size == Some(0) && bucket.unlimited != Some(true) {
        warn!("Bucket '{}' has size 0; every take will be denied", name);
    }

    for ov in &bucket.overrides {
        if ov.name.is_empty() {
            return Err(RateLimitError::Configuration(format!(
                "Bucket '{}' has an override with an empty name",
                name
            )));
        }
        if !ov.bucket.has_capacity_source() {
            return Err(RateLimitError::Configuration(format!(
                "Override '{}' of bucket '{}' needs a size, a rate, or the unlimited flag",
                ov.name, name
            )));
        }
    }

    if let Some(elevated) = &bucket.elevated {
        if elevated.size.is_none() && elevated.per_interval.is_none() && elevated.per_second.is_none()
            && elevated.per_minute.is_none()
            && elevated.per_hour.is_none()
            && elevated.per_day.is_none()
        {
            warn!(
                "Bucket '{}' has an elevated section with no capacity; takeElevated() will be rejected",
                name
            );
        }
    }

    debug!("Bucket definition valid for '{}'", name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawOverride;

    #[test]
    fn test_validate_valid_config() {
        let config = LimiterConfig::new("redis://localhost:6379")
            .bucket("ip", RawBucket::per_second(5).size(10));

        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_invalid_uri() {
        let mut config = LimiterConfig::default();
        config.uri = "invalid_url".to_string();

        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_bucket_without_capacity() {
        let bucket = RawBucket::default();
        assert!(validate_bucket("empty", &bucket).is_err());
    }

    #[test]
    fn test_validate_unlimited_bucket() {
        assert!(validate_bucket("free", &RawBucket::unlimited()).is_ok());
    }

    #[test]
    fn test_validate_override_without_capacity() {
        let bucket = RawBucket::per_second(5)
            .with_override(RawOverride::literal("127.0.0.1", RawBucket::default()));

        assert!(validate_bucket("ip", &bucket).is_err());
    }

    #[test]
    fn test_validate_zero_interval() {
        let mut bucket = RawBucket::fixed(10);
        bucket.interval = Some(0);
        bucket.per_interval = Some(5);

        assert!(validate_bucket("ip", &bucket).is_err());
    }
}
