pub mod validator;

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// TTL applied to bucket state entries that never refill, in milliseconds.
pub const DEFAULT_GLOBAL_TTL_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Dispatch timeout for a single store command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(125);

/// How long an elevation flag lives once set, in seconds.
pub const DEFAULT_ERL_ACTIVATION_PERIOD_S: u64 = 900;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Redis URI (e.g., "redis://localhost:6379")
    pub uri: String,

    /// Prefix applied to every key written to the store
    pub prefix: String,

    /// Redis username (optional)
    pub username: Option<String>,

    /// Redis password (optional)
    pub password: Option<String>,

    /// Use TLS for the connection (rewrites the scheme to rediss://)
    pub use_tls: bool,

    /// TTL for state entries of buckets without a refill rate, in ms
    pub global_ttl_ms: u64,

    /// Per-command dispatch timeout
    pub command_timeout: Duration,

    /// Maximum number of pooled connections
    pub max_connections: usize,

    /// Liveness probing; `None` disables the ping loop
    pub ping: Option<PingConfig>,

    /// Bucket type definitions, keyed by type name
    pub buckets: HashMap<String, RawBucket>,
}

impl LimiterConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Self::default()
        }
    }

    /// Load the transport portion from environment variables, the bucket
    /// definitions still come from the caller.
    pub fn from_env() -> Self {
        Self {
            uri: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),

            prefix: std::env::var("RATE_LIMIT_PREFIX").unwrap_or_default(),

            username: std::env::var("REDIS_USERNAME").ok(),

            password: std::env::var("REDIS_PASSWORD").ok(),

            use_tls: std::env::var("REDIS_USE_TLS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(false),

            max_connections: std::env::var("REDIS_MAX_CONN")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50),

            ..Self::default()
        }
    }

    pub fn bucket(mut self, name: impl Into<String>, def: RawBucket) -> Self {
        self.buckets.insert(name.into(), def);
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn ping(mut self, ping: PingConfig) -> Self {
        self.ping = Some(ping);
        self
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            uri: "redis://localhost:6379".to_string(),
            prefix: String::new(),
            username: None,
            password: None,
            use_tls: false,
            global_ttl_ms: DEFAULT_GLOBAL_TTL_MS,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            max_connections: 50,
            ping: None,
            buckets: HashMap::new(),
        }
    }
}

/// Liveness probing configuration.
#[derive(Debug, Clone)]
pub struct PingConfig {
    /// Interval between probes
    pub interval: Duration,

    /// Consecutive failures before the reconnect policy kicks in
    pub max_failed_attempts: u32,

    /// Rebuild the pool once the failure threshold is reached; when false the
    /// loop only reports what it would have done
    pub reconnect_if_failed: bool,

    /// Upper bound on reconnect attempts before the loop goes report-only
    pub max_failed_attempts_to_retry_reconnect: u32,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_failed_attempts: 5,
            reconnect_if_failed: true,
            max_failed_attempts_to_retry_reconnect: 10,
        }
    }
}

/// A bucket definition as supplied by the caller, before normalization.
///
/// Rate shortcuts (`per_second`, `per_minute`, `per_hour`, `per_day`) expand
/// to an explicit `interval` + `per_interval` pair; when several shortcuts are
/// present the largest interval wins. A `per_interval` of zero leaves the
/// bucket fixed (no refill), the same as leaving the rate unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawBucket {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_interval: Option<u64>,

    /// Refill interval in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_second: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_minute: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_hour: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_day: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub unlimited: Option<bool>,

    /// Number of successive takes per key answered from the in-process cache
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_n_calls: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub erl_activation_period_seconds: Option<u64>,

    /// Elevated capacity regime entered when the standard one is exhausted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elevated: Option<Box<RawBucket>>,

    /// Per-key overrides, evaluated in definition order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<RawOverride>,
}

impl RawBucket {
    pub fn per_second(n: u64) -> Self {
        Self {
            per_second: Some(n),
            ..Self::default()
        }
    }

    pub fn per_minute(n: u64) -> Self {
        Self {
            per_minute: Some(n),
            ..Self::default()
        }
    }

    pub fn fixed(size: u64) -> Self {
        Self {
            size: Some(size),
            ..Self::default()
        }
    }

    pub fn unlimited() -> Self {
        Self {
            unlimited: Some(true),
            ..Self::default()
        }
    }

    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn skip_n_calls(mut self, n: u32) -> Self {
        self.skip_n_calls = Some(n);
        self
    }

    pub fn elevated(mut self, def: RawBucket) -> Self {
        self.elevated = Some(Box::new(def));
        self
    }

    pub fn with_override(mut self, ov: RawOverride) -> Self {
        self.overrides.push(ov);
        self
    }

    /// Any field that would produce an effective capacity.
    pub(crate) fn has_capacity_source(&self) -> bool {
        self.size.is_some()
            || self.per_interval.is_some()
            || self.per_second.is_some()
            || self.per_minute.is_some()
            || self.per_hour.is_some()
            || self.per_day.is_some()
            || self.unlimited == Some(true)
    }
}

/// One override entry. Without `match` the entry applies to the key equal to
/// `name`; with `match` it applies to any key the (case-insensitive) regex
/// matches, first match in definition order winning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawOverride {
    pub name: String,

    /// Case-insensitive regex applied to request keys
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// Expiry as a UNIX timestamp in seconds; entries already past it are
    /// dropped at compile time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<i64>,

    #[serde(flatten)]
    pub bucket: RawBucket,
}

impl RawOverride {
    pub fn literal(name: impl Into<String>, bucket: RawBucket) -> Self {
        Self {
            name: name.into(),
            pattern: None,
            until: None,
            bucket,
        }
    }

    pub fn matching(name: impl Into<String>, pattern: impl Into<String>, bucket: RawBucket) -> Self {
        Self {
            name: name.into(),
            pattern: Some(pattern.into()),
            until: None,
            bucket,
        }
    }

    pub fn until(mut self, epoch_s: i64) -> Self {
        self.until = Some(epoch_s);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_bucket_parses_from_json() {
        let raw: RawBucket = serde_json::from_str(
            r#"{
                "size": 10,
                "per_second": 5,
                "overrides": [
                    { "name": "127.0.0.1", "per_second": 100 },
                    { "name": "tenants", "match": "^tenant-", "size": 50, "until": 4102444800 }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(raw.size, Some(10));
        assert_eq!(raw.per_second, Some(5));
        assert_eq!(raw.overrides.len(), 2);
        assert_eq!(raw.overrides[0].pattern, None);
        assert_eq!(raw.overrides[1].pattern.as_deref(), Some("^tenant-"));
        assert_eq!(raw.overrides[1].until, Some(4_102_444_800));
    }

    #[test]
    fn elevated_definitions_nest() {
        let raw: RawBucket = serde_json::from_str(
            r#"{ "size": 1, "per_minute": 1, "elevated": { "size": 10, "per_minute": 2 } }"#,
        )
        .unwrap();

        let elevated = raw.elevated.expect("elevated definition");
        assert_eq!(elevated.size, Some(10));
        assert_eq!(elevated.per_minute, Some(2));
    }
}
