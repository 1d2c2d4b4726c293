//! Compilation of raw bucket type definitions into their runtime form:
//! normalized base, literal and regex override tables, match cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use regex::RegexBuilder;
use tracing::debug;

use crate::buckets::normalize::normalize;
use crate::buckets::{BucketRegistry, RegexOverride, TypeDescriptor};
use crate::config::RawBucket;
use crate::errors::{RateLimitError, Result};

/// Compile one bucket type. Overrides whose `until` is already past are
/// dropped here; entries that expire after compilation stay in effect until
/// the next configure.
pub fn compile_type(name: &str, raw: &RawBucket, global_ttl_ms: u64) -> Result<TypeDescriptor> {
    let now_s = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;

    let base = Arc::new(normalize(raw, global_ttl_ms));

    let mut literal_overrides = HashMap::new();
    let mut regex_overrides = Vec::new();

    for ov in &raw.overrides {
        if let Some(until) = ov.until {
            if until <= now_s {
                debug!("Dropping expired override '{}' of bucket '{}'", ov.name, name);
                continue;
            }
        }

        let descriptor = Arc::new(normalize(&ov.bucket, global_ttl_ms));

        match &ov.pattern {
            Some(pattern) => {
                let pattern = RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        RateLimitError::InvalidOverride(format!(
                            "override '{}' of bucket '{}': {}",
                            ov.name, name, e
                        ))
                    })?;
                regex_overrides.push(RegexOverride { pattern, descriptor });
            }
            None => {
                literal_overrides.insert(ov.name.clone(), descriptor);
            }
        }
    }

    let match_cache = if regex_overrides.is_empty() {
        None
    } else {
        Some(TypeDescriptor::new_match_cache())
    };

    Ok(TypeDescriptor {
        name: name.to_string(),
        base,
        literal_overrides,
        regex_overrides,
        match_cache,
    })
}

/// Compile every bucket type into a fresh registry.
pub fn compile_registry(
    buckets: &HashMap<String, RawBucket>,
    global_ttl_ms: u64,
) -> Result<BucketRegistry> {
    let mut types = HashMap::with_capacity(buckets.len());

    for (name, raw) in buckets {
        let descriptor = compile_type(name, raw, global_ttl_ms)?;
        types.insert(name.clone(), Arc::new(descriptor));
    }

    debug!("Compiled {} bucket type(s)", types.len());
    Ok(BucketRegistry { types })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RawOverride, DEFAULT_GLOBAL_TTL_MS};

    fn compiled(raw: RawBucket) -> TypeDescriptor {
        compile_type("ip", &raw, DEFAULT_GLOBAL_TTL_MS).unwrap()
    }

    #[test]
    fn literal_and_regex_overrides_are_separated() {
        let ty = compiled(
            RawBucket::per_second(5)
                .size(10)
                .with_override(RawOverride::literal("127.0.0.1", RawBucket::per_second(100)))
                .with_override(RawOverride::matching("internal", "^10\\.", RawBucket::per_second(50))),
        );

        assert_eq!(ty.literal_overrides.len(), 1);
        assert_eq!(ty.regex_overrides.len(), 1);
        assert!(ty.match_cache.is_some());
    }

    #[test]
    fn match_cache_is_not_allocated_without_regex_overrides() {
        let ty = compiled(
            RawBucket::per_second(5)
                .with_override(RawOverride::literal("127.0.0.1", RawBucket::per_second(100))),
        );

        assert!(ty.match_cache.is_none());
    }

    #[test]
    fn expired_overrides_are_dropped_at_compile_time() {
        let ty = compiled(
            RawBucket::per_second(5)
                .with_override(RawOverride::literal("127.0.0.1", RawBucket::per_second(100)).until(1)),
        );

        assert!(ty.literal_overrides.is_empty());
    }

    #[test]
    fn future_until_is_kept() {
        let far_future = 4_102_444_800; // 2100-01-01
        let ty = compiled(
            RawBucket::per_second(5)
                .with_override(RawOverride::literal("127.0.0.1", RawBucket::per_second(100)).until(far_future)),
        );

        assert_eq!(ty.literal_overrides.len(), 1);
    }

    #[test]
    fn invalid_regex_is_rejected_with_code() {
        let err = compile_type(
            "ip",
            &RawBucket::per_second(5)
                .with_override(RawOverride::matching("bad", "(unclosed", RawBucket::per_second(1))),
            DEFAULT_GLOBAL_TTL_MS,
        )
        .unwrap_err();

        assert_eq!(err.code(), Some(106));
    }

    #[test]
    fn registry_holds_every_type() {
        let mut buckets = HashMap::new();
        buckets.insert("ip".to_string(), RawBucket::per_second(5).size(10));
        buckets.insert("user".to_string(), RawBucket::per_minute(60));

        let registry = compile_registry(&buckets, DEFAULT_GLOBAL_TTL_MS).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.get("ip").is_some());
        assert!(registry.get("missing").is_none());
    }
}
