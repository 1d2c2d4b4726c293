//! Canonicalization of raw bucket definitions into runtime descriptors.
//!
//! Rate shortcuts expand into an explicit `interval` + `per_interval` pair;
//! derived fields (`drip_interval_ms`, `tokens_per_ms`, `ttl_s`) are computed
//! once here so the hot path never touches the raw form again.

use crate::buckets::{BucketDescriptor, ElevatedDescriptor};
use crate::config::{RawBucket, DEFAULT_ERL_ACTIVATION_PERIOD_S};

/// Interval shortcut mapping, applied in this order; on conflicting
/// definitions the last entry wins.
const SHORTCUT_INTERVALS_MS: [u64; 4] = [1_000, 60_000, 3_600_000, 86_400_000];

fn shortcut_values(raw: &RawBucket) -> [Option<u64>; 4] {
    [raw.per_second, raw.per_minute, raw.per_hour, raw.per_day]
}

/// Normalize a raw definition into a [`BucketDescriptor`]. Pure; malformed
/// input surfaces later through request validation.
pub fn normalize(raw: &RawBucket, global_ttl_ms: u64) -> BucketDescriptor {
    let mut interval = raw.interval;
    let mut per_interval = raw.per_interval;

    for (value, interval_ms) in shortcut_values(raw).iter().zip(SHORTCUT_INTERVALS_MS) {
        if let Some(v) = value {
            interval = Some(interval_ms);
            per_interval = Some(*v);
        }
    }

    let size = raw.size.or(per_interval).unwrap_or(0);

    // A zero rate (or interval) leaves the bucket fixed, same as an unset one.
    let refill = match (interval, per_interval) {
        (Some(i), Some(p)) if i > 0 && p > 0 => Some((i, p)),
        _ => None,
    };

    let (interval_ms, per_interval, drip_interval_ms, tokens_per_ms, ttl_s) = match refill {
        Some((i, p)) => {
            let drip = i as f64 / p as f64;
            let ttl = ((size as f64 * drip) / 1000.0).ceil().max(1.0) as u64;
            (Some(i), Some(p), drip, p as f64 / i as f64, ttl)
        }
        None => (None, None, 0.0, 0.0, (global_ttl_ms / 1000).max(1)),
    };

    BucketDescriptor {
        size,
        interval_ms,
        per_interval,
        drip_interval_ms,
        tokens_per_ms,
        ttl_s,
        unlimited: raw.unlimited.unwrap_or(false),
        skip_n_calls: raw.skip_n_calls.unwrap_or(0),
        elevated: raw
            .elevated
            .as_ref()
            .map(|e| normalize_elevated(e, raw, global_ttl_ms)),
    }
}

fn normalize_elevated(raw: &RawBucket, parent: &RawBucket, global_ttl_ms: u64) -> ElevatedDescriptor {
    let base = normalize(raw, global_ttl_ms);

    ElevatedDescriptor {
        size: base.size,
        drip_interval_ms: base.drip_interval_ms,
        tokens_per_ms: base.tokens_per_ms,
        ttl_s: base.ttl_s,
        activation_period_s: raw
            .erl_activation_period_seconds
            .or(parent.erl_activation_period_seconds)
            .unwrap_or(DEFAULT_ERL_ACTIVATION_PERIOD_S),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_GLOBAL_TTL_MS;

    fn normalized(raw: RawBucket) -> BucketDescriptor {
        normalize(&raw, DEFAULT_GLOBAL_TTL_MS)
    }

    #[test]
    fn per_second_expands_to_interval_pair() {
        let d = normalized(RawBucket::per_second(5).size(10));

        assert_eq!(d.size, 10);
        assert_eq!(d.interval_ms, Some(1_000));
        assert_eq!(d.per_interval, Some(5));
        assert_eq!(d.drip_interval_ms, 200.0);
        assert_eq!(d.tokens_per_ms, 0.005);
        assert_eq!(d.ttl_s, 2);
    }

    #[test]
    fn size_defaults_to_per_interval() {
        let d = normalized(RawBucket::per_second(100));
        assert_eq!(d.size, 100);
    }

    #[test]
    fn empty_definition_normalizes_to_zero_fixed_bucket() {
        let d = normalized(RawBucket::default());

        assert_eq!(d.size, 0);
        assert!(!d.refills());
        assert_eq!(d.ttl_s, DEFAULT_GLOBAL_TTL_MS / 1000);
    }

    #[test]
    fn later_shortcut_wins_on_conflict() {
        let mut raw = RawBucket::per_second(5);
        raw.per_day = Some(10);
        let d = normalized(raw);

        assert_eq!(d.interval_ms, Some(86_400_000));
        assert_eq!(d.per_interval, Some(10));
    }

    #[test]
    fn zero_rate_behaves_as_fixed() {
        let mut raw = RawBucket::fixed(3);
        raw.per_hour = Some(0);
        let d = normalized(raw);

        assert_eq!(d.size, 3);
        assert!(!d.refills());
        assert_eq!(d.drip_interval_ms, 0.0);
        assert_eq!(d.ttl_s, DEFAULT_GLOBAL_TTL_MS / 1000);
    }

    #[test]
    fn explicit_interval_pair_is_honored() {
        let mut raw = RawBucket::fixed(6);
        raw.interval = Some(500);
        raw.per_interval = Some(2);
        let d = normalized(raw);

        assert_eq!(d.drip_interval_ms, 250.0);
        assert_eq!(d.tokens_per_ms, 0.004);
        assert_eq!(d.ttl_s, 2);
    }

    #[test]
    fn per_day_override_derives_exact_day_ttl() {
        let d = normalized(RawBucket {
            per_day: Some(5),
            ..RawBucket::default()
        });

        assert_eq!(d.size, 5);
        assert_eq!(d.ttl_s, 86_400);
    }

    #[test]
    fn elevated_defaults_activation_period() {
        let d = normalized(RawBucket::per_minute(1).size(1).elevated(RawBucket::per_minute(2).size(10)));

        let elevated = d.elevated.expect("elevated descriptor");
        assert_eq!(elevated.size, 10);
        assert_eq!(elevated.activation_period_s, 900);
        assert!(elevated.is_complete());
    }

    #[test]
    fn elevated_inherits_parent_activation_period() {
        let mut raw = RawBucket::per_minute(1).size(1).elevated(RawBucket::per_minute(2).size(10));
        raw.erl_activation_period_seconds = Some(60);

        let d = normalized(raw);
        assert_eq!(d.elevated.unwrap().activation_period_s, 60);
    }

    #[test]
    fn elevated_without_refill_is_incomplete() {
        let d = normalized(RawBucket::per_minute(1).size(1).elevated(RawBucket::fixed(10)));
        assert!(!d.elevated.unwrap().is_complete());
    }
}
