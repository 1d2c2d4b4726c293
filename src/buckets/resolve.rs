//! Per-request descriptor selection: literal override, cached regex match,
//! first regex match, then the type default.

use std::sync::Arc;

use crate::buckets::{BucketDescriptor, TypeDescriptor};

impl TypeDescriptor {
    /// Pick the effective descriptor for `key`. Caller-supplied overrides are
    /// handled before this point and never cached; there is no negative
    /// caching here either, an unmatched key rescans on every call.
    pub fn resolve(&self, key: &str) -> Arc<BucketDescriptor> {
        if let Some(descriptor) = self.literal_overrides.get(key) {
            return descriptor.clone();
        }

        if let Some(cache) = &self.match_cache {
            let mut cache = cache.lock();

            if let Some(&idx) = cache.get(key) {
                return self.regex_overrides[idx].descriptor.clone();
            }

            for (idx, ov) in self.regex_overrides.iter().enumerate() {
                if ov.pattern.is_match(key) {
                    cache.put(key.to_string(), idx);
                    return ov.descriptor.clone();
                }
            }
        }

        self.base.clone()
    }
}

#[cfg(test)]
mod tests {
    use crate::buckets::compile::compile_type;
    use crate::buckets::TypeDescriptor;
    use crate::config::{RawBucket, RawOverride, DEFAULT_GLOBAL_TTL_MS};

    fn ty() -> TypeDescriptor {
        compile_type(
            "user",
            &RawBucket::per_second(5)
                .size(1)
                .with_override(RawOverride::literal("admin", RawBucket::per_second(100)))
                .with_override(RawOverride::matching("re", "^regexp", RawBucket::fixed(10)))
                .with_override(RawOverride::matching("wide", ".*", RawBucket::fixed(99))),
            DEFAULT_GLOBAL_TTL_MS,
        )
        .unwrap()
    }

    #[test]
    fn literal_override_wins_over_regex() {
        let ty = ty();
        assert_eq!(ty.resolve("admin").size, 100);
    }

    #[test]
    fn first_regex_match_wins_in_definition_order() {
        let ty = ty();
        // both patterns match; the earlier definition applies
        assert_eq!(ty.resolve("regexp|test").size, 10);
        assert_eq!(ty.resolve("anything-else").size, 99);
    }

    #[test]
    fn regex_matching_is_case_insensitive() {
        let ty = ty();
        assert_eq!(ty.resolve("REGEXP-user").size, 10);
    }

    #[test]
    fn match_results_are_cached() {
        let ty = ty();
        assert_eq!(ty.resolve("regexp-1").size, 10);

        let cache = ty.match_cache.as_ref().unwrap();
        assert_eq!(cache.lock().get("regexp-1"), Some(&0));
    }

    #[test]
    fn unmatched_key_falls_back_to_base() {
        let ty = compile_type(
            "user",
            &RawBucket::per_second(5)
                .size(1)
                .with_override(RawOverride::matching("re", "^regexp", RawBucket::fixed(10))),
            DEFAULT_GLOBAL_TTL_MS,
        )
        .unwrap();

        assert_eq!(ty.resolve("plain").size, 1);
        // no negative caching
        assert!(ty.match_cache.as_ref().unwrap().lock().get("plain").is_none());
    }
}
