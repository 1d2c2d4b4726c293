//! Skip-call cache: elides up to `skip_n_calls` successive store round-trips
//! per key, then compensates by batching the deferred token count into the
//! next real call.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::limiter::response::TakeResult;

/// Capacity of the per-client skip-call cache.
pub const SKIP_CACHE_CAPACITY: usize = 50;

#[derive(Debug, Clone)]
struct SkipEntry {
    result: TakeResult,
    erl_activated: Option<bool>,
    skipped: u32,
}

/// Outcome of consulting the cache before a take.
#[derive(Debug)]
pub enum SkipDecision {
    /// Answer with the cached result; no round-trip.
    Skip {
        result: TakeResult,
        erl_activated: Option<bool>,
    },
    /// Go to the store, deducting `multiplier × count` tokens.
    GoToStore { multiplier: u64 },
}

pub struct SkipCallCache {
    entries: Mutex<LruCache<String, SkipEntry>>,
}

impl SkipCallCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).unwrap(),
            )),
        }
    }

    /// Decide whether this take can be answered in-process. A hit increments
    /// the entry's skip counter; once `skip_n` calls have been skipped the
    /// next one goes to the store carrying the deferred count.
    pub fn begin(&self, cache_key: &str, skip_n: u32) -> SkipDecision {
        let mut entries = self.entries.lock();

        match entries.get_mut(cache_key) {
            Some(entry) if entry.skipped < skip_n => {
                entry.skipped += 1;
                SkipDecision::Skip {
                    result: entry.result.clone(),
                    erl_activated: entry.erl_activated,
                }
            }
            Some(_) => SkipDecision::GoToStore {
                multiplier: u64::from(skip_n) + 1,
            },
            None => SkipDecision::GoToStore { multiplier: 1 },
        }
    }

    /// Record the result of a real store call, resetting the skip counter.
    pub fn record(&self, cache_key: &str, result: TakeResult, erl_activated: Option<bool>) {
        let mut entries = self.entries.lock();
        entries.put(
            cache_key.to_string(),
            SkipEntry {
                result,
                erl_activated,
                skipped: 0,
            },
        );
    }
}
