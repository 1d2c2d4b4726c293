pub mod compile;
pub mod normalize;
pub mod resolve;

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;

/// Capacity of the per-type regex match cache.
pub const OVERRIDES_CACHE_CAPACITY: usize = 50;

/// Compiled, normalized runtime representation of one bucket configuration.
/// Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketDescriptor {
    /// Maximum content
    pub size: u64,

    /// Refill pace; `None` on both means the bucket is fixed (no refill)
    pub interval_ms: Option<u64>,
    pub per_interval: Option<u64>,

    /// Time per single token, 0.0 when fixed
    pub drip_interval_ms: f64,

    /// Refill rate, 0.0 when fixed
    pub tokens_per_ms: f64,

    /// State entry TTL: drain time when refilling, the global default otherwise
    pub ttl_s: u64,

    /// Takes always conform and never touch the store
    pub unlimited: bool,

    /// Successive takes per key answered from the in-process cache
    pub skip_n_calls: u32,

    pub elevated: Option<ElevatedDescriptor>,
}

impl BucketDescriptor {
    /// Whether content drips back over time.
    pub fn refills(&self) -> bool {
        self.tokens_per_ms > 0.0
    }
}

/// Normalized elevated capacity regime.
#[derive(Debug, Clone, PartialEq)]
pub struct ElevatedDescriptor {
    pub size: u64,
    pub drip_interval_ms: f64,
    pub tokens_per_ms: f64,
    pub ttl_s: u64,

    /// TTL of the activation flag entry, in seconds
    pub activation_period_s: u64,
}

impl ElevatedDescriptor {
    /// An elevated regime is usable only when it has both a capacity and a
    /// refill rate of its own.
    pub fn is_complete(&self) -> bool {
        self.size > 0 && self.tokens_per_ms > 0.0
    }
}

/// A regex override entry; evaluation order is definition order.
#[derive(Debug)]
pub struct RegexOverride {
    pub pattern: Regex,
    pub descriptor: Arc<BucketDescriptor>,
}

/// Compiled bucket type: the default descriptor plus its overrides and the
/// bounded cache of regex match results.
#[derive(Debug)]
pub struct TypeDescriptor {
    pub name: String,
    pub base: Arc<BucketDescriptor>,
    pub literal_overrides: HashMap<String, Arc<BucketDescriptor>>,
    pub regex_overrides: Vec<RegexOverride>,

    /// key -> index into `regex_overrides`; allocated only when regex
    /// overrides exist
    pub(crate) match_cache: Option<Mutex<LruCache<String, usize>>>,
}

impl TypeDescriptor {
    pub(crate) fn new_match_cache() -> Mutex<LruCache<String, usize>> {
        Mutex::new(LruCache::new(
            NonZeroUsize::new(OVERRIDES_CACHE_CAPACITY).unwrap(),
        ))
    }
}

/// All compiled bucket types; replaced wholesale on configure.
#[derive(Default)]
pub struct BucketRegistry {
    pub types: HashMap<String, Arc<TypeDescriptor>>,
}

impl BucketRegistry {
    pub fn get(&self, name: &str) -> Option<Arc<TypeDescriptor>> {
        self.types.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
