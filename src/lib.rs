//! Distributed token-bucket rate limiting over Redis.
//!
//! Buckets refill continuously at a configured rate; every mutation runs as
//! a single server-side script so concurrent takes against one key serialize
//! inside the store and read the store's clock. Bucket types support literal
//! and regex per-key overrides, an in-process skip-call cache, and elevated
//! rate limits: a time-boxed larger capacity regime entered when the
//! standard one runs dry.

pub mod buckets;
pub mod cache;
pub mod config;
pub mod errors;
pub mod limiter;
pub mod metrics;
pub mod store;

// Re-export commonly used types
pub use config::{LimiterConfig, PingConfig, RawBucket, RawOverride};
pub use errors::{RateLimitError, Result};
pub use limiter::params::{Count, ErlParams, GetParams, PutParams, TakeParams};
pub use limiter::response::{ElevatedTakeResult, GetResult, PutResult, TakeResult};
pub use limiter::{Limiter, LimiterEvent, PingStatus};
pub use store::memory::MemoryStore;
pub use store::redis::RedisStore;
pub use store::BucketStore;
