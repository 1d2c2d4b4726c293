pub mod memory;
pub mod pool;
pub mod redis;
pub mod script;

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::errors::Result;

/// Positional arguments of the standard take routine.
#[derive(Debug, Clone, Copy)]
pub struct TakeArgs {
    pub tokens_per_ms: f64,
    pub size: u64,
    pub count: u64,
    pub ttl_s: u64,
    pub drip_interval_ms: f64,
}

/// Additional arguments of the elevated take routine.
#[derive(Debug, Clone, Copy)]
pub struct ErlArgs {
    pub tokens_per_ms: f64,
    pub size: u64,
    pub ttl_s: u64,
    pub drip_interval_ms: f64,
    pub activation_period_s: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct PutArgs {
    /// May be negative; the routine does not clamp below zero
    pub count: i64,
    pub size: u64,
    pub ttl_s: u64,
    pub drip_interval_ms: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct StatusArgs {
    pub size: u64,
    pub drip_interval_ms: f64,
}

/// Undecoded result of a take: remaining may be fractional mid-refill.
#[derive(Debug, Clone, Copy)]
pub struct RawTake {
    pub remaining: f64,
    pub conformant: bool,
    pub now_ms: u64,
    pub reset_ms: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct RawElevatedTake {
    pub remaining: f64,
    pub conformant: bool,
    pub now_ms: u64,
    pub reset_ms: u64,

    /// Whether the elevation flag is set after this call
    pub erl_active: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct RawPut {
    pub remaining: f64,
    pub now_ms: u64,
    pub reset_ms: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct RawStatus {
    pub remaining: f64,
    pub now_ms: u64,
    pub reset_ms: u64,
}

/// Atomic bucket operations against a shared store.
///
/// Every mutation reads the store's clock, refills from the last drip
/// timestamp, and commits state plus TTL in a single atomic step; concurrent
/// calls against the same key observe a total order. [`redis::RedisStore`]
/// executes these as server-side scripts; [`memory::MemoryStore`] preserves
/// the same contract in-process.
#[async_trait]
pub trait BucketStore: Send + Sync {
    async fn take(&self, key: &str, args: TakeArgs) -> Result<RawTake>;

    async fn take_elevated(
        &self,
        key: &str,
        erl_key: &str,
        args: TakeArgs,
        erl: ErlArgs,
    ) -> Result<RawElevatedTake>;

    async fn put(&self, key: &str, args: PutArgs) -> Result<RawPut>;

    /// Read-only: never mutates state.
    async fn status(&self, key: &str, args: StatusArgs) -> Result<RawStatus>;

    /// Remove every key matching `pattern` (glob, e.g. "prefix*"). Returns
    /// the number of keys removed.
    async fn reset_namespace(&self, pattern: &str) -> Result<u64>;

    async fn health_check(&self) -> Result<()>;

    /// Re-establish the transport after repeated probe failures.
    async fn reconnect(&self) -> Result<()>;
}

/// Wall clock in milliseconds, used only where no store round-trip happens
/// (unlimited buckets, the in-process store).
pub(crate) fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
