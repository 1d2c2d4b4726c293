//! Decoding of raw store replies into caller-facing results.

use crate::store::{epoch_ms, RawElevatedTake, RawPut, RawStatus, RawTake};

/// Decision for a take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TakeResult {
    pub conformant: bool,

    /// Whole tokens left after the call
    pub remaining: i64,

    /// UNIX timestamp in seconds at which the bucket is projected full;
    /// 0 for buckets that never refill
    pub reset: u64,

    /// Effective capacity the decision was made against
    pub limit: u64,

    /// True when the result came out of a wait loop that had to sleep
    pub delayed: bool,
}

/// A take decision under elevated limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElevatedTakeResult {
    pub conformant: bool,
    pub remaining: i64,
    pub reset: u64,
    pub limit: u64,
    pub delayed: bool,

    /// Whether the elevation flag is set after this call
    pub erl_activated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutResult {
    pub remaining: i64,
    pub reset: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetResult {
    pub remaining: i64,
    pub reset: u64,
    pub limit: u64,
}

/// Millisecond reset timestamps surface to callers as whole seconds, rounded
/// up so a bucket is never reported full early.
pub(crate) fn reset_s(reset_ms: u64) -> u64 {
    reset_ms.div_ceil(1000)
}

pub(crate) fn decode_take(raw: RawTake, limit: u64) -> TakeResult {
    TakeResult {
        conformant: raw.conformant,
        remaining: raw.remaining.floor() as i64,
        reset: reset_s(raw.reset_ms),
        limit,
        delayed: false,
    }
}

pub(crate) fn decode_elevated_take(raw: RawElevatedTake, limit: u64) -> ElevatedTakeResult {
    ElevatedTakeResult {
        conformant: raw.conformant,
        remaining: raw.remaining.floor() as i64,
        reset: reset_s(raw.reset_ms),
        limit,
        delayed: false,
        erl_activated: raw.erl_active,
    }
}

pub(crate) fn decode_put(raw: RawPut, limit: u64) -> PutResult {
    PutResult {
        remaining: raw.remaining.floor() as i64,
        reset: reset_s(raw.reset_ms),
        limit,
    }
}

pub(crate) fn decode_status(raw: RawStatus, limit: u64) -> GetResult {
    GetResult {
        remaining: raw.remaining.floor() as i64,
        reset: reset_s(raw.reset_ms),
        limit,
    }
}

/// Takes against unlimited buckets conform without a round-trip.
pub(crate) fn unlimited_take(size: u64) -> TakeResult {
    TakeResult {
        conformant: true,
        remaining: size as i64,
        reset: epoch_ms() / 1000,
        limit: size,
        delayed: false,
    }
}

pub(crate) fn unlimited_put(size: u64) -> PutResult {
    PutResult {
        remaining: size as i64,
        reset: epoch_ms() / 1000,
        limit: size,
    }
}

pub(crate) fn unlimited_status(size: u64) -> GetResult {
    GetResult {
        remaining: size as i64,
        reset: epoch_ms() / 1000,
        limit: size,
    }
}
