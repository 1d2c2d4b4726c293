//! In-process implementation of the atomic bucket contract.
//!
//! Useful for tests and for embedding the limiter without a shared store;
//! a single mutex per map stands in for the server-side script serialization.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::Result;
use crate::store::{
    epoch_ms, BucketStore, ErlArgs, PutArgs, RawElevatedTake, RawPut, RawStatus, RawTake,
    StatusArgs, TakeArgs,
};

#[derive(Debug, Clone)]
struct BucketEntry {
    last_drip_ms: u64,
    remaining: f64,
    expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: Mutex<HashMap<String, BucketEntry>>,
    flags: Mutex<HashMap<String, Instant>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_entry(buckets: &mut HashMap<String, BucketEntry>, key: &str) -> Option<BucketEntry> {
        match buckets.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.clone()),
            Some(_) => {
                buckets.remove(key);
                None
            }
            None => None,
        }
    }

    fn flag_is_live(flags: &mut HashMap<String, Instant>, key: &str) -> bool {
        match flags.get(key) {
            Some(expires_at) if *expires_at > Instant::now() => true,
            Some(_) => {
                flags.remove(key);
                false
            }
            None => false,
        }
    }
}

fn refill(entry: Option<&BucketEntry>, now_ms: u64, tokens_per_ms: f64, size: u64) -> f64 {
    match entry {
        Some(e) if tokens_per_ms > 0.0 => {
            let delta = now_ms.saturating_sub(e.last_drip_ms) as f64;
            (e.remaining + delta * tokens_per_ms).min(size as f64)
        }
        Some(e) => e.remaining,
        None => size as f64,
    }
}

fn reset_ms(now_ms: u64, size: u64, remaining: f64, drip_interval_ms: f64) -> u64 {
    if drip_interval_ms > 0.0 {
        (now_ms as f64 + (size as f64 - remaining) * drip_interval_ms).ceil() as u64
    } else {
        0
    }
}

#[async_trait]
impl BucketStore for MemoryStore {
    async fn take(&self, key: &str, args: TakeArgs) -> Result<RawTake> {
        let mut buckets = self.buckets.lock();
        let now_ms = epoch_ms();

        let entry = Self::live_entry(&mut buckets, key);
        let mut content = refill(entry.as_ref(), now_ms, args.tokens_per_ms, args.size);

        let conformant = content >= args.count as f64;
        if conformant {
            content = (content - args.count as f64).min(args.size as f64);
        }

        buckets.insert(
            key.to_string(),
            BucketEntry {
                last_drip_ms: now_ms,
                remaining: content,
                expires_at: Instant::now() + Duration::from_secs(args.ttl_s),
            },
        );

        Ok(RawTake {
            remaining: content,
            conformant,
            now_ms,
            reset_ms: reset_ms(now_ms, args.size, content, args.drip_interval_ms),
        })
    }

    async fn take_elevated(
        &self,
        key: &str,
        erl_key: &str,
        args: TakeArgs,
        erl: ErlArgs,
    ) -> Result<RawElevatedTake> {
        let mut buckets = self.buckets.lock();
        let mut flags = self.flags.lock();
        let now_ms = epoch_ms();

        let mut erl_on = Self::flag_is_live(&mut flags, erl_key);

        let (rate, capacity) = if erl_on {
            (erl.tokens_per_ms, erl.size)
        } else {
            (args.tokens_per_ms, args.size)
        };

        let entry = Self::live_entry(&mut buckets, key);
        let mut content = refill(entry.as_ref(), now_ms, rate, capacity);
        let mut capacity = capacity;

        let mut enough = content >= args.count as f64;
        if !enough && !erl_on {
            // promote, carrying forward what the standard capacity already spent
            let used = args.size as f64 - content;
            let promoted = erl.size as f64 - used;
            if promoted >= args.count as f64 {
                flags.insert(
                    erl_key.to_string(),
                    Instant::now() + Duration::from_secs(erl.activation_period_s),
                );
                erl_on = true;
                enough = true;
                content = promoted;
                capacity = erl.size;
            }
        }

        if enough {
            content = (content - args.count as f64).min(capacity as f64);
        }

        let ttl_s = if erl_on { erl.ttl_s } else { args.ttl_s };
        buckets.insert(
            key.to_string(),
            BucketEntry {
                last_drip_ms: now_ms,
                remaining: content,
                expires_at: Instant::now() + Duration::from_secs(ttl_s),
            },
        );

        let (reset_size, reset_drip) = if erl_on {
            (erl.size, erl.drip_interval_ms)
        } else {
            (args.size, args.drip_interval_ms)
        };

        Ok(RawElevatedTake {
            remaining: content,
            conformant: enough,
            now_ms,
            reset_ms: reset_ms(now_ms, reset_size, content, reset_drip),
            erl_active: erl_on,
        })
    }

    async fn put(&self, key: &str, args: PutArgs) -> Result<RawPut> {
        let mut buckets = self.buckets.lock();
        let now_ms = epoch_ms();

        let remaining = Self::live_entry(&mut buckets, key)
            .map(|e| e.remaining)
            .unwrap_or(args.size as f64);

        let content = (remaining + args.count as f64).min(args.size as f64);

        buckets.insert(
            key.to_string(),
            BucketEntry {
                last_drip_ms: now_ms,
                remaining: content,
                expires_at: Instant::now() + Duration::from_secs(args.ttl_s),
            },
        );

        Ok(RawPut {
            remaining: content,
            now_ms,
            reset_ms: reset_ms(now_ms, args.size, content, args.drip_interval_ms),
        })
    }

    async fn status(&self, key: &str, args: StatusArgs) -> Result<RawStatus> {
        let mut buckets = self.buckets.lock();
        let now_ms = epoch_ms();

        let remaining = Self::live_entry(&mut buckets, key)
            .map(|e| e.remaining)
            .unwrap_or(args.size as f64);

        Ok(RawStatus {
            remaining,
            now_ms,
            reset_ms: reset_ms(now_ms, args.size, remaining, args.drip_interval_ms),
        })
    }

    async fn reset_namespace(&self, pattern: &str) -> Result<u64> {
        let prefix = pattern.strip_suffix('*').unwrap_or(pattern);
        let mut removed = 0u64;

        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        buckets.retain(|k, _| !k.starts_with(prefix));
        removed += (before - buckets.len()) as u64;

        let mut flags = self.flags.lock();
        let before = flags.len();
        flags.retain(|k, _| !k.starts_with(prefix));
        removed += (before - flags.len()) as u64;

        Ok(removed)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn reconnect(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn take_args(size: u64, count: u64) -> TakeArgs {
        TakeArgs {
            tokens_per_ms: 0.0,
            size,
            count,
            ttl_s: 60,
            drip_interval_ms: 0.0,
        }
    }

    #[tokio::test]
    async fn first_touch_starts_full() {
        let store = MemoryStore::new();
        let res = store.take("t:k", take_args(10, 1)).await.unwrap();

        assert!(res.conformant);
        assert_eq!(res.remaining, 9.0);
        assert_eq!(res.reset_ms, 0);
    }

    #[tokio::test]
    async fn fixed_bucket_never_refills() {
        let store = MemoryStore::new();
        store.take("t:k", take_args(2, 2)).await.unwrap();

        let res = store.take("t:k", take_args(2, 1)).await.unwrap();
        assert!(!res.conformant);
        assert_eq!(res.remaining, 0.0);
    }

    #[tokio::test]
    async fn promotion_carries_spent_tokens_forward() {
        let store = MemoryStore::new();
        let args = TakeArgs {
            tokens_per_ms: 1.0 / 60_000.0,
            size: 1,
            count: 1,
            ttl_s: 60,
            drip_interval_ms: 60_000.0,
        };
        let erl = ErlArgs {
            tokens_per_ms: 2.0 / 60_000.0,
            size: 10,
            ttl_s: 300,
            drip_interval_ms: 30_000.0,
            activation_period_s: 900,
        };

        let first = store.take_elevated("t:k", "erl:k", args, erl).await.unwrap();
        assert!(first.conformant);
        assert!(!first.erl_active);

        let second = store.take_elevated("t:k", "erl:k", args, erl).await.unwrap();
        assert!(second.conformant);
        assert!(second.erl_active);
        assert_eq!(second.remaining.floor(), 8.0);
    }

    #[tokio::test]
    async fn expired_state_reads_as_missing() {
        let store = MemoryStore::new();
        let mut args = take_args(5, 5);
        args.ttl_s = 1;

        store.take("t:k", args).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1_100)).await;

        let res = store.take("t:k", take_args(5, 1)).await.unwrap();
        assert!(res.conformant);
        assert_eq!(res.remaining, 4.0);
    }

    #[tokio::test]
    async fn reset_namespace_honors_the_prefix() {
        let store = MemoryStore::new();
        store.take("pfx:t:a", take_args(5, 1)).await.unwrap();
        store.take("other:t:b", take_args(5, 1)).await.unwrap();

        let removed = store.reset_namespace("pfx:*").await.unwrap();
        assert_eq!(removed, 1);

        let res = store.status("pfx:t:a", StatusArgs { size: 5, drip_interval_ms: 0.0 }).await.unwrap();
        assert_eq!(res.remaining, 5.0);
    }
}
