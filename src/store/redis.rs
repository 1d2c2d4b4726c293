use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::Script;
use tracing::{debug, error, info};

use crate::config::LimiterConfig;
use crate::errors::{RateLimitError, Result};
use crate::store::pool::{create_redis_pool, ConnectionSettings};
use crate::store::script::{load_scripts, Scripts};
use crate::store::{
    BucketStore, ErlArgs, PutArgs, RawElevatedTake, RawPut, RawStatus, RawTake, StatusArgs,
    TakeArgs,
};

/// Redis-backed store: every operation is a single script invocation, so
/// concurrent calls against one key serialize inside the server.
pub struct RedisStore {
    pool: ArcSwap<Pool>,
    scripts: Scripts,
    settings: ConnectionSettings,
    command_timeout: Duration,
}

impl RedisStore {
    /// Build the pool and register the atomic routines.
    pub async fn connect(config: &LimiterConfig) -> Result<Self> {
        let settings = ConnectionSettings::from_config(config);
        let pool = create_redis_pool(&settings).await?;

        let scripts = Scripts::new();
        let mut conn = pool
            .get()
            .await
            .map_err(|e| RateLimitError::Pool(format!("Failed to get connection for script loading: {}", e)))?;
        load_scripts(&mut *conn, &scripts).await?;

        Ok(Self {
            pool: ArcSwap::from_pointee(pool),
            scripts,
            settings,
            command_timeout: config.command_timeout,
        })
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection> {
        let pool = self.pool.load_full();
        pool.get().await.map_err(|e| {
            error!("Failed to get Redis connection: {}", e);
            RateLimitError::Pool(format!("Pool exhausted: {}", e))
        })
    }

    /// Invoke one routine with a dispatch timeout. On timeout the server-side
    /// script may still have completed; deductions are at-least-once.
    async fn invoke(&self, name: &str, script: &Script, keys: &[&str], argv: Vec<String>) -> Result<Vec<redis::Value>> {
        let mut conn = self.conn().await?;

        let mut invocation = script.prepare_invoke();
        for key in keys {
            invocation.key(*key);
        }
        invocation.arg(&argv);

        let result = tokio::time::timeout(self.command_timeout, invocation.invoke_async(&mut *conn))
            .await
            .map_err(|_| RateLimitError::Timeout(self.command_timeout))?;

        result.map_err(|e| {
            error!("Script '{}' execution failed: {}", name, e);
            RateLimitError::ScriptExecution(format!("Script '{}' failed: {}", name, e))
        })
    }
}

fn reply_number(values: &[redis::Value], idx: usize) -> Result<f64> {
    match values.get(idx) {
        Some(redis::Value::Int(v)) => Ok(*v as f64),
        Some(redis::Value::BulkString(bytes)) => std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| RateLimitError::Decode(format!("non-numeric reply at position {}", idx))),
        other => Err(RateLimitError::Decode(format!(
            "unexpected reply at position {}: {:?}",
            idx, other
        ))),
    }
}

fn reply_int(values: &[redis::Value], idx: usize) -> Result<i64> {
    match values.get(idx) {
        Some(redis::Value::Int(v)) => Ok(*v),
        Some(redis::Value::BulkString(bytes)) => std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| RateLimitError::Decode(format!("non-integer reply at position {}", idx))),
        other => Err(RateLimitError::Decode(format!(
            "unexpected reply at position {}: {:?}",
            idx, other
        ))),
    }
}

fn expect_len(name: &str, values: &[redis::Value], len: usize) -> Result<()> {
    if values.len() != len {
        return Err(RateLimitError::Decode(format!(
            "invalid '{}' reply length: {}",
            name,
            values.len()
        )));
    }
    Ok(())
}

fn fmt_f64(v: f64) -> String {
    // full precision, no scientific notation surprises for the Lua side
    format!("{:.17}", v)
}

#[async_trait]
impl BucketStore for RedisStore {
    async fn take(&self, key: &str, args: TakeArgs) -> Result<RawTake> {
        let argv = vec![
            fmt_f64(args.tokens_per_ms),
            args.size.to_string(),
            args.count.to_string(),
            args.ttl_s.to_string(),
            fmt_f64(args.drip_interval_ms),
        ];

        debug!("Executing take: key={}, count={}", key, args.count);
        let values = self.invoke("take", &self.scripts.take, &[key], argv).await?;
        expect_len("take", &values, 4)?;

        Ok(RawTake {
            remaining: reply_number(&values, 0)?,
            conformant: reply_int(&values, 1)? == 1,
            now_ms: reply_int(&values, 2)? as u64,
            reset_ms: reply_int(&values, 3)? as u64,
        })
    }

    async fn take_elevated(
        &self,
        key: &str,
        erl_key: &str,
        args: TakeArgs,
        erl: ErlArgs,
    ) -> Result<RawElevatedTake> {
        let argv = vec![
            fmt_f64(args.tokens_per_ms),
            args.size.to_string(),
            args.count.to_string(),
            args.ttl_s.to_string(),
            fmt_f64(args.drip_interval_ms),
            fmt_f64(erl.tokens_per_ms),
            erl.size.to_string(),
            erl.ttl_s.to_string(),
            fmt_f64(erl.drip_interval_ms),
            erl.activation_period_s.to_string(),
        ];

        debug!("Executing elevated take: key={}, erl_key={}, count={}", key, erl_key, args.count);
        let values = self
            .invoke("take_elevated", &self.scripts.take_elevated, &[key, erl_key], argv)
            .await?;
        expect_len("take_elevated", &values, 5)?;

        Ok(RawElevatedTake {
            remaining: reply_number(&values, 0)?,
            conformant: reply_int(&values, 1)? == 1,
            now_ms: reply_int(&values, 2)? as u64,
            reset_ms: reply_int(&values, 3)? as u64,
            erl_active: reply_int(&values, 4)? == 1,
        })
    }

    async fn put(&self, key: &str, args: PutArgs) -> Result<RawPut> {
        let argv = vec![
            args.count.to_string(),
            args.size.to_string(),
            args.ttl_s.to_string(),
            fmt_f64(args.drip_interval_ms),
        ];

        debug!("Executing put: key={}, count={}", key, args.count);
        let values = self.invoke("put", &self.scripts.put, &[key], argv).await?;
        expect_len("put", &values, 3)?;

        Ok(RawPut {
            remaining: reply_number(&values, 0)?,
            now_ms: reply_int(&values, 1)? as u64,
            reset_ms: reply_int(&values, 2)? as u64,
        })
    }

    async fn status(&self, key: &str, args: StatusArgs) -> Result<RawStatus> {
        let argv = vec![args.size.to_string(), fmt_f64(args.drip_interval_ms)];

        let values = self.invoke("status", &self.scripts.status, &[key], argv).await?;
        expect_len("status", &values, 3)?;

        Ok(RawStatus {
            remaining: reply_number(&values, 0)?,
            now_ms: reply_int(&values, 1)? as u64,
            reset_ms: reply_int(&values, 2)? as u64,
        })
    }

    async fn reset_namespace(&self, pattern: &str) -> Result<u64> {
        let mut conn = self.conn().await?;
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut *conn)
                .await
                .map_err(RateLimitError::Connection)?;

            if !keys.is_empty() {
                removed += keys.len() as u64;
                let _: () = redis::cmd("UNLINK")
                    .arg(&keys)
                    .query_async(&mut *conn)
                    .await
                    .map_err(RateLimitError::Connection)?;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        info!("Reset namespace '{}' ({} keys removed)", pattern, removed);
        Ok(removed)
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn().await?;

        let response: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(RateLimitError::Connection)?;

        if response != "PONG" {
            return Err(RateLimitError::Pool(format!(
                "Unexpected PING response: {}",
                response
            )));
        }

        Ok(())
    }

    async fn reconnect(&self) -> Result<()> {
        info!("Rebuilding Redis connection pool...");

        let pool = create_redis_pool(&self.settings).await?;

        let mut conn = pool
            .get()
            .await
            .map_err(|e| RateLimitError::Pool(format!("Failed to get connection for script loading: {}", e)))?;
        load_scripts(&mut *conn, &self.scripts).await?;
        drop(conn);

        self.pool.store(std::sync::Arc::new(pool));
        info!("Redis connection pool rebuilt");
        Ok(())
    }
}
