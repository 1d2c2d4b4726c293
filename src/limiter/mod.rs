pub mod params;
pub mod response;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::buckets::compile::{compile_registry, compile_type};
use crate::buckets::normalize::normalize;
use crate::buckets::{BucketDescriptor, BucketRegistry, ElevatedDescriptor};
use crate::cache::{SkipCallCache, SkipDecision, SKIP_CACHE_CAPACITY};
use crate::config::{validator, LimiterConfig, PingConfig, RawBucket};
use crate::errors::{RateLimitError, Result};
use crate::metrics;
use crate::store::redis::RedisStore;
use crate::store::{BucketStore, ErlArgs, PutArgs, StatusArgs, TakeArgs};

use self::params::{ErlParams, GetParams, PutParams, TakeParams};
use self::response::{ElevatedTakeResult, GetResult, PutResult, TakeResult};

/// Lifecycle notifications; subscribe before triggering the activity you
/// want to observe, events sent without subscribers are dropped.
#[derive(Debug, Clone)]
pub enum LimiterEvent {
    Ready,
    Error(String),
    NodeError(String),
    Ping(PingStatus),
}

#[derive(Debug, Clone)]
pub enum PingStatus {
    Success,
    Failed(String),
    Reconnect,
    ReconnectDryRun,
}

/// Rate limiter client. Holds the compiled bucket registry and the two
/// in-process caches; all store access goes through `S`.
///
/// The registry and caches live and die with this instance; they are not
/// shared across clients.
pub struct Limiter<S: BucketStore> {
    store: Arc<S>,
    registry: ArcSwap<BucketRegistry>,
    skip_cache: SkipCallCache,
    prefix: String,
    global_ttl_ms: u64,
    events: broadcast::Sender<LimiterEvent>,
    ping_task: Mutex<Option<JoinHandle<()>>>,
}

impl Limiter<RedisStore> {
    /// Connect to Redis, register the atomic routines, and compile the
    /// configured bucket types.
    pub async fn connect(config: LimiterConfig) -> Result<Self> {
        validator::validate_config(&config)?;
        let store = RedisStore::connect(&config).await?;
        Self::with_store(store, config)
    }
}

impl<S: BucketStore + 'static> Limiter<S> {
    /// Build a limiter over any store implementation. Must run inside a
    /// tokio runtime when liveness probing is configured.
    pub fn with_store(store: S, config: LimiterConfig) -> Result<Self> {
        for (name, raw) in &config.buckets {
            validator::validate_bucket(name, raw)?;
        }

        let registry = compile_registry(&config.buckets, config.global_ttl_ms)?;
        metrics::update_configured_types(registry.len());

        let (events, _) = broadcast::channel(64);

        let limiter = Self {
            store: Arc::new(store),
            registry: ArcSwap::from_pointee(registry),
            skip_cache: SkipCallCache::new(SKIP_CACHE_CAPACITY),
            prefix: config.prefix.clone(),
            global_ttl_ms: config.global_ttl_ms,
            events,
            ping_task: Mutex::new(None),
        };

        if let Some(ping) = config.ping {
            let handle = tokio::spawn(ping_loop(
                limiter.store.clone(),
                limiter.events.clone(),
                ping,
            ));
            *limiter.ping_task.lock() = Some(handle);
        }

        let _ = limiter.events.send(LimiterEvent::Ready);
        info!(
            "Rate limiter ready ({} bucket type(s))",
            limiter.registry.load().len()
        );
        Ok(limiter)
    }
}

impl<S: BucketStore> Limiter<S> {
    /// Deduct `count` tokens from the bucket selected by type, key, and
    /// optional override. A denied take is a regular result, not an error.
    pub async fn take(&self, params: &TakeParams) -> Result<TakeResult> {
        let descriptor =
            self.resolve(&params.bucket_type, &params.key, params.config_override.as_ref())?;

        if descriptor.unlimited {
            metrics::record_take(&params.bucket_type, true, 0);
            return Ok(response::unlimited_take(descriptor.size));
        }

        let count = params::take_count(params.count, descriptor.size)?;
        let state_key = self.state_key(&params.bucket_type, &params.key);

        if descriptor.skip_n_calls > 0 {
            match self.skip_cache.begin(&state_key, descriptor.skip_n_calls) {
                SkipDecision::Skip { result, .. } => {
                    metrics::record_skip_hit(&params.bucket_type);
                    debug!("take answered from skip cache: key={}", state_key);
                    return Ok(result);
                }
                SkipDecision::GoToStore { multiplier } => {
                    let result = self
                        .take_at_store(&params.bucket_type, &state_key, &descriptor, count * multiplier)
                        .await?;
                    self.skip_cache.record(&state_key, result.clone(), None);
                    return Ok(result);
                }
            }
        }

        self.take_at_store(&params.bucket_type, &state_key, &descriptor, count)
            .await
    }

    /// As [`take`](Self::take), but may promote the bucket into its elevated
    /// capacity regime when the standard one is exhausted.
    pub async fn take_elevated(
        &self,
        params: &TakeParams,
        erl: &ErlParams,
    ) -> Result<ElevatedTakeResult> {
        let descriptor =
            self.resolve(&params.bucket_type, &params.key, params.config_override.as_ref())?;

        if descriptor.unlimited {
            metrics::record_take(&params.bucket_type, true, 0);
            let result = response::unlimited_take(descriptor.size);
            return Ok(widen(result, false));
        }

        if !erl.allow_erl {
            let result = self.take(params).await?;
            return Ok(widen(result, false));
        }

        if erl.is_active_key.is_empty() {
            return Err(RateLimitError::ErlKeyRequired);
        }

        let elevated = descriptor
            .elevated
            .as_ref()
            .filter(|e| e.is_complete())
            .ok_or(RateLimitError::NoElevatedConfig)?;

        let count = params::take_count(params.count, descriptor.size)?;
        let state_key = self.state_key(&params.bucket_type, &params.key);
        let erl_key = format!("{}{}", self.prefix, erl.is_active_key);

        if descriptor.skip_n_calls > 0 {
            match self.skip_cache.begin(&state_key, descriptor.skip_n_calls) {
                SkipDecision::Skip { result, erl_activated } => {
                    metrics::record_skip_hit(&params.bucket_type);
                    return Ok(widen(result, erl_activated.unwrap_or(false)));
                }
                SkipDecision::GoToStore { multiplier } => {
                    let result = self
                        .take_elevated_at_store(
                            &params.bucket_type,
                            &state_key,
                            &erl_key,
                            &descriptor,
                            elevated,
                            count * multiplier,
                        )
                        .await?;
                    self.skip_cache.record(
                        &state_key,
                        narrow(&result),
                        Some(result.erl_activated),
                    );
                    return Ok(result);
                }
            }
        }

        self.take_elevated_at_store(&params.bucket_type, &state_key, &erl_key, &descriptor, elevated, count)
            .await
    }

    /// Restore tokens, up to capacity. Negative counts are allowed.
    pub async fn put(&self, params: &PutParams) -> Result<PutResult> {
        let descriptor =
            self.resolve(&params.bucket_type, &params.key, params.config_override.as_ref())?;

        if descriptor.unlimited {
            return Ok(response::unlimited_put(descriptor.size));
        }

        let count = params::put_count(params.count, descriptor.size);
        let state_key = self.state_key(&params.bucket_type, &params.key);

        let args = PutArgs {
            count,
            size: descriptor.size,
            ttl_s: descriptor.ttl_s,
            drip_interval_ms: descriptor.drip_interval_ms,
        };

        let started = Instant::now();
        let raw = self
            .store
            .put(&state_key, args)
            .await
            .map_err(|e| self.forward(e, "put"))?;
        metrics::record_store_op("put", started.elapsed().as_secs_f64());

        debug!("put: key={}, count={}, remaining={}", state_key, count, raw.remaining);
        Ok(response::decode_put(raw, descriptor.size))
    }

    /// Read remaining content and projected reset without mutating state.
    pub async fn get(&self, params: &GetParams) -> Result<GetResult> {
        let descriptor =
            self.resolve(&params.bucket_type, &params.key, params.config_override.as_ref())?;

        if descriptor.unlimited {
            return Ok(response::unlimited_status(descriptor.size));
        }

        let state_key = self.state_key(&params.bucket_type, &params.key);
        let args = StatusArgs {
            size: descriptor.size,
            drip_interval_ms: descriptor.drip_interval_ms,
        };

        let started = Instant::now();
        let raw = self
            .store
            .status(&state_key, args)
            .await
            .map_err(|e| self.forward(e, "status"))?;
        metrics::record_store_op("status", started.elapsed().as_secs_f64());

        Ok(response::decode_status(raw, descriptor.size))
    }

    /// Take that sleeps and retries until it conforms. The result carries
    /// `delayed: true` when at least one sleep happened. Unbounded.
    pub async fn wait(&self, params: &TakeParams) -> Result<TakeResult> {
        let descriptor =
            self.resolve(&params.bucket_type, &params.key, params.config_override.as_ref())?;

        if !descriptor.unlimited && !descriptor.refills() {
            return Err(RateLimitError::Configuration(
                "wait() requires a bucket with a refill rate".to_string(),
            ));
        }

        let count = params::take_count(params.count, descriptor.size)? as i64;
        let mut delayed = false;

        loop {
            let mut result = self.take(params).await?;
            if result.conformant {
                result.delayed = delayed;
                return Ok(result);
            }

            delayed = true;
            let deficit = (count - result.remaining).max(1) as f64;
            let wait_ms = (deficit * descriptor.drip_interval_ms).ceil() as u64;
            debug!(
                "waiting {}ms for {} token(s) on {}:{}",
                wait_ms, count, params.bucket_type, params.key
            );
            tokio::time::sleep(Duration::from_millis(wait_ms)).await;
        }
    }

    /// Remove every entry under this client's prefix. Returns the number of
    /// keys removed.
    pub async fn reset_all(&self) -> Result<u64> {
        let pattern = format!("{}*", self.prefix);
        self.store
            .reset_namespace(&pattern)
            .await
            .map_err(|e| self.forward(e, "reset"))
    }

    /// Replace the whole bucket type registry. Compiles synchronously; the
    /// swap is atomic with respect to in-flight requests.
    pub fn configure(&self, buckets: HashMap<String, RawBucket>) -> Result<()> {
        for (name, raw) in &buckets {
            validator::validate_bucket(name, raw)?;
        }

        let registry = compile_registry(&buckets, self.global_ttl_ms)?;
        metrics::update_configured_types(registry.len());
        self.registry.store(Arc::new(registry));

        info!("Bucket registry replaced ({} type(s))", buckets.len());
        Ok(())
    }

    /// Add or replace a single bucket type.
    pub fn configure_bucket(&self, name: &str, def: RawBucket) -> Result<()> {
        validator::validate_bucket(name, &def)?;
        let descriptor = compile_type(name, &def, self.global_ttl_ms)?;

        let current = self.registry.load();
        let mut types = current.types.clone();
        types.insert(name.to_string(), Arc::new(descriptor));

        let registry = BucketRegistry { types };
        metrics::update_configured_types(registry.len());
        self.registry.store(Arc::new(registry));

        info!("Bucket type '{}' configured", name);
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LimiterEvent> {
        self.events.subscribe()
    }

    /// Stop background tasks. Called automatically on drop.
    pub fn close(&self) {
        if let Some(handle) = self.ping_task.lock().take() {
            handle.abort();
        }
    }

    fn state_key(&self, bucket_type: &str, key: &str) -> String {
        format!("{}{}:{}", self.prefix, bucket_type, key)
    }

    fn resolve(
        &self,
        bucket_type: &str,
        key: &str,
        config_override: Option<&RawBucket>,
    ) -> Result<Arc<BucketDescriptor>> {
        params::validate_type(bucket_type)?;
        params::validate_key(key)?;

        let registry = self.registry.load();
        let ty = registry
            .get(bucket_type)
            .ok_or_else(|| RateLimitError::UnknownBucketType(bucket_type.to_string()))?;

        if let Some(raw) = config_override {
            params::validate_override(raw)?;
            return Ok(Arc::new(normalize(raw, self.global_ttl_ms)));
        }

        Ok(ty.resolve(key))
    }

    async fn take_at_store(
        &self,
        bucket_type: &str,
        state_key: &str,
        descriptor: &BucketDescriptor,
        count: u64,
    ) -> Result<TakeResult> {
        let args = TakeArgs {
            tokens_per_ms: descriptor.tokens_per_ms,
            size: descriptor.size,
            count,
            ttl_s: descriptor.ttl_s,
            drip_interval_ms: descriptor.drip_interval_ms,
        };

        let started = Instant::now();
        let raw = self
            .store
            .take(state_key, args)
            .await
            .map_err(|e| self.forward(e, "take"))?;
        metrics::record_store_op("take", started.elapsed().as_secs_f64());
        metrics::record_take(bucket_type, raw.conformant, count);

        debug!(
            "take: key={}, conformant={}, remaining={}",
            state_key, raw.conformant, raw.remaining
        );
        Ok(response::decode_take(raw, descriptor.size))
    }

    async fn take_elevated_at_store(
        &self,
        bucket_type: &str,
        state_key: &str,
        erl_key: &str,
        descriptor: &BucketDescriptor,
        elevated: &ElevatedDescriptor,
        count: u64,
    ) -> Result<ElevatedTakeResult> {
        let args = TakeArgs {
            tokens_per_ms: descriptor.tokens_per_ms,
            size: descriptor.size,
            count,
            ttl_s: descriptor.ttl_s,
            drip_interval_ms: descriptor.drip_interval_ms,
        };
        let erl_args = ErlArgs {
            tokens_per_ms: elevated.tokens_per_ms,
            size: elevated.size,
            ttl_s: elevated.ttl_s,
            drip_interval_ms: elevated.drip_interval_ms,
            activation_period_s: elevated.activation_period_s,
        };

        let started = Instant::now();
        let raw = self
            .store
            .take_elevated(state_key, erl_key, args, erl_args)
            .await
            .map_err(|e| self.forward(e, "take_elevated"))?;
        metrics::record_store_op("take_elevated", started.elapsed().as_secs_f64());
        metrics::record_take(bucket_type, raw.conformant, count);
        if raw.erl_active {
            metrics::record_erl_active(bucket_type);
        }

        debug!(
            "take_elevated: key={}, conformant={}, erl_active={}, remaining={}",
            state_key, raw.conformant, raw.erl_active, raw.remaining
        );

        let limit = if raw.erl_active { elevated.size } else { descriptor.size };
        Ok(response::decode_elevated_take(raw, limit))
    }

    /// Surface transport failures as events on top of the returned error.
    fn forward(&self, e: RateLimitError, op: &str) -> RateLimitError {
        if e.is_transport() {
            metrics::record_store_error(op);
            let _ = self.events.send(LimiterEvent::Error(e.to_string()));
            if matches!(e, RateLimitError::Connection(_)) {
                let _ = self.events.send(LimiterEvent::NodeError(e.to_string()));
            }
        }
        e
    }
}

impl<S: BucketStore> Drop for Limiter<S> {
    fn drop(&mut self) {
        self.close();
    }
}

fn widen(result: TakeResult, erl_activated: bool) -> ElevatedTakeResult {
    ElevatedTakeResult {
        conformant: result.conformant,
        remaining: result.remaining,
        reset: result.reset,
        limit: result.limit,
        delayed: result.delayed,
        erl_activated,
    }
}

fn narrow(result: &ElevatedTakeResult) -> TakeResult {
    TakeResult {
        conformant: result.conformant,
        remaining: result.remaining,
        reset: result.reset,
        limit: result.limit,
        delayed: result.delayed,
    }
}

async fn ping_loop<S: BucketStore>(
    store: Arc<S>,
    events: broadcast::Sender<LimiterEvent>,
    config: PingConfig,
) {
    let mut interval = tokio::time::interval(config.interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick completes immediately; probes start one interval in
    interval.tick().await;

    let mut failed = 0u32;
    let mut reconnect_attempts = 0u32;

    loop {
        interval.tick().await;

        match store.health_check().await {
            Ok(()) => {
                if failed > 0 {
                    info!("Store liveness recovered");
                }
                failed = 0;
                reconnect_attempts = 0;
                metrics::record_ping("success");
                let _ = events.send(LimiterEvent::Ping(PingStatus::Success));
            }
            Err(e) => {
                failed += 1;
                warn!(
                    "Store liveness probe failed ({}/{}): {}",
                    failed, config.max_failed_attempts, e
                );
                metrics::record_ping("error");
                let _ = events.send(LimiterEvent::Ping(PingStatus::Failed(e.to_string())));

                if failed >= config.max_failed_attempts {
                    failed = 0;

                    if config.reconnect_if_failed
                        && reconnect_attempts < config.max_failed_attempts_to_retry_reconnect
                    {
                        reconnect_attempts += 1;
                        metrics::record_ping("reconnect");
                        let _ = events.send(LimiterEvent::Ping(PingStatus::Reconnect));

                        match store.reconnect().await {
                            Ok(()) => {
                                info!("Store reconnected");
                                reconnect_attempts = 0;
                            }
                            Err(e) => {
                                error!("Store reconnect failed: {}", e);
                                let _ = events.send(LimiterEvent::Error(e.to_string()));
                            }
                        }
                    } else {
                        metrics::record_ping("reconnect-dry-run");
                        let _ = events.send(LimiterEvent::Ping(PingStatus::ReconnectDryRun));
                    }
                }
            }
        }
    }
}
