//! Retry, caching and timing wrappers.
//!
//! Each wrapper takes an operation (a closure producing a future) and runs it
//! with extra behavior while leaving its success/failure contract unchanged:
//!
//! - [`RetryPolicy::run`] repeats transient failures with exponential backoff
//!   and hands back the last error untouched.
//! - [`TtlCache::get_or_try_insert`] serves values younger than the TTL and
//!   re-executes the operation otherwise.
//! - [`timed`] logs how long an operation took.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use log::{debug, error, warn};
use moka::future::Cache;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::telemetry::Telemetry;

/// Exponential backoff parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: initial_delay.as_millis() as u64,
            backoff_factor,
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO, 1.0)
    }

    /// Delay slept after the given failed attempt (1-based):
    /// `initial_delay * backoff_factor^(attempt - 1)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.initial_delay_ms as f64 * self.backoff_factor.powi(exponent);
        Duration::from_secs_f64((millis / 1000.0).max(0.0))
    }

    /// Runs `op` until it succeeds, returns a non-retryable error, or the
    /// attempts run out.
    ///
    /// `op` receives the 1-based attempt number. The error returned after
    /// exhaustion is the last one produced by `op`, unchanged. Backoff uses
    /// `tokio::time::sleep`, so only the calling task waits.
    pub async fn run<T, E, F, Fut, R>(&self, operation: &str, should_retry: R, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < max_attempts && should_retry(&err) => {
                    let wait = self.delay_after(attempt);
                    debug!(
                        "{operation}: attempt {attempt} failed, retrying in {:.1}s: {err}",
                        wait.as_secs_f64()
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(err) => {
                    if attempt >= max_attempts && max_attempts > 1 {
                        error!("{operation}: all {max_attempts} attempts failed: {err}");
                    }
                    return Err(err);
                }
            }
        }
    }
}

/// A typed cache key argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheArg {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl From<&str> for CacheArg {
    fn from(value: &str) -> Self {
        CacheArg::Str(value.to_string())
    }
}

impl From<String> for CacheArg {
    fn from(value: String) -> Self {
        CacheArg::Str(value)
    }
}

impl From<i64> for CacheArg {
    fn from(value: i64) -> Self {
        CacheArg::Int(value)
    }
}

impl From<u16> for CacheArg {
    fn from(value: u16) -> Self {
        CacheArg::Int(i64::from(value))
    }
}

impl From<bool> for CacheArg {
    fn from(value: bool) -> Self {
        CacheArg::Bool(value)
    }
}

/// Operation identifier plus its ordered, typed arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    operation: &'static str,
    args: Vec<CacheArg>,
}

impl CacheKey {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<CacheArg>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }
}

/// Whether a read may be served from cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// A cached value younger than the TTL is acceptable.
    #[default]
    Cached,
    /// Always ask the device; the result still refreshes the cache.
    Fresh,
}

/// Time-to-live result cache.
///
/// Backed by a moka cache with `time_to_live`: an entry whose age reaches the
/// TTL is never returned. moka has no background thread here; expired entries
/// are dropped during cache operations.
#[derive(Clone)]
pub struct TtlCache<V> {
    name: &'static str,
    ttl: Duration,
    inner: Cache<CacheKey, V>,
    telemetry: Telemetry,
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, ttl: Duration, max_capacity: u64, telemetry: Telemetry) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self {
            name,
            ttl,
            inner,
            telemetry,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached value for `key`, or runs `op` and stores its result.
    ///
    /// Failed results are not stored. With [`Freshness::Fresh`] the lookup is
    /// skipped and no hit/miss is recorded.
    pub async fn get_or_try_insert<E, F, Fut>(
        &self,
        key: CacheKey,
        freshness: Freshness,
        op: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if freshness == Freshness::Cached {
            if let Some(value) = self.inner.get(&key).await {
                self.telemetry.record_cache_hit();
                debug!("{} cache hit for {}", self.name, key.operation());
                return Ok(value);
            }
            self.telemetry.record_cache_miss();
        }

        let value = op().await?;
        let operation = key.operation();
        self.inner.insert(key, value.clone()).await;
        self.inner.run_pending_tasks().await;
        debug!("{} cached result for {operation}", self.name);
        Ok(value)
    }

    /// Looks up `key` without running anything. Records a hit or miss.
    pub async fn get(&self, key: &CacheKey) -> Option<V> {
        let value = self.inner.get(key).await;
        match &value {
            Some(_) => self.telemetry.record_cache_hit(),
            None => self.telemetry.record_cache_miss(),
        }
        value
    }

    pub async fn invalidate(&self, key: &CacheKey) {
        self.inner.invalidate(key).await;
    }

    pub async fn clear(&self) {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks().await;
    }

    /// Number of live entries after pending evictions are applied.
    pub async fn len(&self) -> u64 {
        self.inner.run_pending_tasks().await;
        self.inner.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Runs `fut` and logs its duration under the `performance` target.
pub async fn timed<T, E, Fut>(operation: &str, fut: Fut) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let start = Instant::now();
    let result = fut.await;
    let secs = start.elapsed().as_secs_f64();
    match &result {
        Ok(_) => debug!(target: "performance", "{operation} completed in {secs:.3}s"),
        Err(err) => warn!(target: "performance", "{operation} failed in {secs:.3}s: {err}"),
    }
    result
}
