//! Process-wide operation counters.
//!
//! [`Telemetry`] is a cheap cloneable handle over shared atomics. One instance
//! is created per running poller and passed to every component that records
//! into it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, warn};

use crate::model::TelemetrySnapshot;

#[derive(Debug, Default)]
struct Counters {
    commands_executed: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    connection_attempts: AtomicU64,
    successful_connections: AtomicU64,
    errors: AtomicU64,
    /// Sum of all command latencies; the mean is derived on snapshot.
    response_nanos: AtomicU64,
}

/// Shared telemetry recorder.
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    inner: Arc<Counters>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one command exchange.
    pub fn record_operation(&self, name: &str, duration: Duration, succeeded: bool) {
        let secs = duration.as_secs_f64();
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.inner.response_nanos.fetch_add(nanos, Ordering::AcqRel);
        self.inner.commands_executed.fetch_add(1, Ordering::AcqRel);

        if succeeded {
            debug!(target: "performance", "{name} completed in {secs:.3}s");
        } else {
            self.inner.errors.fetch_add(1, Ordering::Relaxed);
            warn!(target: "performance", "{name} failed in {secs:.3}s");
        }
    }

    pub fn record_cache_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.inner.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_attempt(&self, succeeded: bool) {
        self.inner.connection_attempts.fetch_add(1, Ordering::Relaxed);
        if succeeded {
            self.inner
                .successful_connections
                .fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Counts an error that did not come from a command exchange.
    pub fn record_error(&self) {
        self.inner.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let commands_executed = self.inner.commands_executed.load(Ordering::Acquire);
        let total = self.inner.response_nanos.load(Ordering::Acquire);
        let avg_response_time = if commands_executed == 0 {
            0.0
        } else {
            total as f64 / commands_executed as f64 / 1e9
        };
        TelemetrySnapshot {
            commands_executed,
            cache_hits: self.inner.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.inner.cache_misses.load(Ordering::Relaxed),
            connection_attempts: self.inner.connection_attempts.load(Ordering::Relaxed),
            successful_connections: self.inner.successful_connections.load(Ordering::Relaxed),
            errors: self.inner.errors.load(Ordering::Relaxed),
            avg_response_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_is_cumulative_mean() {
        let telemetry = Telemetry::new();
        telemetry.record_operation("a", Duration::from_millis(100), true);
        telemetry.record_operation("b", Duration::from_millis(300), true);

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.commands_executed, 2);
        assert!((snapshot.avg_response_time - 0.2).abs() < 1e-9);
    }

    #[test]
    fn failures_count_as_errors() {
        let telemetry = Telemetry::new();
        telemetry.record_operation("a", Duration::from_millis(10), false);
        telemetry.record_connection_attempt(false);
        telemetry.record_connection_attempt(true);

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.errors, 2);
        assert_eq!(snapshot.connection_attempts, 2);
        assert_eq!(snapshot.successful_connections, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let telemetry = Telemetry::new();
        let mut handles = Vec::new();
        for i in 0..100u64 {
            let telemetry = telemetry.clone();
            handles.push(tokio::spawn(async move {
                telemetry.record_operation("poll", Duration::from_millis(i), true);
                telemetry.record_cache_hit();
            }));
        }
        for handle in handles {
            handle.await.expect("task");
        }

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.commands_executed, 100);
        assert_eq!(snapshot.cache_hits, 100);
        assert!((snapshot.avg_response_time - 0.0495).abs() < 1e-9);
    }

    #[test]
    fn average_stays_exact_under_contention() {
        let telemetry = Telemetry::new();
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let telemetry = telemetry.clone();
                std::thread::spawn(move || {
                    for i in 0..20_000u64 {
                        telemetry.record_operation("poll", Duration::from_secs(i % 2), true);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().expect("thread");
        }

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.commands_executed, 160_000);
        assert_eq!(snapshot.avg_response_time, 0.5);
    }
}
