//! In-process counters and timers for the harvest pipeline.
//!
//! There is no external telemetry transport; this registry exists so
//! operators (and tests) can read the counter/timer set enumerated for the
//! pipeline. Counters are atomics, timer aggregates sit behind one mutex.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const TIMER_RUN: &str = "scraping.duration";
pub const TIMER_SEMESTER: &str = "scraping.semester.duration";
pub const TIMER_PROGRAM: &str = "scraping.program.duration";
pub const TIMER_ROW_PERSIST: &str = "scraping.row.persist.duration";

/// Aggregate of one named timer.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TimerStats {
    pub count: u64,
    pub total: Duration,
    pub max: Duration,
}

/// Point-in-time copy of all metrics.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub runs_total: u64,
    pub runs_success: u64,
    pub runs_failure: u64,
    pub errors_total: u64,
    pub timers: HashMap<String, TimerStats>,
}

/// Registry for the harvest counter/timer set.
#[derive(Debug, Default)]
pub struct HarvestMetrics {
    runs_total: AtomicU64,
    runs_success: AtomicU64,
    runs_failure: AtomicU64,
    errors_total: AtomicU64,
    timers: Mutex<HashMap<&'static str, TimerStats>>,
}

impl HarvestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// `scraping.runs.total`
    pub fn run_started(&self) {
        self.runs_total.fetch_add(1, Ordering::Relaxed);
    }

    /// `scraping.runs.success`
    pub fn run_succeeded(&self) {
        self.runs_success.fetch_add(1, Ordering::Relaxed);
    }

    /// `scraping.runs.failure`
    pub fn run_failed(&self) {
        self.runs_failure.fetch_add(1, Ordering::Relaxed);
    }

    /// `scraping.errors.total`
    pub fn error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one observation of a named timer.
    pub fn record(&self, timer: &'static str, elapsed: Duration) {
        let mut timers = self.timers.lock().expect("metrics lock poisoned");
        let stats = timers.entry(timer).or_default();
        stats.count += 1;
        stats.total += elapsed;
        stats.max = stats.max.max(elapsed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let timers = self.timers.lock().expect("metrics lock poisoned");
        MetricsSnapshot {
            runs_total: self.runs_total.load(Ordering::Relaxed),
            runs_success: self.runs_success.load(Ordering::Relaxed),
            runs_failure: self.runs_failure.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
            timers: timers
                .iter()
                .map(|(name, stats)| (name.to_string(), *stats))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = HarvestMetrics::new();
        metrics.run_started();
        metrics.run_started();
        metrics.run_succeeded();
        metrics.run_failed();
        metrics.error();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.runs_total, 2);
        assert_eq!(snapshot.runs_success, 1);
        assert_eq!(snapshot.runs_failure, 1);
        assert_eq!(snapshot.errors_total, 1);
    }

    #[test]
    fn test_timer_aggregation() {
        let metrics = HarvestMetrics::new();
        metrics.record(TIMER_ROW_PERSIST, Duration::from_millis(10));
        metrics.record(TIMER_ROW_PERSIST, Duration::from_millis(30));

        let snapshot = metrics.snapshot();
        let stats = snapshot.timers.get(TIMER_ROW_PERSIST).unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.total, Duration::from_millis(40));
        assert_eq!(stats.max, Duration::from_millis(30));
    }
}
