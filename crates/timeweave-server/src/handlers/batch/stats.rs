//! Lifetime counters and recent batch durations for the coordinator.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::types::{BatchCounters, CoordinatorStatistics, RECENT_DURATIONS};

#[derive(Debug, Default)]
pub(crate) struct CoordinatorStats {
    batches: AtomicU64,
    units: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    active: AtomicU64,
    recent: Mutex<VecDeque<Duration>>,
}

impl CoordinatorStats {
    pub(crate) fn record_batch(&self, counters: &BatchCounters, elapsed: Duration) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.units
            .fetch_add(counters.attempted as u64, Ordering::Relaxed);
        self.succeeded
            .fetch_add(counters.succeeded as u64, Ordering::Relaxed);
        self.failed
            .fetch_add(counters.failed as u64, Ordering::Relaxed);
        self.timed_out
            .fetch_add(counters.timed_out as u64, Ordering::Relaxed);

        if let Ok(mut recent) = self.recent.lock() {
            if recent.len() == RECENT_DURATIONS {
                recent.pop_front();
            }
            recent.push_back(elapsed);
        }
    }

    /// Marks one unit as executing; returns the new active count.
    pub(crate) fn unit_started(&self) -> u64 {
        self.active.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Marks one unit as finished; returns the new active count.
    ///
    /// Must pair with a prior `unit_started`.
    pub(crate) fn unit_finished(&self) -> u64 {
        self.active.fetch_sub(1, Ordering::SeqCst).saturating_sub(1)
    }

    pub(crate) fn active(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    /// Clears everything except the active gauge, which tracks live tasks.
    pub(crate) fn reset(&self) {
        self.batches.store(0, Ordering::Relaxed);
        self.units.store(0, Ordering::Relaxed);
        self.succeeded.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.timed_out.store(0, Ordering::Relaxed);
        if let Ok(mut recent) = self.recent.lock() {
            recent.clear();
        }
    }

    pub(crate) fn snapshot(
        &self,
        concurrency: usize,
        call_timeout: Duration,
    ) -> CoordinatorStatistics {
        let total_units = self.units.load(Ordering::Relaxed);
        let succeeded_units = self.succeeded.load(Ordering::Relaxed);
        let failed_units = self.failed.load(Ordering::Relaxed);
        let timed_out_units = self.timed_out.load(Ordering::Relaxed);
        let rate = |n: u64| {
            if total_units == 0 {
                0.0
            } else {
                n as f64 / total_units as f64
            }
        };

        let mut durations: Vec<u64> = self
            .recent
            .lock()
            .map(|recent| recent.iter().map(|d| d.as_millis() as u64).collect())
            .unwrap_or_default();
        durations.sort_unstable();

        let recent_avg_ms = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<u64>() as f64 / durations.len() as f64
        };

        CoordinatorStatistics {
            total_batches: self.batches.load(Ordering::Relaxed),
            total_units,
            succeeded_units,
            failed_units,
            timed_out_units,
            active_units: self.active(),
            success_rate: rate(succeeded_units),
            failure_rate: rate(failed_units),
            timeout_rate: rate(timed_out_units),
            recent_avg_ms,
            recent_min_ms: durations.first().copied().unwrap_or(0),
            recent_max_ms: durations.last().copied().unwrap_or(0),
            recent_p50_ms: percentile(&durations, 50),
            recent_p95_ms: percentile(&durations, 95),
            concurrency,
            call_timeout_ms: call_timeout.as_millis() as u64,
        }
    }
}

/// Nearest-rank percentile over sorted samples; 0 when empty.
fn percentile(sorted: &[u64], pct: usize) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (pct * sorted.len()).div_ceil(100).max(1);
    sorted[rank.min(sorted.len()) - 1]
}
