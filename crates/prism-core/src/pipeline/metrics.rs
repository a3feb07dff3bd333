use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use super::task::BuildResult;

/// Point-in-time build statistics.
///
/// Counters are read individually, so a snapshot taken while builds finish
/// may be off by one between fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildMetrics {
    pub total_builds: u64,
    pub successful_builds: u64,
    pub failed_builds: u64,
    pub cache_hits: u64,
    pub average_duration: Duration,
    pub cache_hit_rate: f64,
    pub success_rate: f64,
}

#[derive(Debug, Default)]
pub(crate) struct MetricsRecorder {
    total: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
    cache_hits: AtomicU64,
    total_duration_nanos: AtomicU64,
}

impl MetricsRecorder {
    pub(crate) fn record(&self, result: &BuildResult) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if result.is_success() {
            self.success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failure.fetch_add(1, Ordering::Relaxed);
        }
        if result.cache_hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
        let nanos = u64::try_from(result.duration.as_nanos()).unwrap_or(u64::MAX);
        self.total_duration_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, cache_hit_rate: f64) -> BuildMetrics {
        let total = self.total.load(Ordering::Relaxed);
        let success = self.success.load(Ordering::Relaxed);
        let nanos = self.total_duration_nanos.load(Ordering::Relaxed);

        let (average_duration, success_rate) = if total == 0 {
            (Duration::ZERO, 0.0)
        } else {
            (
                Duration::from_nanos(nanos / total),
                success as f64 / total as f64,
            )
        };

        BuildMetrics {
            total_builds: total,
            successful_builds: success,
            failed_builds: self.failure.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            average_duration,
            cache_hit_rate,
            success_rate,
        }
    }
}
