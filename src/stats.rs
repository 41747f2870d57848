//! Process-wide counters. Incremented from any thread; exactness is not
//! required. The same sites also emit `metrics` counters so a Prometheus
//! scrape sees the identical numbers.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

#[derive(Debug, Default)]
pub struct Stats {
    pub json_readlines: AtomicU64,
    pub parse_failures: AtomicU64,
    pub condition_match_calls: AtomicU64,
    pub condition_matches_true: AtomicU64,
    pub callbacks_fired: AtomicU64,
    pub callbacks_with_notes: AtomicU64,
    pub callback_failures: AtomicU64,
    pub webhooks_fired: AtomicU64,
    pub emit_jsonl_lines: AtomicU64,
    pub los_add: AtomicU64,
    pub los_update: AtomicU64,
    pub los_finalize: AtomicU64,
    pub resampler_points: AtomicU64,
    pub resampler_interpolated: AtomicU64,
    pub resampler_skipped: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Log a one-shot summary, typically at shutdown or end of replay.
    pub fn report(&self) {
        info!(
            lines = self.json_readlines.load(Ordering::Relaxed),
            parse_failures = self.parse_failures.load(Ordering::Relaxed),
            rule_checks = self.condition_match_calls.load(Ordering::Relaxed),
            callbacks = self.callbacks_fired.load(Ordering::Relaxed),
            callback_failures = self.callback_failures.load(Ordering::Relaxed),
            webhooks = self.webhooks_fired.load(Ordering::Relaxed),
            los_add = self.los_add.load(Ordering::Relaxed),
            los_finalize = self.los_finalize.load(Ordering::Relaxed),
            resampled = self.resampler_interpolated.load(Ordering::Relaxed),
            "run statistics"
        );
    }
}
