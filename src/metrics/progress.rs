//! Progress bar driven by attempt records.

use crate::metrics::{AttemptRecord, MetricsSink};
use crate::models::Result;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};

/// Advances a bar once per finished unit (success or exhaustion).
pub struct ProgressSink {
    bar: ProgressBar,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
}

impl ProgressSink {
    /// Bar sized to the number of (endpoint, call) units.
    pub fn new(total_units: u64) -> Self {
        let bar = ProgressBar::new(total_units);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
        {
            bar.set_style(style.progress_chars("##-"));
        }
        Self::with_bar(bar)
    }

    /// Wrap an existing bar (e.g. `ProgressBar::hidden()` in tests).
    pub fn with_bar(bar: ProgressBar) -> Self {
        Self {
            bar,
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    /// (succeeded, failed, retried attempts)
    pub fn counts(&self) -> (u64, u64, u64) {
        (
            self.succeeded.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            self.retries.load(Ordering::Relaxed),
        )
    }
}

impl MetricsSink for ProgressSink {
    fn record(&self, record: AttemptRecord) {
        if record.is_failed_attempt() {
            self.retries.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if record.is_success() {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }

        let (succeeded, failed, retries) = self.counts();
        self.bar.inc(1);
        self.bar.set_message(format!(
            "ok: {succeeded}, failed: {failed}, failed attempts: {retries}"
        ));
    }

    fn flush(&self) -> Result<()> {
        let (succeeded, failed, _) = self.counts();
        self.bar
            .finish_with_message(format!("Done! {succeeded} ok, {failed} failed"));
        Ok(())
    }
}
