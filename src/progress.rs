//! Progress reporting
//!
//! The runner never calls a [`ProgressSink`] from a worker thread. Updates
//! travel over a channel to a single reporter thread, which delivers them in
//! order; when the sink falls behind, stale intermediate updates are dropped
//! and only the newest is delivered.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// =============================================================================
// Progress update
// =============================================================================

/// Snapshot of run progress
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub completed: u64,
    pub total_planned: u64,
    pub status: String,
    pub elapsed: Duration,
}

impl ProgressUpdate {
    /// `100 * completed / total_planned`, capped at 100
    pub fn percent(&self) -> f64 {
        if self.total_planned == 0 {
            return 100.0;
        }
        (100.0 * self.completed as f64 / self.total_planned as f64).min(100.0)
    }

    /// Linear extrapolation of the remaining time from the elapsed time
    pub fn estimated_remaining(&self) -> Option<Duration> {
        if self.completed == 0 || self.total_planned < self.completed {
            return None;
        }
        let per_item = self.elapsed.as_secs_f64() / self.completed as f64;
        let remaining = (self.total_planned - self.completed) as f64 * per_item;
        Some(Duration::from_secs_f64(remaining))
    }
}

// =============================================================================
// Sinks
// =============================================================================

/// Receives progress updates from a running optimization
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, update: &ProgressUpdate);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressUpdate) + Send + Sync,
{
    fn on_progress(&self, update: &ProgressUpdate) {
        self(update)
    }
}

/// Discards every update
#[derive(Debug, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _update: &ProgressUpdate) {}
}

/// Logs progress through `tracing` every `step_percent` percent
#[derive(Debug)]
pub struct LogProgress {
    step_percent: u64,
    last_logged: AtomicU64,
}

impl LogProgress {
    pub fn new(step_percent: u64) -> Self {
        LogProgress {
            step_percent: step_percent.clamp(1, 100),
            last_logged: AtomicU64::new(0),
        }
    }
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new(10)
    }
}

impl ProgressSink for LogProgress {
    fn on_progress(&self, update: &ProgressUpdate) {
        let bucket = update.percent() as u64 / self.step_percent;
        if self.last_logged.fetch_max(bucket, Ordering::Relaxed) < bucket {
            info!(
                "{}: {}/{} ({:.0}%), remaining ~{:?}",
                update.status,
                update.completed,
                update.total_planned,
                update.percent(),
                update.estimated_remaining().unwrap_or_default()
            );
        }
    }
}

/// Terminal progress bar
pub struct IndicatifProgress {
    bar: ProgressBar,
}

impl IndicatifProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template("⚡ {percent:>3}%|{bar:40}| {pos}/{len} [{elapsed}<{eta}, {per_sec:.2}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█░ ");
        bar.set_style(style);
        IndicatifProgress { bar }
    }

    pub fn finish(&self, message: impl Into<String>) {
        self.bar.finish_with_message(message.into());
    }
}

impl Default for IndicatifProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for IndicatifProgress {
    fn on_progress(&self, update: &ProgressUpdate) {
        self.bar.set_length(update.total_planned);
        self.bar.set_position(update.completed);
        self.bar.set_message(update.status.clone());
    }
}

// =============================================================================
// Delivery
// =============================================================================

/// Drain `updates` into `sink` until every sender is dropped
///
/// Workers race to send, so an update can arrive after one with a higher
/// count. Those are skipped to keep `completed` monotonic for the sink.
pub(crate) fn deliver(updates: Receiver<ProgressUpdate>, sink: &dyn ProgressSink) {
    let mut delivered = 0;
    while let Ok(first) = updates.recv() {
        let update = updates.try_iter().fold(first, |newest, next| {
            if next.completed >= newest.completed {
                next
            } else {
                newest
            }
        });
        if update.completed < delivered {
            continue;
        }
        delivered = update.completed;
        sink.on_progress(&update);
    }
}
