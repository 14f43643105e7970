// crates/jobs/src/status.rs
//! Shared progress/cancellation channel between a worker thread and the
//! controller.
//!
//! Every field is independently atomic; no cross-field consistency is needed,
//! so no lock is taken for the struct itself. The diagnostic log is the one
//! exception and sits behind its own mutex because entries are variable-size.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use crate::types::{Report, ReportLevel};

/// Per-job communication channel shared between exactly one worker thread and
/// the controller thread.
pub struct WorkerStatus {
    cancel_requested: AtomicBool,
    has_update: AtomicBool,
    finished: AtomicBool,
    // f32 bits; std has no AtomicF32.
    progress_bits: AtomicU32,
    log: Mutex<Vec<Report>>,
}

impl WorkerStatus {
    pub(crate) fn new() -> Self {
        Self {
            cancel_requested: AtomicBool::new(false),
            has_update: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            progress_bits: AtomicU32::new(0f32.to_bits()),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Ask the worker to stop at its next safe point. Cooperative only; the
    /// worker polls [`is_cancel_requested`](Self::is_cancel_requested).
    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::Relaxed);
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Relaxed)
    }

    /// Worker-side: ask the controller to run the `update` callback on its
    /// next tick.
    pub fn post_update(&self) {
        self.has_update.store(true, Ordering::Relaxed);
    }

    /// Controller-side: consume the update flag.
    pub(crate) fn take_update(&self) -> bool {
        self.has_update.swap(false, Ordering::Relaxed)
    }

    /// Last-writer-wins progress fraction, clamped to `[0, 1]`.
    pub fn set_progress(&self, fraction: f32) {
        let clamped = fraction.clamp(0.0, 1.0);
        self.progress_bits.store(clamped.to_bits(), Ordering::Relaxed);
    }

    pub fn progress(&self) -> f32 {
        f32::from_bits(self.progress_bits.load(Ordering::Relaxed))
    }

    pub(crate) fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Append a diagnostic. Drained by the controller at the end of every
    /// tick and on kill.
    pub fn report(&self, level: ReportLevel, message: impl Into<String>) {
        match self.log.lock() {
            Ok(mut log) => log.push(Report::new(level, message)),
            Err(e) => tracing::error!("report log mutex poisoned: {e}"),
        }
    }

    /// Move all pending diagnostics out. Moves, never copies, so a job torn
    /// down immediately afterwards loses nothing.
    pub(crate) fn drain_reports(&self) -> Vec<Report> {
        match self.log.lock() {
            Ok(mut log) => std::mem::take(&mut *log),
            Err(e) => {
                tracing::error!("report log mutex poisoned: {e}");
                Vec::new()
            }
        }
    }
}
