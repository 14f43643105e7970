// crates/jobs/src/progress.rs
//! Window-level progress aggregation.
//!
//! Derives one host-window progress value from all concurrently running
//! progress-visible jobs. Read-only over registry state: nothing running
//! produces "no value", never an error and never a misleading `0.0`.

use serde::Serialize;

use crate::job::RunState;
use crate::registry::JobRegistry;

/// Snapshot of the aggregate, serializable for the host's window chrome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowProgress {
    /// Mean progress of the contributing jobs, or `None` when none run.
    pub value: Option<f32>,
    /// How many running progress-visible jobs contributed.
    pub job_count: usize,
}

/// Mean progress over all running progress-visible jobs.
pub fn window_progress(registry: &JobRegistry) -> Option<f32> {
    window_snapshot(registry).value
}

pub fn window_snapshot(registry: &JobRegistry) -> WindowProgress {
    let mut sum = 0.0f32;
    let mut count = 0usize;
    for job in registry.jobs() {
        if job.run_state == RunState::Running && job.flags.progress_visible {
            sum += job.progress();
            count += 1;
        }
    }
    WindowProgress {
        value: (count > 0).then(|| sum / count as f32),
        job_count: count,
    }
}
