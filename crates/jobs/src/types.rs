// crates/jobs/src/types.rs
//! Identity, flag, notification, and report types for the job manager.

use serde::Serialize;

/// Unique identifier for a job while it lives in the registry.
pub type JobId = u64;

/// Opaque identity of whoever requested the work.
///
/// Typically derived from the address of the UI element or data object that
/// owns the job. The registry only compares owners for equality; it never
/// dereferences them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct OwnerId(u64);

impl OwnerId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Build an owner identity from a pointer without retaining the pointer.
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize as u64)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Category of background work. Distinguishes e.g. a render job from a bake
/// job requested by the same owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Render,
    Preview,
    Bake,
    Simulate,
    Import,
    Export,
    FileLoad,
    Generic,
}

/// Behavioral flags set at job creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobFlags {
    /// Report this job's progress to the window-level aggregator.
    pub progress_visible: bool,
    /// When suspended by a rival running the same start function, ask the
    /// rival to cancel instead of just waiting.
    pub priority: bool,
    /// Competes with every other exclusive-class job, regardless of start
    /// function.
    pub exclusive_class: bool,
    /// Advisory only; the registry does not act on it.
    pub suppress_duplicate_undo: bool,
}

/// Severity of a diagnostic produced by a worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportLevel {
    Info,
    Warning,
    Error,
}

/// One diagnostic message from a worker, moved into the registry's global
/// sink at the end of every tick (and on kill) so nothing is lost when a job
/// is torn down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub level: ReportLevel,
    pub message: String,
}

impl Report {
    pub fn new(level: ReportLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

/// Lifecycle notification emitted during reconciliation. The host subscribes
/// with [`crate::JobRegistry::set_notifier`]; topics are the strings supplied
/// via `set_tick_period`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum Notice {
    /// The job posted new progress and its `update` callback ran.
    Update { job: JobId, topic: String },
    /// The job finished (completed or canceled) and was reconciled.
    Ended { job: JobId, topic: String },
    /// Secondary notification for progress-visible jobs.
    ProgressChanged { job: JobId, progress: f32 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_owner_id_from_ptr_is_stable() {
        let value = 42u32;
        let a = OwnerId::from_ptr(&value);
        let b = OwnerId::from_ptr(&value);
        assert_eq!(a, b);
    }

    #[test]
    fn test_owner_id_distinct_objects_differ() {
        let x = 1u32;
        let y = 2u32;
        assert_ne!(OwnerId::from_ptr(&x), OwnerId::from_ptr(&y));
    }

    #[test]
    fn test_flags_default_all_clear() {
        let flags = JobFlags::default();
        assert!(!flags.progress_visible);
        assert!(!flags.priority);
        assert!(!flags.exclusive_class);
        assert!(!flags.suppress_duplicate_undo);
    }

    #[test]
    fn test_notice_serialize() {
        let notice = Notice::ProgressChanged {
            job: 7,
            progress: 0.5,
        };
        let json = serde_json::to_string(&notice).unwrap();
        assert!(json.contains("\"type\":\"progressChanged\""));
        assert!(json.contains("\"job\":7"));
    }
}
