// crates/jobs/src/job.rs
//! One schedulable unit of background work: identity, callbacks, payload,
//! worker thread, and the shared state both threads touch.

use std::any::Any;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::fair_mutex::{FairGuard, FairMutex};
use crate::status::WorkerStatus;
use crate::types::{JobFlags, JobId, JobKind, OwnerId, ReportLevel};

/// Owned, type-erased job data. Exclusively owned by the controller until the
/// job starts, then moved into [`JobShared`] where both sides access it only
/// through the fair lock.
pub type Payload = Box<dyn Any + Send>;

/// The worker-thread body. Held behind an `Arc` so two requests for the same
/// unit of work can be recognized by pointer identity during suspension
/// arbitration.
pub type StartFn = Arc<dyn Fn(&WorkerContext) + Send + Sync + 'static>;

/// Controller-thread lifecycle callback (`init`, `update`, `end`,
/// `on_completed`, `on_canceled`). Receives the payload for downcasting.
pub type LifecycleFn = Box<dyn FnMut(&mut (dyn Any + Send)) + Send + 'static>;

/// Teardown hook receiving the payload by value. Defaults to dropping it.
pub type FreeFn = Box<dyn FnOnce(Payload) + Send + 'static>;

/// State shared between the worker thread and the controller while a job
/// runs. The payload sits inside the fair lock; the status needs no lock.
pub(crate) struct JobShared {
    pub(crate) payload: FairMutex<Payload>,
    pub(crate) status: WorkerStatus,
}

/// Handle given to the worker-thread start callback.
///
/// Grants lock-protected access to the job payload and direct access to the
/// status channel. The worker must poll
/// [`is_cancel_requested`](Self::is_cancel_requested) at safe points and
/// return promptly when it turns true, and must not hold the payload guard
/// across blocking I/O, or the controller's tick will stall.
#[derive(Clone)]
pub struct WorkerContext {
    shared: Arc<JobShared>,
}

impl WorkerContext {
    pub(crate) fn new(shared: Arc<JobShared>) -> Self {
        Self { shared }
    }

    /// The status channel shared with the controller.
    pub fn status(&self) -> &WorkerStatus {
        &self.shared.status
    }

    /// Acquire the payload lock. This is the worker-side `lock(job)`: it
    /// blocks until the controller is between ticks, fairly.
    pub fn payload(&self) -> FairGuard<'_, Payload> {
        self.shared.payload.lock()
    }

    /// Lock the payload, downcast it, and run `f` on it. Returns `None` if
    /// the payload is not a `T`.
    pub fn with_payload<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut guard = self.shared.payload.lock();
        let payload: &mut (dyn Any + Send) = &mut **guard;
        payload.downcast_mut::<T>().map(f)
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.shared.status.is_cancel_requested()
    }

    pub fn set_progress(&self, fraction: f32) {
        self.shared.status.set_progress(fraction);
    }

    /// Ask the controller to run the `update` callback on its next tick.
    pub fn post_update(&self) {
        self.shared.status.post_update();
    }

    pub fn report(&self, level: ReportLevel, message: impl Into<String>) {
        self.shared.status.report(level, message);
    }
}

/// The callback set configured on a job before `start`.
///
/// `start` runs on the worker thread; everything else runs on the controller
/// thread. Only `start` is required.
pub struct JobCallbacks {
    pub(crate) init: Option<LifecycleFn>,
    pub(crate) start: StartFn,
    pub(crate) update: Option<LifecycleFn>,
    pub(crate) end: Option<LifecycleFn>,
    pub(crate) on_completed: Option<LifecycleFn>,
    pub(crate) on_canceled: Option<LifecycleFn>,
}

impl JobCallbacks {
    pub fn new(start: impl Fn(&WorkerContext) + Send + Sync + 'static) -> Self {
        Self::from_arc(Arc::new(start))
    }

    /// Build from a pre-wrapped start function. Use this when the same unit
    /// of work is requested from several places, so arbitration (and
    /// `request_stop`/`kill` filtering) can recognize it by pointer identity.
    pub fn from_arc(start: StartFn) -> Self {
        Self {
            init: None,
            start,
            update: None,
            end: None,
            on_completed: None,
            on_canceled: None,
        }
    }

    /// Runs on the controller thread, after payload hand-off but strictly
    /// before the worker thread is spawned.
    pub fn init(mut self, f: impl FnMut(&mut (dyn Any + Send)) + Send + 'static) -> Self {
        self.init = Some(Box::new(f));
        self
    }

    /// Runs on the controller thread each tick the worker posted an update.
    pub fn update(mut self, f: impl FnMut(&mut (dyn Any + Send)) + Send + 'static) -> Self {
        self.update = Some(Box::new(f));
        self
    }

    /// Runs unconditionally on the controller thread once the worker thread
    /// has been joined.
    pub fn end(mut self, f: impl FnMut(&mut (dyn Any + Send)) + Send + 'static) -> Self {
        self.end = Some(Box::new(f));
        self
    }

    /// Runs after `end` when the worker returned without cancellation.
    pub fn on_completed(mut self, f: impl FnMut(&mut (dyn Any + Send)) + Send + 'static) -> Self {
        self.on_completed = Some(Box::new(f));
        self
    }

    /// Runs after `end` when the run was canceled (or the worker panicked).
    pub fn on_canceled(mut self, f: impl FnMut(&mut (dyn Any + Send)) + Send + 'static) -> Self {
        self.on_canceled = Some(Box::new(f));
        self
    }
}

/// Lifecycle state of a job, as driven by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Created or between runs; no worker thread exists.
    Idle,
    /// A start request lost arbitration and is retried every tick.
    Suspended,
    /// The worker thread is executing the start callback.
    Running,
    /// The worker returned; end-of-life callbacks have not run yet.
    ReadyToFinish,
}

/// Registry-managed periodic timer for one job.
#[derive(Debug, Clone, Copy)]
pub(crate) struct JobTimer {
    pub(crate) period: Duration,
    pub(crate) next_fire: Instant,
}

/// Serializable snapshot of one job, for host UI (job lists, tooltips).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: JobId,
    pub owner: OwnerId,
    pub kind: JobKind,
    pub display_name: String,
    pub state: RunState,
    pub progress: f32,
    pub started_at: Option<String>,
}

pub(crate) struct Job {
    pub(crate) id: JobId,
    pub(crate) owner: OwnerId,
    pub(crate) kind: JobKind,
    pub(crate) flags: JobFlags,
    pub(crate) display_name: String,
    pub(crate) callbacks: Option<JobCallbacks>,
    pub(crate) pending: Option<Payload>,
    pub(crate) pending_free: Option<FreeFn>,
    pub(crate) running_free: Option<FreeFn>,
    pub(crate) shared: Option<Arc<JobShared>>,
    pub(crate) worker: Option<JoinHandle<()>>,
    pub(crate) run_state: RunState,
    pub(crate) tick_period: Duration,
    pub(crate) start_delay: Option<Duration>,
    pub(crate) timer: Option<JobTimer>,
    pub(crate) update_topic: Option<String>,
    pub(crate) end_topic: Option<String>,
    pub(crate) start_time: Option<Instant>,
    pub(crate) started_at: Option<DateTime<Utc>>,
}

impl Job {
    pub(crate) fn new(id: JobId, owner: OwnerId, kind: JobKind, flags: JobFlags, name: &str) -> Self {
        Self {
            id,
            owner,
            kind,
            flags,
            display_name: name.to_string(),
            callbacks: None,
            pending: None,
            pending_free: None,
            running_free: None,
            shared: None,
            worker: None,
            run_state: RunState::Idle,
            tick_period: Duration::from_millis(100),
            start_delay: None,
            timer: None,
            update_topic: None,
            end_topic: None,
            start_time: None,
            started_at: None,
        }
    }

    pub(crate) fn progress(&self) -> f32 {
        self.shared.as_ref().map_or(0.0, |s| s.status.progress())
    }

    pub(crate) fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            owner: self.owner,
            kind: self.kind,
            display_name: self.display_name.clone(),
            state: self.run_state,
            progress: self.progress(),
            started_at: self.started_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_worker_context_payload_access() {
        let shared = Arc::new(JobShared {
            payload: FairMutex::new(Box::new(5u32) as Payload),
            status: WorkerStatus::new(),
        });
        let ctx = WorkerContext::new(shared);

        let doubled = ctx.with_payload::<u32, _>(|n| {
            *n *= 2;
            *n
        });
        assert_eq!(doubled, Some(10));

        // Wrong type downcasts to None.
        assert_eq!(ctx.with_payload::<String, _>(|_| ()), None);
    }

    #[test]
    fn test_worker_context_status_round_trip() {
        let shared = Arc::new(JobShared {
            payload: FairMutex::new(Box::new(()) as Payload),
            status: WorkerStatus::new(),
        });
        let ctx = WorkerContext::new(shared);

        assert!(!ctx.is_cancel_requested());
        ctx.status().request_cancel();
        assert!(ctx.is_cancel_requested());

        ctx.set_progress(0.3);
        assert_eq!(ctx.status().progress(), 0.3);
    }

    #[test]
    fn test_snapshot_serialize() {
        let mut job = Job::new(
            1,
            OwnerId::new(0xAB),
            JobKind::Export,
            JobFlags::default(),
            "Export scene",
        );
        job.run_state = RunState::Running;

        let json = serde_json::to_string(&job.snapshot()).unwrap();
        assert!(json.contains("\"displayName\":\"Export scene\""));
        assert!(json.contains("\"state\":\"running\""));
        assert!(json.contains("\"kind\":\"export\""));
    }
}
