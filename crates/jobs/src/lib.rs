// crates/jobs/src/lib.rs
//! Background job manager.
//!
//! Lets interactive application code launch long-running work (import/export,
//! baking, simulation stepping, file I/O) on a dedicated worker thread while
//! the controller (UI) thread keeps responding, periodically observing
//! progress and reconciling results.
//!
//! Pieces:
//! - [`JobRegistry`] — owns every job; lookup by (owner, kind), start with
//!   suspension/priority arbitration, per-tick reconciliation, stop/kill
//! - [`WorkerStatus`] — lock-free progress/cancellation/log channel between a
//!   worker thread and the controller
//! - [`FairMutex`] — FIFO ticket lock so the controller's tick cycle can
//!   never starve the worker out of the shared payload
//! - [`window_progress`] — aggregate progress for the host window
//!
//! The registry is driven by the host's event loop:
//!
//! ```no_run
//! use atelier_jobs::{JobCallbacks, JobFlags, JobKind, JobRegistry, OwnerId};
//! use std::time::{Duration, Instant};
//!
//! let mut registry = JobRegistry::new();
//! let job = registry.get_or_create_job(
//!     OwnerId::new(1),
//!     JobKind::Export,
//!     JobFlags::default(),
//!     "Export scene",
//! );
//! registry.set_payload(job, Box::new(Vec::<u8>::new()), None);
//! registry.set_callbacks(
//!     job,
//!     JobCallbacks::new(|ctx| {
//!         for i in 0..100 {
//!             if ctx.is_cancel_requested() {
//!                 return;
//!             }
//!             ctx.set_progress(i as f32 / 100.0);
//!             ctx.post_update();
//!         }
//!     }),
//! );
//! registry.start(job).unwrap();
//! while !registry.is_empty() {
//!     registry.tick(Instant::now());
//!     std::thread::sleep(Duration::from_millis(10));
//! }
//! ```

pub mod error;
pub mod fair_mutex;
pub mod job;
pub mod progress;
pub mod registry;
pub mod status;
pub mod types;

pub use error::StartError;
pub use fair_mutex::{FairGuard, FairMutex};
pub use job::{
    FreeFn, JobCallbacks, JobSnapshot, LifecycleFn, Payload, RunState, StartFn, WorkerContext,
};
pub use progress::{window_progress, window_snapshot, WindowProgress};
pub use registry::JobRegistry;
pub use status::WorkerStatus;
pub use types::{JobFlags, JobId, JobKind, Notice, OwnerId, Report, ReportLevel};
