// crates/jobs/src/registry.rs
//! Central registry owning every background job in the process.
//!
//! The registry lives on the controller (UI) thread and is driven by periodic
//! [`tick`](JobRegistry::tick) calls from the host event loop. It decides for
//! each start request whether to run, suspend, or preempt; reconciles worker
//! progress into controller-side callbacks; and tears jobs down once their
//! worker thread has returned.
//!
//! Never a hidden singleton: the host owns an instance and passes it around,
//! so tests construct independent registries.

use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::error::StartError;
use crate::fair_mutex::FairMutex;
use crate::job::{
    FreeFn, Job, JobCallbacks, JobShared, JobSnapshot, JobTimer, Payload, RunState, StartFn,
    WorkerContext,
};
use crate::status::WorkerStatus;
use crate::types::{JobFlags, JobId, JobKind, Notice, OwnerId, Report, ReportLevel};

pub struct JobRegistry {
    jobs: Vec<Job>,
    next_id: JobId,
    /// Global diagnostic sink; workers' reports are moved here every tick.
    reports: Vec<Report>,
    notifier: Option<Sender<Notice>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: Vec::new(),
            next_id: 1,
            reports: Vec::new(),
            notifier: None,
        }
    }

    // ------------------------------------------------------------------
    // Lookup & identity
    // ------------------------------------------------------------------

    /// Return the job for this (owner, kind) pair, creating it in `Idle` if
    /// absent. Idempotent: calling twice yields the same job, with flags and
    /// display name refreshed, so callers may reconfigure payload/callbacks
    /// before the next `start`.
    pub fn get_or_create_job(
        &mut self,
        owner: OwnerId,
        kind: JobKind,
        flags: JobFlags,
        display_name: &str,
    ) -> JobId {
        if let Some(job) = self
            .jobs
            .iter_mut()
            .find(|j| j.owner == owner && j.kind == kind)
        {
            job.flags = flags;
            job.display_name = display_name.to_string();
            return job.id;
        }
        let id = self.next_id;
        self.next_id += 1;
        tracing::debug!(job = id, owner = owner.raw(), ?kind, %display_name, "creating job");
        self.jobs.push(Job::new(id, owner, kind, flags, display_name));
        id
    }

    /// Wildcard lookup: `None` matches any owner/kind. Returns at most one
    /// (arbitrary) match.
    pub fn find(&self, owner: Option<OwnerId>, kind: Option<JobKind>) -> Option<JobId> {
        self.jobs
            .iter()
            .find(|j| {
                owner.map_or(true, |o| j.owner == o) && kind.map_or(true, |k| j.kind == k)
            })
            .map(|j| j.id)
    }

    pub fn is_running(&self, owner: OwnerId, kind: Option<JobKind>) -> bool {
        self.jobs.iter().any(|j| {
            j.owner == owner
                && kind.map_or(true, |k| j.kind == k)
                && j.run_state == RunState::Running
        })
    }

    /// Progress of the owner's running progress-visible job; `0.0` when there
    /// is none.
    pub fn progress(&self, owner: OwnerId) -> f32 {
        self.jobs
            .iter()
            .find(|j| {
                j.owner == owner
                    && j.flags.progress_visible
                    && j.run_state == RunState::Running
            })
            .map_or(0.0, Job::progress)
    }

    pub fn start_time(&self, owner: OwnerId) -> Option<Instant> {
        self.jobs
            .iter()
            .find(|j| j.owner == owner && j.run_state == RunState::Running)
            .and_then(|j| j.start_time)
    }

    pub fn run_state(&self, id: JobId) -> Option<RunState> {
        self.jobs.iter().find(|j| j.id == id).map(|j| j.run_state)
    }

    pub fn snapshot(&self) -> Vec<JobSnapshot> {
        self.jobs.iter().map(Job::snapshot).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Earliest armed timer deadline, so the host loop can sleep precisely.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.jobs
            .iter()
            .filter(|j| j.run_state == RunState::Running)
            .filter_map(|j| j.timer.map(|t| t.next_fire))
            .min()
    }

    pub(crate) fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Briefly lock a running job's payload outside the normal callback
    /// windows, e.g. for host code that must inspect or adjust data the
    /// worker is using. Fair with respect to the worker: a waiting worker is
    /// served first. Returns `None` if the job is not running or the payload
    /// is not a `T`.
    pub fn with_payload<T: std::any::Any, R>(
        &self,
        id: JobId,
        f: impl FnOnce(&mut T) -> R,
    ) -> Option<R> {
        let job = self.jobs.iter().find(|j| j.id == id)?;
        let shared = job.shared.as_ref()?;
        let mut guard = shared.payload.lock();
        let payload: &mut (dyn std::any::Any + Send) = &mut **guard;
        payload.downcast_mut::<T>().map(f)
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Hand the job its work data. Replacing an unstarted payload frees the
    /// old one exactly once through its own free hook.
    pub fn set_payload(&mut self, id: JobId, payload: Payload, free: Option<FreeFn>) {
        let Some(job) = self.job_mut(id) else {
            tracing::warn!(job = id, "set_payload on unknown job");
            return;
        };
        if let Some(old) = job.pending.take() {
            match job.pending_free.take() {
                Some(f) => f(old),
                None => drop(old),
            }
        }
        job.pending = Some(payload);
        job.pending_free = free;
    }

    pub fn set_callbacks(&mut self, id: JobId, callbacks: JobCallbacks) {
        let Some(job) = self.job_mut(id) else {
            tracing::warn!(job = id, "set_callbacks on unknown job");
            return;
        };
        job.callbacks = Some(callbacks);
    }

    /// Configure the reconciliation tick period and optional notification
    /// topics. A live timer is only ever tightened, never lengthened.
    pub fn set_tick_period(
        &mut self,
        id: JobId,
        period: Duration,
        update_topic: Option<&str>,
        end_topic: Option<&str>,
    ) {
        let Some(job) = self.job_mut(id) else {
            tracing::warn!(job = id, "set_tick_period on unknown job");
            return;
        };
        job.tick_period = period;
        job.update_topic = update_topic.map(str::to_string);
        job.end_topic = end_topic.map(str::to_string);
        if let Some(timer) = &mut job.timer {
            timer.period = timer.period.min(period);
        }
    }

    /// One-shot debounce: the next start request is treated as suspended on
    /// its first arbitration pass, then the delay is cleared.
    pub fn set_start_delay(&mut self, id: JobId, delay: Duration) {
        let Some(job) = self.job_mut(id) else {
            tracing::warn!(job = id, "set_start_delay on unknown job");
            return;
        };
        job.start_delay = Some(delay);
    }

    /// Subscribe the host to lifecycle notices. A dropped receiver is ignored.
    pub fn set_notifier(&mut self, tx: Sender<Notice>) {
        self.notifier = Some(tx);
    }

    // ------------------------------------------------------------------
    // Start & suspension arbitration
    // ------------------------------------------------------------------

    /// Request that the job run.
    ///
    /// A job already `Running` is asked to cancel instead; once
    /// reconciliation sees its worker finish, a fresh pending payload (if one
    /// was set in the meantime) restarts it automatically. Otherwise the
    /// request is arbitrated against every running rival: a rival with the
    /// same start function (or, for exclusive-class jobs, any running
    /// exclusive-class rival) suspends this job, and a `priority` job
    /// additionally asks each such rival to cancel.
    pub fn start(&mut self, id: JobId) -> Result<(), StartError> {
        let Some(idx) = self.index_of(id) else {
            tracing::error!(job = id, "start called on job not in the registry");
            return Err(StartError::UnknownJob(id));
        };

        if self.jobs[idx].run_state == RunState::Running {
            if let Some(shared) = &self.jobs[idx].shared {
                shared.status.request_cancel();
            }
            return Ok(());
        }

        let job = &self.jobs[idx];
        let Some(callbacks) = &job.callbacks else {
            tracing::error!(job = id, name = %job.display_name, "start with no start callback");
            return Err(StartError::NoStartCallback(id));
        };
        if job.pending.is_none() {
            tracing::error!(job = id, name = %job.display_name, "start with no payload");
            return Err(StartError::NoPayload(id));
        }
        let my_start = Arc::clone(&callbacks.start);
        let my_flags = job.flags;

        let mut suspend = false;
        for (i, rival) in self.jobs.iter().enumerate() {
            if i == idx || rival.run_state != RunState::Running {
                continue;
            }
            let same_start = rival
                .callbacks
                .as_ref()
                .map_or(false, |c| Arc::ptr_eq(&c.start, &my_start));
            let conflict = (same_start && !my_flags.exclusive_class)
                || (my_flags.exclusive_class && rival.flags.exclusive_class);
            if conflict {
                suspend = true;
                // Preemption is a request, not a wait: the rival keeps
                // running until it polls the flag.
                if my_flags.priority {
                    if let Some(shared) = &rival.shared {
                        shared.status.request_cancel();
                    }
                }
            }
        }

        let job = &mut self.jobs[idx];
        if let Some(delay) = job.start_delay.take() {
            if !delay.is_zero() {
                suspend = true;
            }
        }

        if suspend {
            job.run_state = RunState::Suspended;
            tracing::debug!(job = id, name = %job.display_name, "start suspended");
            return Ok(());
        }

        self.run(idx)
    }

    /// Hand the pending payload to a new worker thread and mark the job
    /// running. Arbitration has already passed.
    fn run(&mut self, idx: usize) -> Result<(), StartError> {
        let now = Instant::now();
        let id = self.jobs[idx].id;

        let job = &mut self.jobs[idx];
        let mut payload = job.pending.take().ok_or(StartError::NoPayload(id))?;
        job.running_free = job.pending_free.take();

        // `init` runs on the controller thread, strictly before the worker
        // thread exists.
        if let Some(init) = job.callbacks.as_mut().and_then(|c| c.init.as_mut()) {
            init(&mut *payload);
        }
        let start_fn = job
            .callbacks
            .as_ref()
            .map(|c| Arc::clone(&c.start))
            .ok_or(StartError::NoStartCallback(id))?;

        // Ownership transfer: from here the worker owns the payload; the
        // controller touches it only under the fair lock inside callbacks.
        let shared = Arc::new(JobShared {
            payload: FairMutex::new(payload),
            status: WorkerStatus::new(),
        });
        job.shared = Some(Arc::clone(&shared));
        job.run_state = RunState::Running;
        job.start_time = Some(now);
        job.started_at = Some(Utc::now());

        match &mut job.timer {
            Some(timer) => {
                // Tighten to the new period if it is shorter; never lengthen.
                timer.period = timer.period.min(job.tick_period);
                timer.next_fire = now + timer.period;
            }
            None => {
                job.timer = Some(JobTimer {
                    period: job.tick_period,
                    next_fire: now + job.tick_period,
                });
            }
        }

        let ctx = WorkerContext::new(shared);
        tracing::debug!(job = id, name = %job.display_name, "spawning worker thread");
        let spawned = std::thread::Builder::new()
            .name(format!("job-{}", job.display_name))
            .spawn(move || {
                let body = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    start_fn(&ctx);
                }));
                if body.is_err() {
                    // An abnormal exit is cancellation, never completion, and
                    // never reaches the controller thread as a panic.
                    ctx.report(ReportLevel::Error, "worker thread panicked");
                    ctx.status().request_cancel();
                }
                ctx.status().mark_finished();
            });

        match spawned {
            Ok(handle) => {
                self.jobs[idx].worker = Some(handle);
                Ok(())
            }
            Err(source) => {
                let job = &mut self.jobs[idx];
                job.run_state = RunState::Idle;
                job.start_time = None;
                job.started_at = None;
                if let Some(shared) = job.shared.take() {
                    let payload = {
                        let mut guard = shared.payload.lock();
                        std::mem::replace(&mut *guard, Box::new(()) as Payload)
                    };
                    match job.running_free.take() {
                        Some(free) => free(payload),
                        None => drop(payload),
                    }
                }
                tracing::error!(job = id, "failed to spawn worker thread: {source}");
                Err(StartError::Spawn { source })
            }
        }
    }

    // ------------------------------------------------------------------
    // Per-tick reconciliation
    // ------------------------------------------------------------------

    /// Drive every job one reconciliation step. Called by the host event
    /// loop; `now` is the loop's current instant.
    ///
    /// Suspended jobs are re-arbitrated first (a rival may have finished),
    /// then every running job whose timer is due is reconciled, and finally
    /// worker diagnostics are moved into the global sink regardless of what
    /// happened above.
    pub fn tick(&mut self, now: Instant) {
        let suspended: Vec<JobId> = self
            .jobs
            .iter()
            .filter(|j| j.run_state == RunState::Suspended && j.pending.is_some())
            .map(|j| j.id)
            .collect();
        for id in suspended {
            let _ = self.start(id);
        }

        // Collect first: a job killed by a callback above may be gone by the
        // time its timer fires (timer race), so re-check presence.
        let due: Vec<JobId> = self
            .jobs
            .iter()
            .filter(|j| j.run_state == RunState::Running)
            .filter(|j| j.timer.map_or(false, |t| t.next_fire <= now))
            .map(|j| j.id)
            .collect();
        for id in due {
            let Some(idx) = self.index_of(id) else { continue };
            self.reconcile(idx, now);
        }

        self.drain_worker_reports();
    }

    fn reconcile(&mut self, idx: usize, now: Instant) {
        let mut notices = Vec::new();
        let finished;
        {
            let job = &mut self.jobs[idx];
            let Some(shared) = job.shared.as_ref().map(Arc::clone) else {
                return;
            };

            finished = shared.status.is_finished();
            let had_update = shared.status.take_update();

            if had_update || finished {
                if let Some(update) = job.callbacks.as_mut().and_then(|c| c.update.as_mut()) {
                    // The fair lock guarantees a waiting worker got its turn
                    // before we take this guard.
                    let mut guard = shared.payload.lock();
                    update(&mut **guard);
                }
                if let Some(topic) = &job.update_topic {
                    notices.push(Notice::Update {
                        job: job.id,
                        topic: topic.clone(),
                    });
                }
                if job.flags.progress_visible {
                    notices.push(Notice::ProgressChanged {
                        job: job.id,
                        progress: shared.status.progress(),
                    });
                }
            }

            if !finished {
                if let Some(timer) = &mut job.timer {
                    timer.next_fire = now + timer.period;
                }
            }
        }

        for notice in notices {
            self.notify(notice);
        }
        if finished {
            self.finish(idx, true);
        }
    }

    /// Join the worker and run the end-of-life sequence: `end`, then exactly
    /// one of `on_completed`/`on_canceled`, then the payload free hook. With
    /// `allow_restart`, a pending payload set while the worker was finishing
    /// re-starts the job instead of tearing it down.
    fn finish(&mut self, idx: usize, allow_restart: bool) {
        let id;
        let end_topic;
        let mut drained;
        {
            let job = &mut self.jobs[idx];
            id = job.id;
            job.run_state = RunState::ReadyToFinish;

            // `end` happens-after the worker has fully returned.
            if let Some(worker) = job.worker.take() {
                if worker.join().is_err() {
                    tracing::warn!(job = id, "worker thread aborted abnormally");
                }
            }

            let Some(shared) = job.shared.take() else {
                job.run_state = RunState::Idle;
                return;
            };
            let canceled = shared.status.is_cancel_requested();
            drained = shared.status.drain_reports();

            // Recover the payload by swap: worker-side code may have cloned
            // its context, so the Arc is not guaranteed unique.
            let mut payload = {
                let mut guard = shared.payload.lock();
                std::mem::replace(&mut *guard, Box::new(()) as Payload)
            };
            drop(shared);

            if let Some(cb) = job.callbacks.as_mut() {
                if let Some(end) = cb.end.as_mut() {
                    end(&mut *payload);
                }
                if canceled {
                    if let Some(f) = cb.on_canceled.as_mut() {
                        f(&mut *payload);
                    }
                } else if let Some(f) = cb.on_completed.as_mut() {
                    f(&mut *payload);
                }
            }

            match job.running_free.take() {
                Some(free) => free(payload),
                None => drop(payload),
            }
            job.run_state = RunState::Idle;
            job.start_time = None;
            job.started_at = None;
            end_topic = job.end_topic.clone();
            tracing::debug!(job = id, canceled, "job finished");
        }

        self.sink_reports(&mut drained);
        if let Some(topic) = end_topic {
            self.notify(Notice::Ended { job: id, topic });
        }

        if !allow_restart {
            return;
        }
        if self.jobs[idx].pending.is_some() {
            tracing::debug!(job = id, "restarting with new pending payload");
            let _ = self.start(id);
        } else {
            // No further payload: the timer dies with the job.
            self.jobs.remove(idx);
        }
    }

    // ------------------------------------------------------------------
    // Stop & kill
    // ------------------------------------------------------------------

    /// Ask matching running jobs to cancel. Non-blocking; teardown happens
    /// through normal reconciliation once each worker polls the flag.
    pub fn request_stop(&mut self, owner: Option<OwnerId>, start_fn: Option<&StartFn>) {
        for job in &self.jobs {
            if job.run_state != RunState::Running || !Self::matches(job, owner, start_fn) {
                continue;
            }
            if let Some(shared) = &job.shared {
                shared.status.request_cancel();
            }
        }
    }

    /// Blocking teardown of matching jobs: request cancel, join the worker
    /// (cancellation is cooperative, so this waits for the worker to return
    /// voluntarily), run the end-of-life sequence inline, and remove the job.
    /// Safe on a job that never started: its pending payload is freed exactly
    /// once and no lifecycle callback runs.
    pub fn kill(&mut self, owner: Option<OwnerId>, start_fn: Option<&StartFn>) {
        let ids: Vec<JobId> = self
            .jobs
            .iter()
            .filter(|j| Self::matches(j, owner, start_fn))
            .map(|j| j.id)
            .collect();
        for id in ids {
            self.kill_by_id(id);
        }
    }

    pub fn kill_all(&mut self) {
        self.kill(None, None);
    }

    pub fn kill_all_except(&mut self, owner: OwnerId) {
        let ids: Vec<JobId> = self
            .jobs
            .iter()
            .filter(|j| j.owner != owner)
            .map(|j| j.id)
            .collect();
        for id in ids {
            self.kill_by_id(id);
        }
    }

    fn kill_by_id(&mut self, id: JobId) {
        let Some(idx) = self.index_of(id) else { return };
        if matches!(
            self.jobs[idx].run_state,
            RunState::Running | RunState::ReadyToFinish
        ) {
            if let Some(shared) = &self.jobs[idx].shared {
                shared.status.request_cancel();
            }
            self.finish(idx, false);
        }

        let Some(idx) = self.index_of(id) else { return };
        let mut job = self.jobs.remove(idx);
        if let Some(pending) = job.pending.take() {
            match job.pending_free.take() {
                Some(free) => free(pending),
                None => drop(pending),
            }
        }
        tracing::debug!(job = id, "job killed");
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Take everything accumulated in the global report sink.
    pub fn take_reports(&mut self) -> Vec<Report> {
        std::mem::take(&mut self.reports)
    }

    fn drain_worker_reports(&mut self) {
        let mut collected = Vec::new();
        for job in &self.jobs {
            if let Some(shared) = &job.shared {
                collected.extend(shared.status.drain_reports());
            }
        }
        self.sink_reports(&mut collected);
    }

    fn sink_reports(&mut self, reports: &mut Vec<Report>) {
        for report in reports.iter() {
            match report.level {
                ReportLevel::Info => tracing::info!(target: "atelier_jobs::worker", "{}", report.message),
                ReportLevel::Warning => tracing::warn!(target: "atelier_jobs::worker", "{}", report.message),
                ReportLevel::Error => tracing::error!(target: "atelier_jobs::worker", "{}", report.message),
            }
        }
        self.reports.append(reports);
    }

    fn notify(&self, notice: Notice) {
        if let Some(tx) = &self.notifier {
            let _ = tx.send(notice);
        }
    }

    fn index_of(&self, id: JobId) -> Option<usize> {
        self.jobs.iter().position(|j| j.id == id)
    }

    fn job_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }

    fn matches(job: &Job, owner: Option<OwnerId>, start_fn: Option<&StartFn>) -> bool {
        if let Some(owner) = owner {
            if job.owner != owner {
                return false;
            }
        }
        if let Some(start) = start_fn {
            match &job.callbacks {
                Some(c) => {
                    if !Arc::ptr_eq(&c.start, start) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn loop_until_canceled() -> StartFn {
        Arc::new(|ctx: &WorkerContext| {
            while !ctx.is_cancel_requested() {
                thread::sleep(Duration::from_millis(1));
            }
        })
    }

    fn configure(reg: &mut JobRegistry, id: JobId, start: StartFn) {
        reg.set_payload(id, Box::new(0u32), None);
        reg.set_callbacks(id, JobCallbacks::from_arc(start));
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let mut reg = JobRegistry::new();
        let owner = OwnerId::new(1);
        let a = reg.get_or_create_job(owner, JobKind::Export, JobFlags::default(), "export");
        let b = reg.get_or_create_job(owner, JobKind::Export, JobFlags::default(), "export v2");
        assert_eq!(a, b);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.snapshot()[0].display_name, "export v2");

        // Different kind for the same owner is a different job.
        let c = reg.get_or_create_job(owner, JobKind::Bake, JobFlags::default(), "bake");
        assert_ne!(a, c);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_wildcard_lookup() {
        let mut reg = JobRegistry::new();
        let owner = OwnerId::new(7);
        let id = reg.get_or_create_job(owner, JobKind::Render, JobFlags::default(), "render");

        assert_eq!(reg.find(Some(owner), None), Some(id));
        assert_eq!(reg.find(None, Some(JobKind::Render)), Some(id));
        assert_eq!(reg.find(Some(OwnerId::new(8)), None), None);
        assert_eq!(reg.find(Some(owner), Some(JobKind::Bake)), None);
    }

    #[test]
    fn test_start_misuse_errors() {
        let mut reg = JobRegistry::new();
        let id = reg.get_or_create_job(OwnerId::new(1), JobKind::Generic, JobFlags::default(), "x");

        assert!(matches!(reg.start(id), Err(StartError::NoStartCallback(_))));

        reg.set_callbacks(id, JobCallbacks::from_arc(loop_until_canceled()));
        assert!(matches!(reg.start(id), Err(StartError::NoPayload(_))));

        assert!(matches!(reg.start(999), Err(StartError::UnknownJob(999))));
    }

    #[test]
    fn test_exclusive_class_blocks_unrelated_start_fns() {
        let mut reg = JobRegistry::new();
        let exclusive = JobFlags {
            exclusive_class: true,
            ..JobFlags::default()
        };
        let a = reg.get_or_create_job(OwnerId::new(1), JobKind::Render, exclusive, "render");
        let b = reg.get_or_create_job(OwnerId::new(2), JobKind::Bake, exclusive, "bake");
        configure(&mut reg, a, loop_until_canceled());
        configure(&mut reg, b, loop_until_canceled());

        reg.start(a).unwrap();
        reg.start(b).unwrap();
        assert_eq!(reg.run_state(a), Some(RunState::Running));
        assert_eq!(reg.run_state(b), Some(RunState::Suspended));

        reg.kill_all();
    }

    #[test]
    fn test_same_start_fn_different_exclusive_job_does_not_suspend() {
        // An exclusive-class job only competes with other exclusive-class
        // jobs; a non-exclusive rival with a different start fn is ignored.
        let mut reg = JobRegistry::new();
        let exclusive = JobFlags {
            exclusive_class: true,
            ..JobFlags::default()
        };
        let a = reg.get_or_create_job(OwnerId::new(1), JobKind::Render, JobFlags::default(), "a");
        let b = reg.get_or_create_job(OwnerId::new(2), JobKind::Bake, exclusive, "b");
        configure(&mut reg, a, loop_until_canceled());
        configure(&mut reg, b, loop_until_canceled());

        reg.start(a).unwrap();
        reg.start(b).unwrap();
        assert_eq!(reg.run_state(b), Some(RunState::Running));

        reg.kill_all();
    }

    #[test]
    fn test_live_timer_tightens_never_lengthens() {
        let mut reg = JobRegistry::new();
        let id = reg.get_or_create_job(OwnerId::new(1), JobKind::Generic, JobFlags::default(), "t");
        configure(&mut reg, id, loop_until_canceled());
        reg.set_tick_period(id, Duration::from_millis(100), None, None);
        reg.start(id).unwrap();

        let period = |reg: &JobRegistry| {
            reg.jobs()[0].timer.expect("timer armed").period
        };
        assert_eq!(period(&reg), Duration::from_millis(100));

        // Lengthening request leaves the live timer alone.
        reg.set_tick_period(id, Duration::from_millis(500), None, None);
        assert_eq!(period(&reg), Duration::from_millis(100));

        // Tightening applies immediately.
        reg.set_tick_period(id, Duration::from_millis(20), None, None);
        assert_eq!(period(&reg), Duration::from_millis(20));

        reg.kill_all();
    }

    #[test]
    fn test_replacing_pending_payload_frees_old_one() {
        let mut reg = JobRegistry::new();
        let freed = Arc::new(AtomicUsize::new(0));
        let id = reg.get_or_create_job(OwnerId::new(1), JobKind::Generic, JobFlags::default(), "p");

        let f = Arc::clone(&freed);
        reg.set_payload(
            id,
            Box::new(String::from("first")),
            Some(Box::new(move |_| {
                f.fetch_add(1, Ordering::Relaxed);
            })),
        );
        reg.set_payload(id, Box::new(String::from("second")), None);
        assert_eq!(freed.load(Ordering::Relaxed), 1);

        reg.kill_all();
    }

    #[test]
    fn test_start_while_running_requests_cancel() {
        let mut reg = JobRegistry::new();
        let id = reg.get_or_create_job(OwnerId::new(1), JobKind::Generic, JobFlags::default(), "r");
        configure(&mut reg, id, loop_until_canceled());
        reg.start(id).unwrap();
        assert_eq!(reg.run_state(id), Some(RunState::Running));

        // Second start on a running job only flags cancellation.
        reg.start(id).unwrap();
        wait_for(|| {
            reg.tick(Instant::now() + Duration::from_secs(1));
            reg.run_state(id).is_none()
        });
        assert!(reg.is_empty());
    }

    #[test]
    fn test_with_payload_locks_running_job_data() {
        let mut reg = JobRegistry::new();
        let id = reg.get_or_create_job(OwnerId::new(1), JobKind::Generic, JobFlags::default(), "w");
        configure(&mut reg, id, loop_until_canceled());
        reg.start(id).unwrap();

        let read = reg.with_payload::<u32, _>(id, |n| {
            *n = 7;
            *n
        });
        assert_eq!(read, Some(7));

        // Wrong downcast or unknown job yields None.
        assert_eq!(reg.with_payload::<String, _>(id, |_| ()), None);
        assert_eq!(reg.with_payload::<u32, _>(999, |n| *n), None);

        reg.kill_all();
    }

    #[test]
    fn test_next_deadline_tracks_armed_timers() {
        let mut reg = JobRegistry::new();
        assert_eq!(reg.next_deadline(), None);

        let id = reg.get_or_create_job(OwnerId::new(1), JobKind::Generic, JobFlags::default(), "d");
        configure(&mut reg, id, loop_until_canceled());
        reg.set_tick_period(id, Duration::from_millis(50), None, None);
        let before = Instant::now();
        reg.start(id).unwrap();

        let deadline = reg.next_deadline().expect("armed timer");
        assert!(deadline >= before + Duration::from_millis(50));

        reg.kill_all();
        assert_eq!(reg.next_deadline(), None);
    }
}
