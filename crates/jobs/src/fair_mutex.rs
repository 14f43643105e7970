// crates/jobs/src/fair_mutex.rs
//! FIFO-fair ticket lock guarding a job's shared payload.
//!
//! A plain `std::sync::Mutex` makes no fairness promise: the controller
//! thread, which releases and immediately re-acquires the lock around every
//! tick, could win the race every time and starve the worker. Tickets are
//! handed out and served strictly in order, so after the controller drops its
//! guard any already-waiting worker is guaranteed the next turn.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Tickets {
    next: u64,
    serving: u64,
}

/// Mutual exclusion with FIFO fairness.
pub struct FairMutex<T> {
    tickets: Mutex<Tickets>,
    turn: Condvar,
    // Only ever locked by the thread holding the current ticket, so this
    // inner lock is never contended; it exists to carry the data safely.
    data: Mutex<T>,
}

/// RAII guard for [`FairMutex`]. Dropping it serves the next ticket.
pub struct FairGuard<'a, T> {
    lock: &'a FairMutex<T>,
    inner: Option<MutexGuard<'a, T>>,
}

impl<T> FairMutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            tickets: Mutex::new(Tickets::default()),
            turn: Condvar::new(),
            data: Mutex::new(value),
        }
    }

    /// Take a ticket and block until it is served.
    pub fn lock(&self) -> FairGuard<'_, T> {
        let mut tickets = self
            .tickets
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let my_ticket = tickets.next;
        tickets.next += 1;
        while tickets.serving != my_ticket {
            tickets = self
                .turn
                .wait(tickets)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(tickets);

        // A worker that panicked while holding the guard poisons the data
        // mutex; the controller still has to run the end-of-life callbacks,
        // so keep going with whatever state the payload was left in.
        let inner = self.data.lock().unwrap_or_else(|e| {
            tracing::warn!("fair mutex data poisoned by a panicked holder");
            e.into_inner()
        });
        FairGuard {
            lock: self,
            inner: Some(inner),
        }
    }

    /// Consume the lock and return the protected value.
    pub fn into_inner(self) -> T {
        self.data
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> FairGuard<'_, T> {
    /// Yield to any waiter, then re-acquire: `release(); acquire();` as a
    /// single call. A holder doing a long stretch of work under the guard
    /// can bump periodically so queued threads are guaranteed a turn.
    pub fn bump(self) -> Self {
        let lock = self.lock;
        drop(self);
        lock.lock()
    }
}

impl<T> std::ops::Deref for FairGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.inner.as_ref().expect("guard accessed after release")
    }
}

impl<T> std::ops::DerefMut for FairGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.inner.as_mut().expect("guard accessed after release")
    }
}

impl<T> Drop for FairGuard<'_, T> {
    fn drop(&mut self) {
        // Release the data before serving the next ticket so the next holder
        // never observes the data mutex still held.
        self.inner = None;
        let mut tickets = self
            .lock
            .tickets
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        tickets.serving += 1;
        drop(tickets);
        self.lock.turn.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn waiter_queued<T>(lock: &FairMutex<T>, expected_next: u64) -> bool {
        lock.tickets
            .lock()
            .map(|t| t.next >= expected_next)
            .unwrap_or(false)
    }

    fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) {
        let end = Instant::now() + deadline;
        while !cond() {
            assert!(Instant::now() < end, "condition not met in time");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_lock_protects_data() {
        let lock = Arc::new(FairMutex::new(0u64));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                for _ in 0..500 {
                    *lock.lock() += 1;
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*lock.lock(), 2000);
    }

    #[test]
    fn test_bump_serves_waiter_first() {
        let lock = Arc::new(FairMutex::new(Vec::<&'static str>::new()));

        let guard = lock.lock();

        let waiter = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                lock.lock().push("waiter");
            })
        };

        // Wait until the waiter has taken its ticket.
        wait_until(Duration::from_secs(5), || waiter_queued(&lock, 2));

        // Yield: the queued waiter must run before we get the lock back.
        let mut guard = guard.bump();
        guard.push("controller");
        drop(guard);
        waiter.join().unwrap();

        assert_eq!(*lock.lock(), vec!["waiter", "controller"]);
    }

    #[test]
    fn test_tickets_served_in_arrival_order() {
        let lock = Arc::new(FairMutex::new(Vec::<usize>::new()));
        let gate = lock.lock();

        let mut handles = Vec::new();
        for i in 0..3 {
            let worker_lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                worker_lock.lock().push(i);
            }));
            // Each thread must hold a ticket before the next spawns.
            wait_until(Duration::from_secs(5), || waiter_queued(&lock, i as u64 + 2));
        }

        drop(gate);
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*lock.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_into_inner() {
        let lock = FairMutex::new(String::from("done"));
        assert_eq!(lock.into_inner(), "done");
    }
}
