//! # Scheduler Module
//!
//! Timer tasks shared by a connection factory and every connection it
//! produced. Each holder takes a [`Lease`]; when the last lease is
//! released every outstanding task is aborted. Acquiring again after
//! that starts a fresh generation.
//!
//! Tasks run on the ambient Tokio runtime, so scheduling must happen
//! inside one. Tests drive time with `tokio::time::pause`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::debug;

#[derive(Default)]
struct SchedulerInner {
    /// Live leases and the tasks they keep alive
    state: Mutex<SchedulerState>,
}

#[derive(Default)]
struct SchedulerState {
    references: usize,
    tasks: Vec<AbortHandle>,
}

/// Reference-counted timer service
#[derive(Clone, Default)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("references", &self.references())
            .finish()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a reference
    pub fn acquire(&self) -> Lease {
        let mut state = self.inner.state.lock();
        state.references += 1;
        if state.references == 1 {
            debug!("Scheduler started");
        }
        Lease {
            scheduler: self.clone(),
            released: AtomicBool::new(false),
        }
    }

    /// Number of live leases
    pub fn references(&self) -> usize {
        self.inner.state.lock().references
    }

    pub fn is_active(&self) -> bool {
        self.references() > 0
    }

    /// Number of tasks that have not finished yet
    pub fn task_count(&self) -> usize {
        let mut state = self.inner.state.lock();
        state.tasks.retain(|t| !t.is_finished());
        state.tasks.len()
    }

    fn release(&self) {
        let mut state = self.inner.state.lock();
        state.references = state.references.saturating_sub(1);
        if state.references == 0 {
            for task in state.tasks.drain(..) {
                task.abort();
            }
            debug!("Scheduler stopped");
        }
    }

    fn track(&self, handle: tokio::task::JoinHandle<()>) -> ScheduledTask {
        let abort = handle.abort_handle();
        let mut state = self.inner.state.lock();
        state.tasks.retain(|t| !t.is_finished());
        state.tasks.push(abort.clone());
        ScheduledTask { handle: abort }
    }

    /// Run `task` once after `delay`
    pub fn schedule<F>(&self, delay: Duration, task: F) -> ScheduledTask
    where
        F: FnOnce() + Send + 'static,
    {
        self.track(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        }))
    }

    /// Run `task` after `initial`, then every `delay` after each run completes
    pub fn schedule_with_fixed_delay<F>(&self, initial: Duration, delay: Duration, mut task: F) -> ScheduledTask
    where
        F: FnMut() + Send + 'static,
    {
        self.track(tokio::spawn(async move {
            tokio::time::sleep(initial).await;
            loop {
                task();
                tokio::time::sleep(delay).await;
            }
        }))
    }

    /// Run `task` after `initial`; it returns the next delay, or `None` to stop
    pub fn schedule_adaptive<F>(&self, initial: Duration, mut task: F) -> ScheduledTask
    where
        F: FnMut() -> Option<Duration> + Send + 'static,
    {
        self.track(tokio::spawn(async move {
            let mut delay = initial;
            loop {
                tokio::time::sleep(delay).await;
                match task() {
                    Some(next) => delay = next.max(Duration::from_millis(1)),
                    None => break,
                }
            }
        }))
    }
}

/// One reference on a [`Scheduler`]; released once, explicitly or on drop
pub struct Lease {
    scheduler: Scheduler,
    released: AtomicBool,
}

impl Lease {
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.scheduler.release();
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.release();
    }
}

/// Handle to a scheduled task
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    handle: AbortHandle,
}

impl ScheduledTask {
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_lease_counting() {
        let scheduler = Scheduler::new();
        let first = scheduler.acquire();
        let second = scheduler.acquire();
        assert_eq!(scheduler.references(), 2);

        first.release();
        first.release();
        assert_eq!(scheduler.references(), 1);
        assert!(first.is_released());

        drop(second);
        assert!(!scheduler.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_once() {
        let scheduler = Scheduler::new();
        let _lease = scheduler.acquire();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        let task = scheduler.schedule(Duration::from_millis(100), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        tokio::task::yield_now().await;
        assert!(task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_delay_and_cancel() {
        let scheduler = Scheduler::new();
        let _lease = scheduler.acquire();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        let task = scheduler.schedule_with_fixed_delay(Duration::from_millis(10), Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(35)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        task.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adaptive_stops_on_none() {
        let scheduler = Scheduler::new();
        let _lease = scheduler.acquire();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        scheduler.schedule_adaptive(Duration::from_millis(10), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Some(Duration::from_millis(n as u64 * 10))
            } else {
                None
            }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.task_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_release_aborts_tasks() {
        let scheduler = Scheduler::new();
        let lease = scheduler.acquire();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        scheduler.schedule(Duration::from_millis(100), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(scheduler.task_count(), 1);

        lease.release();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.task_count(), 0);

        // A new generation schedules normally
        let _lease = scheduler.acquire();
        let counter = Arc::clone(&runs);
        scheduler.schedule(Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
