//! Bind/StartTLS exclusion gate
//!
//! A three-state counter: `0` unlocked, `-1` held exclusively, `n > 0`
//! held shared by `n` holders. Release is not tied to the acquiring task,
//! and nothing is reentrant.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use crossbeam::queue::SegQueue;
use tokio::sync::Notify;

const UNLOCKED: i32 = 0;
const EXCLUSIVE: i32 = -1;

/// Continuation waiting for the gate to become shareable
pub type Deferred = Box<dyn FnOnce() + Send>;

/// Observed gate state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Unlocked,
    Exclusive,
    Shared(u32),
}

#[derive(Default)]
pub struct Gate {
    state: AtomicI32,
    deferred: SegQueue<Deferred>,
    draining: AtomicBool,
    released: Notify,
}

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate")
            .field("state", &self.state())
            .field("deferred", &self.deferred.len())
            .finish()
    }
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> GateState {
        match self.state.load(Ordering::SeqCst) {
            UNLOCKED => GateState::Unlocked,
            EXCLUSIVE => GateState::Exclusive,
            n => GateState::Shared(n as u32),
        }
    }

    /// Held in either mode
    pub fn is_held(&self) -> bool {
        self.state.load(Ordering::SeqCst) != UNLOCKED
    }

    /// Succeeds only from unlocked
    pub fn try_acquire_exclusive(&self) -> bool {
        self.state
            .compare_exchange(UNLOCKED, EXCLUSIVE, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Succeeds unless held exclusively
    pub fn try_acquire_shared(&self) -> bool {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            if current == EXCLUSIVE {
                return false;
            }
            match self
                .state
                .compare_exchange_weak(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Wait until shared access is granted
    pub async fn acquire_shared(&self) {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            // Register before checking so a release in between is not missed
            released.as_mut().enable();
            if self.try_acquire_shared() {
                return;
            }
            released.await;
        }
    }

    /// # Panics
    /// If the gate is not held exclusively.
    pub fn release_exclusive(&self) {
        let released = self
            .state
            .compare_exchange(EXCLUSIVE, UNLOCKED, Ordering::SeqCst, Ordering::SeqCst);
        assert!(released.is_ok(), "gate released exclusively while {:?}", self.state());
        self.released.notify_waiters();
    }

    /// # Panics
    /// If the gate is not held shared.
    pub fn release_shared(&self) {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            assert!(current > 0, "gate released shared while {:?}", self.state());
            match self
                .state
                .compare_exchange_weak(current, current - 1, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        if current == 1 {
            self.released.notify_waiters();
        }
    }

    /// Queue a continuation to run under shared access, then flush
    pub fn defer(&self, continuation: Deferred) {
        self.deferred.push(continuation);
        // The gate may have opened between the caller's failed attempt and the push
        self.flush();
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Run queued continuations if shared access is obtainable. Never blocks.
    ///
    /// Safe to call from inside a continuation: a nested call returns at once
    /// and the outer drain picks up anything queued meanwhile.
    pub fn flush(&self) {
        loop {
            if self.deferred.is_empty() {
                return;
            }
            if self.draining.swap(true, Ordering::SeqCst) {
                return;
            }
            if self.try_acquire_shared() {
                while let Some(continuation) = self.deferred.pop() {
                    continuation();
                }
                self.release_shared();
            }
            self.draining.store(false, Ordering::SeqCst);

            // Items pushed while another caller held the drain flag are ours now,
            // unless an exclusive holder will flush on release
            if self.deferred.is_empty() || self.state.load(Ordering::SeqCst) == EXCLUSIVE {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use parking_lot::Mutex;

    #[test]
    fn test_state_transitions() {
        let gate = Gate::new();
        assert_eq!(gate.state(), GateState::Unlocked);
        assert!(!gate.is_held());

        assert!(gate.try_acquire_shared());
        assert!(gate.try_acquire_shared());
        assert_eq!(gate.state(), GateState::Shared(2));
        assert!(!gate.try_acquire_exclusive());

        gate.release_shared();
        gate.release_shared();
        assert_eq!(gate.state(), GateState::Unlocked);

        assert!(gate.try_acquire_exclusive());
        assert!(gate.is_held());
        assert!(!gate.try_acquire_exclusive());
        assert!(!gate.try_acquire_shared());
        gate.release_exclusive();
        assert_eq!(gate.state(), GateState::Unlocked);
    }

    #[test]
    #[should_panic]
    fn test_release_shared_when_unlocked_panics() {
        Gate::new().release_shared();
    }

    #[test]
    #[should_panic]
    fn test_release_exclusive_when_shared_panics() {
        let gate = Gate::new();
        assert!(gate.try_acquire_shared());
        gate.release_exclusive();
    }

    #[test]
    fn test_release_from_another_thread() {
        let gate = Arc::new(Gate::new());
        assert!(gate.try_acquire_exclusive());
        let remote = Arc::clone(&gate);
        std::thread::spawn(move || remote.release_exclusive()).join().unwrap();
        assert!(!gate.is_held());
    }

    #[test]
    fn test_mutual_exclusion_under_contention() {
        let gate = Arc::new(Gate::new());
        let exclusive = Arc::new(AtomicUsize::new(0));
        let shared = Arc::new(AtomicUsize::new(0));
        let violations = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..8)
            .map(|i| {
                let gate = Arc::clone(&gate);
                let exclusive = Arc::clone(&exclusive);
                let shared = Arc::clone(&shared);
                let violations = Arc::clone(&violations);
                std::thread::spawn(move || {
                    for _ in 0..2000 {
                        if i % 2 == 0 {
                            if gate.try_acquire_exclusive() {
                                exclusive.fetch_add(1, Ordering::SeqCst);
                                if shared.load(Ordering::SeqCst) != 0 {
                                    violations.fetch_add(1, Ordering::SeqCst);
                                }
                                exclusive.fetch_sub(1, Ordering::SeqCst);
                                gate.release_exclusive();
                            }
                        } else if gate.try_acquire_shared() {
                            shared.fetch_add(1, Ordering::SeqCst);
                            if exclusive.load(Ordering::SeqCst) != 0 {
                                violations.fetch_add(1, Ordering::SeqCst);
                            }
                            shared.fetch_sub(1, Ordering::SeqCst);
                            gate.release_shared();
                        }
                        let state = gate.state.load(Ordering::SeqCst);
                        if state < EXCLUSIVE {
                            violations.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(violations.load(Ordering::SeqCst), 0);
        assert_eq!(gate.state(), GateState::Unlocked);
    }

    #[test]
    fn test_deferred_runs_after_exclusive_release() {
        let gate = Arc::new(Gate::new());
        assert!(gate.try_acquire_exclusive());

        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = Arc::clone(&order);
            let inner = Arc::clone(&gate);
            gate.defer(Box::new(move || {
                assert!(matches!(inner.state(), GateState::Shared(_)));
                order.lock().push(n);
            }));
        }
        assert_eq!(gate.deferred_len(), 3);
        assert!(order.lock().is_empty());

        gate.release_exclusive();
        gate.flush();
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert_eq!(gate.deferred_len(), 0);
        assert_eq!(gate.state(), GateState::Unlocked);
    }

    #[test]
    fn test_defer_when_open_runs_immediately() {
        let gate = Gate::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        gate.defer(Box::new(move || flag.store(true, Ordering::SeqCst)));
        assert!(ran.load(Ordering::SeqCst));
        assert!(!gate.is_held());
    }

    #[test]
    fn test_flush_inside_continuation_does_not_recurse() {
        let gate = Arc::new(Gate::new());
        let count = Arc::new(AtomicUsize::new(0));

        fn chain(gate: Arc<Gate>, count: Arc<AtomicUsize>, remaining: usize) {
            if remaining == 0 {
                return;
            }
            let next_gate = Arc::clone(&gate);
            gate.defer(Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
                chain(next_gate, count, remaining - 1);
            }));
        }

        assert!(gate.try_acquire_exclusive());
        chain(Arc::clone(&gate), Arc::clone(&count), 10_000);
        gate.release_exclusive();
        gate.flush();

        assert_eq!(count.load(Ordering::SeqCst), 10_000);
        assert_eq!(gate.deferred_len(), 0);
        assert!(!gate.is_held());
    }

    #[test]
    fn test_no_lost_deferred_under_contention() {
        let gate = Arc::new(Gate::new());
        let ran = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..4)
            .map(|i| {
                let gate = Arc::clone(&gate);
                let ran = Arc::clone(&ran);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        if i == 0 {
                            if gate.try_acquire_exclusive() {
                                gate.release_exclusive();
                                gate.flush();
                            }
                        } else {
                            let ran = Arc::clone(&ran);
                            gate.defer(Box::new(move || {
                                ran.fetch_add(1, Ordering::SeqCst);
                            }));
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        gate.flush();

        assert_eq!(ran.load(Ordering::SeqCst), 1500);
        assert_eq!(gate.deferred_len(), 0);
    }

    #[tokio::test]
    async fn test_acquire_shared_waits_for_exclusive() {
        let gate = Arc::new(Gate::new());
        assert!(gate.try_acquire_exclusive());

        let waiter = Arc::clone(&gate);
        let mut acquire = tokio_test::task::spawn(async move { waiter.acquire_shared().await });
        tokio_test::assert_pending!(acquire.poll());

        gate.release_exclusive();
        assert!(acquire.is_woken());
        tokio_test::assert_ready!(acquire.poll());
        assert_eq!(gate.state(), GateState::Shared(1));
    }
}
