use crate::safe_lock;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};

const UNINITIALIZED: u8 = 0;
const CONSTRUCTING: u8 = 1;
const INITIALIZED: u8 = 2;

/// Single-flight latch for one-time initialization.
///
/// The right to construct is claimed with a compare-and-set before any work
/// starts, so concurrent callers never both construct. A claim that is dropped
/// without [`LatchGuard::commit`] reopens the latch for a later attempt.
/// [`InitLatch::claim`] parks losing callers until the winner settles.
#[derive(Debug, Default)]
pub struct InitLatch {
    state: AtomicU8,
    settle_lock: Mutex<()>,
    settled: Condvar,
}

#[derive(Debug)]
pub enum Claim<'a> {
    /// The caller must construct and then commit.
    Acquired(LatchGuard<'a>),
    AlreadyInitialized,
    /// Another caller holds the claim right now.
    InProgress,
}

impl InitLatch {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(UNINITIALIZED),
            settle_lock: Mutex::new(()),
            settled: Condvar::new(),
        }
    }

    /// Claim without waiting.
    pub fn try_claim(&self) -> Claim<'_> {
        match self
            .state
            .compare_exchange(UNINITIALIZED, CONSTRUCTING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Claim::Acquired(LatchGuard {
                latch: self,
                committed: false,
            }),
            Err(INITIALIZED) => Claim::AlreadyInitialized,
            Err(_) => Claim::InProgress,
        }
    }

    /// Claim, waiting out any construction in flight. Never returns
    /// [`Claim::InProgress`]: a loser sees the committed latch, or takes over
    /// the claim if the winner gave up.
    pub fn claim(&self) -> Claim<'_> {
        let mut parked = safe_lock(&self.settle_lock, "Init latch");
        loop {
            match self.try_claim() {
                Claim::InProgress => {
                    parked = self.settled.wait(parked).unwrap_or_else(PoisonError::into_inner);
                }
                claim @ (Claim::Acquired(_) | Claim::AlreadyInitialized) => return claim,
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.load(Ordering::Acquire) == INITIALIZED
    }

    /// Reopen the latch. Callers must have torn down whatever was constructed.
    pub fn reset(&self) {
        self.settle(UNINITIALIZED);
    }

    /// Store under the lock so a caller between its check and its wait cannot miss the wakeup.
    fn settle(&self, state: u8) {
        let _parked = safe_lock(&self.settle_lock, "Init latch");
        self.state.store(state, Ordering::Release);
        self.settled.notify_all();
    }
}

#[derive(Debug)]
pub struct LatchGuard<'a> {
    latch: &'a InitLatch,
    committed: bool,
}

impl LatchGuard<'_> {
    pub fn commit(mut self) {
        self.latch.settle(INITIALIZED);
        self.committed = true;
    }
}

impl Drop for LatchGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.latch.settle(UNINITIALIZED);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_claim_commit_then_already_initialized() {
        let latch = InitLatch::new();
        match latch.try_claim() {
            Claim::Acquired(guard) => guard.commit(),
            other => panic!("expected to acquire, got {other:?}"),
        }
        assert!(latch.is_initialized());
        assert!(matches!(latch.try_claim(), Claim::AlreadyInitialized));
    }

    #[test]
    fn test_dropped_claim_reopens_latch() {
        let latch = InitLatch::new();
        {
            let claim = latch.try_claim();
            assert!(matches!(claim, Claim::Acquired(_)));
            assert!(matches!(latch.try_claim(), Claim::InProgress));
        }
        assert!(!latch.is_initialized());
        assert!(matches!(latch.try_claim(), Claim::Acquired(_)));
    }

    #[test]
    fn test_reset() {
        let latch = InitLatch::new();
        if let Claim::Acquired(guard) = latch.try_claim() {
            guard.commit();
        }
        latch.reset();
        assert!(!latch.is_initialized());
    }

    #[test]
    fn test_concurrent_claims_acquire_once() {
        let latch = Arc::new(InitLatch::new());
        let barrier = Arc::new(Barrier::new(16));
        let acquired = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let latch = Arc::clone(&latch);
                let barrier = Arc::clone(&barrier);
                let acquired = Arc::clone(&acquired);
                thread::spawn(move || {
                    barrier.wait();
                    if let Claim::Acquired(guard) = latch.try_claim() {
                        acquired.fetch_add(1, Ordering::SeqCst);
                        guard.commit();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(acquired.load(Ordering::SeqCst), 1);
        assert!(latch.is_initialized());
    }

    #[test]
    fn test_claim_waits_for_winner_to_commit() {
        let latch = Arc::new(InitLatch::new());
        let Claim::Acquired(guard) = latch.try_claim() else {
            unreachable!("fresh latch must be claimable");
        };

        let waiter = {
            let latch = Arc::clone(&latch);
            thread::spawn(move || matches!(latch.claim(), Claim::AlreadyInitialized))
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());

        guard.commit();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_claim_takes_over_when_winner_gives_up() {
        let latch = Arc::new(InitLatch::new());
        let Claim::Acquired(guard) = latch.try_claim() else {
            unreachable!("fresh latch must be claimable");
        };

        let waiter = {
            let latch = Arc::clone(&latch);
            thread::spawn(move || match latch.claim() {
                Claim::Acquired(guard) => {
                    guard.commit();
                    true
                }
                Claim::AlreadyInitialized | Claim::InProgress => false,
            })
        };
        thread::sleep(Duration::from_millis(50));
        drop(guard);

        assert!(waiter.join().unwrap());
        assert!(latch.is_initialized());
    }
}
