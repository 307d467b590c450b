//! Reusable rendezvous point for a fixed number of parties.

use crate::thread;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use testkit_core::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Default)]
struct Generation {
    broken: AtomicBool,
}

struct BarrierState {
    waiting: usize,
    generation: Arc<Generation>,
}

/// Barrier that releases all parties once `parties` threads have arrived,
/// then resets for the next round.
///
/// A party that times out or is interrupted breaks the barrier: every other
/// waiting party fails with [`Error::BrokenBarrier`], as does every later
/// arrival until [`reset`](Self::reset) is called.
pub struct CyclicBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    tripped: Condvar,
}

impl CyclicBarrier {
    /// Barrier for `parties` threads. Fails if `parties` is zero.
    pub fn new(parties: usize) -> Result<Self> {
        if parties == 0 {
            return Err(Error::InvalidArgument(
                "barrier needs at least one party".to_string(),
            ));
        }
        Ok(Self {
            parties,
            state: Mutex::new(BarrierState {
                waiting: 0,
                generation: Arc::default(),
            }),
            tripped: Condvar::new(),
        })
    }

    /// Number of parties required to trip the barrier.
    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Parties currently waiting.
    pub fn number_waiting(&self) -> usize {
        self.state.lock().waiting
    }

    /// `true` if the current generation was broken.
    pub fn is_broken(&self) -> bool {
        self.state.lock().generation.broken.load(Ordering::Acquire)
    }

    /// Waits until all parties have arrived.
    ///
    /// Returns the arrival index: `parties - 1` for the first arrival, `0`
    /// for the last.
    pub fn await_timeout(&self, timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        let generation = Arc::clone(&state.generation);

        if generation.broken.load(Ordering::Acquire) {
            return Err(Error::BrokenBarrier);
        }
        if thread::interrupted() {
            self.break_barrier(&mut state);
            return Err(Error::Interrupted);
        }

        let index = self.parties - 1 - state.waiting;
        state.waiting += 1;
        if state.waiting == self.parties {
            state.waiting = 0;
            state.generation = Arc::default();
            self.tripped.notify_all();
            return Ok(0);
        }

        loop {
            let slice = deadline.min(Instant::now() + POLL_INTERVAL);
            self.tripped.wait_until(&mut state, slice);

            if generation.broken.load(Ordering::Acquire) {
                return Err(Error::BrokenBarrier);
            }
            if !Arc::ptr_eq(&generation, &state.generation) {
                return Ok(index);
            }
            if thread::interrupted() {
                self.break_barrier(&mut state);
                return Err(Error::Interrupted);
            }
            if Instant::now() >= deadline {
                self.break_barrier(&mut state);
                return Err(Error::BarrierTimeout(timeout));
            }
        }
    }

    /// Breaks the current generation, if any party is waiting, and starts a
    /// fresh one.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        self.break_barrier(&mut state);
        state.generation = Arc::default();
    }

    fn break_barrier(&self, state: &mut BarrierState) {
        state.generation.broken.store(true, Ordering::Release);
        state.waiting = 0;
        self.tripped.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn releases_all_parties() {
        let barrier = Arc::new(CyclicBarrier::new(3).unwrap());
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || barrier.await_timeout(Duration::from_secs(10)))
            })
            .collect();
        let mut indices: Vec<usize> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(!barrier.is_broken());
        assert_eq!(barrier.number_waiting(), 0);
    }

    #[test]
    fn is_reusable_after_trip() {
        let barrier = Arc::new(CyclicBarrier::new(2).unwrap());
        for _ in 0..3 {
            let other = Arc::clone(&barrier);
            let handle = std::thread::spawn(move || other.await_timeout(Duration::from_secs(10)));
            barrier.await_timeout(Duration::from_secs(10)).unwrap();
            handle.join().unwrap().unwrap();
        }
    }

    #[test]
    fn timeout_breaks_barrier_for_others() {
        let barrier = Arc::new(CyclicBarrier::new(3).unwrap());
        let other = Arc::clone(&barrier);
        let waiter = std::thread::spawn(move || other.await_timeout(Duration::from_secs(10)));

        let result = barrier.await_timeout(Duration::from_millis(50));
        assert!(matches!(result, Err(Error::BarrierTimeout(_))));
        assert!(matches!(waiter.join().unwrap(), Err(Error::BrokenBarrier)));
        assert!(barrier.is_broken());
        assert!(matches!(
            barrier.await_timeout(Duration::from_millis(10)),
            Err(Error::BrokenBarrier)
        ));

        barrier.reset();
        assert!(!barrier.is_broken());
    }

    #[test]
    fn interrupted_party_breaks_barrier() {
        let barrier = Arc::new(CyclicBarrier::new(2).unwrap());
        let other = Arc::clone(&barrier);
        let handle = thread::spawn(move || other.await_timeout(Duration::from_secs(30))).unwrap();
        let waiter = handle.thread().clone();
        while barrier.number_waiting() == 0 {
            std::thread::yield_now();
        }
        waiter.interrupt();
        assert!(matches!(handle.join().unwrap(), Err(Error::Interrupted)));
        assert!(barrier.is_broken());
    }

    #[test]
    fn zero_parties_is_rejected() {
        assert!(matches!(CyclicBarrier::new(0), Err(Error::InvalidArgument(_))));
    }
}
