//! Per-bucket sequence lock.
//!
//! One `AtomicU64` combines the exclusive-lock flag and the version counter:
//! an odd value means a writer holds the bucket, an even value is a published
//! version. Writers advance the word twice per critical section (even → odd
//! on acquire, odd → even on release). Readers never write to it.
//!
//! Ordering:
//! - writer: CAS to odd (`Acquire`), `fence(Release)`, relaxed data stores,
//!   store of the next even value (`Release`);
//! - reader: version load (`Acquire`), relaxed data loads, `fence(Acquire)`,
//!   version reload. Equal even values bracket a consistent snapshot.

use std::sync::atomic::{fence, AtomicU64, Ordering};

const SPIN_LIMIT: u32 = 64;

/// Spin briefly, then start yielding to the scheduler.
#[inline]
pub(crate) fn backoff(spins: &mut u32) {
    if *spins < SPIN_LIMIT {
        *spins += 1;
        std::hint::spin_loop();
    } else {
        std::thread::yield_now();
    }
}

#[derive(Debug, Default)]
pub struct SeqLock {
    word: AtomicU64,
}

impl SeqLock {
    pub const fn new() -> Self {
        Self {
            word: AtomicU64::new(0),
        }
    }

    /// Starts an optimistic read. Returns `None` while a writer holds the lock.
    #[inline]
    pub fn read_begin(&self) -> Option<u64> {
        let version = self.word.load(Ordering::Acquire);
        (version & 1 == 0).then_some(version)
    }

    /// Returns `true` if no writer entered the lock since `read_begin`
    /// returned `start`.
    #[inline]
    pub fn read_validate(&self, start: u64) -> bool {
        fence(Ordering::Acquire);
        self.word.load(Ordering::Relaxed) == start
    }

    /// Acquires the exclusive lock, spinning while another writer holds it.
    pub fn write(&self) -> SeqLockWriteGuard<'_> {
        let mut spins = 0;
        loop {
            let current = self.word.load(Ordering::Relaxed);
            if current & 1 == 0
                && self
                    .word
                    .compare_exchange_weak(current, current + 1, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                fence(Ordering::Release);
                return SeqLockWriteGuard {
                    lock: self,
                    locked: current + 1,
                };
            }
            backoff(&mut spins);
        }
    }

    /// Current raw word. Odd while write-locked.
    #[cfg(test)]
    pub fn version(&self) -> u64 {
        self.word.load(Ordering::Relaxed)
    }
}

/// Exclusive access to one bucket. Dropping it publishes the next version.
#[must_use = "dropping the guard immediately releases the lock"]
pub struct SeqLockWriteGuard<'a> {
    lock: &'a SeqLock,
    locked: u64,
}

impl Drop for SeqLockWriteGuard<'_> {
    fn drop(&mut self) {
        let current = self.lock.word.load(Ordering::Relaxed);
        assert_eq!(
            current, self.locked,
            "seqlock word changed while write-locked"
        );
        self.lock.word.store(current + 1, Ordering::Release);
    }
}
