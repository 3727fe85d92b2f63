//! Concurrency limiter: bound how many Transcription Client calls run at once.
//!
//! A thin wrapper over [`tokio::sync::Semaphore`]. Waiting for a slot
//! suspends the task (no busy-waiting) and the semaphore's FIFO queue means
//! every waiter is admitted once earlier holders release.
//!
//! A slot is a [`Slot`] guard: it is released when dropped, on every exit
//! path including panics and task aborts. There is no free-standing
//! `release()`, so releasing a slot that was never acquired cannot be
//! expressed.

use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{AcquireError, Semaphore, SemaphorePermit};
use tracing::trace;

/// Counting limiter shared by reference across the page tasks of a batch.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    semaphore: Semaphore,
    capacity: usize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyLimiter {
    /// Create a limiter admitting `capacity` concurrent holders.
    ///
    /// A capacity of zero would never admit anyone; it is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Semaphore::new(capacity),
            capacity,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Wait until a slot is free and take it.
    ///
    /// Cancel-safe: dropping the returned future while waiting gives up the
    /// place in the queue without leaking a slot.
    pub async fn acquire(&self) -> Result<Slot<'_>, AcquireError> {
        let permit = self.semaphore.acquire().await?;
        Ok(self.admit(permit))
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<Slot<'_>> {
        self.semaphore.try_acquire().ok().map(|p| self.admit(p))
    }

    fn admit<'a>(&'a self, permit: SemaphorePermit<'a>) -> Slot<'a> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        trace!(in_flight = now, capacity = self.capacity, "slot acquired");
        Slot {
            limiter: self,
            _permit: permit,
        }
    }

    /// Configured maximum number of holders.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Highest number of slots ever held at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// A held limiter slot. Dropping it releases the slot and wakes one waiter.
#[derive(Debug)]
pub struct Slot<'a> {
    limiter: &'a ConcurrencyLimiter,
    _permit: SemaphorePermit<'a>,
}

impl Slot<'_> {
    /// Release the slot explicitly. Equivalent to dropping it.
    pub fn release(self) {}
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        // Runs before the permit field is dropped, so the counter is already
        // down by the time the next waiter is admitted.
        self.limiter.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
