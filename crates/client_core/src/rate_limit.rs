use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    sync::{Mutex, OwnedSemaphorePermit, Semaphore},
    time::{sleep_until, Instant},
};

pub const DEFAULT_MAX_CONCURRENT: usize = 5;
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Process-wide gate in front of every remote call.
///
/// Grants are handed out in the order `acquire` was called: a caller first
/// takes its turn on a fair mutex, then waits for a free concurrency slot and
/// for `min_interval` to pass since the previous grant, and only then lets
/// the next caller in line proceed. The limiter never rejects, it only delays.
pub struct RateLimiter {
    turn: Mutex<Option<Instant>>,
    slots: Arc<Semaphore>,
    max_concurrent: usize,
    min_interval: Duration,
    queued: AtomicUsize,
}

/// One granted slot. Dropping it (or calling [`RateLimitPermit::release`])
/// frees the slot; ownership makes a double release impossible.
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct RateLimitPermit {
    _slot: OwnedSemaphorePermit,
}

impl RateLimitPermit {
    pub fn release(self) {}
}

struct QueuedGuard<'a>(&'a AtomicUsize);

impl Drop for QueuedGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RateLimiter {
    pub fn new(max_concurrent: usize, min_interval: Duration) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            turn: Mutex::new(None),
            slots: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            min_interval,
            queued: AtomicUsize::new(0),
        }
    }

    pub async fn acquire(&self) -> RateLimitPermit {
        self.queued.fetch_add(1, Ordering::SeqCst);
        let _queued = QueuedGuard(&self.queued);

        let mut last_start = self.turn.lock().await;
        let slot = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .expect("rate limiter semaphore is never closed");
        if let Some(previous) = *last_start {
            sleep_until(previous + self.min_interval).await;
        }
        *last_start = Some(Instant::now());

        RateLimitPermit { _slot: slot }
    }

    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.slots.available_permits()
    }

    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT, DEFAULT_MIN_INTERVAL)
    }
}

#[cfg(test)]
#[path = "tests/rate_limit_tests.rs"]
mod tests;
