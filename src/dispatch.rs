//! Admission control for outbound model calls.
//!
//! Every unit of work that reaches a provider goes through a shared
//! [`Dispatcher`]. At most `max_inflight` units execute at once; the rest wait
//! on a fair semaphore and are admitted in the order they started waiting.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::config::DEFAULT_MAX_INFLIGHT;

#[derive(Debug)]
pub struct Dispatcher {
    permits: Arc<Semaphore>,
    max_inflight: usize,
    in_flight: AtomicUsize,
    waiting: AtomicUsize,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_INFLIGHT)
    }
}

impl Dispatcher {
    /// `max_inflight` of 0 is treated as 1.
    pub fn new(max_inflight: usize) -> Self {
        let max_inflight = max_inflight.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_inflight)),
            max_inflight,
            in_flight: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
        }
    }

    pub fn max_inflight(&self) -> usize {
        self.max_inflight
    }

    /// Units currently executing (admitted, not yet finished).
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Units waiting for admission.
    pub fn queued(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }

    /// Wait for a slot, then run `task` to completion.
    ///
    /// The task's error is returned to this caller only. Nothing is retried.
    pub async fn submit<T, E, F, Fut>(&self, task: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = {
            let _queued = CounterGuard::enter(&self.waiting);
            self.permits.acquire().await
        };
        let _permit = permit.expect("dispatcher semaphore is never closed");
        let _slot = CounterGuard::enter(&self.in_flight);
        tracing::debug!(in_flight = self.in_flight(), max = self.max_inflight, "unit admitted");
        task().await
    }
}

/// Keeps a gauge honest even if the submitting future is dropped.
struct CounterGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> CounterGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self { counter }
    }
}

impl Drop for CounterGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}
