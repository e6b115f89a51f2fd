//! Global admission control in front of the scheduler.
//!
//! Bounds the number of concurrently-executing requests, bounds the number
//! waiting behind them, and abandons requests that outlive the configured
//! timeout. A slot is released exactly once, on response completion or
//! client disconnect, whichever fires first.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{RelayError, RelayResult};

pub struct AdmissionQueue {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    queue_limit: usize,
    timeout: Duration,
    in_flight: Arc<AtomicUsize>,
    waiting: Arc<AtomicUsize>,
    paused: AtomicBool,
}

/// Point-in-time view of the queue, served on `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub concurrency: usize,
    pub in_flight: usize,
    pub waiting: usize,
    pub paused: bool,
}

impl AdmissionQueue {
    pub fn new(max_concurrent: usize, queue_limit: usize, timeout_ms: u64) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            queue_limit,
            timeout: Duration::from_millis(timeout_ms),
            in_flight: Arc::new(AtomicUsize::new(0)),
            waiting: Arc::new(AtomicUsize::new(0)),
            paused: AtomicBool::new(false),
        }
    }

    /// Hard upper bound on a request's lifetime once admitted.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    /// Wait for an execution slot.
    ///
    /// Fails fast with `queue_full` when `queue_limit` requests are already
    /// waiting; otherwise joins the FIFO wait for one of `max_concurrent`
    /// permits.
    pub async fn admit(&self) -> RelayResult<AdmissionSlot> {
        if self.paused.load(Ordering::Acquire) {
            return Err(RelayError::NoCredentials("relay is paused".into()));
        }

        let waiting_now = self.waiting.load(Ordering::Acquire);
        if waiting_now >= self.queue_limit {
            tracing::warn!("Admission queue full: {waiting_now} waiting");
            return Err(RelayError::QueueFull { waiting: waiting_now });
        }

        self.waiting.fetch_add(1, Ordering::AcqRel);
        let permit = self.semaphore.clone().acquire_owned().await;
        self.waiting.fetch_sub(1, Ordering::AcqRel);

        // Closing the semaphore is not part of the queue's lifecycle; treat
        // it as shutdown.
        let permit = permit.map_err(|_| RelayError::NoCredentials("relay is shutting down".into()))?;

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        Ok(AdmissionSlot {
            _permit: permit,
            in_flight: self.in_flight.clone(),
            released: AtomicBool::new(false),
        })
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            concurrency: self.max_concurrent,
            in_flight: self.in_flight.load(Ordering::Acquire),
            waiting: self.waiting.load(Ordering::Acquire),
            paused: self.paused.load(Ordering::Acquire),
        }
    }
}

/// One admitted request's slot.
///
/// The response-completion path calls [`AdmissionSlot::release`]; if the
/// client disconnects first the drop handler fires instead. The atomic flag
/// makes the second firing a no-op.
pub struct AdmissionSlot {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
    released: AtomicBool,
}

impl AdmissionSlot {
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl Drop for AdmissionSlot {
    fn drop(&mut self) {
        self.release();
    }
}
