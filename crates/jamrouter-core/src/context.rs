//! Shared arena owned by all router threads.

use std::sync::Arc;

use crate::clock::{Clock, MonotonicClock};
use crate::config::{QueueConfig, TimingConfig};
use crate::queue::EventQueue;
use crate::sensing::ActiveSensingTimer;
use crate::sync::ClockRecovery;
use crate::Result;

/// The period ring and both event queues.
///
/// Created once and handed to every thread as an `Arc`. Threads exchange
/// only ring and pool indices through it.
#[derive(Debug)]
pub struct SyncContext {
    recovery: Arc<ClockRecovery>,
    queue: EventQueue,
}

impl SyncContext {
    pub fn new(timing: TimingConfig, queue: QueueConfig, clock: Arc<dyn Clock>) -> Result<Arc<Self>> {
        let recovery = Arc::new(ClockRecovery::new(timing, clock)?);
        Ok(Arc::new(Self {
            queue: EventQueue::new(Arc::clone(&recovery), queue),
            recovery,
        }))
    }

    /// Context on the system monotonic clock.
    pub fn monotonic(timing: TimingConfig, queue: QueueConfig) -> Result<Arc<Self>> {
        Self::new(timing, queue, Arc::new(MonotonicClock::new()))
    }

    #[inline]
    pub fn recovery(&self) -> &Arc<ClockRecovery> {
        &self.recovery
    }

    #[inline]
    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    #[inline]
    pub fn sensing(&self) -> &ActiveSensingTimer {
        self.queue.sensing()
    }

    #[inline]
    pub fn now(&self) -> i64 {
        self.recovery.now()
    }
}
