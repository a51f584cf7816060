//! Time sources.
//!
//! All router timestamps are signed nanoseconds on a monotonic timeline.
//! [`ManualClock`] lets tests drive that timeline by hand.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Monotonic nanosecond clock with absolute-deadline sleep.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> i64;

    /// Blocks until `deadline`. Returns immediately if it has passed.
    fn sleep_until(&self, deadline: i64);
}

/// System monotonic clock, zeroed at construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> i64 {
        self.epoch.elapsed().as_nanos() as i64
    }

    fn sleep_until(&self, deadline: i64) {
        let now = self.now();
        if deadline > now {
            thread::sleep(Duration::from_nanos((deadline - now) as u64));
        }
    }
}

/// Hand-driven clock. Sleeping jumps time forward to the deadline.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, nanos: i64) {
        self.now.store(nanos, Ordering::SeqCst);
    }

    pub fn advance(&self, nanos: i64) -> i64 {
        self.now.fetch_add(nanos, Ordering::SeqCst) + nanos
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep_until(&self, deadline: i64) {
        self.now.fetch_max(deadline, Ordering::SeqCst);
    }
}
