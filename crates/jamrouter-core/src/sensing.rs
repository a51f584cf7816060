//! Active Sensing timeouts.
//!
//! A device that sends Active Sensing promises to keep talking at least
//! every 300 ms. When it goes quiet, every note it left sounding must be
//! released.

use tracing::debug;

use crate::lockfree::AtomicDeadline;
use crate::queue::QueueId;

/// Silence allowed after the last Active Sensing message.
pub const ACTIVE_SENSING_TIMEOUT_NS: i64 = 300_000_000;

/// Result of [`ActiveSensingTimer::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensingStatus {
    NoTimer,
    Pending,
    /// The deadline passed. The timer has been cleared.
    TimedOut,
}

/// One rolling deadline per queue direction.
#[derive(Debug, Default)]
pub struct ActiveSensingTimer {
    deadlines: [AtomicDeadline; 2],
}

impl ActiveSensingTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms (or re-arms) the deadline 300 ms after `now`.
    pub fn reset(&self, queue: QueueId, now: i64) {
        self.deadlines[queue.index()].set(now + ACTIVE_SENSING_TIMEOUT_NS);
        debug!(target: "jamrouter::timing", ?queue, "active sensing armed");
    }

    /// Pushes an armed deadline out again. Unarmed timers stay unarmed.
    pub fn touch(&self, queue: QueueId, now: i64) {
        if self.is_armed(queue) {
            self.deadlines[queue.index()].set(now + ACTIVE_SENSING_TIMEOUT_NS);
        }
    }

    pub fn is_armed(&self, queue: QueueId) -> bool {
        self.deadlines[queue.index()].get().is_some()
    }

    /// Compares the deadline against `reference`, usually the end of the
    /// current period.
    pub fn check(&self, queue: QueueId, reference: i64) -> SensingStatus {
        let deadline = &self.deadlines[queue.index()];
        match deadline.get() {
            None => SensingStatus::NoTimer,
            Some(t) if t <= reference => {
                deadline.take();
                debug!(target: "jamrouter::timing", ?queue, "active sensing timed out");
                SensingStatus::TimedOut
            }
            Some(_) => SensingStatus::Pending,
        }
    }

    pub fn clear(&self, queue: QueueId) {
        self.deadlines[queue.index()].take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: i64 = 1_000_000;

    #[test]
    fn test_no_timer_until_reset() {
        let timer = ActiveSensingTimer::new();
        assert_eq!(timer.check(QueueId::ToGraph, 0), SensingStatus::NoTimer);
        timer.touch(QueueId::ToGraph, 0);
        assert!(!timer.is_armed(QueueId::ToGraph));
    }

    #[test]
    fn test_timeout_boundary() {
        let timer = ActiveSensingTimer::new();
        timer.reset(QueueId::ToGraph, 1_000 * MS);
        assert_eq!(
            timer.check(QueueId::ToGraph, 1_299 * MS),
            SensingStatus::Pending
        );
        assert_eq!(timer.check(QueueId::ToHardware, 2_000 * MS), SensingStatus::NoTimer);
        assert_eq!(
            timer.check(QueueId::ToGraph, 1_300 * MS),
            SensingStatus::TimedOut
        );
        assert_eq!(timer.check(QueueId::ToGraph, 1_300 * MS), SensingStatus::NoTimer);
    }

    #[test]
    fn test_traffic_extends_deadline() {
        let timer = ActiveSensingTimer::new();
        timer.reset(QueueId::ToHardware, 0);
        timer.touch(QueueId::ToHardware, 200 * MS);
        assert_eq!(
            timer.check(QueueId::ToHardware, 400 * MS),
            SensingStatus::Pending
        );
        assert_eq!(
            timer.check(QueueId::ToHardware, 500 * MS),
            SensingStatus::TimedOut
        );
    }
}
