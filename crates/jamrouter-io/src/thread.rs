//! Thread lifecycle plumbing: run state, ready signal, priority.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thread_priority::{ThreadPriority, ThreadPriorityValue};
use tracing::debug;

use crate::{Error, Result};

/// Lifecycle of one subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SubsystemState {
    Stopped = 0,
    /// Spawned, waiting for the ready signal.
    Starting = 1,
    Running = 2,
    StopRequested = 3,
}

impl SubsystemState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::StopRequested,
            _ => Self::Stopped,
        }
    }
}

/// State shared between a router thread and its owner.
#[derive(Debug)]
pub(crate) struct ThreadStatus {
    state: AtomicU8,
    ready: Mutex<bool>,
    changed: Condvar,
}

impl ThreadStatus {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(SubsystemState::Stopped as u8),
            ready: Mutex::new(false),
            changed: Condvar::new(),
        })
    }

    pub(crate) fn state(&self) -> SubsystemState {
        SubsystemState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SubsystemState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Marks the thread as spawned and clears the previous ready signal.
    pub(crate) fn starting(&self) {
        *self.ready.lock() = false;
        self.set_state(SubsystemState::Starting);
    }

    /// Asks the thread to leave its loop. No effect on a stopped thread.
    pub(crate) fn request_stop(&self) {
        let _ = self.state.fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
            match SubsystemState::from_u8(s) {
                SubsystemState::Stopped => None,
                _ => Some(SubsystemState::StopRequested as u8),
            }
        });
    }

    #[inline]
    pub(crate) fn stop_requested(&self) -> bool {
        self.state() == SubsystemState::StopRequested
    }

    /// One-shot broadcast: the thread has primed its state.
    pub(crate) fn signal_ready(&self) {
        let mut ready = self.ready.lock();
        *ready = true;
        let _ = self.state.compare_exchange(
            SubsystemState::Starting as u8,
            SubsystemState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.changed.notify_all();
    }

    /// Waits for the ready signal. Returns early with `false` when the
    /// thread stops first.
    pub(crate) fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut ready = self.ready.lock();
        while !*ready && self.state() != SubsystemState::Stopped {
            if self.changed.wait_until(&mut ready, deadline).timed_out() {
                break;
            }
        }
        *ready
    }

    fn stopped(&self) {
        let mut ready = self.ready.lock();
        *ready = false;
        self.set_state(SubsystemState::Stopped);
        self.changed.notify_all();
    }
}

/// Moves a thread's status to `Stopped` on every exit path, panics
/// included.
pub(crate) struct RunningGuard {
    status: Arc<ThreadStatus>,
    name: &'static str,
}

impl RunningGuard {
    pub(crate) fn new(status: Arc<ThreadStatus>, name: &'static str) -> Self {
        Self { status, name }
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            tracing::error!(target: "jamrouter::init", thread = self.name, "thread panicked");
        } else {
            debug!(target: "jamrouter::init", thread = self.name, "thread stopped");
        }
        self.status.stopped();
    }
}

/// True while neither the owner nor a global shutdown asked the thread
/// to leave.
#[inline]
pub(crate) fn keep_running(status: &ThreadStatus, shutdown: &AtomicBool) -> bool {
    !status.stop_requested() && !shutdown.load(Ordering::Acquire)
}

/// Realtime priority for `value` (1..=99), or the highest available.
pub fn realtime_priority(value: u8) -> ThreadPriority {
    match ThreadPriorityValue::try_from(value) {
        Ok(v) => ThreadPriority::Crossplatform(v),
        Err(_) => ThreadPriority::Max,
    }
}

/// Spawns a named thread that raises its own priority before running `f`.
pub fn spawn_with_priority<F>(name: &str, priority: ThreadPriority, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let thread_name = name.to_string();
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            if let Err(e) = thread_priority::set_current_thread_priority(priority) {
                debug!(target: "jamrouter::init", thread = %thread_name, "priority not applied: {e:?}");
            }
            f();
        })
        .map_err(|e| Error::ThreadSpawn(format!("{name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_signal_and_guard() {
        let status = ThreadStatus::new();
        status.starting();
        assert_eq!(status.state(), SubsystemState::Starting);

        let s = Arc::clone(&status);
        let handle = thread::spawn(move || {
            let _guard = RunningGuard::new(Arc::clone(&s), "test");
            s.signal_ready();
            while !s.stop_requested() {
                thread::sleep(Duration::from_millis(1));
            }
        });

        assert!(status.wait_ready(Duration::from_secs(5)));
        assert_eq!(status.state(), SubsystemState::Running);
        status.request_stop();
        handle.join().unwrap();
        assert_eq!(status.state(), SubsystemState::Stopped);
    }

    #[test]
    fn test_wait_ready_returns_when_thread_dies() {
        let status = ThreadStatus::new();
        status.starting();
        let s = Arc::clone(&status);
        let handle = thread::spawn(move || {
            let _guard = RunningGuard::new(s, "test");
        });
        assert!(!status.wait_ready(Duration::from_secs(5)));
        handle.join().unwrap();
    }

    #[test]
    fn test_stop_request_ignored_when_stopped() {
        let status = ThreadStatus::new();
        status.request_stop();
        assert_eq!(status.state(), SubsystemState::Stopped);
    }
}
