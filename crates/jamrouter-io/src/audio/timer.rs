//! Self-clocked audio loop for headless use and tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use jamrouter_core::Clock;
use tracing::{debug, info};

use super::{AudioDriver, AudioFormat, CycleFn};
use crate::thread::{realtime_priority, spawn_with_priority};
use crate::{Error, Result};

/// Calls the cycle from its own thread, sleeping to absolute deadlines one
/// nominal period apart.
#[derive(Debug)]
pub struct TimerAudioDriver {
    clock: Arc<dyn Clock>,
    format: AudioFormat,
    priority: u8,
    alive: Arc<AtomicBool>,
    halt: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TimerAudioDriver {
    pub fn new(clock: Arc<dyn Clock>, sample_rate: u32, period_size: u32, priority: u8) -> Self {
        Self {
            clock,
            format: AudioFormat {
                sample_rate,
                period_size,
            },
            priority,
            alive: Arc::new(AtomicBool::new(false)),
            halt: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Handle that stops the loop as if the device went away.
    pub fn halt_handle(&self) -> HaltHandle {
        HaltHandle(Arc::clone(&self.halt))
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl AudioDriver for TimerAudioDriver {
    fn name(&self) -> &str {
        "timer"
    }

    fn open(&mut self) -> Result<AudioFormat> {
        let AudioFormat {
            sample_rate,
            period_size,
        } = self.format;
        if sample_rate == 0 || period_size == 0 {
            return Err(Error::InvalidConfig(format!(
                "timer driver needs a sample rate and period size ({sample_rate} / {period_size})"
            )));
        }
        Ok(self.format)
    }

    fn start(&mut self, mut cycle: CycleFn) -> Result<()> {
        if self.is_alive() {
            return Ok(());
        }
        self.join();

        let format = self.open()?;
        let clock = Arc::clone(&self.clock);
        let alive = Arc::clone(&self.alive);
        let halt = Arc::clone(&self.halt);
        halt.store(false, Ordering::Release);
        alive.store(true, Ordering::Release);

        let handle = spawn_with_priority(
            "jamrouter-audio",
            realtime_priority(self.priority),
            move || {
                let nsec_per_period =
                    format.period_size as f64 * 1_000_000_000.0 / format.sample_rate as f64;
                let origin = clock.now();
                let mut cycles: u64 = 0;
                while !halt.load(Ordering::Acquire) {
                    cycle(format.period_size);
                    cycles += 1;
                    clock.sleep_until(origin + (cycles as f64 * nsec_per_period) as i64);
                }
                alive.store(false, Ordering::Release);
                debug!(target: "jamrouter::driver", cycles, "timer audio loop finished");
            },
        );
        match handle {
            Ok(handle) => self.handle = Some(handle),
            Err(e) => {
                self.alive.store(false, Ordering::Release);
                return Err(e);
            }
        }
        info!(
            target: "jamrouter::driver",
            sample_rate = format.sample_rate,
            period_size = format.period_size,
            "timer audio started"
        );
        Ok(())
    }

    fn stop(&mut self) {
        self.halt.store(true, Ordering::Release);
        self.join();
        self.alive.store(false, Ordering::Release);
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

impl Drop for TimerAudioDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Stops a [`TimerAudioDriver`] loop without going through its owner.
#[derive(Debug, Clone)]
pub struct HaltHandle(Arc<AtomicBool>);

impl HaltHandle {
    pub fn halt(&self) {
        self.0.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jamrouter_core::MonotonicClock;
    use std::sync::atomic::AtomicU32;
    use std::time::{Duration, Instant};

    fn wait_for(mut f: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if f() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_cycles_run_until_stopped() {
        let mut driver = TimerAudioDriver::new(Arc::new(MonotonicClock::new()), 48_000, 64, 66);
        assert_eq!(driver.open().unwrap().period_size, 64);

        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        driver
            .start(Box::new(move |n| {
                assert_eq!(n, 64);
                c.fetch_add(1, Ordering::Relaxed);
            }))
            .unwrap();

        assert!(wait_for(|| count.load(Ordering::Relaxed) >= 5));
        assert!(driver.is_alive());
        driver.stop();
        assert!(!driver.is_alive());
    }

    #[test]
    fn test_halt_marks_driver_dead() {
        let mut driver = TimerAudioDriver::new(Arc::new(MonotonicClock::new()), 48_000, 64, 66);
        driver.start(Box::new(|_| {})).unwrap();
        driver.halt_handle().halt();
        assert!(wait_for(|| !driver.is_alive()));

        // restartable after the loss
        driver.start(Box::new(|_| {})).unwrap();
        assert!(driver.is_alive());
    }

    #[test]
    fn test_open_rejects_zero_rate() {
        let mut driver = TimerAudioDriver::new(Arc::new(MonotonicClock::new()), 0, 64, 66);
        assert!(driver.open().is_err());
    }
}
