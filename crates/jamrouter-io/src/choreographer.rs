//! Startup, shutdown and independent restart of the router threads.
//!
//! Startup order: audio driver (opened with retries) and clock recovery,
//! then the Tx and Rx threads, each waited on until it signals ready.
//! After that the watchdog polls every subsystem and restarts the one that
//! stopped without touching the others.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use jamrouter_core::SyncContext;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::audio::{AudioDriver, AudioFormat};
use crate::graph::GraphCycle;
use crate::options::RouterOptions;
use crate::rx::spawn_rx;
use crate::thread::{SubsystemState, ThreadStatus};
use crate::transport::MidiTransport;
use crate::tx::spawn_tx;
use crate::{Error, Result};

pub const AUDIO_OPEN_ATTEMPTS: u32 = 5;
pub const WATCHDOG_INTERVAL: Duration = Duration::from_micros(33_333);

const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Timeouts and retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChoreographerConfig {
    /// How long a thread may take to signal ready (default: 5 s)
    pub ready_timeout: Duration,
    /// Attempts to open the audio device (default: 5)
    pub audio_open_attempts: u32,
    /// Pause between audio open attempts (default: 1 s)
    pub audio_retry_delay: Duration,
    /// Watchdog polling cadence (default: 33.333 ms)
    pub watchdog_interval: Duration,
}

impl Default for ChoreographerConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(5),
            audio_open_attempts: AUDIO_OPEN_ATTEMPTS,
            audio_retry_delay: Duration::from_secs(1),
            watchdog_interval: WATCHDOG_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    Audio,
    Rx,
    Tx,
}

/// What one watchdog pass restarted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchdogReport {
    pub audio: bool,
    pub rx: bool,
    pub tx: bool,
}

impl WatchdogReport {
    pub fn is_quiet(&self) -> bool {
        !(self.audio || self.rx || self.tx)
    }
}

/// Sets the global shutdown flag from anywhere (signal handler, other
/// thread).
#[derive(Debug, Clone)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

struct MidiThread {
    status: Arc<ThreadStatus>,
    handle: Option<JoinHandle<()>>,
}

impl MidiThread {
    fn new() -> Self {
        Self {
            status: ThreadStatus::new(),
            handle: None,
        }
    }

    fn stop(&mut self) {
        self.status.request_stop();
        self.join();
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                debug!(target: "jamrouter::init", "joined a panicked thread");
            }
        }
    }
}

/// Owns the audio driver, the MIDI transport and both MIDI threads.
pub struct ThreadChoreographer {
    ctx: Arc<SyncContext>,
    options: RouterOptions,
    config: ChoreographerConfig,
    transport: Box<dyn MidiTransport>,
    audio: Box<dyn AudioDriver>,
    graph: Arc<Mutex<GraphCycle>>,
    rx: MidiThread,
    tx: MidiThread,
    shutdown: Arc<AtomicBool>,
    started: bool,
}

impl std::fmt::Debug for ThreadChoreographer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadChoreographer")
            .field("transport", &self.transport)
            .field("audio", &self.audio)
            .field("rx", &self.rx.status.state())
            .field("tx", &self.tx.status.state())
            .field("started", &self.started)
            .finish()
    }
}

impl ThreadChoreographer {
    pub fn new(
        ctx: Arc<SyncContext>,
        options: RouterOptions,
        transport: Box<dyn MidiTransport>,
        audio: Box<dyn AudioDriver>,
        graph: GraphCycle,
        config: ChoreographerConfig,
    ) -> Self {
        Self {
            ctx,
            options,
            config,
            transport,
            audio,
            graph: Arc::new(Mutex::new(graph)),
            rx: MidiThread::new(),
            tx: MidiThread::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            started: false,
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.shutdown))
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.ctx
    }

    pub fn state(&self, subsystem: Subsystem) -> SubsystemState {
        match subsystem {
            Subsystem::Audio if self.audio.is_alive() => SubsystemState::Running,
            Subsystem::Audio => SubsystemState::Stopped,
            Subsystem::Rx => self.rx.status.state(),
            Subsystem::Tx => self.tx.status.state(),
        }
    }

    /// Brings every subsystem up in order.
    ///
    /// Fails only when audio cannot be started; a MIDI thread that fails is
    /// left stopped for the watchdog to retry.
    pub fn start(&mut self) -> Result<()> {
        self.shutdown.store(false, Ordering::Release);
        self.start_audio()?;
        self.started = true;
        self.start_midi();
        info!(target: "jamrouter::init", transport = self.transport.name(), audio = self.audio.name(), "router started");
        Ok(())
    }

    /// One watchdog pass. Restarts whatever stopped.
    pub fn watchdog_cycle(&mut self) -> WatchdogReport {
        let mut report = WatchdogReport::default();
        if !self.started || self.shutdown.load(Ordering::Acquire) {
            return report;
        }

        if !self.audio.is_alive() {
            warn!(target: "jamrouter::driver", driver = self.audio.name(), "audio stopped, restarting");
            self.audio.stop();
            match self.start_audio() {
                Ok(()) => report.audio = true,
                Err(e) => error!(target: "jamrouter::driver", "audio restart failed: {e}"),
            }
        }

        if self.transport.watchdog() {
            info!(target: "jamrouter::driver", transport = self.transport.name(), "MIDI devices changed");
            self.restart_midi();
            report.rx = self.rx.status.state() == SubsystemState::Running;
            report.tx = self.tx.status.state() == SubsystemState::Running;
            return report;
        }

        if self.tx.status.state() == SubsystemState::Stopped {
            self.tx.join();
            report.tx = self.launch_tx().is_ok() && self.await_ready(Subsystem::Tx);
        }
        if self.rx.status.state() == SubsystemState::Stopped {
            self.rx.join();
            report.rx = self.launch_rx().is_ok() && self.await_ready(Subsystem::Rx);
        }
        if !report.is_quiet() {
            info!(target: "jamrouter::init", ?report, "watchdog restarted subsystems");
        }
        report
    }

    /// Runs watchdog passes until shutdown is requested.
    pub fn run_watchdog(&mut self) {
        while !self.shutdown.load(Ordering::Acquire) {
            self.watchdog_cycle();
            thread::sleep(self.config.watchdog_interval);
        }
        debug!(target: "jamrouter::init", "watchdog finished");
    }

    /// Stops and joins both MIDI threads, then reopens the transport and
    /// starts them again.
    pub fn restart_midi(&mut self) {
        self.tx.stop();
        self.rx.stop();
        self.start_midi();
    }

    /// Stops every thread and releases the devices.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.tx.stop();
        self.rx.stop();
        self.audio.stop();
        if self.started {
            info!(target: "jamrouter::init", "router stopped");
        }
        self.started = false;
    }

    fn start_audio(&mut self) -> Result<()> {
        let format = self.open_audio()?;
        self.graph.lock().restart(format.sample_rate)?;

        let graph = Arc::clone(&self.graph);
        let first_cycle = Arc::new(AtomicBool::new(false));
        let cycled = Arc::clone(&first_cycle);
        self.audio.start(Box::new(move |nframes| {
            // Only contended while the owner restarts the cycle.
            if let Some(mut cycle) = graph.try_lock() {
                cycle.process(nframes);
                cycled.store(true, Ordering::Release);
            }
        }))?;

        let deadline = Instant::now() + self.config.ready_timeout;
        while !(first_cycle.load(Ordering::Acquire) && self.ctx.recovery().is_running()) {
            if !self.audio.is_alive() {
                return Err(Error::AudioDevice(format!("{} stopped during startup", self.audio.name())));
            }
            if Instant::now() >= deadline {
                self.audio.stop();
                return Err(Error::Timeout("first audio cycle".into()));
            }
            thread::sleep(POLL_INTERVAL);
        }
        info!(
            target: "jamrouter::init",
            sample_rate = format.sample_rate,
            period_size = format.period_size,
            "audio running"
        );
        Ok(())
    }

    fn open_audio(&mut self) -> Result<AudioFormat> {
        let attempts = self.config.audio_open_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.audio.open() {
                Ok(format) => return Ok(format),
                Err(e) if attempt < attempts => {
                    warn!(target: "jamrouter::driver", attempt, "audio open failed: {e}");
                    thread::sleep(self.config.audio_retry_delay);
                    attempt += 1;
                }
                Err(e) => {
                    error!(target: "jamrouter::driver", attempts, "giving up on audio: {e}");
                    return Err(e);
                }
            }
        }
    }

    fn start_midi(&mut self) {
        if let Err(e) = self.launch_tx() {
            error!(target: "jamrouter::driver", "MIDI Tx not started: {e}");
        }
        if let Err(e) = self.launch_rx() {
            error!(target: "jamrouter::driver", "MIDI Rx not started: {e}");
        }
        self.await_ready(Subsystem::Tx);
        self.await_ready(Subsystem::Rx);
    }

    fn launch_tx(&mut self) -> Result<()> {
        let writer = self.transport.open_output()?;
        let handle = spawn_tx(
            Arc::clone(&self.ctx),
            writer,
            &self.options,
            Arc::clone(&self.tx.status),
            Arc::clone(&self.shutdown),
        )?;
        self.tx.handle = Some(handle);
        Ok(())
    }

    fn launch_rx(&mut self) -> Result<()> {
        let reader = self.transport.open_input()?;
        let handle = spawn_rx(
            Arc::clone(&self.ctx),
            reader,
            &self.options,
            Arc::clone(&self.rx.status),
            Arc::clone(&self.shutdown),
        )?;
        self.rx.handle = Some(handle);
        Ok(())
    }

    fn await_ready(&self, subsystem: Subsystem) -> bool {
        let thread = match subsystem {
            Subsystem::Rx => &self.rx,
            Subsystem::Tx => &self.tx,
            Subsystem::Audio => return self.audio.is_alive(),
        };
        if thread.handle.is_none() {
            return false;
        }
        let ready = thread.status.wait_ready(self.config.ready_timeout);
        if !ready {
            warn!(target: "jamrouter::init", ?subsystem, "thread did not become ready");
        }
        ready
    }
}

impl Drop for ThreadChoreographer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
