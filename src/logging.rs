//! Log output that realtime threads can use without blocking.
//!
//! Formatted records go into a bounded byte ring. A minimum-priority drain
//! thread copies the ring to stderr. A writer that finds the ring busy or
//! full drops its record and counts it.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use jamrouter_io::spawn_with_priority;
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use serde::{Deserialize, Serialize};
use thread_priority::ThreadPriority;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use crate::{Error, Result};

/// Diagnostic classes, each mapped to the `jamrouter::<class>` target.
pub const LOG_CLASSES: &[&str] = &[
    "init", "driver", "stream", "timing", "tx_timing", "note", "event",
];

pub const DEFAULT_LOG_RING_SIZE: usize = 64 * 1024;

const DRAIN_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level for everything (default: "info")
    pub level: String,
    /// Classes logged at debug level, e.g. `["timing", "event"]`
    pub classes: Vec<String>,
    /// Log ring capacity in bytes (default: 64 KiB)
    pub ring_size: usize,
    /// Prefix records with the thread name (default: true)
    pub thread_names: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            classes: Vec::new(),
            ring_size: DEFAULT_LOG_RING_SIZE,
            thread_names: true,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(unknown) = self
            .classes
            .iter()
            .find(|c| !LOG_CLASSES.contains(&c.as_str()))
        {
            return Err(Error::Config(format!(
                "unknown log class {unknown:?}, expected one of {LOG_CLASSES:?}"
            )));
        }
        if self.ring_size < 1024 {
            return Err(Error::Config(format!(
                "log ring of {} bytes is too small",
                self.ring_size
            )));
        }
        Ok(())
    }

    /// Filter directives: the base level plus one debug directive per class.
    pub fn directives(&self) -> String {
        std::iter::once(self.level.clone())
            .chain(self.classes.iter().map(|c| format!("jamrouter::{c}=debug")))
            .collect::<Vec<_>>()
            .join(",")
    }
}

struct LogRing {
    producer: Mutex<HeapProd<u8>>,
    dropped: AtomicU64,
}

#[derive(Clone)]
struct RingMakeWriter(Arc<LogRing>);

struct RingWriter<'a>(&'a LogRing);

impl Write for RingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.0.producer.try_lock() {
            Some(mut producer) if producer.vacant_len() >= buf.len() => {
                producer.push_slice(buf);
            }
            _ => {
                self.0.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for RingMakeWriter {
    type Writer = RingWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        RingWriter(&self.0)
    }
}

/// Keeps the drain thread alive. Dropping it flushes what is left in the
/// ring and stops the thread.
pub struct LogGuard {
    ring: Arc<LogRing>,
    stop: Arc<AtomicBool>,
    drain: Option<JoinHandle<()>>,
}

impl LogGuard {
    /// Records lost because the ring was busy or full.
    pub fn dropped(&self) -> u64 {
        self.ring.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for LogGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogGuard")
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(drain) = self.drain.take() {
            let _ = drain.join();
        }
    }
}

fn drain_into(consumer: &mut HeapCons<u8>, out: &mut impl Write) {
    while consumer.occupied_len() > 0 {
        let (head, tail) = consumer.as_slices();
        let n = head.len() + tail.len();
        let _ = out.write_all(head);
        let _ = out.write_all(tail);
        consumer.skip(n);
    }
    let _ = out.flush();
}

/// Installs the global subscriber. `RUST_LOG`, when set, replaces the
/// configured filter.
pub fn init(config: &LoggingConfig) -> Result<LogGuard> {
    config.validate()?;
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.directives()))
        .map_err(|e| Error::Logging(e.to_string()))?;

    let (producer, mut consumer) = HeapRb::<u8>::new(config.ring_size).split();
    let ring = Arc::new(LogRing {
        producer: Mutex::new(producer),
        dropped: AtomicU64::new(0),
    });

    let stop = Arc::new(AtomicBool::new(false));
    let stop_drain = Arc::clone(&stop);
    let drain = spawn_with_priority("jamrouter-log", ThreadPriority::Min, move || {
        let mut stderr = io::stderr();
        while !stop_drain.load(Ordering::Acquire) {
            drain_into(&mut consumer, &mut stderr);
            std::thread::sleep(DRAIN_INTERVAL);
        }
        drain_into(&mut consumer, &mut stderr);
    })?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(RingMakeWriter(Arc::clone(&ring)))
        .with_ansi(false)
        .with_thread_names(config.thread_names)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))?;

    Ok(LogGuard {
        ring,
        stop,
        drain: Some(drain),
    })
}
