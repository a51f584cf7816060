//! In-process transport backed by crossbeam channels.
//!
//! The [`LoopbackDevice`] end plays the hardware: bytes it sends arrive at
//! the Rx thread, bytes the Tx thread writes come out of it. It can also
//! simulate unplugging.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::debug;

use super::{ByteReader, ByteWriter, MidiTransport};
use crate::{Error, Result};

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug)]
struct Shared {
    plugged: AtomicBool,
    reconnect: AtomicBool,
}

impl Shared {
    fn check(&self, name: &str) -> Result<()> {
        if self.plugged.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::Disconnected(name.to_string()))
        }
    }
}

#[derive(Debug)]
pub struct LoopbackTransport {
    name: String,
    input: Receiver<Vec<u8>>,
    output: Sender<Vec<u8>>,
    shared: Arc<Shared>,
}

impl LoopbackTransport {
    /// Creates the transport and the device end that drives it.
    pub fn new(name: impl Into<String>) -> (Self, LoopbackDevice) {
        let (to_rx, input) = bounded(CHANNEL_CAPACITY);
        let (output, from_tx) = bounded(CHANNEL_CAPACITY);
        let shared = Arc::new(Shared {
            plugged: AtomicBool::new(true),
            reconnect: AtomicBool::new(false),
        });
        (
            Self {
                name: name.into(),
                input,
                output,
                shared: Arc::clone(&shared),
            },
            LoopbackDevice {
                to_rx,
                from_tx,
                shared,
            },
        )
    }
}

impl MidiTransport for LoopbackTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn open_input(&self) -> Result<Box<dyn ByteReader>> {
        self.shared.check(&self.name)?;
        Ok(Box::new(LoopbackReader {
            name: self.name.clone(),
            input: self.input.clone(),
            pending: Vec::new(),
            offset: 0,
            shared: Arc::clone(&self.shared),
        }))
    }

    fn open_output(&self) -> Result<Box<dyn ByteWriter>> {
        self.shared.check(&self.name)?;
        Ok(Box::new(LoopbackWriter {
            name: self.name.clone(),
            output: self.output.clone(),
            shared: Arc::clone(&self.shared),
        }))
    }

    fn watchdog(&self) -> bool {
        self.shared.reconnect.swap(false, Ordering::AcqRel)
    }
}

struct LoopbackReader {
    name: String,
    input: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    offset: usize,
    shared: Arc<Shared>,
}

impl LoopbackReader {
    fn drain_pending(&mut self, buf: &mut [u8]) -> usize {
        let n = (self.pending.len() - self.offset).min(buf.len());
        buf[..n].copy_from_slice(&self.pending[self.offset..self.offset + n]);
        self.offset += n;
        n
    }
}

impl ByteReader for LoopbackReader {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.shared.check(&self.name)?;
        if self.offset < self.pending.len() {
            return Ok(self.drain_pending(buf));
        }
        match self.input.recv_timeout(timeout) {
            Ok(bytes) => {
                self.pending = bytes;
                self.offset = 0;
                Ok(self.drain_pending(buf))
            }
            Err(RecvTimeoutError::Timeout) => Ok(0),
            Err(RecvTimeoutError::Disconnected) => Err(Error::Disconnected(self.name.clone())),
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.pending.clear();
        self.offset = 0;
        let mut dropped = 0usize;
        loop {
            match self.input.try_recv() {
                Ok(bytes) => dropped += bytes.len(),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    return Err(Error::Disconnected(self.name.clone()))
                }
            }
        }
        if dropped > 0 {
            debug!(target: "jamrouter::driver", dropped, "flushed stale input");
        }
        Ok(())
    }
}

struct LoopbackWriter {
    name: String,
    output: Sender<Vec<u8>>,
    shared: Arc<Shared>,
}

impl ByteWriter for LoopbackWriter {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.shared.check(&self.name)?;
        self.output
            .send(bytes.to_vec())
            .map_err(|_| Error::Disconnected(self.name.clone()))
    }
}

/// The "hardware" end of a [`LoopbackTransport`].
#[derive(Debug, Clone)]
pub struct LoopbackDevice {
    to_rx: Sender<Vec<u8>>,
    from_tx: Receiver<Vec<u8>>,
    shared: Arc<Shared>,
}

impl LoopbackDevice {
    /// Sends bytes towards the Rx thread. False if the channel is full.
    pub fn send(&self, bytes: &[u8]) -> bool {
        self.to_rx.try_send(bytes.to_vec()).is_ok()
    }

    /// Next chunk written by the Tx thread.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        self.from_tx.recv_timeout(timeout).ok()
    }

    /// Everything the Tx thread wrote until `timeout` passes without output.
    pub fn drain(&self, timeout: Duration) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = self.recv_timeout(timeout) {
            out.extend_from_slice(&chunk);
        }
        out
    }

    /// Makes every read, write and open fail until [`replug`](Self::replug).
    pub fn unplug(&self) {
        self.shared.plugged.store(false, Ordering::Release);
    }

    pub fn replug(&self) {
        self.shared.plugged.store(true, Ordering::Release);
    }

    pub fn is_plugged(&self) -> bool {
        self.shared.plugged.load(Ordering::Acquire)
    }

    /// Reports a device change on the next watchdog poll.
    pub fn request_reconnect(&self) {
        self.shared.reconnect.store(true, Ordering::Release);
    }
}
