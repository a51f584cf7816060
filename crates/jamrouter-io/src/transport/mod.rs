//! Byte-stream MIDI transports.
//!
//! A transport opens one reader for the Rx thread and one writer for the
//! Tx thread. Readers and writers are moved into their thread and dropped
//! there, which closes the device.

use std::fmt;
use std::time::Duration;

use crate::Result;

mod loopback;
pub use loopback::{LoopbackDevice, LoopbackTransport};

#[cfg(feature = "midi-io")]
mod hardware;
#[cfg(feature = "midi-io")]
pub use hardware::{MidirTransport, MidirTransportConfig};

/// Hardware input side.
pub trait ByteReader: Send {
    /// Waits up to `timeout` for input and copies what arrived into `buf`.
    ///
    /// Returns 0 on timeout. An error means the device is gone and the Rx
    /// thread should stop.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Discards anything already buffered.
    fn flush(&mut self) -> Result<()>;
}

/// Hardware output side.
pub trait ByteWriter: Send {
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// True when the device takes an arbitrary byte stream, so partial
    /// messages (running status, byte pacing) can be written.
    fn raw_bytes(&self) -> bool {
        true
    }
}

/// A MIDI device pair the router can (re)open.
pub trait MidiTransport: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn open_input(&self) -> Result<Box<dyn ByteReader>>;

    fn open_output(&self) -> Result<Box<dyn ByteWriter>>;

    /// Polled by the watchdog. True when the device set changed in a way
    /// that needs both MIDI threads reopened.
    fn watchdog(&self) -> bool {
        false
    }
}
