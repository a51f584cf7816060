//! Audio drivers that clock the graph cycle.
//!
//! The router never processes audio. A driver only has to call the cycle
//! callback once per period with the period's frame count; the callback
//! advances clock recovery and moves MIDI in and out of the graph.

use std::fmt;

use crate::Result;

mod timer;
pub use timer::{HaltHandle, TimerAudioDriver};

#[cfg(feature = "audio-io")]
mod system;
#[cfg(feature = "audio-io")]
pub use system::{CpalAudioConfig, CpalAudioDriver};

/// Per-period callback, invoked with the number of frames in the period.
pub type CycleFn = Box<dyn FnMut(u32) + Send + 'static>;

/// What the device settled on when opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub period_size: u32,
}

pub trait AudioDriver: Send + fmt::Debug {
    fn name(&self) -> &str;

    /// Opens the device and reports its format.
    fn open(&mut self) -> Result<AudioFormat>;

    /// Starts calling `cycle` once per period.
    fn start(&mut self, cycle: CycleFn) -> Result<()>;

    /// Stops the callbacks and releases the device.
    fn stop(&mut self);

    /// False once the device stopped on its own (device lost, server gone).
    fn is_alive(&self) -> bool;
}
