//! Timing and queue configuration.

use jamrouter_midi::message::END_SYSEX;
use jamrouter_midi::SysExFraming;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;
pub const DEFAULT_PHASE_LOCK: f64 = 0.5;
pub const MIN_PHASE_LOCK: f64 = 0.0625;
pub const MAX_PHASE_LOCK: f64 = 0.9375;

/// Clock recovery settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Sample rate used until the audio driver reports one (default: 48000)
    pub sample_rate: u32,
    /// Hardware-to-graph latency in periods, 0 = automatic (default: 0)
    pub rx_latency_periods: u32,
    /// Graph-to-hardware latency in periods, 0 = automatic (default: 0)
    pub tx_latency_periods: u32,
    /// Target audio wakeup phase within a period (default: 0.5)
    pub phase_lock: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            rx_latency_periods: 0,
            tx_latency_periods: 0,
            phase_lock: DEFAULT_PHASE_LOCK,
        }
    }
}

impl TimingConfig {
    /// Phase setting clamped to the supported range.
    pub fn phase_setting(&self) -> f64 {
        self.phase_lock.clamp(MIN_PHASE_LOCK, MAX_PHASE_LOCK)
    }

    /// True when the phase setting is the untouched default.
    pub fn is_default_phase(&self) -> bool {
        self.phase_lock == DEFAULT_PHASE_LOCK
    }

    pub fn validate(&self) -> Result<()> {
        if !(8_000..=384_000).contains(&self.sample_rate) {
            return Err(Error::InvalidSampleRate(self.sample_rate));
        }
        if !self.phase_lock.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "phase_lock {} is not a number",
                self.phase_lock
            )));
        }
        let max = crate::MAX_BUFFER_PERIODS as u32 - 1;
        if self.rx_latency_periods > max || self.tx_latency_periods > max {
            return Err(Error::InvalidLatency {
                rx: self.rx_latency_periods,
                tx: self.tx_latency_periods,
                periods: crate::MAX_BUFFER_PERIODS as u32,
            });
        }
        Ok(())
    }
}

/// What to do with incoming Active Sensing messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveSensingMode {
    /// Consume them and arm the silence timeout.
    #[default]
    On,
    /// Pass them through untouched.
    Thru,
    /// Discard them.
    Drop,
}

impl std::str::FromStr for ActiveSensingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "on" => Ok(Self::On),
            "thru" | "through" => Ok(Self::Thru),
            "drop" | "off" => Ok(Self::Drop),
            other => Err(Error::InvalidConfig(format!(
                "unknown active sensing mode {other:?}"
            ))),
        }
    }
}

/// Event queue behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Active Sensing handling (default: on)
    pub active_sensing: ActiveSensingMode,
    /// Hardware end-of-SysEx byte (default: 0xF7)
    pub sysex_terminator: u8,
    /// Second hardware end-of-SysEx byte, if the device needs one (default: none)
    pub sysex_extra_terminator: Option<u8>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            active_sensing: ActiveSensingMode::default(),
            sysex_terminator: END_SYSEX,
            sysex_extra_terminator: None,
        }
    }
}

impl QueueConfig {
    pub fn framing(&self) -> SysExFraming {
        SysExFraming {
            terminator: self.sysex_terminator,
            extra_terminator: self.sysex_extra_terminator,
        }
    }
}
