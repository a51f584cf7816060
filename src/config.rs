//! Router configuration file.
//!
//! ```toml
//! [timing]
//! sample_rate = 48000
//! phase_lock = 0.5
//!
//! [queue]
//! active_sensing = "thru"
//!
//! [options]
//! tx_real_note_off = true
//! keymaps = ["1,2,74"]
//!
//! [midi]
//! driver = "loopback"
//!
//! [audio]
//! driver = "timer"
//! period_size = 128
//!
//! [logging]
//! classes = ["timing"]
//! ```

use std::path::Path;
use std::time::Duration;

use jamrouter_core::{QueueConfig, TimingConfig};
use jamrouter_io::{ChoreographerConfig, RouterOptions};
use serde::{Deserialize, Serialize};

use crate::logging::LoggingConfig;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MidiDriverKind {
    /// In-process byte pipe.
    #[default]
    Loopback,
    /// Hardware ports through `midir` (feature `midi-io`).
    Midir,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiConfig {
    pub driver: MidiDriverKind,
    /// Client name shown to other MIDI software (default: "jamrouter")
    pub client_name: String,
    /// Input port name, or a substring of it (default: first port)
    pub input_port: Option<String>,
    /// Output port name, or a substring of it (default: first port)
    pub output_port: Option<String>,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            driver: MidiDriverKind::default(),
            client_name: "jamrouter".into(),
            input_port: None,
            output_port: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioDriverKind {
    /// Self-clocked loop, no audio device.
    #[default]
    Timer,
    /// System audio device through `cpal` (feature `audio-io`).
    Cpal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub driver: AudioDriverKind,
    /// Output device name, or a substring of it (default: system default)
    pub device: Option<String>,
    /// Frames per period (default: 256)
    pub period_size: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            driver: AudioDriverKind::default(),
            device: None,
            period_size: jamrouter_core::DEFAULT_BUFFER_PERIOD_SIZE,
        }
    }
}

/// Watchdog and startup timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Polling cadence in microseconds (default: 33333)
    pub interval_us: u64,
    /// Audio device open attempts (default: 5)
    pub audio_open_attempts: u32,
    /// Pause between audio open attempts, milliseconds (default: 1000)
    pub audio_retry_ms: u64,
    /// How long a thread may take to become ready, milliseconds (default: 5000)
    pub ready_timeout_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        let defaults = ChoreographerConfig::default();
        Self {
            interval_us: defaults.watchdog_interval.as_micros() as u64,
            audio_open_attempts: defaults.audio_open_attempts,
            audio_retry_ms: defaults.audio_retry_delay.as_millis() as u64,
            ready_timeout_ms: defaults.ready_timeout.as_millis() as u64,
        }
    }
}

impl WatchdogConfig {
    pub fn choreography(&self) -> ChoreographerConfig {
        ChoreographerConfig {
            ready_timeout: Duration::from_millis(self.ready_timeout_ms),
            audio_open_attempts: self.audio_open_attempts,
            audio_retry_delay: Duration::from_millis(self.audio_retry_ms),
            watchdog_interval: Duration::from_micros(self.interval_us),
        }
    }
}

/// Everything needed to build a [`JamRouter`](crate::JamRouter).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub timing: TimingConfig,
    pub queue: QueueConfig,
    pub options: RouterOptions,
    pub midi: MidiConfig,
    pub audio: AudioConfig,
    pub watchdog: WatchdogConfig,
    pub logging: LoggingConfig,
}

impl RouterConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<()> {
        self.timing.validate()?;
        self.options.validate()?;
        self.logging.validate()?;
        if self.audio.period_size == 0 {
            return Err(Error::Config("audio period_size must be positive".into()));
        }
        if self.watchdog.interval_us == 0 {
            return Err(Error::Config("watchdog interval must be positive".into()));
        }
        Ok(())
    }
}
