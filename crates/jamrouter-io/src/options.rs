//! Router behavior options shared by the Rx, Tx and graph threads.

use serde::{Deserialize, Serialize};

use jamrouter_midi::{KeyMap, PitchControl, PitchMap, Translator};

use crate::{Error, Result};

pub const DEFAULT_RX_PRIORITY: u8 = 68;
pub const DEFAULT_TX_PRIORITY: u8 = 68;
pub const DEFAULT_AUDIO_PRIORITY: u8 = 66;

/// Longest accepted byte or event guard time, microseconds.
pub const MAX_GUARD_TIME_US: u64 = 1_000_000;

/// Realtime priorities, 1..=99.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadPriorities {
    pub rx: u8,
    pub tx: u8,
    pub audio: u8,
}

impl Default for ThreadPriorities {
    fn default() -> Self {
        Self {
            rx: DEFAULT_RX_PRIORITY,
            tx: DEFAULT_TX_PRIORITY,
            audio: DEFAULT_AUDIO_PRIORITY,
        }
    }
}

/// Message rewriting and pacing options.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterOptions {
    /// Velocity written for every hardware Note On, 0 = unchanged (default: 0)
    pub note_on_velocity: u8,
    /// Velocity that marks a Note On as a note-off on the hardware side,
    /// and is written for hardware note-offs (default: 0)
    pub note_off_velocity: u8,
    /// Deliver hardware note-offs to the graph as Note Off (default: false)
    pub rx_real_note_off: bool,
    /// Send Note Off instead of velocity-0 Note On (default: false)
    pub tx_real_note_off: bool,
    /// Send All Notes Off when the last key on a channel is released (default: false)
    pub tx_all_notes_off: bool,
    /// Omit repeated status bytes on raw byte streams (default: false)
    pub running_status: bool,
    /// Pause between bytes written to hardware, microseconds (default: 0)
    pub byte_guard_time_us: u64,
    /// Pause between messages written to hardware, microseconds (default: 0)
    pub event_guard_time_us: u64,
    pub priorities: ThreadPriorities,
    /// Key to controller maps, `"rx,tx,cc"` with 1-based channels
    pub keymaps: Vec<String>,
    /// Key to pitch bend maps, `"rx,tx,center,range"`
    pub pitchmaps: Vec<String>,
    /// Pitch bend to controller maps, `"rx,tx,cc"`
    pub pitchcontrols: Vec<String>,
    /// Send translated messages back to the graph as well (default: false)
    pub echo_translations: bool,
}

impl RouterOptions {
    pub fn validate(&self) -> Result<()> {
        if self.note_on_velocity > 0x7F || self.note_off_velocity > 0x7F {
            return Err(Error::InvalidConfig(format!(
                "velocity overrides must be 0..=127 (on {}, off {})",
                self.note_on_velocity, self.note_off_velocity
            )));
        }
        for (name, value) in [
            ("byte", self.byte_guard_time_us),
            ("event", self.event_guard_time_us),
        ] {
            if value > MAX_GUARD_TIME_US {
                return Err(Error::InvalidConfig(format!(
                    "{name} guard time {value}us exceeds {MAX_GUARD_TIME_US}us"
                )));
            }
        }
        let p = self.priorities;
        for (name, value) in [("rx", p.rx), ("tx", p.tx), ("audio", p.audio)] {
            if !(1..=99).contains(&value) {
                return Err(Error::InvalidConfig(format!(
                    "{name} priority {value} outside 1..=99"
                )));
            }
        }
        self.translator().map(|_| ())
    }

    /// Builds the channel lookup for the configured maps.
    pub fn translator(&self) -> Result<Translator> {
        let keymaps = parse_all::<KeyMap>(&self.keymaps)?;
        let pitchmaps = parse_all::<PitchMap>(&self.pitchmaps)?;
        let pitchcontrols = parse_all::<PitchControl>(&self.pitchcontrols)?;
        Ok(Translator::new(&keymaps, &pitchmaps, &pitchcontrols))
    }
}

fn parse_all<T>(specs: &[String]) -> Result<Vec<T>>
where
    T: std::str::FromStr<Err = jamrouter_midi::Error>,
{
    specs
        .iter()
        .map(|s| s.parse::<T>().map_err(Error::from))
        .collect()
}
