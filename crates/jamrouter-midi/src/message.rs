//! MIDI 1.0 message model.
//!
//! [`MidiMessage`] covers every message kind the router moves between the
//! graph and the wire. SysEx payloads are not stored inline; they travel in
//! a bounded side buffer next to the message.

use smallvec::SmallVec;

use crate::error::{Error, Result};

pub const NOTE_OFF: u8 = 0x80;
pub const NOTE_ON: u8 = 0x90;
pub const AFTERTOUCH: u8 = 0xA0;
pub const CONTROLLER: u8 = 0xB0;
pub const PROGRAM_CHANGE: u8 = 0xC0;
pub const CHANNEL_PRESSURE: u8 = 0xD0;
pub const PITCH_BEND: u8 = 0xE0;
pub const SYSEX: u8 = 0xF0;
pub const MTC_QUARTER_FRAME: u8 = 0xF1;
pub const SONG_POSITION: u8 = 0xF2;
pub const SONG_SELECT: u8 = 0xF3;
pub const BUS_SELECT: u8 = 0xF5;
pub const TUNE_REQUEST: u8 = 0xF6;
pub const END_SYSEX: u8 = 0xF7;
pub const CLOCK: u8 = 0xF8;
pub const START: u8 = 0xFA;
pub const CONTINUE: u8 = 0xFB;
pub const STOP: u8 = 0xFC;
pub const ACTIVE_SENSING: u8 = 0xFE;
pub const SYSTEM_RESET: u8 = 0xFF;

/// Controller number of the All Notes Off channel mode message.
pub const ALL_NOTES_OFF: u8 = 0x7B;

/// Maximum SysEx message size in bytes, including `F0` and the terminator.
pub const SYSEX_BUFFER_SIZE: usize = 1024;

/// Center value of a 14-bit pitch bend.
pub const PITCH_BEND_CENTER: u16 = 0x2000;

const CONTROL14_TAG: u32 = 1 << 31;

/// A single MIDI 1.0 message.
///
/// Channels are 0-15, data bytes 0-127, 14-bit values 0-16383.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MidiMessage {
    NoteOff { channel: u8, note: u8, velocity: u8 },
    NoteOn { channel: u8, note: u8, velocity: u8 },
    Aftertouch { channel: u8, note: u8, pressure: u8 },
    Controller { channel: u8, controller: u8, value: u8 },
    /// A 14-bit controller pair (MSB on `controller`, LSB on `controller + 32`).
    Control14 { channel: u8, controller: u8, value: u16 },
    ProgramChange { channel: u8, program: u8 },
    ChannelPressure { channel: u8, pressure: u8 },
    PitchBend { channel: u8, value: u16 },
    /// System exclusive. The payload is carried alongside the message.
    SysEx,
    MtcQuarterFrame(u8),
    SongPosition(u16),
    SongSelect(u8),
    BusSelect,
    TuneRequest,
    EndSysEx,
    Clock,
    Start,
    Continue,
    Stop,
    ActiveSensing,
    Reset,
}

impl MidiMessage {
    #[inline]
    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        Self::NoteOn {
            channel: channel & 0x0F,
            note: note & 0x7F,
            velocity: velocity & 0x7F,
        }
    }

    #[inline]
    pub fn note_off(channel: u8, note: u8, velocity: u8) -> Self {
        Self::NoteOff {
            channel: channel & 0x0F,
            note: note & 0x7F,
            velocity: velocity & 0x7F,
        }
    }

    #[inline]
    pub fn controller(channel: u8, controller: u8, value: u8) -> Self {
        Self::Controller {
            channel: channel & 0x0F,
            controller: controller & 0x7F,
            value: value & 0x7F,
        }
    }

    #[inline]
    pub fn pitch_bend(channel: u8, value: u16) -> Self {
        Self::PitchBend {
            channel: channel & 0x0F,
            value: value & 0x3FFF,
        }
    }

    /// Single-byte realtime message for a status in `0xF8..=0xFF`.
    pub fn realtime(status: u8) -> Option<Self> {
        match status {
            CLOCK => Some(Self::Clock),
            START => Some(Self::Start),
            CONTINUE => Some(Self::Continue),
            STOP => Some(Self::Stop),
            ACTIVE_SENSING => Some(Self::ActiveSensing),
            SYSTEM_RESET => Some(Self::Reset),
            _ => None,
        }
    }

    /// Builds a message from a status byte and up to two data bytes.
    ///
    /// Data bytes beyond what the status needs are ignored. SysEx yields
    /// [`MidiMessage::SysEx`] with no payload.
    pub fn from_bytes(status: u8, d1: u8, d2: u8) -> Result<Self> {
        if status < 0x80 {
            return Err(Error::InvalidStatus(status));
        }
        let channel = status & 0x0F;
        let (d1, d2) = (d1 & 0x7F, d2 & 0x7F);
        let message = match status & 0xF0 {
            NOTE_OFF => Self::NoteOff {
                channel,
                note: d1,
                velocity: d2,
            },
            NOTE_ON => Self::NoteOn {
                channel,
                note: d1,
                velocity: d2,
            },
            AFTERTOUCH => Self::Aftertouch {
                channel,
                note: d1,
                pressure: d2,
            },
            CONTROLLER => Self::Controller {
                channel,
                controller: d1,
                value: d2,
            },
            PROGRAM_CHANGE => Self::ProgramChange {
                channel,
                program: d1,
            },
            CHANNEL_PRESSURE => Self::ChannelPressure {
                channel,
                pressure: d1,
            },
            PITCH_BEND => Self::PitchBend {
                channel,
                value: (d1 as u16) | ((d2 as u16) << 7),
            },
            _ => match status {
                SYSEX => Self::SysEx,
                MTC_QUARTER_FRAME => Self::MtcQuarterFrame(d1),
                SONG_POSITION => Self::SongPosition((d1 as u16) | ((d2 as u16) << 7)),
                SONG_SELECT => Self::SongSelect(d1),
                BUS_SELECT => Self::BusSelect,
                TUNE_REQUEST => Self::TuneRequest,
                END_SYSEX => Self::EndSysEx,
                _ => Self::realtime(status).ok_or(Error::InvalidStatus(status))?,
            },
        };
        Ok(message)
    }

    /// Parses one complete message from the start of `bytes`.
    ///
    /// Used for event-framed sources (graph buffers, `midir` callbacks)
    /// where each buffer holds exactly one message.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let status = *bytes.first().ok_or(Error::Truncated {
            expected: 1,
            actual: 0,
        })?;
        if status == SYSEX {
            return Ok(Self::SysEx);
        }
        let expected = expected_len(status).ok_or(Error::InvalidStatus(status))?;
        if bytes.len() < expected {
            return Err(Error::Truncated {
                expected,
                actual: bytes.len(),
            });
        }
        let d1 = bytes.get(1).copied().unwrap_or(0);
        let d2 = bytes.get(2).copied().unwrap_or(0);
        for &b in &bytes[1..expected] {
            if b > 0x7F {
                return Err(Error::InvalidData(b));
            }
        }
        Self::from_bytes(status, d1, d2)
    }

    /// Wire status byte, including the channel for channel messages.
    pub fn status(&self) -> u8 {
        match *self {
            Self::NoteOff { channel, .. } => NOTE_OFF | channel,
            Self::NoteOn { channel, .. } => NOTE_ON | channel,
            Self::Aftertouch { channel, .. } => AFTERTOUCH | channel,
            Self::Controller { channel, .. } | Self::Control14 { channel, .. } => {
                CONTROLLER | channel
            }
            Self::ProgramChange { channel, .. } => PROGRAM_CHANGE | channel,
            Self::ChannelPressure { channel, .. } => CHANNEL_PRESSURE | channel,
            Self::PitchBend { channel, .. } => PITCH_BEND | channel,
            Self::SysEx => SYSEX,
            Self::MtcQuarterFrame(_) => MTC_QUARTER_FRAME,
            Self::SongPosition(_) => SONG_POSITION,
            Self::SongSelect(_) => SONG_SELECT,
            Self::BusSelect => BUS_SELECT,
            Self::TuneRequest => TUNE_REQUEST,
            Self::EndSysEx => END_SYSEX,
            Self::Clock => CLOCK,
            Self::Start => START,
            Self::Continue => CONTINUE,
            Self::Stop => STOP,
            Self::ActiveSensing => ACTIVE_SENSING,
            Self::Reset => SYSTEM_RESET,
        }
    }

    /// Channel of a channel voice message.
    pub fn channel(&self) -> Option<u8> {
        let status = self.status();
        (status < SYSEX).then_some(status & 0x0F)
    }

    /// Returns a copy moved onto `channel`. System messages are unchanged.
    pub fn with_channel(self, channel: u8) -> Self {
        let channel = channel & 0x0F;
        match self {
            Self::NoteOff { note, velocity, .. } => Self::NoteOff {
                channel,
                note,
                velocity,
            },
            Self::NoteOn { note, velocity, .. } => Self::NoteOn {
                channel,
                note,
                velocity,
            },
            Self::Aftertouch { note, pressure, .. } => Self::Aftertouch {
                channel,
                note,
                pressure,
            },
            Self::Controller {
                controller, value, ..
            } => Self::Controller {
                channel,
                controller,
                value,
            },
            Self::Control14 {
                controller, value, ..
            } => Self::Control14 {
                channel,
                controller,
                value,
            },
            Self::ProgramChange { program, .. } => Self::ProgramChange { channel, program },
            Self::ChannelPressure { pressure, .. } => Self::ChannelPressure { channel, pressure },
            Self::PitchBend { value, .. } => Self::PitchBend { channel, value },
            other => other,
        }
    }

    #[inline]
    pub fn is_realtime(&self) -> bool {
        self.status() > END_SYSEX
    }

    /// System common and SysEx messages (these cancel running status).
    #[inline]
    pub fn is_system_common(&self) -> bool {
        (SYSEX..=END_SYSEX).contains(&self.status())
    }

    /// True for Note Off, and for Note On whose velocity equals
    /// `note_off_velocity` (0 unless overridden).
    pub fn is_note_off(&self, note_off_velocity: u8) -> bool {
        match *self {
            Self::NoteOff { .. } => true,
            Self::NoteOn { velocity, .. } => velocity == note_off_velocity,
            _ => false,
        }
    }

    /// Number of wire bytes, excluding any SysEx payload.
    pub fn wire_len(&self) -> usize {
        match self {
            Self::Control14 { .. } => 6,
            Self::SysEx => 0,
            other => expected_len(other.status()).unwrap_or(1),
        }
    }

    /// Serializes the message. SysEx encodes to nothing; write its payload
    /// directly.
    pub fn encode(&self) -> SmallVec<[u8; 6]> {
        let mut out = SmallVec::new();
        match *self {
            Self::Control14 {
                channel,
                controller,
                value,
            } => {
                let status = CONTROLLER | channel;
                out.extend_from_slice(&[
                    status,
                    controller & 0x1F,
                    ((value >> 7) & 0x7F) as u8,
                    status,
                    (controller & 0x1F) + 32,
                    (value & 0x7F) as u8,
                ]);
            }
            Self::SysEx => {}
            _ => {
                let [status, d1, d2] = self.short_bytes();
                let bytes = [status, d1, d2];
                out.extend_from_slice(&bytes[..self.wire_len()]);
            }
        }
        out
    }

    /// Compact 32-bit form stored in atomic event slots.
    pub fn to_word(&self) -> u32 {
        match *self {
            Self::Control14 {
                channel,
                controller,
                value,
            } => {
                CONTROL14_TAG
                    | (((value & 0x3FFF) as u32) << 16)
                    | ((controller as u32) << 8)
                    | (CONTROLLER | channel) as u32
            }
            _ => {
                let [status, d1, d2] = self.short_bytes();
                status as u32 | ((d1 as u32) << 8) | ((d2 as u32) << 16)
            }
        }
    }

    /// Inverse of [`MidiMessage::to_word`].
    pub fn from_word(word: u32) -> Result<Self> {
        let status = (word & 0xFF) as u8;
        let d1 = ((word >> 8) & 0xFF) as u8;
        if word & CONTROL14_TAG != 0 {
            return Ok(Self::Control14 {
                channel: status & 0x0F,
                controller: d1,
                value: ((word >> 16) & 0x3FFF) as u16,
            });
        }
        Self::from_bytes(status, d1, ((word >> 16) & 0xFF) as u8)
    }

    fn short_bytes(&self) -> [u8; 3] {
        let status = self.status();
        match *self {
            Self::NoteOff { note, velocity, .. } | Self::NoteOn { note, velocity, .. } => {
                [status, note, velocity]
            }
            Self::Aftertouch { note, pressure, .. } => [status, note, pressure],
            Self::Controller {
                controller, value, ..
            } => [status, controller, value],
            Self::ProgramChange { program, .. } => [status, program, 0],
            Self::ChannelPressure { pressure, .. } => [status, pressure, 0],
            Self::PitchBend { value, .. } | Self::SongPosition(value) => {
                [status, (value & 0x7F) as u8, ((value >> 7) & 0x7F) as u8]
            }
            Self::MtcQuarterFrame(v) | Self::SongSelect(v) => [status, v, 0],
            _ => [status, 0, 0],
        }
    }
}

/// Total length of a fixed-size message starting with `status`.
///
/// Returns `None` for SysEx (variable length) and undefined system bytes
/// (`F4`, `F9`, `FD`).
pub fn expected_len(status: u8) -> Option<usize> {
    match status {
        0x00..=0x7F => None,
        0x80..=0xEF => match status & 0xF0 {
            PROGRAM_CHANGE | CHANNEL_PRESSURE => Some(2),
            _ => Some(3),
        },
        SONG_POSITION => Some(3),
        MTC_QUARTER_FRAME | SONG_SELECT => Some(2),
        BUS_SELECT | TUNE_REQUEST | END_SYSEX => Some(1),
        CLOCK | START | CONTINUE | STOP | ACTIVE_SENSING | SYSTEM_RESET => Some(1),
        _ => None,
    }
}

/// True for the single-byte realtime range `F8..=FF`.
#[inline]
pub fn is_realtime_byte(byte: u8) -> bool {
    byte > END_SYSEX
}
