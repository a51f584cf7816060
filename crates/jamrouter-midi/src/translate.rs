//! Per-channel translation maps applied to graph-originated messages.
//!
//! Map strings use 1-based channels, e.g. `"1,2,74"` for a key map from
//! channel 1 to controller 74 on channel 2.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::message::{MidiMessage, PITCH_BEND_CENTER};

/// Notes on `rx_channel` become `controller` (value = note number) on
/// `tx_channel`. Note-offs are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMap {
    pub rx_channel: u8,
    pub tx_channel: u8,
    pub controller: u8,
}

/// Notes within `center_note ± bend_range` on `rx_channel` become pitch
/// bend on `tx_channel`. Other notes and note-offs are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PitchMap {
    pub rx_channel: u8,
    pub tx_channel: u8,
    pub center_note: u8,
    pub bend_range: u8,
}

/// Pitch bend on `rx_channel` becomes `controller` (value = bend MSB) on
/// `tx_channel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PitchControl {
    pub rx_channel: u8,
    pub tx_channel: u8,
    pub controller: u8,
}

fn parse_fields<const N: usize>(s: &str, what: &str) -> Result<[u8; N]> {
    let mut out = [0u8; N];
    let mut parts = s.split(',').map(str::trim);
    for slot in out.iter_mut() {
        let part = parts
            .next()
            .ok_or_else(|| Error::InvalidMap(format!("{what} needs {N} fields: {s:?}")))?;
        *slot = part
            .parse()
            .map_err(|_| Error::InvalidMap(format!("{what}: bad number {part:?}")))?;
    }
    if parts.next().is_some() {
        return Err(Error::InvalidMap(format!("{what} has extra fields: {s:?}")));
    }
    Ok(out)
}

fn channel_from_user(ch: u8, what: &str) -> Result<u8> {
    if (1..=16).contains(&ch) {
        Ok(ch - 1)
    } else {
        Err(Error::InvalidMap(format!("{what}: channel {ch} not in 1-16")))
    }
}

impl FromStr for KeyMap {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let [rx, tx, cc] = parse_fields::<3>(s, "keymap")?;
        Ok(Self {
            rx_channel: channel_from_user(rx, "keymap")?,
            tx_channel: channel_from_user(tx, "keymap")?,
            controller: cc & 0x7F,
        })
    }
}

impl FromStr for PitchMap {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let [rx, tx, center, range] = parse_fields::<4>(s, "pitchmap")?;
        Ok(Self {
            rx_channel: channel_from_user(rx, "pitchmap")?,
            tx_channel: channel_from_user(tx, "pitchmap")?,
            center_note: center & 0x7F,
            bend_range: range & 0x7F,
        })
    }
}

impl FromStr for PitchControl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let [rx, tx, cc] = parse_fields::<3>(s, "pitchcontrol")?;
        Ok(Self {
            rx_channel: channel_from_user(rx, "pitchcontrol")?,
            tx_channel: channel_from_user(tx, "pitchcontrol")?,
            controller: cc & 0x7F,
        })
    }
}

/// Result of running a message through a [`Translator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Translation {
    /// No map applies.
    Unchanged(MidiMessage),
    /// A map rewrote the message.
    Translated(MidiMessage),
    /// A map consumed the message.
    Dropped,
}

/// Channel-indexed lookup of the configured maps.
#[derive(Debug, Clone, Default)]
pub struct Translator {
    keymap: [Option<KeyMap>; 16],
    pitchmap: [Option<PitchMap>; 16],
    pitchcontrol: [Option<PitchControl>; 16],
}

impl Translator {
    pub fn new(keymaps: &[KeyMap], pitchmaps: &[PitchMap], pitchcontrols: &[PitchControl]) -> Self {
        let mut t = Self::default();
        for m in keymaps {
            t.keymap[(m.rx_channel & 0x0F) as usize] = Some(*m);
        }
        for m in pitchmaps {
            t.pitchmap[(m.rx_channel & 0x0F) as usize] = Some(*m);
        }
        for m in pitchcontrols {
            t.pitchcontrol[(m.rx_channel & 0x0F) as usize] = Some(*m);
        }
        t
    }

    pub fn is_empty(&self) -> bool {
        self.keymap.iter().all(Option::is_none)
            && self.pitchmap.iter().all(Option::is_none)
            && self.pitchcontrol.iter().all(Option::is_none)
    }

    pub fn translate(&self, msg: MidiMessage) -> Translation {
        match msg {
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            }
            | MidiMessage::NoteOff {
                channel,
                note,
                velocity,
            } => {
                let sounding = matches!(msg, MidiMessage::NoteOn { .. }) && velocity > 0;
                if let Some(map) = self.keymap[channel as usize] {
                    if !sounding {
                        return Translation::Dropped;
                    }
                    return Translation::Translated(MidiMessage::controller(
                        map.tx_channel,
                        map.controller,
                        note,
                    ));
                }
                if let Some(map) = self.pitchmap[channel as usize] {
                    return match pitch_for_note(&map, note) {
                        Some(value) if sounding => {
                            Translation::Translated(MidiMessage::pitch_bend(map.tx_channel, value))
                        }
                        _ => Translation::Dropped,
                    };
                }
                Translation::Unchanged(msg)
            }
            MidiMessage::PitchBend { channel, value } => match self.pitchcontrol[channel as usize] {
                Some(map) => Translation::Translated(MidiMessage::controller(
                    map.tx_channel,
                    map.controller,
                    ((value >> 7) & 0x7F) as u8,
                )),
                None => Translation::Unchanged(msg),
            },
            _ => Translation::Unchanged(msg),
        }
    }
}

fn pitch_for_note(map: &PitchMap, note: u8) -> Option<u16> {
    let offset = note as i32 - map.center_note as i32;
    let range = map.bend_range as i32;
    if offset.abs() > range {
        return None;
    }
    if range == 0 {
        return Some(PITCH_BEND_CENTER);
    }
    let bend = 8191.0 * offset as f64 / range as f64 + PITCH_BEND_CENTER as f64;
    Some((bend as i32 as u16) & 0x3FFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_maps() {
        let k: KeyMap = "1,2,74".parse().unwrap();
        assert_eq!(
            k,
            KeyMap {
                rx_channel: 0,
                tx_channel: 1,
                controller: 74
            }
        );
        let p: PitchMap = "10, 3, 60, 12".parse().unwrap();
        assert_eq!(p.rx_channel, 9);
        assert_eq!(p.bend_range, 12);
        assert!("0,2,74".parse::<KeyMap>().is_err());
        assert!("1,2".parse::<KeyMap>().is_err());
        assert!("1,2,3,4".parse::<PitchControl>().is_err());
    }

    #[test]
    fn test_keymap() {
        let t = Translator::new(&["1,2,74".parse().unwrap()], &[], &[]);
        assert_eq!(
            t.translate(MidiMessage::note_on(0, 60, 100)),
            Translation::Translated(MidiMessage::controller(1, 74, 60))
        );
        assert_eq!(t.translate(MidiMessage::note_on(0, 60, 0)), Translation::Dropped);
        assert_eq!(
            t.translate(MidiMessage::note_on(1, 60, 100)),
            Translation::Unchanged(MidiMessage::note_on(1, 60, 100))
        );
    }

    #[test]
    fn test_pitchmap() {
        let t = Translator::new(&[], &["1,1,60,12".parse().unwrap()], &[]);
        assert_eq!(
            t.translate(MidiMessage::note_on(0, 60, 1)),
            Translation::Translated(MidiMessage::pitch_bend(0, 8192))
        );
        assert_eq!(
            t.translate(MidiMessage::note_on(0, 72, 1)),
            Translation::Translated(MidiMessage::pitch_bend(0, 16383))
        );
        assert_eq!(
            t.translate(MidiMessage::note_on(0, 48, 1)),
            Translation::Translated(MidiMessage::pitch_bend(0, 1))
        );
        assert_eq!(t.translate(MidiMessage::note_on(0, 80, 1)), Translation::Dropped);
        assert_eq!(t.translate(MidiMessage::note_off(0, 60, 0)), Translation::Dropped);
    }

    #[test]
    fn test_pitchcontrol_uses_msb() {
        let t = Translator::new(&[], &[], &["3,4,1".parse().unwrap()]);
        assert_eq!(
            t.translate(MidiMessage::pitch_bend(2, 0x2000)),
            Translation::Translated(MidiMessage::controller(3, 1, 0x40))
        );
    }

    #[test]
    fn test_empty_translator() {
        assert!(Translator::default().is_empty());
        assert!(!Translator::new(&["1,1,1".parse().unwrap()], &[], &[]).is_empty());
    }
}
