//! Property tests for the byte-stream parser.

use jamrouter_midi::{MidiEncoder, MidiMessage, MidiParser, Parsed, SYSEX_BUFFER_SIZE};
use proptest::prelude::*;

fn parse(bytes: &[u8]) -> Vec<(MidiMessage, Vec<u8>)> {
    let mut parser = MidiParser::default();
    let mut out = Vec::new();
    for &b in bytes {
        parser.push(b, |item| match item {
            Parsed::Message(m) => out.push((m, Vec::new())),
            Parsed::SysEx(data) => out.push((MidiMessage::SysEx, data.to_vec())),
        });
    }
    out
}

proptest! {
    #[test]
    fn prop_realtime_bytes_are_transparent(
        notes in prop::collection::vec((0u8..16, 0u8..128, 0u8..128), 1..32),
        clocks in prop::collection::vec(any::<prop::sample::Index>(), 0..16),
        running_status in any::<bool>(),
    ) {
        let sent: Vec<MidiMessage> = notes
            .iter()
            .map(|&(c, n, v)| MidiMessage::note_on(c, n, v))
            .collect();
        let mut encoder = MidiEncoder::new(running_status);
        let mut wire = Vec::new();
        for m in &sent {
            encoder.encode(m, &[], &mut wire);
        }

        let mut at: Vec<usize> = clocks.iter().map(|i| i.index(wire.len() + 1)).collect();
        at.sort_unstable_by(|a, b| b.cmp(a));
        for &i in &at {
            wire.insert(i, 0xF8);
        }

        let parsed = parse(&wire);
        let (clock, other): (Vec<_>, Vec<_>) =
            parsed.into_iter().partition(|(m, _)| *m == MidiMessage::Clock);
        prop_assert_eq!(clock.len(), at.len());
        let other: Vec<MidiMessage> = other.into_iter().map(|(m, _)| m).collect();
        prop_assert_eq!(other, sent);
    }

    #[test]
    fn prop_sysex_always_framed(bytes in prop::collection::vec(any::<u8>(), 0..2048)) {
        for (message, payload) in parse(&bytes) {
            if message == MidiMessage::SysEx {
                prop_assert_eq!(payload.first(), Some(&0xF0));
                prop_assert_eq!(payload.last(), Some(&0xF7));
                prop_assert!(payload.len() <= SYSEX_BUFFER_SIZE);
            }
        }
    }
}
