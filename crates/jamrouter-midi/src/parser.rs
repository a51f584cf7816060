//! Streaming MIDI byte parser.
//!
//! Turns a raw byte stream (serial, rawmidi, `midir`) into messages. Handles
//! running status, realtime bytes interleaved inside other messages, and
//! SysEx with a configurable hardware terminator.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::message::{
    expected_len, is_realtime_byte, MidiMessage, END_SYSEX, SYSEX, SYSEX_BUFFER_SIZE,
};

/// How SysEx messages are terminated on the hardware side.
///
/// Some older devices end SysEx with a byte other than `F7`, or with a
/// two-byte sequence. On the graph side SysEx always ends with `F7`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysExFraming {
    /// End-of-SysEx byte (default: `0xF7`)
    pub terminator: u8,
    /// Optional byte that must follow `terminator` (default: none)
    pub extra_terminator: Option<u8>,
}

impl Default for SysExFraming {
    fn default() -> Self {
        Self {
            terminator: END_SYSEX,
            extra_terminator: None,
        }
    }
}

impl SysExFraming {
    /// Converts a graph-side SysEx payload (`F0 .. F7`) to hardware framing.
    ///
    /// The output is truncated to [`SYSEX_BUFFER_SIZE`].
    pub fn to_hardware(&self, payload: &[u8], out: &mut Vec<u8>) {
        out.clear();
        let body = match payload.last() {
            Some(&END_SYSEX) => &payload[..payload.len() - 1],
            _ => payload,
        };
        let reserved = 1 + usize::from(self.extra_terminator.is_some());
        let take = body.len().min(SYSEX_BUFFER_SIZE - reserved);
        out.extend_from_slice(&body[..take]);
        out.push(self.terminator);
        if let Some(extra) = self.extra_terminator {
            out.push(extra);
        }
    }
}

/// A decoded item from [`MidiParser::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parsed<'a> {
    Message(MidiMessage),
    /// Complete SysEx, `F0 .. F7`, terminator normalized to `F7`.
    SysEx(&'a [u8]),
}

#[derive(Debug)]
pub struct MidiParser {
    framing: SysExFraming,
    running_status: Option<u8>,
    status: Option<u8>,
    data: [u8; 2],
    data_len: usize,
    in_sysex: bool,
    pending_terminator: bool,
    sysex: Vec<u8>,
    realtime: SmallVec<[u8; 8]>,
}

impl Default for MidiParser {
    fn default() -> Self {
        Self::new(SysExFraming::default())
    }
}

impl MidiParser {
    pub fn new(framing: SysExFraming) -> Self {
        Self {
            framing,
            running_status: None,
            status: None,
            data: [0; 2],
            data_len: 0,
            in_sysex: false,
            pending_terminator: false,
            sysex: Vec::with_capacity(SYSEX_BUFFER_SIZE),
            realtime: SmallVec::new(),
        }
    }

    /// True when no message is partially received.
    ///
    /// The next non-realtime byte starts a new message, so this is where
    /// callers take the message's timestamp.
    pub fn is_idle(&self) -> bool {
        !self.in_sysex && self.status.is_none()
    }

    pub fn running_status(&self) -> Option<u8> {
        self.running_status
    }

    /// Drops any partial message and running status.
    pub fn reset(&mut self) {
        self.running_status = None;
        self.status = None;
        self.data_len = 0;
        self.in_sysex = false;
        self.pending_terminator = false;
        self.sysex.clear();
        self.realtime.clear();
    }

    /// Feeds one byte. Completed items are passed to `sink` in wire order;
    /// realtime bytes received inside a message follow that message.
    pub fn push(&mut self, byte: u8, mut sink: impl FnMut(Parsed<'_>)) {
        if self.in_sysex {
            self.push_sysex(byte, &mut sink);
            return;
        }

        if is_realtime_byte(byte) {
            match MidiMessage::realtime(byte) {
                Some(msg) if self.status.is_some() => {
                    if self.realtime.len() < self.realtime.inline_size() {
                        self.realtime.push(byte);
                    } else {
                        sink(Parsed::Message(msg));
                    }
                }
                Some(msg) => sink(Parsed::Message(msg)),
                None => debug!(target: "jamrouter::stream", "ignoring undefined byte {byte:#04X}"),
            }
            return;
        }

        if byte >= 0x80 {
            self.start_message(byte, &mut sink);
            return;
        }

        let status = match self.status.or(self.running_status) {
            Some(status) => status,
            None => {
                debug!(target: "jamrouter::stream", "dropping stray data byte {byte:#04X}");
                return;
            }
        };
        self.status = Some(status);
        self.data[self.data_len] = byte;
        self.data_len += 1;

        let expected = expected_len(status).unwrap_or(1);
        if self.data_len + 1 >= expected {
            if let Ok(msg) = MidiMessage::from_bytes(status, self.data[0], self.data[1]) {
                sink(Parsed::Message(msg));
            }
            self.status = None;
            self.data_len = 0;
            self.flush_realtime(&mut sink);
        }
    }

    fn start_message(&mut self, status: u8, sink: &mut impl FnMut(Parsed<'_>)) {
        if self.status.take().is_some() {
            debug!(target: "jamrouter::stream", "incomplete message dropped by status {status:#04X}");
            self.data_len = 0;
            self.flush_realtime(sink);
        }

        if status < SYSEX {
            self.running_status = Some(status);
            self.status = Some(status);
            return;
        }

        self.running_status = None;
        match status {
            SYSEX => {
                self.in_sysex = true;
                self.pending_terminator = false;
                self.sysex.clear();
                self.sysex.push(SYSEX);
            }
            _ => match expected_len(status) {
                Some(1) => {
                    if let Ok(msg) = MidiMessage::from_bytes(status, 0, 0) {
                        sink(Parsed::Message(msg));
                    }
                }
                Some(_) => self.status = Some(status),
                None => {
                    debug!(target: "jamrouter::stream", "ignoring undefined status {status:#04X}")
                }
            },
        }
    }

    fn push_sysex(&mut self, byte: u8, sink: &mut impl FnMut(Parsed<'_>)) {
        if self.pending_terminator {
            self.pending_terminator = false;
            if Some(byte) == self.framing.extra_terminator {
                self.finish_sysex(sink);
                return;
            }
            // The lone terminator byte turned out to be payload.
            self.sysex.push(self.framing.terminator);
            if self.sysex_full(sink) {
                return;
            }
        }

        if byte == self.framing.terminator {
            if self.framing.extra_terminator.is_none() {
                self.finish_sysex(sink);
            } else {
                self.pending_terminator = true;
            }
            return;
        }

        if is_realtime_byte(byte) {
            if self.realtime.len() < self.realtime.inline_size() {
                self.realtime.push(byte);
            } else if let Some(msg) = MidiMessage::realtime(byte) {
                sink(Parsed::Message(msg));
            }
            return;
        }

        self.sysex.push(byte);
        self.sysex_full(sink);
    }

    fn sysex_full(&mut self, sink: &mut impl FnMut(Parsed<'_>)) -> bool {
        if self.sysex.len() < SYSEX_BUFFER_SIZE - 1 {
            return false;
        }
        warn!(target: "jamrouter::stream", "SysEx truncated at {} bytes", SYSEX_BUFFER_SIZE);
        self.finish_sysex(sink);
        true
    }

    fn finish_sysex(&mut self, sink: &mut impl FnMut(Parsed<'_>)) {
        self.sysex.push(END_SYSEX);
        self.in_sysex = false;
        sink(Parsed::SysEx(&self.sysex));
        self.sysex.clear();
        self.flush_realtime(sink);
    }

    fn flush_realtime(&mut self, sink: &mut impl FnMut(Parsed<'_>)) {
        for &byte in self.realtime.iter() {
            if let Some(msg) = MidiMessage::realtime(byte) {
                sink(Parsed::Message(msg));
            }
        }
        self.realtime.clear();
    }
}

/// Serializes messages, optionally omitting repeated status bytes.
#[derive(Debug, Default)]
pub struct MidiEncoder {
    running_status: bool,
    last_status: Option<u8>,
}

impl MidiEncoder {
    pub fn new(running_status: bool) -> Self {
        Self {
            running_status,
            last_status: None,
        }
    }

    /// Appends the wire bytes for `msg` to `out`. SysEx writes `payload`
    /// verbatim.
    pub fn encode(&mut self, msg: &MidiMessage, payload: &[u8], out: &mut Vec<u8>) {
        if matches!(msg, MidiMessage::SysEx) {
            out.extend_from_slice(payload);
            self.last_status = None;
            return;
        }

        let bytes = msg.encode();
        if msg.is_realtime() {
            out.extend_from_slice(&bytes);
            return;
        }
        if msg.is_system_common() {
            out.extend_from_slice(&bytes);
            self.last_status = None;
            return;
        }

        let status = bytes[0];
        if self.running_status && self.last_status == Some(status) {
            match msg {
                // The LSB half repeats the status too.
                MidiMessage::Control14 { .. } => {
                    out.extend_from_slice(&bytes[1..3]);
                    out.extend_from_slice(&bytes[4..]);
                }
                _ => out.extend_from_slice(&bytes[1..]),
            }
        } else if self.running_status && matches!(msg, MidiMessage::Control14 { .. }) {
            out.extend_from_slice(&bytes[..3]);
            out.extend_from_slice(&bytes[4..]);
        } else {
            out.extend_from_slice(&bytes);
        }
        self.last_status = Some(status);
    }

    pub fn reset(&mut self) {
        self.last_status = None;
    }
}
