//! MIDI message layer for JAMRouter.
//!
//! Provides the message model shared by every router thread, a streaming
//! byte parser and encoder for raw MIDI ports, and the per-channel
//! translation maps applied to graph-originated messages.
//!
//! # Example
//!
//! ```
//! use jamrouter_midi::{MidiMessage, MidiParser, Parsed};
//!
//! let mut parser = MidiParser::default();
//! let mut notes = Vec::new();
//! for byte in [0x90, 60, 100, 64, 100] {
//!     parser.push(byte, |item| {
//!         if let Parsed::Message(msg) = item {
//!             notes.push(msg);
//!         }
//!     });
//! }
//! assert_eq!(notes[1], MidiMessage::note_on(0, 64, 100));
//! ```

pub mod error;
pub use error::{Error, Result};

pub mod message;
pub use message::{MidiMessage, ALL_NOTES_OFF, SYSEX_BUFFER_SIZE};

mod parser;
pub use parser::{MidiEncoder, MidiParser, Parsed, SysExFraming};

pub mod translate;
pub use translate::{KeyMap, PitchControl, PitchMap, Translation, Translator};
