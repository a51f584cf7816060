//! # JAMRouter - Realtime MIDI Bridge
//!
//! Routes MIDI between a hardware port and an audio-cycle graph with
//! sample-accurate, phase-locked timing.
//!
//! ## Architecture
//!
//! JAMRouter is an umbrella crate that coordinates:
//! - **jamrouter-midi** - Message model, byte parser/encoder, note translations
//! - **jamrouter-core** - Clock recovery, period ring, lock-free event queue, note tracking
//! - **jamrouter-io** - Rx/Tx threads, graph cycle, device drivers, watchdog
//!
//! ## Quick Start
//!
//! ```no_run
//! use jamrouter::prelude::*;
//!
//! let mut router = JamRouter::builder().period_size(128).build()?;
//! let (mut input, mut output) = router.take_graph_ports().expect("ports");
//! router.start()?;
//!
//! // Graph side, once per audio cycle in the host
//! input.send(0, &MidiMessage::note_on(0, 60, 100), &[]);
//! let mut sysex = Vec::new();
//! while let Some(event) = output.recv(&mut sysex) {
//!     println!("frame {}: {:?}", event.frame, event.message);
//! }
//! # Ok::<(), jamrouter::Error>(())
//! ```
//!
//! ## Feature Flags
//!
//! - `default` - Loopback transport and timer-clocked graph
//! - `midi-io` - Hardware MIDI ports
//! - `audio-io` - System audio device as the graph clock
//! - `full` - Everything enabled

/// Re-export of jamrouter-core for direct access
pub use jamrouter_core as core;
/// Re-export of jamrouter-io for direct access
pub use jamrouter_io as io;
/// Re-export of jamrouter-midi for direct access
pub use jamrouter_midi as midi;

pub use jamrouter_core::{
    ActiveSensingMode, Clock, ClockRecovery, ManualClock, MonotonicClock, QueueConfig, SyncContext,
    TimingConfig,
};
pub use jamrouter_io::{
    ChoreographerConfig, GraphEvent, GraphInput, GraphOutput, LoopbackDevice, RouterOptions,
    ShutdownHandle, Subsystem, SubsystemState, ThreadPriorities, WatchdogReport,
};
pub use jamrouter_midi::MidiMessage;

pub mod error;
pub use error::{Error, Result};

pub mod config;
pub use config::{AudioConfig, AudioDriverKind, MidiConfig, MidiDriverKind, RouterConfig, WatchdogConfig};

pub mod logging;
pub use logging::{LogGuard, LoggingConfig};

mod builder;
pub use builder::JamRouterBuilder;

mod router;
pub use router::JamRouter;

/// Convenient imports for common use cases
pub mod prelude {
    pub use crate::{
        Error, GraphEvent, GraphInput, GraphOutput, JamRouter, JamRouterBuilder, MidiMessage,
        Result, RouterConfig, Subsystem,
    };
}
