//! JAMRouter I/O: the threads and devices around the sync engine.
//!
//! - [`transport`]: MIDI byte streams ([`LoopbackTransport`], `MidirTransport`)
//! - [`audio`]: drivers that clock the graph cycle ([`TimerAudioDriver`], `CpalAudioDriver`)
//! - [`GraphCycle`]: per-callback processing and the host event rings
//! - [`ThreadChoreographer`]: startup order, watchdog and restarts
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use jamrouter_core::{QueueConfig, SyncContext, TimingConfig};
//! use jamrouter_io::{
//!     ChoreographerConfig, GraphCycle, LoopbackTransport, RouterOptions, ThreadChoreographer,
//!     TimerAudioDriver,
//! };
//!
//! let ctx = SyncContext::monotonic(TimingConfig::default(), QueueConfig::default())?;
//! let options = RouterOptions::default();
//! let (graph, _input, _output) = GraphCycle::new(Arc::clone(&ctx), &options, 1024)?;
//! let (transport, _device) = LoopbackTransport::new("loop");
//! let audio = TimerAudioDriver::new(Arc::clone(ctx.recovery().clock()), 48_000, 256, 66);
//!
//! let mut router = ThreadChoreographer::new(
//!     ctx,
//!     options,
//!     Box::new(transport),
//!     Box::new(audio),
//!     graph,
//!     ChoreographerConfig::default(),
//! );
//! router.start()?;
//! router.run_watchdog();
//! # Ok::<(), jamrouter_io::Error>(())
//! ```

pub mod error;
pub use error::{Error, Result};

pub mod options;
pub use options::{RouterOptions, ThreadPriorities, MAX_GUARD_TIME_US};

mod thread;
pub use thread::{realtime_priority, spawn_with_priority, SubsystemState};

pub mod transport;
pub use transport::{ByteReader, ByteWriter, LoopbackDevice, LoopbackTransport, MidiTransport};
#[cfg(feature = "midi-io")]
pub use transport::{MidirTransport, MidirTransportConfig};

pub mod audio;
pub use audio::{AudioDriver, AudioFormat, CycleFn, HaltHandle, TimerAudioDriver};
#[cfg(feature = "audio-io")]
pub use audio::{CpalAudioConfig, CpalAudioDriver};

pub mod graph;
pub use graph::{GraphCycle, GraphEvent, GraphInput, GraphOutput, GRAPH_EVENT_CAPACITY};

mod rx;
pub use rx::RX_THREAD_NAME;

mod tx;
pub use tx::TX_THREAD_NAME;

pub mod choreographer;
pub use choreographer::{
    ChoreographerConfig, ShutdownHandle, Subsystem, ThreadChoreographer, WatchdogReport,
};
