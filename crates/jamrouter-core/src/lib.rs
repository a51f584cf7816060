//! Realtime synchronization engine for JAMRouter.
//!
//! # Primary API
//!
//! - [`SyncContext`]: the shared arena handed to every thread
//! - [`ClockRecovery`] / [`ClockWriter`]: wall clock to `(period, frame)` mapping
//! - [`EventQueue`]: frame-indexed queues between hardware and graph
//! - [`NoteTracker`]: held keys per channel
//! - [`ActiveSensingTimer`]: silence detection
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use jamrouter_core::{ManualClock, QueueConfig, QueueId, SyncContext, TimingConfig};
//! use jamrouter_midi::MidiMessage;
//!
//! let clock = Arc::new(ManualClock::new(0));
//! let ctx = SyncContext::new(TimingConfig::default(), QueueConfig::default(), clock)?;
//! let mut writer = ctx.recovery().writer(48_000)?;
//! let period = writer.advance(0, 256);
//!
//! let p = ctx.recovery().period(period);
//! ctx.queue()
//!     .append_copy(&p, QueueId::ToHardware, &MidiMessage::note_on(0, 60, 100), &[], 10, p.tx_index);
//!
//! let mut last = p.prev;
//! let mut batch = ctx.queue().detach(QueueId::ToHardware, &mut last, period, 10);
//! assert_eq!(batch.next_event().map(|e| e.message), Some(MidiMessage::note_on(0, 60, 100)));
//! # Ok::<(), jamrouter_core::Error>(())
//! ```

pub mod error;
pub use error::{Error, Result};

pub mod clock;
pub use clock::{Clock, ManualClock, MonotonicClock};

pub mod config;
pub use config::{ActiveSensingMode, QueueConfig, TimingConfig};

pub(crate) mod lockfree;
pub use lockfree::{AtomicDeadline, AtomicFlag};

pub mod sync;
pub use sync::{ClockRecovery, ClockWriter, FrameFlags, Period, PeriodLayout, PhaseZone};

pub mod queue;
pub use queue::{Appended, Detached, EventId, EventQueue, EventRef, EventState, NoteOffStyle, QueueId};

mod notes;
pub use notes::NoteTracker;

mod sensing;
pub use sensing::{ActiveSensingTimer, SensingStatus, ACTIVE_SENSING_TIMEOUT_NS};

mod context;
pub use context::SyncContext;

/// Storage for queue positions across the whole ring.
pub const MAX_BUFFER_SIZE: usize = 8192;
/// Upper bound on ring length.
pub const MAX_BUFFER_PERIODS: usize = 16;
pub const DEFAULT_BUFFER_PERIODS: usize = 4;
pub const DEFAULT_BUFFER_PERIOD_SIZE: u32 = 256;
pub const DEFAULT_LATENCY_PERIODS: u32 = 1;
