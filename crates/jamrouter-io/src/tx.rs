//! Hardware transmit thread.
//!
//! Wakes at each period boundary, walks the period frame by frame and
//! writes every event due at a frame once the clock reaches it.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use jamrouter_core::{Detached, QueueId, SyncContext};
use jamrouter_midi::{MidiEncoder, MidiMessage, SysExFraming, ALL_NOTES_OFF, SYSEX_BUFFER_SIZE};
use tracing::{error, info, trace};

use crate::options::RouterOptions;
use crate::thread::{keep_running, realtime_priority, spawn_with_priority, RunningGuard, ThreadStatus};
use crate::transport::ByteWriter;
use crate::Result;

pub const TX_THREAD_NAME: &str = "jamrouter-tx";

const IDLE_WAIT: Duration = Duration::from_millis(1);

/// Note rewriting applied on the way out.
#[derive(Debug, Clone, Copy)]
struct NoteRewrite {
    note_on_velocity: u8,
    note_off_velocity: u8,
    real_note_off: bool,
    all_notes_off: bool,
}

impl NoteRewrite {
    fn apply(&self, message: MidiMessage, silenced: u16) -> Option<MidiMessage> {
        let message = match message {
            MidiMessage::NoteOn {
                channel,
                note,
                velocity: 0,
            } => {
                if self.real_note_off {
                    MidiMessage::note_off(channel, note, self.note_off_velocity)
                } else {
                    MidiMessage::note_on(channel, note, self.note_off_velocity)
                }
            }
            MidiMessage::NoteOn { channel, note, .. } if self.note_on_velocity != 0 => {
                MidiMessage::note_on(channel, note, self.note_on_velocity)
            }
            MidiMessage::NoteOff { channel, note, .. } if self.note_off_velocity != 0 => {
                MidiMessage::note_off(channel, note, self.note_off_velocity)
            }
            other => other,
        };

        // An All Notes Off in the same batch already releases the channel.
        let suppressed = match message {
            MidiMessage::NoteOn {
                channel, velocity, ..
            } => velocity == self.note_off_velocity && silenced & (1 << channel) != 0,
            MidiMessage::NoteOff { channel, .. } => silenced & (1 << channel) != 0,
            _ => false,
        };
        (!suppressed).then_some(message)
    }

    /// Channels with an All Notes Off pending in `batch`.
    fn silenced_channels(&self, batch: &Detached<'_>) -> u16 {
        if !self.all_notes_off {
            return 0;
        }
        batch
            .peek()
            .filter_map(|m| match m {
                MidiMessage::Controller {
                    channel,
                    controller: ALL_NOTES_OFF,
                    ..
                } => Some(1u16 << (channel & 0x0F)),
                _ => None,
            })
            .fold(0, |mask, bit| mask | bit)
    }
}

/// Dequeues and writes hardware-bound events.
pub(crate) struct Transmitter {
    rewrite: NoteRewrite,
    encoder: MidiEncoder,
    framing: SysExFraming,
    byte_guard: i64,
    event_guard: i64,
    raw_bytes: bool,
    wire: Vec<u8>,
    framed: Vec<u8>,
}

impl Transmitter {
    pub(crate) fn new(options: &RouterOptions, framing: SysExFraming, raw_bytes: bool) -> Self {
        Self {
            rewrite: NoteRewrite {
                note_on_velocity: options.note_on_velocity,
                note_off_velocity: options.note_off_velocity,
                real_note_off: options.tx_real_note_off,
                all_notes_off: options.tx_all_notes_off,
            },
            encoder: MidiEncoder::new(options.running_status && raw_bytes),
            framing,
            byte_guard: guard_nanos(options.byte_guard_time_us),
            event_guard: guard_nanos(options.event_guard_time_us),
            raw_bytes,
            wire: Vec::with_capacity(SYSEX_BUFFER_SIZE),
            framed: Vec::with_capacity(SYSEX_BUFFER_SIZE),
        }
    }

    /// Writes every event due in `period`. Returns the number written.
    pub(crate) fn send_period(
        &mut self,
        ctx: &SyncContext,
        writer: &mut dyn ByteWriter,
        last: &mut usize,
        period: usize,
    ) -> Result<usize> {
        let size = ctx.recovery().period(period).size;
        let mut sent = 0;
        for frame in 0..size {
            sent += self.send_frame(ctx, writer, last, period, frame)?;
        }
        Ok(sent)
    }

    fn send_frame(
        &mut self,
        ctx: &SyncContext,
        writer: &mut dyn ByteWriter,
        last: &mut usize,
        period: usize,
        frame: u32,
    ) -> Result<usize> {
        let mut sent = 0;
        let mut slept = false;
        loop {
            let mut batch = ctx.queue().detach(QueueId::ToHardware, last, period, frame);
            if batch.is_empty() {
                break;
            }
            let late = batch.is_late();
            if !late && !slept {
                ctx.recovery().sleep_until_frame(period, frame as i32);
                slept = true;
            }

            let silenced = self.rewrite.silenced_channels(&batch);
            while let Some(event) = batch.next_event() {
                let Some(message) = self.rewrite.apply(event.message, silenced) else {
                    trace!(target: "jamrouter::stream", message = ?event.message, "note-off covered by all notes off");
                    continue;
                };
                self.write_event(ctx, writer, &message, event.sysex)?;
                sent += 1;
            }
            if !late {
                break;
            }
        }
        Ok(sent)
    }

    fn write_event(
        &mut self,
        ctx: &SyncContext,
        writer: &mut dyn ByteWriter,
        message: &MidiMessage,
        sysex: &[u8],
    ) -> Result<()> {
        self.wire.clear();
        if let MidiMessage::SysEx = message {
            self.framing.to_hardware(sysex, &mut self.framed);
            self.encoder.encode(message, &self.framed, &mut self.wire);
        } else {
            self.encoder.encode(message, &[], &mut self.wire);
        }

        let clock = ctx.recovery().clock();
        if self.byte_guard > 0 && self.raw_bytes {
            for byte in &self.wire {
                writer.write(std::slice::from_ref(byte))?;
                clock.sleep_until(clock.now() + self.byte_guard);
            }
        } else {
            writer.write(&self.wire)?;
        }
        if self.event_guard > 0 {
            clock.sleep_until(clock.now() + self.event_guard);
        }
        Ok(())
    }
}

/// Starts the Tx thread on `writer`. The thread owns the writer and closes
/// it on exit.
pub(crate) fn spawn_tx(
    ctx: Arc<SyncContext>,
    mut writer: Box<dyn ByteWriter>,
    options: &RouterOptions,
    status: Arc<ThreadStatus>,
    shutdown: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let framing = ctx.queue().config().framing();
    let mut tx = Transmitter::new(options, framing, writer.raw_bytes());
    status.starting();
    let guard = RunningGuard::new(Arc::clone(&status), TX_THREAD_NAME);

    spawn_with_priority(TX_THREAD_NAME, realtime_priority(options.priorities.tx), move || {
        let _guard = guard;
        info!(target: "jamrouter::init", "MIDI Tx thread running");
        status.signal_ready();

        let recovery = Arc::clone(ctx.recovery());
        let mut period = recovery.active();
        let mut last = period;
        let mut synced = false;
        while keep_running(&status, &shutdown) {
            if !recovery.is_running() {
                synced = false;
                thread::sleep(IDLE_WAIT);
                continue;
            }
            if !synced {
                period = recovery.period_for(ctx.now());
                last = period;
                synced = true;
            }

            let next = recovery.sleep_until_period_boundary(period);
            if let Err(e) = tx.send_period(&ctx, writer.as_mut(), &mut last, next) {
                error!(target: "jamrouter::driver", "MIDI output lost: {e}");
                break;
            }
            period = next;
        }
    })
}

/// Microseconds to nanoseconds, saturating for unvalidated options.
fn guard_nanos(us: u64) -> i64 {
    i64::try_from(us).unwrap_or(i64::MAX).saturating_mul(1_000)
}
