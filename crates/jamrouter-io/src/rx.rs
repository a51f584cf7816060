//! Hardware receive thread.
//!
//! Reads the device byte stream, stamps each message with the `(period,
//! frame)` its first byte arrived in, and queues it towards the graph
//! `rx_latency` periods later.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use jamrouter_core::{NoteOffStyle, NoteTracker, Period, QueueId, SensingStatus, SyncContext};
use jamrouter_midi::{MidiMessage, MidiParser, Parsed, ALL_NOTES_OFF};
use tracing::{debug, error, info, warn};

use crate::options::RouterOptions;
use crate::thread::{keep_running, realtime_priority, spawn_with_priority, RunningGuard, ThreadStatus};
use crate::transport::ByteReader;
use crate::Result;

pub const RX_THREAD_NAME: &str = "jamrouter-rx";

const READ_CHUNK: usize = 256;
const READ_TIMEOUT: Duration = Duration::from_millis(5);

/// Parser plus the queueing state it feeds.
pub(crate) struct Receiver {
    parser: MidiParser,
    sink: RxSink,
}

struct RxSink {
    ctx: Arc<SyncContext>,
    tracker: NoteTracker,
    note_off_velocity: u8,
    real_note_off: bool,
    period: Period,
    frame: i32,
}

impl Receiver {
    pub(crate) fn new(ctx: Arc<SyncContext>, options: &RouterOptions) -> Self {
        let framing = ctx.queue().config().framing();
        let period = ctx.recovery().active_period();
        Self {
            parser: MidiParser::new(framing),
            sink: RxSink {
                ctx,
                tracker: NoteTracker::new(),
                note_off_velocity: options.note_off_velocity,
                real_note_off: options.rx_real_note_off,
                period,
                frame: 0,
            },
        }
    }

    /// Feeds bytes read at `now`. Every message starting in this chunk is
    /// timestamped with `now`.
    pub(crate) fn receive(&mut self, bytes: &[u8], now: i64) {
        for &byte in bytes {
            if self.parser.is_idle() {
                self.sink.stamp(now);
            }
            let sink = &mut self.sink;
            self.parser.push(byte, |item| sink.dispatch(item));
        }
    }

    /// Releases held notes when the device stopped sending Active Sensing.
    pub(crate) fn check_sensing(&mut self, now: i64) {
        let sink = &mut self.sink;
        let recovery = sink.ctx.recovery();
        let p = recovery.period(recovery.period_for(now));
        if sink.ctx.sensing().check(QueueId::ToGraph, p.end_time) != SensingStatus::TimedOut {
            return;
        }
        warn!(target: "jamrouter::event", "active sensing timeout on hardware input");
        for channel in 0..16 {
            sink.ctx.queue().queue_notes_off(
                &p,
                QueueId::ToGraph,
                channel,
                0,
                p.rx_index,
                &mut sink.tracker,
                NoteOffStyle {
                    real_note_off: sink.real_note_off,
                    velocity: 0,
                },
            );
        }
    }
}

impl RxSink {
    fn stamp(&mut self, now: i64) {
        let recovery = self.ctx.recovery();
        let (period, frame) = recovery.locate(now);
        self.period = recovery.period(period);
        self.frame = frame;
    }

    fn dispatch(&mut self, item: Parsed<'_>) {
        let p = &self.period;
        let queue = self.ctx.queue();
        match item {
            Parsed::SysEx(payload) => {
                queue.append_copy(p, QueueId::ToGraph, &MidiMessage::SysEx, payload, self.frame, p.rx_index);
            }
            Parsed::Message(MidiMessage::Controller {
                channel,
                controller: ALL_NOTES_OFF,
                ..
            }) => {
                let style = NoteOffStyle {
                    real_note_off: self.real_note_off,
                    velocity: 0,
                };
                queue.queue_notes_off(p, QueueId::ToGraph, channel, self.frame, p.rx_index, &mut self.tracker, style);
            }
            Parsed::Message(message) => {
                let message = track_notes(
                    message,
                    &mut self.tracker,
                    self.note_off_velocity,
                    self.real_note_off,
                );
                queue.append_copy(p, QueueId::ToGraph, &message, &[], self.frame, p.rx_index);
            }
        }
    }
}

/// Normalizes hardware note-offs to velocity 0 and records held keys.
fn track_notes(
    message: MidiMessage,
    tracker: &mut NoteTracker,
    note_off_velocity: u8,
    real_note_off: bool,
) -> MidiMessage {
    match message {
        MidiMessage::NoteOn { channel, note, .. } | MidiMessage::NoteOff { channel, note, .. }
            if message.is_note_off(note_off_velocity) =>
        {
            tracker.note_off(channel, note);
            if real_note_off {
                MidiMessage::note_off(channel, note, 0)
            } else {
                MidiMessage::note_on(channel, note, 0)
            }
        }
        MidiMessage::NoteOn { channel, note, .. } => {
            tracker.note_on(channel, note);
            message
        }
        other => other,
    }
}

/// Starts the Rx thread on `reader`. The thread owns the reader and closes
/// it on exit.
pub(crate) fn spawn_rx(
    ctx: Arc<SyncContext>,
    mut reader: Box<dyn ByteReader>,
    options: &RouterOptions,
    status: Arc<ThreadStatus>,
    shutdown: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let mut receiver = Receiver::new(Arc::clone(&ctx), options);
    status.starting();
    let guard = RunningGuard::new(Arc::clone(&status), RX_THREAD_NAME);

    spawn_with_priority(RX_THREAD_NAME, realtime_priority(options.priorities.rx), move || {
        let _guard = guard;
        if let Err(e) = reader.flush() {
            debug!(target: "jamrouter::driver", "input flush failed: {e}");
        }
        info!(target: "jamrouter::init", "MIDI Rx thread running");
        status.signal_ready();

        let mut buf = [0u8; READ_CHUNK];
        while keep_running(&status, &shutdown) {
            match reader.read(&mut buf, READ_TIMEOUT) {
                Ok(0) => {}
                Ok(n) => receiver.receive(&buf[..n], ctx.now()),
                Err(e) => {
                    error!(target: "jamrouter::driver", "MIDI input lost: {e}");
                    break;
                }
            }
            receiver.check_sensing(ctx.now());
        }
    })
}
