//! Audio-cycle side of the router.
//!
//! [`GraphCycle::process`] runs once per audio callback. It advances clock
//! recovery, moves events the host handed in through [`GraphInput`] onto
//! the hardware-bound queue, and delivers hardware events due in this
//! period to [`GraphOutput`] with their frame offsets.
//!
//! Host hand-off uses SPSC rings: one for event headers and one for SysEx
//! payload bytes, so nothing on the cycle path allocates.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use jamrouter_core::{
    ClockWriter, NoteOffStyle, NoteTracker, Period, QueueId, SensingStatus, SyncContext,
};
use jamrouter_midi::{MidiMessage, Translation, Translator, ALL_NOTES_OFF, SYSEX_BUFFER_SIZE};
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::options::RouterOptions;
use crate::Result;

pub const GRAPH_EVENT_CAPACITY: usize = 1024;
const SYSEX_RING_CAPACITY: usize = SYSEX_BUFFER_SIZE * 4;
const ECHO_CAPACITY: usize = 64;

/// One message crossing the host boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphEvent {
    /// Frame offset within the cycle.
    pub frame: u32,
    pub message: MidiMessage,
    sysex_len: u16,
}

impl GraphEvent {
    /// Length of the SysEx payload that travels with this event.
    pub fn sysex_len(&self) -> usize {
        self.sysex_len as usize
    }
}

struct EventProducer {
    events: HeapProd<GraphEvent>,
    bytes: HeapProd<u8>,
}

impl EventProducer {
    fn push(&mut self, frame: u32, message: &MidiMessage, sysex: &[u8]) -> bool {
        let payload = match message {
            MidiMessage::SysEx => &sysex[..sysex.len().min(SYSEX_BUFFER_SIZE)],
            _ => &[][..],
        };
        if self.events.vacant_len() == 0 || self.bytes.vacant_len() < payload.len() {
            return false;
        }
        self.bytes.push_slice(payload);
        self.events
            .try_push(GraphEvent {
                frame,
                message: *message,
                sysex_len: payload.len() as u16,
            })
            .is_ok()
    }
}

struct EventConsumer {
    events: HeapCons<GraphEvent>,
    bytes: HeapCons<u8>,
}

impl EventConsumer {
    /// Pops one event, copying its payload into `sysex`. Returns the event
    /// and the payload length.
    fn pop(&mut self, sysex: &mut [u8]) -> Option<(GraphEvent, usize)> {
        let event = self.events.try_pop()?;
        let len = event.sysex_len().min(sysex.len());
        let n = self.bytes.pop_slice(&mut sysex[..len]);
        Some((event, n))
    }
}

fn event_ring(capacity: usize) -> (EventProducer, EventConsumer) {
    let (events_prod, events_cons) = HeapRb::<GraphEvent>::new(capacity).split();
    let (bytes_prod, bytes_cons) = HeapRb::<u8>::new(SYSEX_RING_CAPACITY).split();
    (
        EventProducer {
            events: events_prod,
            bytes: bytes_prod,
        },
        EventConsumer {
            events: events_cons,
            bytes: bytes_cons,
        },
    )
}

/// Host end feeding graph events towards the hardware.
///
/// Events pushed before a cycle are processed by that cycle, at their frame
/// offset.
pub struct GraphInput {
    ring: EventProducer,
}

impl GraphInput {
    /// Queues a message for the next cycle. False when the ring is full.
    pub fn send(&mut self, frame: u32, message: &MidiMessage, sysex: &[u8]) -> bool {
        self.ring.push(frame, message, sysex)
    }

    /// Queues one complete message given as wire bytes.
    pub fn send_bytes(&mut self, frame: u32, bytes: &[u8]) -> bool {
        match MidiMessage::parse(bytes) {
            Ok(message) => self.send(frame, &message, bytes),
            Err(e) => {
                debug!(target: "jamrouter::stream", "graph input rejected: {e}");
                false
            }
        }
    }
}

impl fmt::Debug for GraphInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphInput")
            .field("pending", &self.ring.events.occupied_len())
            .finish()
    }
}

/// Host end receiving hardware events.
pub struct GraphOutput {
    ring: EventConsumer,
    dropped: Arc<AtomicU64>,
}

impl GraphOutput {
    /// Next delivered event. A SysEx payload is copied into `sysex`, which
    /// is cleared for every other kind.
    pub fn recv(&mut self, sysex: &mut Vec<u8>) -> Option<GraphEvent> {
        sysex.clear();
        sysex.resize(SYSEX_BUFFER_SIZE, 0);
        match self.ring.pop(sysex) {
            Some((event, len)) => {
                sysex.truncate(len);
                Some(event)
            }
            None => {
                sysex.clear();
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.ring.events.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events lost because the host did not keep up.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for GraphOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphOutput")
            .field("pending", &self.len())
            .field("dropped", &self.dropped())
            .finish()
    }
}

/// Per-callback processor. Owns the clock writer and the graph-to-hardware
/// note tracker.
pub struct GraphCycle {
    ctx: Arc<SyncContext>,
    writer: ClockWriter,
    period: usize,
    tracker: NoteTracker,
    translator: Translator,
    tx_all_notes_off: bool,
    echo_translations: bool,
    input: EventConsumer,
    output: EventProducer,
    dropped: Arc<AtomicU64>,
    echo: SmallVec<[(u32, MidiMessage); ECHO_CAPACITY]>,
    scratch: Box<[u8; SYSEX_BUFFER_SIZE]>,
}

impl fmt::Debug for GraphCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphCycle")
            .field("period", &self.period)
            .field("writer", &self.writer)
            .finish()
    }
}

impl GraphCycle {
    /// Claims the clock writer and creates the host hand-off rings.
    pub fn new(
        ctx: Arc<SyncContext>,
        options: &RouterOptions,
        capacity: usize,
    ) -> Result<(Self, GraphInput, GraphOutput)> {
        let translator = options.translator()?;
        let sample_rate = ctx.recovery().timing().sample_rate;
        let writer = ctx.recovery().writer(sample_rate)?;
        let period = ctx.recovery().active();

        let (in_prod, in_cons) = event_ring(capacity);
        let (out_prod, out_cons) = event_ring(capacity);
        let dropped = Arc::new(AtomicU64::new(0));

        let cycle = Self {
            ctx,
            writer,
            period,
            tracker: NoteTracker::new(),
            translator,
            tx_all_notes_off: options.tx_all_notes_off,
            echo_translations: options.echo_translations,
            input: in_cons,
            output: out_prod,
            dropped: Arc::clone(&dropped),
            echo: SmallVec::new(),
            scratch: Box::new([0u8; SYSEX_BUFFER_SIZE]),
        };
        Ok((
            cycle,
            GraphInput { ring: in_prod },
            GraphOutput {
                ring: out_cons,
                dropped,
            },
        ))
    }

    /// Resets the clock reference for a (re)started audio device.
    pub fn restart(&mut self, sample_rate: u32) -> Result<()> {
        self.writer.set_sample_rate(sample_rate)?;
        self.writer.start();
        self.period = self.ctx.recovery().active();
        Ok(())
    }

    /// Period the next cycle will process.
    pub fn period(&self) -> usize {
        self.period
    }

    pub fn writer(&self) -> &ClockWriter {
        &self.writer
    }

    /// Runs one cycle of `nframes` frames. Returns the number of events
    /// delivered to the host.
    ///
    /// The cycle works on the period it woke up in; the period published by
    /// the clock advance is only picked up by the next cycle.
    pub fn process(&mut self, nframes: u32) -> usize {
        let current = self.period;
        self.period = self.writer.advance(current, nframes);
        let p = self.ctx.recovery().period(current);

        let received = self.drain_input(&p);

        // Silence on the graph side only counts when the cycle is empty.
        if received == 0
            && self.ctx.sensing().check(QueueId::ToHardware, p.end_time) == SensingStatus::TimedOut
        {
            warn!(target: "jamrouter::event", "active sensing timeout on graph input");
            for channel in 0..16 {
                self.ctx.queue().queue_notes_off(
                    &p,
                    QueueId::ToHardware,
                    channel,
                    0,
                    p.input_index,
                    &mut self.tracker,
                    NoteOffStyle::default(),
                );
            }
        }

        self.deliver_output(&p)
    }

    fn drain_input(&mut self, p: &Period) -> usize {
        let mut received = 0;
        while let Some((event, len)) = self.input.pop(&mut self.scratch[..]) {
            received += 1;
            let frame = event.frame as i32;
            match event.message {
                MidiMessage::SysEx => {
                    self.ctx.queue().append_copy(
                        p,
                        QueueId::ToHardware,
                        &event.message,
                        &self.scratch[..len],
                        frame,
                        p.input_index,
                    );
                }
                message => self.queue_to_hardware(p, event.frame, message),
            }
        }
        received
    }

    fn queue_to_hardware(&mut self, p: &Period, frame: u32, message: MidiMessage) {
        let queue = self.ctx.queue();
        let message = match self.translator.translate(message) {
            Translation::Dropped => return,
            Translation::Translated(translated) => {
                if self.echo_translations {
                    if self.echo.len() < ECHO_CAPACITY {
                        let at = self.echo.partition_point(|&(f, _)| f <= frame);
                        self.echo.insert(at, (frame, translated));
                    } else {
                        debug!(target: "jamrouter::event", "echo buffer full");
                    }
                }
                queue.append_copy(p, QueueId::ToHardware, &translated, &[], frame as i32, p.input_index);
                return;
            }
            Translation::Unchanged(message) => message,
        };

        let message = match message {
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } if velocity > 0 => {
                self.tracker.note_on(channel, note);
                message
            }
            MidiMessage::NoteOn { channel, note, .. } | MidiMessage::NoteOff { channel, note, .. } => {
                self.tracker.note_off(channel, note);
                if self.tx_all_notes_off && self.tracker.is_silent(channel) {
                    MidiMessage::controller(channel, ALL_NOTES_OFF, 0)
                } else {
                    MidiMessage::note_on(channel, note, 0)
                }
            }
            other => other,
        };
        queue.append_copy(p, QueueId::ToHardware, &message, &[], frame as i32, p.input_index);
    }

    fn deliver_output(&mut self, p: &Period) -> usize {
        let queue = self.ctx.queue();
        let mask = p.period_mask();
        let mut last = (p.index + mask) & mask;
        let last_frame = p.size.saturating_sub(1);
        let mut echo_at = 0;
        let mut delivered = 0;

        for frame in 0..p.size {
            let mut batch = queue.detach(QueueId::ToGraph, &mut last, p.index, frame);
            while let Some(event) = batch.next_event() {
                if self.output.push(frame, &event.message, event.sysex) {
                    delivered += 1;
                } else {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            while let Some(&(at, message)) = self.echo.get(echo_at) {
                if at.min(last_frame) != frame {
                    break;
                }
                if self.output.push(frame, &message, &[]) {
                    delivered += 1;
                } else {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                echo_at += 1;
            }
        }
        self.echo.clear();
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jamrouter_core::{Clock, ManualClock, QueueConfig, TimingConfig};
    use jamrouter_midi::SysExFraming;

    use crate::rx::Receiver;
    use crate::transport::ByteWriter;
    use crate::tx::Transmitter;

    const NSPP_256: i64 = 5_333_333;

    fn setup(options: RouterOptions) -> (Arc<ManualClock>, Arc<SyncContext>, GraphCycle, GraphInput, GraphOutput) {
        let clock = Arc::new(ManualClock::new(1_000_000_000));
        let ctx = SyncContext::new(TimingConfig::default(), QueueConfig::default(), clock.clone())
            .unwrap();
        let (cycle, input, output) = GraphCycle::new(Arc::clone(&ctx), &options, 256).unwrap();
        (clock, ctx, cycle, input, output)
    }

    fn run(clock: &ManualClock, cycle: &mut GraphCycle, n: usize) {
        for _ in 0..n {
            cycle.process(256);
            clock.advance(NSPP_256);
        }
    }

    /// Detaches everything the Tx side would see over the next ring.
    fn hardware_bound(ctx: &SyncContext) -> Vec<MidiMessage> {
        let recovery = ctx.recovery();
        let periods = recovery.active_period().periods as usize;
        let mut out = Vec::new();
        for period in 0..periods {
            let p = recovery.period(period);
            let mut last = (period + periods - 1) % periods;
            for frame in 0..p.size {
                let mut batch = ctx.queue().detach(QueueId::ToHardware, &mut last, period, frame);
                while let Some(e) = batch.next_event() {
                    out.push(e.message);
                }
            }
        }
        out
    }

    #[test]
    fn test_graph_input_reaches_hardware_queue() {
        let (clock, ctx, mut cycle, mut input, _output) = setup(RouterOptions::default());
        run(&clock, &mut cycle, 4);

        assert!(input.send(5, &MidiMessage::note_on(0, 60, 100), &[]));
        assert!(input.send_bytes(6, &[0x80, 60, 64]));
        cycle.process(256);

        assert_eq!(
            hardware_bound(&ctx),
            vec![MidiMessage::note_on(0, 60, 100), MidiMessage::note_on(0, 60, 0)]
        );
    }

    #[test]
    fn test_last_note_off_becomes_all_notes_off() {
        let options = RouterOptions {
            tx_all_notes_off: true,
            ..Default::default()
        };
        let (clock, ctx, mut cycle, mut input, _output) = setup(options);
        run(&clock, &mut cycle, 4);

        input.send(0, &MidiMessage::note_on(2, 60, 100), &[]);
        input.send(1, &MidiMessage::note_on(2, 64, 100), &[]);
        input.send(2, &MidiMessage::note_off(2, 60, 0), &[]);
        input.send(3, &MidiMessage::note_off(2, 64, 0), &[]);
        cycle.process(256);

        let sent = hardware_bound(&ctx);
        assert_eq!(sent[2], MidiMessage::note_on(2, 60, 0));
        assert_eq!(sent[3], MidiMessage::controller(2, ALL_NOTES_OFF, 0));
    }

    #[test]
    fn test_translation_echoed_to_graph() {
        let options = RouterOptions {
            keymaps: vec!["1,3,20".into()],
            echo_translations: true,
            ..Default::default()
        };
        let (clock, ctx, mut cycle, mut input, mut output) = setup(options);
        run(&clock, &mut cycle, 4);

        input.send(7, &MidiMessage::note_on(0, 48, 90), &[]);
        input.send(8, &MidiMessage::note_on(0, 48, 0), &[]);
        assert_eq!(cycle.process(256), 1);

        let mut sysex = Vec::new();
        let echoed = output.recv(&mut sysex).unwrap();
        assert_eq!(echoed.frame, 7);
        assert_eq!(echoed.message, MidiMessage::controller(2, 20, 48));
        assert!(output.recv(&mut sysex).is_none());
        assert_eq!(hardware_bound(&ctx), vec![MidiMessage::controller(2, 20, 48)]);
    }

    #[test]
    fn test_hardware_events_delivered_at_frame() {
        let (clock, ctx, mut cycle, _input, mut output) = setup(RouterOptions::default());
        run(&clock, &mut cycle, 4);

        // queue for the period the next cycle processes
        let p = ctx.recovery().period(cycle.period());
        let payload = [0xF0, 0x7E, 0x01, 0xF7];
        ctx.queue()
            .append_copy(&p, QueueId::ToGraph, &MidiMessage::SysEx, &payload, 12, p.output_index);
        ctx.queue().append_copy(
            &p,
            QueueId::ToGraph,
            &MidiMessage::controller(0, 7, 100),
            &[],
            40,
            p.output_index,
        );

        assert_eq!(cycle.process(256), 2);
        let mut sysex = Vec::new();
        let first = output.recv(&mut sysex).unwrap();
        assert_eq!((first.frame, first.message), (12, MidiMessage::SysEx));
        assert_eq!(sysex, payload);
        let second = output.recv(&mut sysex).unwrap();
        assert_eq!(second.frame, 40);
        assert!(sysex.is_empty());
        assert_eq!(output.dropped(), 0);
    }

    #[test]
    fn test_sensing_timeout_releases_held_notes() {
        let (clock, ctx, mut cycle, mut input, _output) = setup(RouterOptions::default());
        run(&clock, &mut cycle, 4);

        input.send(0, &MidiMessage::ActiveSensing, &[]);
        input.send(1, &MidiMessage::note_on(0, 60, 100), &[]);
        cycle.process(256);
        assert_eq!(hardware_bound(&ctx), vec![MidiMessage::note_on(0, 60, 100)]);

        // 400 ms of empty cycles
        let mut released = Vec::new();
        for _ in 0..80 {
            clock.advance(NSPP_256);
            cycle.process(256);
            released.extend(hardware_bound(&ctx));
        }
        assert_eq!(released, vec![MidiMessage::note_on(0, 60, 0)]);
    }

    struct Wire(Vec<u8>);

    impl ByteWriter for Wire {
        fn write(&mut self, bytes: &[u8]) -> Result<()> {
            self.0.extend_from_slice(bytes);
            Ok(())
        }
    }

    #[test]
    fn test_hardware_event_reaches_graph_on_next_cycle() {
        let (clock, ctx, mut cycle, _input, mut output) = setup(RouterOptions::default());
        let mut rx = Receiver::new(Arc::clone(&ctx), &RouterOptions::default());
        run(&clock, &mut cycle, 8);

        // the cycle wakes up, the note arrives 100 frames later
        assert_eq!(cycle.process(256), 0);
        let woke_in = ctx.recovery().period(cycle.period()).prev;
        let frame_ns = NSPP_256 / 256;
        clock.advance(100 * frame_ns);
        let stamp = clock.now();
        rx.receive(&[0x90, 60, 100], stamp);
        let (period, frame) = ctx.recovery().locate(stamp);
        assert_eq!(period, woke_in);

        clock.advance(NSPP_256 - 100 * frame_ns);
        assert_eq!(cycle.process(256), 1);
        let mut sysex = Vec::new();
        let event = output.recv(&mut sysex).unwrap();
        assert_eq!(event.message, MidiMessage::note_on(0, 60, 100));
        assert_eq!(event.frame, frame as u32);
    }

    #[test]
    fn test_graph_event_transmitted_in_following_period() {
        let (clock, ctx, mut cycle, mut input, _output) = setup(RouterOptions::default());
        run(&clock, &mut cycle, 8);

        let current = cycle.period();
        assert!(input.send(20, &MidiMessage::note_on(0, 60, 100), &[]));
        cycle.process(256);
        let following = cycle.period();
        assert_eq!(ctx.recovery().period(current).next, following);

        let mut tx = Transmitter::new(&RouterOptions::default(), SysExFraming::default(), true);
        let mut wire = Wire(Vec::new());
        let mut last = ctx.recovery().period(current).prev;
        assert_eq!(tx.send_period(&ctx, &mut wire, &mut last, current).unwrap(), 0);
        assert_eq!(tx.send_period(&ctx, &mut wire, &mut last, following).unwrap(), 1);
        assert_eq!(wire.0, vec![0x90, 60, 100]);
        assert!(clock.now() >= ctx.recovery().period(following).frame_time(20));
    }
}
