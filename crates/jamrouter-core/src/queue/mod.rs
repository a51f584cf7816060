//! Frame-indexed event queues.
//!
//! There are two independent directions, each with one producer and one
//! consumer. Every absolute frame position of the ring owns a singly linked
//! list of events scheduled for that frame:
//!
//! ```text
//!  heads[index + frame] ──▶ ev ──▶ ev ──▶ NIL
//!        ▲                                      producer appends at the tail
//!        └── consumer swaps the whole list out
//! ```
//!
//! Events come from a fixed pool and are addressed by index, never by
//! reference, so no allocation happens on the realtime path.

mod event;

pub use event::{EventId, EventState, MIDI_EVENT_POOL_SIZE};

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use jamrouter_midi::MidiMessage;
use tracing::{debug, warn};

use crate::config::{ActiveSensingMode, QueueConfig};
use crate::notes::NoteTracker;
use crate::sensing::ActiveSensingTimer;
use crate::sync::{ClockRecovery, Period};
use crate::MAX_BUFFER_SIZE;

use event::{EventPool, NIL};

/// Queue direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueId {
    /// Hardware to graph. Produced by Rx, consumed by the audio cycle.
    #[doc(alias = "A2J")]
    ToGraph,
    /// Graph to hardware. Produced by the audio cycle, consumed by Tx.
    #[doc(alias = "J2A")]
    ToHardware,
}

impl QueueId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        match self {
            Self::ToGraph => 0,
            Self::ToHardware => 1,
        }
    }

    /// Base index a consumer reads from in `period`.
    #[inline]
    pub fn read_index(self, period: &Period) -> u32 {
        match self {
            Self::ToGraph => period.output_index,
            Self::ToHardware => period.tx_index,
        }
    }
}

/// Outcome of an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Appended {
    /// Linked at the given absolute queue position.
    Queued(u32),
    /// Merged into a pending Controller event for the same frame.
    Coalesced,
    /// Consumed by Active Sensing handling, or nothing to queue.
    Dropped,
}

/// How synthesized note-offs are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NoteOffStyle {
    /// Note Off messages instead of velocity-0 Note On.
    pub real_note_off: bool,
    /// Velocity of real Note Off messages.
    pub velocity: u8,
}

struct Direction {
    heads: Box<[AtomicU32]>,
    pool: EventPool,
}

impl Direction {
    fn new() -> Self {
        Self {
            heads: (0..MAX_BUFFER_SIZE).map(|_| AtomicU32::new(NIL)).collect(),
            pool: EventPool::new(),
        }
    }

    #[inline]
    fn head(&self, position: u32) -> &AtomicU32 {
        &self.heads[position as usize & (MAX_BUFFER_SIZE - 1)]
    }
}

/// Both queue directions, their pools, and the Active Sensing timers.
pub struct EventQueue {
    recovery: Arc<ClockRecovery>,
    config: QueueConfig,
    directions: [Direction; 2],
    sensing: ActiveSensingTimer,
}

impl fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue")
            .field("config", &self.config)
            .field("sensing", &self.sensing)
            .finish()
    }
}

impl EventQueue {
    pub fn new(recovery: Arc<ClockRecovery>, config: QueueConfig) -> Self {
        Self {
            recovery,
            config,
            directions: [Direction::new(), Direction::new()],
            sensing: ActiveSensingTimer::new(),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn sensing(&self) -> &ActiveSensingTimer {
        &self.sensing
    }

    #[inline]
    fn dir(&self, queue: QueueId) -> &Direction {
        &self.directions[queue.index()]
    }

    /// Claims a pool event for `queue`. Producer side only.
    pub fn allocate(&self, queue: QueueId) -> Option<EventId> {
        let id = self.dir(queue).pool.allocate();
        if id.is_none() {
            warn!(target: "jamrouter::event", ?queue, "event pool exhausted");
        }
        id
    }

    /// Writes a message into an allocated event.
    pub fn fill(&self, queue: QueueId, id: EventId, message: &MidiMessage, sysex: &[u8]) {
        self.dir(queue).pool.slot(id).fill(message, sysex);
    }

    pub fn state(&self, queue: QueueId, id: EventId) -> EventState {
        self.dir(queue).pool.slot(id).state()
    }

    /// Links an allocated event at `index + frame`.
    ///
    /// The frame is clamped into the period. A Controller event for a
    /// channel/controller pair already pending at that frame overwrites the
    /// pending value and is released instead of linked.
    pub fn append(
        &self,
        period: &Period,
        queue: QueueId,
        id: EventId,
        frame: i32,
        index: u32,
    ) -> Appended {
        let dir = self.dir(queue);
        let event = dir.pool.slot(id);
        let Some(message) = event.message() else {
            event.set_state(EventState::Free);
            return Appended::Dropped;
        };

        if !self.admit(queue, &message) || period.size == 0 {
            event.set_state(EventState::Free);
            return Appended::Dropped;
        }

        let frame = clamp_frame(period, frame);
        let position = (index + frame) & period.buffer_size_mask();
        let head = dir.head(position);

        event.next.store(NIL, Ordering::Relaxed);
        event.set_state(EventState::Queued);

        let mut cur = head.load(Ordering::Acquire);
        if cur == NIL {
            head.store(id, Ordering::Release);
            return Appended::Queued(position);
        }

        let mut tail = cur;
        while cur != NIL {
            let pending = dir.pool.slot(cur);
            if let (
                MidiMessage::Controller {
                    channel,
                    controller,
                    ..
                },
                Some(MidiMessage::Controller {
                    channel: pending_channel,
                    controller: pending_controller,
                    ..
                }),
            ) = (message, pending.message())
            {
                if channel == pending_channel && controller == pending_controller {
                    pending.word.store(message.to_word(), Ordering::Release);
                    event.set_state(EventState::Abandoned);
                    event.set_state(EventState::Free);
                    debug!(target: "jamrouter::event", ?queue, position, controller, "controller coalesced");
                    return Appended::Coalesced;
                }
            }
            tail = cur;
            cur = pending.next.load(Ordering::Acquire);
        }

        dir.pool.slot(tail).next.store(id, Ordering::Release);
        Appended::Queued(position)
    }

    /// Copies `message` (and SysEx payload) into a fresh event and appends
    /// it.
    pub fn append_copy(
        &self,
        period: &Period,
        queue: QueueId,
        message: &MidiMessage,
        sysex: &[u8],
        frame: i32,
        index: u32,
    ) -> Appended {
        if matches!(message, MidiMessage::ActiveSensing) && !self.admit(queue, message) {
            return Appended::Dropped;
        }
        let Some(id) = self.allocate(queue) else {
            return Appended::Dropped;
        };
        self.fill(queue, id, message, sysex);
        self.append(period, queue, id, frame, index)
    }

    /// Queues a one-byte realtime message. Non-realtime status bytes are
    /// ignored.
    pub fn queue_realtime(
        &self,
        period: &Period,
        queue: QueueId,
        status: u8,
        frame: i32,
        index: u32,
    ) -> Appended {
        match MidiMessage::realtime(status) {
            Some(message) => self.append_copy(period, queue, &message, &[], frame, index),
            None => Appended::Dropped,
        }
    }

    /// Queues a note-off for every key held on `channel` and releases them
    /// in `tracker`.
    #[allow(clippy::too_many_arguments)]
    pub fn queue_notes_off(
        &self,
        period: &Period,
        queue: QueueId,
        channel: u8,
        frame: i32,
        index: u32,
        tracker: &mut NoteTracker,
        style: NoteOffStyle,
    ) -> usize {
        let mut held = [0u8; 128];
        let mut count = 0;
        for note in tracker.keys(channel) {
            held[count] = note;
            count += 1;
        }

        for &note in &held[..count] {
            let message = if style.real_note_off {
                MidiMessage::note_off(channel, note, style.velocity)
            } else {
                MidiMessage::note_on(channel, note, 0)
            };
            self.append_copy(period, queue, &message, &[], frame, index);
            tracker.note_off(channel, note);
        }
        if count > 0 {
            debug!(target: "jamrouter::note", ?queue, channel, count, "notes off");
        }
        count
    }

    /// Takes the event list due at `frame` of `period`.
    ///
    /// When `last_period` shows a skipped period, lists left behind in the
    /// skipped periods are returned first, oldest first, flagged as late;
    /// call again for the same frame until a batch is not late.
    /// Consumer side only.
    pub fn detach(
        &self,
        queue: QueueId,
        last_period: &mut usize,
        period: usize,
        frame: u32,
    ) -> Detached<'_> {
        let dir = self.dir(queue);
        let p = self.recovery.period(period);
        let mask = p.period_mask();

        if p.periods > 0 && period != ((*last_period + 1) & mask) {
            let skipped = (period + p.periods as usize - 1 - (*last_period & mask)) & mask;
            let mut scan = (*last_period + 1) & mask;
            for _ in 0..skipped {
                let sp = self.recovery.period(scan);
                let base = queue.read_index(&sp);
                for j in 0..sp.size {
                    let head = dir.head((base + j) & sp.buffer_size_mask());
                    if head.load(Ordering::Acquire) == NIL {
                        continue;
                    }
                    let list = head.swap(NIL, Ordering::AcqRel);
                    if list != NIL {
                        warn!(
                            target: "jamrouter::event",
                            ?queue,
                            period = scan,
                            frame = j,
                            "late dequeue"
                        );
                        return Detached::new(dir, list, true);
                    }
                }
                scan = (scan + 1) & mask;
            }
        }

        *last_period = (period + mask) & mask;
        let position = (queue.read_index(&p) + frame) & p.buffer_size_mask();
        Detached::new(dir, dir.head(position).swap(NIL, Ordering::AcqRel), false)
    }

    /// Admission check for Active Sensing. Also lets traffic following an
    /// Active Sensing message extend its deadline.
    fn admit(&self, queue: QueueId, message: &MidiMessage) -> bool {
        match (message, self.config.active_sensing) {
            (MidiMessage::ActiveSensing, ActiveSensingMode::On) => {
                self.sensing.reset(queue, self.recovery.now());
                false
            }
            (MidiMessage::ActiveSensing, ActiveSensingMode::Drop) => false,
            (MidiMessage::ActiveSensing, ActiveSensingMode::Thru) => true,
            (_, ActiveSensingMode::On) => {
                self.sensing.touch(queue, self.recovery.now());
                true
            }
            _ => true,
        }
    }

    /// Drops every pending event. Only valid while no producer or consumer
    /// is running.
    pub fn reset(&self) {
        for dir in &self.directions {
            for head in dir.heads.iter() {
                head.store(NIL, Ordering::Relaxed);
            }
            dir.pool.reset();
        }
        self.sensing.clear(QueueId::ToGraph);
        self.sensing.clear(QueueId::ToHardware);
    }
}

fn clamp_frame(period: &Period, frame: i32) -> u32 {
    let size = period.size as i64;
    let frame = frame as i64;
    if frame > size + 1 {
        warn!(
            target: "jamrouter::event",
            frame,
            period_size = size,
            "frame beyond period, adjusting"
        );
    }
    frame.clamp(0, size - 1) as u32
}

/// One event handed out by [`Detached::next_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRef<'a> {
    pub message: MidiMessage,
    /// SysEx payload ending in `F7`; empty for other kinds.
    pub sysex: &'a [u8],
}

/// An event list taken off the queue.
///
/// Events are released back to the pool as the consumer moves past them,
/// and any left over are released on drop.
pub struct Detached<'a> {
    dir: &'a Direction,
    head: EventId,
    current: EventId,
    late: bool,
}

impl<'a> Detached<'a> {
    fn new(dir: &'a Direction, head: EventId, late: bool) -> Self {
        Self {
            dir,
            head,
            current: NIL,
            late,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head == NIL
    }

    /// True when this list belongs to a period the consumer skipped.
    pub fn is_late(&self) -> bool {
        self.late
    }

    /// Messages still in the list, without consuming them.
    pub fn peek(&self) -> impl Iterator<Item = MidiMessage> + '_ {
        let pool = &self.dir.pool;
        std::iter::successors(Some(self.head).filter(|&id| id != NIL), move |&id| {
            Some(pool.slot(id).next.load(Ordering::Acquire)).filter(|&n| n != NIL)
        })
        .filter_map(move |id| pool.slot(id).message())
    }

    /// Hands out the next event, releasing the previous one.
    pub fn next_event(&mut self) -> Option<EventRef<'_>> {
        self.release_current();
        let dir = self.dir;
        while self.head != NIL {
            let id = self.head;
            let slot = dir.pool.slot(id);
            slot.set_state(EventState::Dequeued);
            self.head = slot.next.load(Ordering::Acquire);
            self.current = id;
            match slot.message() {
                Some(message) => {
                    return Some(EventRef {
                        message,
                        sysex: slot.payload(),
                    })
                }
                None => {
                    debug!(target: "jamrouter::event", id, "skipping undecodable event");
                    self.release_current();
                }
            }
        }
        None
    }

    fn release_current(&mut self) {
        if self.current != NIL {
            self.dir.pool.slot(self.current).set_state(EventState::Free);
            self.current = NIL;
        }
    }
}

impl Drop for Detached<'_> {
    fn drop(&mut self) {
        self.release_current();
        while self.head != NIL {
            let slot = self.dir.pool.slot(self.head);
            self.head = slot.next.load(Ordering::Acquire);
            slot.set_state(EventState::Free);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::TimingConfig;
    use crate::sync::ClockWriter;

    fn setup(mode: ActiveSensingMode) -> (Arc<ManualClock>, ClockWriter, EventQueue) {
        let clock = Arc::new(ManualClock::new(1_000_000_000));
        let recovery =
            Arc::new(ClockRecovery::new(TimingConfig::default(), clock.clone()).unwrap());
        let mut writer = recovery.writer(48_000).unwrap();
        writer.advance(0, 256);
        let queue = EventQueue::new(
            recovery,
            QueueConfig {
                active_sensing: mode,
                ..Default::default()
            },
        );
        (clock, writer, queue)
    }

    fn drain(batch: &mut Detached<'_>) -> Vec<MidiMessage> {
        let mut out = Vec::new();
        while let Some(ev) = batch.next_event() {
            out.push(ev.message);
        }
        out
    }

    #[test]
    fn test_append_then_detach_same_frame() {
        let (_clock, _writer, queue) = setup(ActiveSensingMode::On);
        let p = queue.recovery.period(1);
        let msg = MidiMessage::note_on(4, 61, 99);
        assert!(matches!(
            queue.append_copy(&p, QueueId::ToHardware, &msg, &[], 17, p.tx_index),
            Appended::Queued(_)
        ));

        let mut last = 0;
        let mut batch = queue.detach(QueueId::ToHardware, &mut last, 1, 17);
        assert!(!batch.is_late());
        assert_eq!(drain(&mut batch), vec![msg]);
        assert_eq!(last, 0);

        drop(batch);
        let empty = queue.detach(QueueId::ToHardware, &mut last, 1, 17);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_controller_coalescing() {
        let (_clock, _writer, queue) = setup(ActiveSensingMode::On);
        let p = queue.recovery.period(1);
        let q = QueueId::ToGraph;
        queue.append_copy(&p, q, &MidiMessage::note_on(0, 60, 1), &[], 5, p.output_index);
        queue.append_copy(&p, q, &MidiMessage::controller(0, 7, 10), &[], 5, p.output_index);
        assert_eq!(
            queue.append_copy(&p, q, &MidiMessage::controller(0, 7, 90), &[], 5, p.output_index),
            Appended::Coalesced
        );
        queue.append_copy(&p, q, &MidiMessage::controller(1, 7, 11), &[], 5, p.output_index);

        let mut last = 0;
        let mut batch = queue.detach(q, &mut last, 1, 5);
        assert_eq!(
            drain(&mut batch),
            vec![
                MidiMessage::note_on(0, 60, 1),
                MidiMessage::controller(0, 7, 90),
                MidiMessage::controller(1, 7, 11),
            ]
        );
    }

    #[test]
    fn test_frame_clamped_into_period() {
        let (_clock, _writer, queue) = setup(ActiveSensingMode::On);
        let p = queue.recovery.period(1);
        let msg = MidiMessage::controller(0, 1, 1);
        queue.append_copy(&p, QueueId::ToHardware, &msg, &[], 400, p.tx_index);

        let mut last = 0;
        let mut batch = queue.detach(QueueId::ToHardware, &mut last, 1, 255);
        assert_eq!(drain(&mut batch), vec![msg]);
    }

    #[test]
    fn test_active_sensing_modes() {
        let (_clock, _writer, queue) = setup(ActiveSensingMode::On);
        let p = queue.recovery.period(1);
        let q = QueueId::ToGraph;
        assert_eq!(
            queue.append_copy(&p, q, &MidiMessage::ActiveSensing, &[], 0, p.output_index),
            Appended::Dropped
        );
        assert!(queue.sensing().is_armed(q));

        let (_clock, _writer, thru) = setup(ActiveSensingMode::Thru);
        assert!(matches!(
            thru.append_copy(&p, q, &MidiMessage::ActiveSensing, &[], 0, p.output_index),
            Appended::Queued(_)
        ));
        assert!(!thru.sensing().is_armed(q));

        let (_clock, _writer, drop_mode) = setup(ActiveSensingMode::Drop);
        assert_eq!(
            drop_mode.append_copy(&p, q, &MidiMessage::ActiveSensing, &[], 0, p.output_index),
            Appended::Dropped
        );
        assert!(!drop_mode.sensing().is_armed(q));
    }

    #[test]
    fn test_sysex_payload_survives() {
        let (_clock, _writer, queue) = setup(ActiveSensingMode::On);
        let p = queue.recovery.period(1);
        let payload = [0xF0, 0x7E, 0x7F, 0x06, 0x01, 0xF7];
        queue.append_copy(&p, QueueId::ToHardware, &MidiMessage::SysEx, &payload, 3, p.tx_index);

        let mut last = 0;
        let mut batch = queue.detach(QueueId::ToHardware, &mut last, 1, 3);
        let ev = batch.next_event().unwrap();
        assert_eq!(ev.message, MidiMessage::SysEx);
        assert_eq!(ev.sysex, &payload);
    }

    #[test]
    fn test_late_lists_come_first() {
        let (_clock, _writer, queue) = setup(ActiveSensingMode::On);
        let q = QueueId::ToHardware;
        let p1 = queue.recovery.period(1);
        let p2 = queue.recovery.period(2);
        queue.append_copy(&p1, q, &MidiMessage::controller(0, 1, 1), &[], 9, p1.tx_index);
        queue.append_copy(&p2, q, &MidiMessage::controller(0, 1, 2), &[], 0, p2.tx_index);

        // consumer last saw period 0 and now wakes in period 2
        let mut last = 0;
        let mut batch = queue.detach(q, &mut last, 2, 0);
        assert!(batch.is_late());
        assert_eq!(drain(&mut batch), vec![MidiMessage::controller(0, 1, 1)]);
        drop(batch);

        let mut batch = queue.detach(q, &mut last, 2, 0);
        assert!(!batch.is_late());
        assert_eq!(drain(&mut batch), vec![MidiMessage::controller(0, 1, 2)]);
        assert_eq!(last, 1);
    }

    #[test]
    fn test_notes_off_releases_tracker() {
        let (_clock, _writer, queue) = setup(ActiveSensingMode::On);
        let p = queue.recovery.period(1);
        let mut tracker = NoteTracker::new();
        tracker.note_on(3, 60);
        tracker.note_on(3, 64);

        let style = NoteOffStyle {
            real_note_off: true,
            velocity: 64,
        };
        let n = queue.queue_notes_off(&p, QueueId::ToHardware, 3, 0, p.tx_index, &mut tracker, style);
        assert_eq!(n, 2);
        assert!(tracker.is_silent(3));

        let mut last = 0;
        let mut batch = queue.detach(QueueId::ToHardware, &mut last, 1, 0);
        assert_eq!(
            drain(&mut batch),
            vec![MidiMessage::note_off(3, 60, 64), MidiMessage::note_off(3, 64, 64)]
        );
    }

    #[test]
    fn test_dropped_batch_frees_events() {
        let (_clock, _writer, queue) = setup(ActiveSensingMode::On);
        let p = queue.recovery.period(1);
        let q = QueueId::ToGraph;
        let id = queue.allocate(q).unwrap();
        queue.fill(q, id, &MidiMessage::note_on(0, 1, 1), &[]);
        queue.append(&p, q, id, 0, p.output_index);
        assert_eq!(queue.state(q, id), EventState::Queued);

        let mut last = 0;
        let batch = queue.detach(q, &mut last, 1, 0);
        assert_eq!(batch.peek().count(), 1);
        drop(batch);
        assert_eq!(queue.state(q, id), EventState::Free);
    }
}
