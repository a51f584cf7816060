//! Preallocated event pool.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU8, Ordering};

use jamrouter_midi::message::END_SYSEX;
use jamrouter_midi::{MidiMessage, SYSEX_BUFFER_SIZE};

/// Events per queue direction.
pub const MIDI_EVENT_POOL_SIZE: usize = 2048;

/// Index of an event in its direction's pool.
pub type EventId = u32;

/// End of an event list.
pub(crate) const NIL: EventId = u32::MAX;

/// Lifecycle of a pool event.
///
/// The producer moves `Allocated → Queued` or `Allocated → Abandoned`; the
/// consumer moves `Queued → Dequeued → Free`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventState {
    Free = 0,
    Allocated = 1,
    Queued = 2,
    Dequeued = 3,
    Abandoned = 4,
}

impl EventState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Allocated,
            2 => Self::Queued,
            3 => Self::Dequeued,
            4 => Self::Abandoned,
            _ => Self::Free,
        }
    }
}

pub(crate) struct EventSlot {
    state: AtomicU8,
    pub(crate) next: AtomicU32,
    pub(crate) word: AtomicU32,
    len: AtomicU16,
    sysex: UnsafeCell<[u8; SYSEX_BUFFER_SIZE]>,
}

// SAFETY: `sysex` is written only by the producer while the slot is
// `Allocated` and read only by the consumer after acquiring the list link
// that published it. The producer does not touch it again until the consumer
// has released the slot back to `Free`.
unsafe impl Sync for EventSlot {}

impl EventSlot {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(EventState::Free as u8),
            next: AtomicU32::new(NIL),
            word: AtomicU32::new(0),
            len: AtomicU16::new(0),
            sysex: UnsafeCell::new([0; SYSEX_BUFFER_SIZE]),
        }
    }

    #[inline]
    pub(crate) fn state(&self) -> EventState {
        EventState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_state(&self, state: EventState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn message(&self) -> Option<MidiMessage> {
        MidiMessage::from_word(self.word.load(Ordering::Acquire)).ok()
    }

    /// Stores `msg`, copying a SysEx payload and re-terminating it with `F7`.
    ///
    /// Producer side, slot must be `Allocated`.
    pub(crate) fn fill(&self, msg: &MidiMessage, payload: &[u8]) {
        self.word.store(msg.to_word(), Ordering::Relaxed);
        if !matches!(msg, MidiMessage::SysEx) {
            self.len.store(0, Ordering::Relaxed);
            return;
        }
        let body = match payload.iter().position(|&b| b == END_SYSEX) {
            Some(end) => &payload[..end],
            None => payload,
        };
        let n = body.len().min(SYSEX_BUFFER_SIZE - 1);
        // SAFETY: see the `Sync` impl; the slot is `Allocated` and owned by
        // the producer.
        let buf = unsafe { &mut *self.sysex.get() };
        buf[..n].copy_from_slice(&body[..n]);
        buf[n] = END_SYSEX;
        self.len.store((n + 1) as u16, Ordering::Relaxed);
    }

    /// SysEx payload including the `F7` terminator, empty for other kinds.
    ///
    /// Consumer side, slot must be `Dequeued`.
    pub(crate) fn payload(&self) -> &[u8] {
        let len = self.len.load(Ordering::Acquire) as usize;
        // SAFETY: see the `Sync` impl; the consumer has acquired this slot
        // and the producer will not reuse it until it is `Free`.
        let buf = unsafe { &*self.sysex.get() };
        &buf[..len.min(SYSEX_BUFFER_SIZE)]
    }
}

/// One direction's pool with its allocation cursor.
pub(crate) struct EventPool {
    slots: Box<[EventSlot]>,
    cursor: AtomicU32,
}

impl EventPool {
    pub(crate) fn new() -> Self {
        Self {
            slots: (0..MIDI_EVENT_POOL_SIZE).map(|_| EventSlot::new()).collect(),
            cursor: AtomicU32::new(0),
        }
    }

    #[inline]
    pub(crate) fn slot(&self, id: EventId) -> &EventSlot {
        &self.slots[id as usize & (MIDI_EVENT_POOL_SIZE - 1)]
    }

    /// Claims the next free slot in cursor order.
    ///
    /// Slots still owned by the consumer are skipped; `None` means the pool
    /// is exhausted, which only happens when it is undersized for the
    /// traffic.
    pub(crate) fn allocate(&self) -> Option<EventId> {
        for _ in 0..MIDI_EVENT_POOL_SIZE {
            let id = self.cursor.fetch_add(1, Ordering::Relaxed) & (MIDI_EVENT_POOL_SIZE as u32 - 1);
            let slot = &self.slots[id as usize];
            if slot.state() == EventState::Free {
                slot.next.store(NIL, Ordering::Relaxed);
                slot.word.store(0, Ordering::Relaxed);
                slot.len.store(0, Ordering::Relaxed);
                slot.set_state(EventState::Allocated);
                return Some(id);
            }
        }
        None
    }

    /// Returns every slot to `Free`. Only valid while no thread is using
    /// the pool.
    pub(crate) fn reset(&self) {
        for slot in self.slots.iter() {
            slot.next.store(NIL, Ordering::Relaxed);
            slot.set_state(EventState::Free);
        }
        self.cursor.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_skips_busy_slots() {
        let pool = EventPool::new();
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.slot(a).state(), EventState::Allocated);

        // wrap around: `a` is still allocated and must be skipped
        pool.slot(b).set_state(EventState::Free);
        for _ in 2..MIDI_EVENT_POOL_SIZE {
            pool.allocate().unwrap();
        }
        assert_eq!(pool.allocate(), Some(b));
        assert_eq!(pool.allocate(), None);
    }

    #[test]
    fn test_sysex_fill_reterminates() {
        let pool = EventPool::new();
        let id = pool.allocate().unwrap();
        let slot = pool.slot(id);
        slot.fill(&MidiMessage::SysEx, &[0xF0, 0x41, 0x10, 0xF7, 0x99]);
        assert_eq!(slot.payload(), &[0xF0, 0x41, 0x10, 0xF7]);

        let long = vec![0x11; 2000];
        slot.fill(&MidiMessage::SysEx, &long);
        assert_eq!(slot.payload().len(), SYSEX_BUFFER_SIZE);
        assert_eq!(slot.payload().last(), Some(&0xF7));
    }

    #[test]
    fn test_fill_channel_message() {
        let pool = EventPool::new();
        let id = pool.allocate().unwrap();
        let slot = pool.slot(id);
        let msg = MidiMessage::note_on(3, 60, 100);
        slot.fill(&msg, &[]);
        assert_eq!(slot.message(), Some(msg));
        assert!(slot.payload().is_empty());
    }
}
