//! Held-key tracking.
//!
//! Each channel keeps its sounding keys as an ordered list threaded through
//! a fixed 128-entry array, oldest first. A tracker belongs to the thread
//! that produces its queue direction, so it needs no synchronization.

use tracing::debug;

const NO_KEY: u8 = 0xFF;

#[derive(Debug, Clone)]
struct ChannelKeys {
    next: [u8; 128],
    held: u128,
    head: u8,
    tail: u8,
    previous: u8,
    current: u8,
    last: u8,
}

impl Default for ChannelKeys {
    fn default() -> Self {
        Self {
            next: [NO_KEY; 128],
            held: 0,
            head: NO_KEY,
            tail: NO_KEY,
            previous: NO_KEY,
            current: NO_KEY,
            last: NO_KEY,
        }
    }
}

impl ChannelKeys {
    #[inline]
    fn is_held(&self, note: u8) -> bool {
        self.held & (1u128 << note) != 0
    }

    fn unlink(&mut self, note: u8) {
        let mut prev = NO_KEY;
        let mut cur = self.head;
        while cur != NO_KEY {
            if cur == note {
                let after = self.next[cur as usize];
                if prev == NO_KEY {
                    self.head = after;
                } else {
                    self.next[prev as usize] = after;
                }
                if self.tail == note {
                    self.tail = prev;
                }
                self.next[note as usize] = NO_KEY;
                self.held &= !(1u128 << note);
                return;
            }
            prev = cur;
            cur = self.next[cur as usize];
        }
    }

    fn push(&mut self, note: u8) {
        self.next[note as usize] = NO_KEY;
        if self.tail == NO_KEY {
            self.head = note;
        } else {
            self.next[self.tail as usize] = note;
        }
        self.tail = note;
        self.held |= 1u128 << note;
    }
}

fn key(v: u8) -> Option<u8> {
    (v != NO_KEY).then_some(v)
}

/// Sounding keys for all 16 channels of one queue direction.
#[derive(Debug, Clone)]
pub struct NoteTracker {
    channels: Box<[ChannelKeys; 16]>,
    keys_in_play: u32,
}

impl Default for NoteTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl NoteTracker {
    pub fn new() -> Self {
        Self {
            channels: Box::new(std::array::from_fn(|_| ChannelKeys::default())),
            keys_in_play: 0,
        }
    }

    /// Adds `note` as the newest key. A key already held moves to the end
    /// (retrigger).
    pub fn note_on(&mut self, channel: u8, note: u8) {
        let note = note & 0x7F;
        let ch = &mut self.channels[(channel & 0x0F) as usize];
        ch.previous = ch.current;
        ch.current = note;
        ch.last = note;

        if ch.is_held(note) {
            ch.unlink(note);
        } else {
            self.keys_in_play += 1;
        }
        ch.push(note);
        debug!(target: "jamrouter::note", channel, note, keys = self.keys_in_play, "note on");
    }

    /// Releases `note`. Returns false for a note-off without a matching
    /// note-on.
    pub fn note_off(&mut self, channel: u8, note: u8) -> bool {
        let note = note & 0x7F;
        let ch = &mut self.channels[(channel & 0x0F) as usize];
        ch.previous = ch.current;
        ch.current = note;

        if !ch.is_held(note) {
            debug!(target: "jamrouter::note", channel, note, "note off without note on");
            return false;
        }
        ch.unlink(note);
        self.keys_in_play = self.keys_in_play.saturating_sub(1);

        if ch.tail != NO_KEY {
            ch.last = ch.tail;
            ch.current = ch.tail;
        }
        debug!(target: "jamrouter::note", channel, note, keys = self.keys_in_play, "note off");
        true
    }

    /// Held keys on `channel`, oldest first.
    pub fn keys(&self, channel: u8) -> Keys<'_> {
        let ch = &self.channels[(channel & 0x0F) as usize];
        Keys { ch, cur: ch.head }
    }

    pub fn is_silent(&self, channel: u8) -> bool {
        self.channels[(channel & 0x0F) as usize].head == NO_KEY
    }

    pub fn is_held(&self, channel: u8, note: u8) -> bool {
        self.channels[(channel & 0x0F) as usize].is_held(note & 0x7F)
    }

    /// Keys held across all channels.
    pub fn keys_in_play(&self) -> u32 {
        self.keys_in_play
    }

    /// Newest key still held, or the last one played once all are released.
    pub fn last_key(&self, channel: u8) -> Option<u8> {
        key(self.channels[(channel & 0x0F) as usize].last)
    }

    /// Key of the most recent note event.
    pub fn current_key(&self, channel: u8) -> Option<u8> {
        key(self.channels[(channel & 0x0F) as usize].current)
    }

    /// Key of the note event before the current one.
    pub fn previous_key(&self, channel: u8) -> Option<u8> {
        key(self.channels[(channel & 0x0F) as usize].previous)
    }

    pub fn clear(&mut self) {
        for ch in self.channels.iter_mut() {
            *ch = ChannelKeys::default();
        }
        self.keys_in_play = 0;
    }
}

/// Iterator over a channel's held keys.
pub struct Keys<'a> {
    ch: &'a ChannelKeys,
    cur: u8,
}

impl Iterator for Keys<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        let note = key(self.cur)?;
        self.cur = self.ch.next[note as usize];
        Some(note)
    }
}
