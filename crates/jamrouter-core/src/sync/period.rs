//! Ring slots and their published snapshots.

use std::sync::atomic::{fence, AtomicI32, AtomicI64, AtomicU32, Ordering};

use atomic_float::AtomicF64;

use super::layout::PeriodLayout;

/// Timestamp value of a slot that has never been started.
pub(crate) const UNSET: i64 = i64::MIN;

/// Consistent copy of one ring slot.
///
/// Times are nanoseconds on the router clock. Index fields are absolute
/// frame positions in the event queue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Period {
    pub index: usize,
    pub start_time: i64,
    pub end_time: i64,
    pub nsec_per_period: f64,
    pub nsec_per_frame: f64,
    pub sample_rate: u32,
    /// Frames per period.
    pub size: u32,
    /// Periods in the ring.
    pub periods: u32,
    pub rx_latency_periods: u32,
    pub tx_latency_periods: u32,
    pub input_index: u32,
    pub output_index: u32,
    pub rx_index: u32,
    pub tx_index: u32,
    pub prev: usize,
    pub next: usize,
    pub frames_per_byte: u32,
}

impl Period {
    #[inline]
    pub fn is_started(&self) -> bool {
        self.start_time != UNSET && self.end_time != UNSET
    }

    #[inline]
    pub fn buffer_size(&self) -> u32 {
        self.size * self.periods
    }

    #[inline]
    pub fn buffer_size_mask(&self) -> u32 {
        self.buffer_size().saturating_sub(1)
    }

    #[inline]
    pub fn period_mask(&self) -> usize {
        self.periods.saturating_sub(1) as usize
    }

    #[inline]
    pub fn rx_latency_size(&self) -> u32 {
        self.rx_latency_periods * self.size
    }

    #[inline]
    pub fn tx_latency_size(&self) -> u32 {
        self.tx_latency_periods * self.size
    }

    /// Timestamp of `frame` within this period.
    #[inline]
    pub fn frame_time(&self, frame: i32) -> i64 {
        self.start_time + (self.nsec_per_frame * frame as f64) as i64
    }
}

/// One slot of the clock ring.
///
/// Written only by the clock writer, under a sequence counter so readers
/// never act on a half-updated slot.
#[derive(Debug)]
#[repr(align(64))]
pub(crate) struct PeriodSlot {
    seq: AtomicU32,
    start_time: AtomicI64,
    end_time: AtomicI64,
    nsec_per_period: AtomicF64,
    nsec_per_frame: AtomicF64,
    sample_rate: AtomicU32,
    size: AtomicU32,
    periods: AtomicU32,
    rx_latency_periods: AtomicU32,
    tx_latency_periods: AtomicU32,
    input_index: AtomicU32,
    output_index: AtomicU32,
    rx_index: AtomicU32,
    tx_index: AtomicU32,
    prev: AtomicU32,
    next: AtomicU32,
    frames_per_byte: AtomicU32,
    /// Frame at which the audio callback woke up in this period. Also
    /// reset by the Tx thread, so it lives outside the sequence counter.
    pub(crate) wakeup_frame: AtomicI32,
}

impl PeriodSlot {
    pub(crate) fn new() -> Self {
        Self {
            seq: AtomicU32::new(0),
            start_time: AtomicI64::new(UNSET),
            end_time: AtomicI64::new(UNSET),
            nsec_per_period: AtomicF64::new(0.0),
            nsec_per_frame: AtomicF64::new(0.0),
            sample_rate: AtomicU32::new(0),
            size: AtomicU32::new(0),
            periods: AtomicU32::new(0),
            rx_latency_periods: AtomicU32::new(0),
            tx_latency_periods: AtomicU32::new(0),
            input_index: AtomicU32::new(0),
            output_index: AtomicU32::new(0),
            rx_index: AtomicU32::new(0),
            tx_index: AtomicU32::new(0),
            prev: AtomicU32::new(0),
            next: AtomicU32::new(0),
            frames_per_byte: AtomicU32::new(0),
            wakeup_frame: AtomicI32::new(0),
        }
    }

    /// Reads a consistent snapshot, retrying while a write is in flight.
    pub(crate) fn snapshot(&self, index: usize) -> Period {
        loop {
            let before = self.seq.load(Ordering::Acquire);
            if before & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let period = Period {
                index,
                start_time: self.start_time.load(Ordering::Relaxed),
                end_time: self.end_time.load(Ordering::Relaxed),
                nsec_per_period: self.nsec_per_period.load(Ordering::Relaxed),
                nsec_per_frame: self.nsec_per_frame.load(Ordering::Relaxed),
                sample_rate: self.sample_rate.load(Ordering::Relaxed),
                size: self.size.load(Ordering::Relaxed),
                periods: self.periods.load(Ordering::Relaxed),
                rx_latency_periods: self.rx_latency_periods.load(Ordering::Relaxed),
                tx_latency_periods: self.tx_latency_periods.load(Ordering::Relaxed),
                input_index: self.input_index.load(Ordering::Relaxed),
                output_index: self.output_index.load(Ordering::Relaxed),
                rx_index: self.rx_index.load(Ordering::Relaxed),
                tx_index: self.tx_index.load(Ordering::Relaxed),
                prev: self.prev.load(Ordering::Relaxed) as usize,
                next: self.next.load(Ordering::Relaxed) as usize,
                frames_per_byte: self.frames_per_byte.load(Ordering::Relaxed),
            };
            fence(Ordering::Acquire);
            if self.seq.load(Ordering::Relaxed) == before {
                return period;
            }
        }
    }

    /// Ring link to the following slot, without a full snapshot.
    #[inline]
    pub(crate) fn next_index(&self) -> usize {
        self.next.load(Ordering::Acquire) as usize
    }

    /// Runs `f` as one atomic update of this slot. Single writer only.
    pub(crate) fn write(&self, f: impl FnOnce(&SlotWriter<'_>)) {
        let seq = self.seq.load(Ordering::Relaxed);
        self.seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
        f(&SlotWriter { slot: self });
        self.seq.store(seq.wrapping_add(2), Ordering::Release);
    }
}

/// Field access for a slot inside [`PeriodSlot::write`].
pub(crate) struct SlotWriter<'a> {
    slot: &'a PeriodSlot,
}

impl SlotWriter<'_> {
    pub(crate) fn times(&self, start: i64, end: i64) {
        self.slot.start_time.store(start, Ordering::Relaxed);
        self.slot.end_time.store(end, Ordering::Relaxed);
    }

    pub(crate) fn start(&self, start: i64) {
        self.slot.start_time.store(start, Ordering::Relaxed);
    }

    pub(crate) fn nsec(&self, per_period: f64, per_frame: f64) {
        self.slot.nsec_per_period.store(per_period, Ordering::Relaxed);
        self.slot.nsec_per_frame.store(per_frame, Ordering::Relaxed);
    }

    pub(crate) fn links(&self, prev: u32, next: u32) {
        self.slot.prev.store(prev, Ordering::Relaxed);
        self.slot.next.store(next, Ordering::Relaxed);
    }

    /// Applies a layout's static fields and this slot's queue indices.
    pub(crate) fn layout(&self, layout: &PeriodLayout, slot: u32) {
        let s = self.slot;
        let idx = layout.indices(slot);
        s.sample_rate.store(layout.sample_rate, Ordering::Relaxed);
        s.size.store(layout.size, Ordering::Relaxed);
        s.periods.store(layout.periods, Ordering::Relaxed);
        s.rx_latency_periods
            .store(layout.rx_latency_periods, Ordering::Relaxed);
        s.tx_latency_periods
            .store(layout.tx_latency_periods, Ordering::Relaxed);
        s.input_index.store(idx.input, Ordering::Relaxed);
        s.output_index.store(idx.output, Ordering::Relaxed);
        s.rx_index.store(idx.rx, Ordering::Relaxed);
        s.tx_index.store(idx.tx, Ordering::Relaxed);
        s.frames_per_byte
            .store(layout.frames_per_byte, Ordering::Relaxed);
    }
}
