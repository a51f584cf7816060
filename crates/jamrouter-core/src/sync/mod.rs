//! Clock recovery.
//!
//! The audio callback advances a small ring of periods once per cycle. From
//! those irregular wakeups a decayed-average phase-locked loop derives a
//! steady timeline, so the MIDI threads can convert wall-clock time into
//! `(period, frame)` coordinates and back.
//!
//! ```text
//!  audio callback ──advance()──▶ [p0][p1][p2][p3] ◀──period_for()── Rx / Tx
//!                                  ring slots, seqlock published
//! ```
//!
//! [`ClockRecovery`] is the shared read side. The single [`ClockWriter`]
//! is owned by whatever drives the audio cycle.

mod layout;
mod period;

pub use layout::{PeriodLayout, PhaseWindow, SlotIndices};
pub use period::Period;

use std::fmt;
use std::ops::BitOr;
use std::sync::atomic::{fence, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::config::TimingConfig;
use crate::lockfree::AtomicFlag;
use crate::{Error, Result, MAX_BUFFER_PERIODS};

use period::{PeriodSlot, UNSET};

/// Options for [`ClockRecovery::frame_for`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags(u8);

impl FrameFlags {
    pub const NONE: Self = Self(0);
    /// Clamp a negative frame to 0.
    pub const LIMIT_LOWER: Self = Self(1);
    /// Step back to the previous period while the frame is negative.
    pub const FIX_LOWER: Self = Self(2);
    /// Clamp to the last frame of the period.
    pub const LIMIT_UPPER: Self = Self(4);

    #[inline]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for FrameFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Where the audio callback woke up relative to the target phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhaseZone {
    /// Before the period start. Nudged back and re-snapped to nominal.
    TooEarly,
    /// Inside the period but before the lock window. Nudged back.
    EarlyJitter,
    /// Inside the lock window.
    #[default]
    Locked,
    /// After the lock window but inside the period. Nudged forward.
    LateJitter,
    /// Past the period. Latched forward and re-snapped to nominal.
    TooLate,
}

impl PhaseZone {
    fn classify(
        delta: f64,
        window: &PhaseWindow,
        nsec_per_frame: f64,
        nsec_per_period: f64,
        wakeup_frame: i32,
        size: u32,
    ) -> Self {
        if delta < 0.0 {
            Self::TooEarly
        } else if delta < nsec_per_frame * window.min {
            Self::EarlyJitter
        } else if delta < nsec_per_frame * window.max {
            Self::Locked
        } else if delta < nsec_per_period && wakeup_frame < size as i32 {
            Self::LateJitter
        } else {
            Self::TooLate
        }
    }
}

/// Shared, read-mostly view of the period ring.
pub struct ClockRecovery {
    clock: Arc<dyn Clock>,
    slots: Box<[PeriodSlot]>,
    active: AtomicUsize,
    running: AtomicFlag,
    writer_taken: AtomicFlag,
    timing: TimingConfig,
}

impl fmt::Debug for ClockRecovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClockRecovery")
            .field("active", &self.active())
            .field("running", &self.is_running())
            .field("timing", &self.timing)
            .finish()
    }
}

impl ClockRecovery {
    pub fn new(timing: TimingConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        timing.validate()?;
        Ok(Self {
            clock,
            slots: (0..MAX_BUFFER_PERIODS).map(|_| PeriodSlot::new()).collect(),
            active: AtomicUsize::new(0),
            running: AtomicFlag::new(false),
            writer_taken: AtomicFlag::new(false),
            timing,
        })
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    #[inline]
    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    /// True once the writer has completed at least one cycle.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// Slot most recently published by the writer.
    #[inline]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Consistent snapshot of slot `index`.
    pub fn period(&self, index: usize) -> Period {
        let index = index & (MAX_BUFFER_PERIODS - 1);
        self.slots[index].snapshot(index)
    }

    pub fn active_period(&self) -> Period {
        self.period(self.active())
    }

    /// Frame at which the audio callback woke up during `period`.
    pub fn wakeup_frame(&self, period: usize) -> i32 {
        self.slots[period & (MAX_BUFFER_PERIODS - 1)]
            .wakeup_frame
            .load(Ordering::Acquire)
    }

    /// Claims the writer side and restarts the clock reference.
    ///
    /// Only one writer may exist at a time; it is released on drop.
    pub fn writer(self: &Arc<Self>, sample_rate: u32) -> Result<ClockWriter> {
        if sample_rate == 0 {
            return Err(Error::InvalidSampleRate(sample_rate));
        }
        if self.writer_taken.swap(true) {
            return Err(Error::WriterTaken);
        }
        let mut writer = ClockWriter {
            shared: Arc::clone(self),
            sample_rate,
            layout: None,
            phase: PhaseWindow {
                lock: 0.0,
                min: 0.0,
                max: 0.0,
            },
            last_wakeup: UNSET,
            initialized: false,
            last_zone: PhaseZone::Locked,
        };
        writer.start();
        Ok(writer)
    }

    /// Period containing `now`.
    ///
    /// Falls back to extrapolating from the most recently started slot when
    /// no slot matches (clock not started yet, or this thread's view of the
    /// ring is stale).
    pub fn period_for(&self, now: i64) -> usize {
        let ring: [Period; MAX_BUFFER_PERIODS] = std::array::from_fn(|i| self.period(i));

        for p in ring.iter().filter(|p| p.is_started()) {
            let last = &ring[p.prev & (MAX_BUFFER_PERIODS - 1)];
            if (now > last.end_time || now >= p.start_time) && now < p.end_time {
                return p.index;
            }
        }

        let recent = ring
            .iter()
            .filter(|p| p.start_time != UNSET && p.start_time <= now)
            .max_by_key(|p| p.start_time)
            .or_else(|| {
                ring.iter()
                    .filter(|p| p.start_time != UNSET)
                    .min_by_key(|p| p.start_time)
            });

        match recent {
            None => self.active(),
            Some(r) if r.nsec_per_period <= 0.0 || r.periods == 0 => r.index,
            Some(r) => {
                let elapsed = ((now - r.start_time) as f64 / r.nsec_per_period).max(0.0) as usize;
                debug!(target: "jamrouter::timing", period = r.index, elapsed, "extrapolating period");
                (r.index + elapsed) & r.period_mask()
            }
        }
    }

    /// Frame offset of `now` within `period`, possibly corrected to an
    /// earlier period with [`FrameFlags::FIX_LOWER`].
    pub fn frame_for(&self, period: usize, now: i64, flags: FrameFlags) -> (usize, i32) {
        let mut p = self.period(period);
        if p.nsec_per_frame <= 0.0 || p.start_time == UNSET {
            return (p.index, 0);
        }

        let mut frame = ((now - p.start_time) as f64 / p.nsec_per_frame) as i64;
        if frame < 0 {
            if flags.contains(FrameFlags::LIMIT_LOWER) {
                frame = 0;
            } else if flags.contains(FrameFlags::FIX_LOWER) {
                let mut steps = MAX_BUFFER_PERIODS;
                while frame < 0 && steps > 0 {
                    frame += p.size as i64;
                    p = self.period(p.prev);
                    steps -= 1;
                }
                frame = frame.max(0);
                debug!(target: "jamrouter::timing", period = p.index, frame, "frame rolled back");
            }
        } else if flags.contains(FrameFlags::LIMIT_UPPER) && frame >= p.size as i64 {
            frame = p.size as i64 - 1;
        }

        (p.index, frame.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
    }

    /// `(period, frame)` of the current instant, rolled back on a stale
    /// period and clamped to the period end.
    pub fn locate(&self, now: i64) -> (usize, i32) {
        let period = self.period_for(now);
        self.frame_for(period, now, FrameFlags::FIX_LOWER | FrameFlags::LIMIT_UPPER)
    }

    /// Timestamp of `frame` within `period`.
    pub fn frame_time(&self, period: usize, frame: i32) -> i64 {
        self.period(period).frame_time(frame)
    }

    /// Sleeps until `period` ends and returns the following slot.
    ///
    /// A caller that has fallen a whole ring behind (audio stopped) waits one
    /// nominal period instead of spinning through stale slots.
    pub fn sleep_until_period_boundary(&self, period: usize) -> usize {
        let p = self.period(period);
        if p.end_time != UNSET {
            let now = self.now();
            let ring = p.nsec_per_period * p.periods.max(1) as f64;
            if ((now - p.end_time) as f64) > ring && p.nsec_per_period > 0.0 {
                self.clock.sleep_until(now + p.nsec_per_period as i64);
            } else {
                self.clock.sleep_until(p.end_time);
            }
        }

        let next = self.slots[p.index].next_index() & (MAX_BUFFER_PERIODS - 1);
        self.slots[next].wakeup_frame.store(0, Ordering::Release);
        fence(Ordering::SeqCst);
        next
    }

    /// Sleeps until the instant of `frame` within `period`.
    pub fn sleep_until_frame(&self, period: usize, frame: i32) {
        let p = self.period(period);
        if p.start_time != UNSET {
            self.clock.sleep_until(p.frame_time(frame));
        }
    }
}

/// Exclusive write side of the period ring.
///
/// Owned by the audio cycle; call [`ClockWriter::advance`] exactly once per
/// callback.
pub struct ClockWriter {
    shared: Arc<ClockRecovery>,
    sample_rate: u32,
    layout: Option<PeriodLayout>,
    phase: PhaseWindow,
    last_wakeup: i64,
    initialized: bool,
    last_zone: PhaseZone,
}

impl fmt::Debug for ClockWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClockWriter")
            .field("sample_rate", &self.sample_rate)
            .field("layout", &self.layout)
            .field("phase", &self.phase)
            .field("last_zone", &self.last_zone)
            .finish()
    }
}

impl ClockWriter {
    pub fn recovery(&self) -> &Arc<ClockRecovery> {
        &self.shared
    }

    pub fn layout(&self) -> Option<&PeriodLayout> {
        self.layout.as_ref()
    }

    pub fn phase_window(&self) -> PhaseWindow {
        self.phase
    }

    /// Zone of the most recent wakeup.
    pub fn last_zone(&self) -> PhaseZone {
        self.last_zone
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Resets the clock reference. The next [`advance`](Self::advance)
    /// re-derives every period from that wakeup.
    pub fn start(&mut self) {
        let now = self.shared.now();
        for slot in self.shared.slots.iter() {
            slot.write(|w| w.start(now));
        }
        if let Some(layout) = &self.layout {
            let active = self.shared.active();
            self.shared.slots[active]
                .write(|w| w.nsec(layout.nsec_per_period, layout.nsec_per_frame));
        }
        self.last_wakeup = UNSET;
        self.initialized = false;
        info!(target: "jamrouter::init", sample_rate = self.sample_rate, "clock reference started");
    }

    /// Changes the sample rate, forcing a clock restart on the next cycle.
    pub fn set_sample_rate(&mut self, sample_rate: u32) -> Result<()> {
        if sample_rate == 0 {
            return Err(Error::InvalidSampleRate(sample_rate));
        }
        if sample_rate != self.sample_rate {
            self.sample_rate = sample_rate;
            self.initialized = false;
        }
        Ok(())
    }

    /// Checks that `nframes` can be laid out at the current sample rate.
    pub fn validate_period_size(&self, nframes: u32) -> Result<()> {
        PeriodLayout::new(self.shared.timing(), self.sample_rate, nframes).map(|_| ())
    }

    /// Publishes the timing of the period after `period` and returns its
    /// index.
    pub fn advance(&mut self, period: usize, nframes: u32) -> usize {
        let shared = Arc::clone(&self.shared);
        let cur_idx = period & (MAX_BUFFER_PERIODS - 1);
        let prev_wakeup = self.last_wakeup;
        let now = shared.now();
        self.last_wakeup = now;

        let mut cur = shared.slots[cur_idx].snapshot(cur_idx);
        let needs_restart = !self.initialized
            || nframes != cur.size
            || cur.end_time == UNSET
            || self.layout.map(|l| l.size) != Some(nframes)
            || self.layout.map(|l| l.sample_rate) != Some(self.sample_rate);

        let (layout, delta, next_nspp) = if needs_restart {
            let layout = match self.relayout(cur_idx, nframes) {
                Some(layout) => layout,
                None => return period,
            };

            let cur_size = if cur.size > 0 { cur.size } else { layout.size };
            let cur_nspp = cur_size as f64 * 1e9 / self.sample_rate as f64;
            let cur_nspf = cur_nspp / cur_size as f64;
            let delta = layout.nsec_per_frame * self.phase.lock;
            let start = now - delta as i64;
            shared.slots[cur_idx].write(|w| {
                w.times(start, start + cur_nspp as i64);
                w.nsec(cur_nspp, cur_nspf);
            });
            cur = shared.slots[cur_idx].snapshot(cur_idx);
            debug!(target: "jamrouter::timing", period = cur_idx, nframes, "clock restart");
            (layout, delta, layout.nsec_per_period)
        } else {
            let Some(layout) = self.layout else {
                return period;
            };
            let delta = (now - cur.start_time) as f64;
            let decay = layout.decay_generations;
            let avg = cur.nsec_per_period - cur.nsec_per_period / decay
                + (now - prev_wakeup) as f64 / decay;
            (layout, delta, avg)
        };

        let next_idx = cur.next & (MAX_BUFFER_PERIODS - 1);
        let mut next_nspp = next_nspp;
        let mut next_nspf = next_nspp / layout.size as f64;
        let mut timeref = cur.start_time;

        let wakeup_frame = if cur.nsec_per_frame > 0.0 {
            (delta / cur.nsec_per_frame) as i32
        } else {
            0
        };
        shared.slots[cur_idx]
            .wakeup_frame
            .store(wakeup_frame, Ordering::Release);

        let zone = PhaseZone::classify(
            delta,
            &self.phase,
            cur.nsec_per_frame,
            cur.nsec_per_period,
            wakeup_frame,
            cur.size,
        );
        match zone {
            PhaseZone::TooEarly => {
                timeref -= (next_nspf * 0.25) as i64;
                next_nspp = layout.nsec_per_period;
                next_nspf = layout.nsec_per_frame;
            }
            PhaseZone::EarlyJitter => timeref -= (next_nspf * 0.25) as i64,
            PhaseZone::Locked => {}
            PhaseZone::LateJitter => timeref += (next_nspf * 0.25) as i64,
            PhaseZone::TooLate => {
                timeref += (next_nspf * (layout.size as f64 - 1.0)) as i64;
                next_nspp = layout.nsec_per_period;
                next_nspf = layout.nsec_per_frame;
            }
        }
        if zone != PhaseZone::Locked {
            debug!(target: "jamrouter::timing", ?zone, wakeup_frame, period = cur_idx, "phase correction");
        }
        self.last_zone = zone;

        let next_start = timeref + next_nspp as i64;
        let next_end = next_start + next_nspp as i64;
        let (prev_link, next_link) = layout.links(next_idx as u32);
        shared.slots[next_idx].write(|w| {
            w.layout(&layout, next_idx as u32);
            w.links(prev_link, next_link);
            w.times(next_start, next_end);
            w.nsec(next_nspp, next_nspf);
        });

        let after_idx = next_link as usize & (MAX_BUFFER_PERIODS - 1);
        let after = shared.slots[after_idx].snapshot(after_idx);
        let after_nspp = if after.nsec_per_period > 0.0 {
            after.nsec_per_period
        } else {
            layout.nsec_per_period
        };
        shared.slots[after_idx].write(|w| w.times(next_end, next_end + after_nspp as i64));

        self.initialized = true;
        shared.active.store(next_idx, Ordering::Release);
        shared.running.set(true);
        next_idx
    }

    /// Lays out every slot for `nframes`. After the first layout the slot
    /// in use is left alone; it picks up the new layout when it next comes
    /// around as the following period.
    fn relayout(&mut self, active: usize, nframes: u32) -> Option<PeriodLayout> {
        let shared = &self.shared;
        let layout = match PeriodLayout::new(shared.timing(), self.sample_rate, nframes) {
            Ok(layout) => layout,
            Err(e) => {
                error!(target: "jamrouter::timing", "cannot lay out {nframes}-frame periods: {e}");
                return None;
            }
        };
        let first = self.layout.is_none();

        for (i, slot) in shared.slots.iter().enumerate() {
            let (prev, next) = layout.links(i as u32);
            if i == active && !first {
                slot.write(|w| w.links(prev, next));
                continue;
            }
            slot.write(|w| {
                w.layout(&layout, i as u32);
                w.links(prev, next);
                w.nsec(layout.nsec_per_period, layout.nsec_per_frame);
            });
        }

        self.phase = layout.phase_window(shared.timing());
        self.layout = Some(layout);
        info!(
            target: "jamrouter::init",
            sample_rate = layout.sample_rate,
            period_size = layout.size,
            periods = layout.periods,
            rx_latency = layout.rx_latency_periods,
            tx_latency = layout.tx_latency_periods,
            "period layout"
        );
        Some(layout)
    }
}

impl Drop for ClockWriter {
    fn drop(&mut self) {
        self.shared.running.set(false);
        self.shared.writer_taken.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const NSPP_256: f64 = 256.0 * 1e9 / 48_000.0;

    fn setup() -> (Arc<ManualClock>, Arc<ClockRecovery>) {
        let clock = Arc::new(ManualClock::new(1_000_000_000));
        let recovery =
            Arc::new(ClockRecovery::new(TimingConfig::default(), clock.clone()).unwrap());
        (clock, recovery)
    }

    #[test]
    fn test_single_writer() {
        let (_clock, recovery) = setup();
        let writer = recovery.writer(48_000).unwrap();
        assert!(matches!(recovery.writer(48_000), Err(Error::WriterTaken)));
        drop(writer);
        assert!(recovery.writer(48_000).is_ok());
    }

    #[test]
    fn test_first_advance_restarts_at_phase() {
        let (clock, recovery) = setup();
        let mut writer = recovery.writer(48_000).unwrap();
        assert!(!recovery.is_running());

        let now = clock.now();
        let next = writer.advance(0, 256);
        assert_eq!(next, 1);
        assert!(recovery.is_running());
        assert_eq!(recovery.active(), 1);

        let cur = recovery.period(0);
        let delta = (NSPP_256 / 256.0 * 128.0) as i64;
        assert_eq!(cur.start_time, now - delta);
        assert_eq!(writer.last_zone(), PhaseZone::Locked);
        assert_eq!(recovery.wakeup_frame(0), 128);

        let p1 = recovery.period(1);
        assert_eq!(p1.start_time, cur.start_time + NSPP_256 as i64);
        assert_eq!(recovery.period(2).start_time, p1.end_time);
    }

    #[test]
    fn test_steady_wakeups_stay_locked() {
        let (clock, recovery) = setup();
        let mut writer = recovery.writer(48_000).unwrap();
        let mut period = writer.advance(0, 256);
        for _ in 0..100 {
            clock.advance(NSPP_256 as i64);
            period = writer.advance(period, 256);
            assert_eq!(writer.last_zone(), PhaseZone::Locked);
        }
        let p = recovery.period(period);
        approx::assert_relative_eq!(p.nsec_per_period, NSPP_256, max_relative = 1e-6);
    }

    #[test]
    fn test_late_wakeup_latches() {
        let (clock, recovery) = setup();
        let mut writer = recovery.writer(48_000).unwrap();
        let mut period = writer.advance(0, 256);
        clock.advance(NSPP_256 as i64);
        period = writer.advance(period, 256);

        clock.advance((NSPP_256 * 2.5) as i64);
        let next = writer.advance(period, 256);
        assert_eq!(writer.last_zone(), PhaseZone::TooLate);
        approx::assert_relative_eq!(recovery.period(next).nsec_per_period, NSPP_256);
    }

    #[test]
    fn test_early_wakeup_nudges_back() {
        let (clock, recovery) = setup();
        let mut writer = recovery.writer(48_000).unwrap();
        let mut period = writer.advance(0, 256);
        // 64 frames early relative to the 128-frame lock
        clock.advance((NSPP_256 * 0.75) as i64);
        period = writer.advance(period, 256);
        assert_eq!(writer.last_zone(), PhaseZone::EarlyJitter);

        clock.set(recovery.period(period).start_time - 1_000);
        writer.advance(period, 256);
        assert_eq!(writer.last_zone(), PhaseZone::TooEarly);
    }

    #[test]
    fn test_frame_flags() {
        let (clock, recovery) = setup();
        let mut writer = recovery.writer(48_000).unwrap();
        let period = writer.advance(0, 256);
        let p = recovery.period(period);

        let before = p.start_time - (p.nsec_per_frame * 10.5) as i64;
        assert_eq!(
            recovery.frame_for(period, before, FrameFlags::LIMIT_LOWER),
            (period, 0)
        );
        let (fixed, frame) = recovery.frame_for(period, before, FrameFlags::FIX_LOWER);
        assert_eq!(fixed, p.prev);
        assert!((245..=246).contains(&frame));

        let after = p.end_time + (p.nsec_per_frame * 3.5) as i64;
        assert_eq!(
            recovery.frame_for(period, after, FrameFlags::LIMIT_UPPER),
            (period, 255)
        );
        assert_eq!(recovery.frame_for(period, after, FrameFlags::NONE).1, 259);
        let _ = clock;
    }

    #[test]
    fn test_period_for_extrapolates_when_stale() {
        let (clock, recovery) = setup();
        let mut writer = recovery.writer(48_000).unwrap();
        let period = writer.advance(0, 256);
        let p = recovery.period(period);
        // Far past anything published: extrapolate from the latest slot.
        clock.set(p.start_time + (NSPP_256 * 5.5) as i64);
        let found = recovery.period_for(clock.now());
        assert!(found < 4);
    }

    #[test]
    fn test_sleep_until_boundary_returns_next() {
        let (clock, recovery) = setup();
        let mut writer = recovery.writer(48_000).unwrap();
        let period = writer.advance(0, 256);
        let end = recovery.period(period).end_time;
        let next = recovery.sleep_until_period_boundary(period);
        assert_eq!(next, (period + 1) & 3);
        assert_eq!(clock.now(), end);
        assert_eq!(recovery.wakeup_frame(next), 0);
    }

    #[test]
    fn test_unsupported_size_leaves_ring_alone() {
        let (_clock, recovery) = setup();
        let mut writer = recovery.writer(48_000).unwrap();
        assert_eq!(writer.advance(0, 100), 0);
        assert!(!recovery.is_running());
        assert!(writer.validate_period_size(100).is_err());
        assert!(writer.validate_period_size(128).is_ok());
    }
}
