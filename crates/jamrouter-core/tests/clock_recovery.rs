//! Integration tests for clock recovery and the event queue it indexes.
//!
//! Time is simulated with `ManualClock`, so every cycle lands exactly where
//! the test puts it.

use std::sync::Arc;

use jamrouter_core::{
    Clock, ClockWriter, FrameFlags, ManualClock, PhaseZone, QueueConfig, QueueId, SyncContext,
    TimingConfig,
};
use jamrouter_midi::MidiMessage;
use proptest::prelude::*;

const NSPP_256: i64 = 5_333_333;

fn context() -> (Arc<ManualClock>, Arc<SyncContext>) {
    let clock = Arc::new(ManualClock::new(10_000_000_000));
    let ctx = SyncContext::new(TimingConfig::default(), QueueConfig::default(), clock.clone())
        .expect("context");
    (clock, ctx)
}

/// Runs `cycles` perfectly regular audio callbacks and returns the period
/// published by the last one.
fn run(clock: &ManualClock, writer: &mut ClockWriter, cycles: usize, nframes: u32) -> usize {
    let mut period = writer.recovery().active();
    for i in 0..cycles {
        if i > 0 {
            clock.advance(NSPP_256);
        }
        period = writer.advance(period, nframes);
    }
    period
}

// ---------------------------------------------------------------------------
// Ring timing
// ---------------------------------------------------------------------------

#[test]
fn test_stable_ring_period_lengths() {
    let (clock, ctx) = context();
    let recovery = ctx.recovery();
    let mut writer = recovery.writer(48_000).unwrap();
    run(&clock, &mut writer, 200, 256);

    for index in 0..4 {
        let p = recovery.period(index);
        let len = (p.end_time - p.start_time) as f64;
        let tolerance = p.nsec_per_frame * 0.25 + 2.0;
        assert!(
            (len - p.nsec_per_period).abs() <= tolerance,
            "period {index}: length {len} vs {}",
            p.nsec_per_period
        );
    }
    assert_eq!(writer.last_zone(), PhaseZone::Locked);
}

#[test]
fn test_consecutive_periods_are_contiguous() {
    let (clock, ctx) = context();
    let recovery = ctx.recovery();
    let mut writer = recovery.writer(48_000).unwrap();
    let period = run(&clock, &mut writer, 20, 256);

    let p = recovery.period(period);
    let next = recovery.period(p.next);
    assert_eq!(next.start_time, p.end_time);
    assert_eq!(recovery.period(p.prev).next, period);
}

#[test]
fn test_restart_after_start() {
    let (clock, ctx) = context();
    let recovery = ctx.recovery();
    let mut writer = recovery.writer(48_000).unwrap();
    let period = run(&clock, &mut writer, 10, 256);

    // long stall, then the driver restarts the clock reference
    clock.advance(NSPP_256 * 100);
    writer.start();
    let now = clock.now();
    let next = writer.advance(period, 256);
    assert_eq!(writer.last_zone(), PhaseZone::Locked);

    let cur = recovery.period(period);
    assert!(cur.start_time < now && now < cur.end_time);
    assert_eq!(recovery.period_for(now), period);
    assert_eq!(recovery.period(next).start_time, cur.end_time);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_period_and_frame_round_trip(cycles in 1usize..40, frame in 0i32..256) {
        let (clock, ctx) = context();
        let recovery = ctx.recovery();
        let mut writer = recovery.writer(48_000).unwrap();
        let period = run(&clock, &mut writer, cycles, 256);

        let p = recovery.period(period);
        let t = recovery.frame_time(period, frame) + (p.nsec_per_frame / 2.0) as i64;
        prop_assert_eq!(recovery.period_for(t), period);
        prop_assert_eq!(recovery.frame_for(period, t, FrameFlags::NONE), (period, frame));
    }
}

// ---------------------------------------------------------------------------
// Latency and resizing
// ---------------------------------------------------------------------------

#[test]
fn test_rx_latency_one_period() {
    let (clock, ctx) = context();
    let recovery = ctx.recovery();
    let queue = ctx.queue();
    let mut writer = recovery.writer(48_000).unwrap();
    let period = run(&clock, &mut writer, 5, 256);

    let p = recovery.period(period);
    assert_eq!(p.rx_latency_periods, 1);
    let note = MidiMessage::note_on(0, 60, 100);
    queue.append_copy(&p, QueueId::ToGraph, &note, &[], 10, p.rx_index);

    let next = p.next;
    let mut last = period;
    assert!(queue.detach(QueueId::ToGraph, &mut last, next, 9).is_empty());

    let mut last = period;
    let mut batch = queue.detach(QueueId::ToGraph, &mut last, next, 10);
    assert!(!batch.is_late());
    assert_eq!(batch.next_event().map(|e| e.message), Some(note));
}

#[test]
fn test_resize_leaves_active_period_alone() {
    let (clock, ctx) = context();
    let recovery = ctx.recovery();
    let mut writer = recovery.writer(48_000).unwrap();
    let period = run(&clock, &mut writer, 6, 256);

    let before = recovery.period(period);
    clock.advance(NSPP_256);
    let next = writer.advance(period, 128);

    let after = recovery.period(period);
    assert_eq!(after.rx_index, before.rx_index);
    assert_eq!(after.tx_index, before.tx_index);
    assert_eq!(after.size, 256);

    let n = recovery.period(next);
    assert_eq!(n.size, 128);
    assert_eq!(n.output_index, next as u32 * 128);
    let other = recovery.period((next + 1) & 3);
    assert_eq!(other.size, 128);
}
