//! End-to-end tests: loopback transport, timer audio driver and the real
//! Rx/Tx threads under the choreographer.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use jamrouter_core::{QueueConfig, SyncContext, TimingConfig};
use jamrouter_io::{
    ChoreographerConfig, GraphCycle, GraphInput, GraphOutput, HaltHandle, LoopbackDevice,
    LoopbackTransport, RouterOptions, Subsystem, SubsystemState, ThreadChoreographer,
    TimerAudioDriver,
};
use jamrouter_midi::MidiMessage;

struct Rig {
    router: ThreadChoreographer,
    input: GraphInput,
    output: GraphOutput,
    device: LoopbackDevice,
    halt: HaltHandle,
}

fn rig(options: RouterOptions) -> Rig {
    let ctx = SyncContext::monotonic(TimingConfig::default(), QueueConfig::default()).unwrap();
    let (graph, input, output) = GraphCycle::new(Arc::clone(&ctx), &options, 256).unwrap();
    let (transport, device) = LoopbackTransport::new("test");
    let audio = TimerAudioDriver::new(Arc::clone(ctx.recovery().clock()), 48_000, 256, 66);
    let halt = audio.halt_handle();

    let config = ChoreographerConfig {
        audio_retry_delay: Duration::from_millis(10),
        watchdog_interval: Duration::from_millis(5),
        ..Default::default()
    };
    let mut router = ThreadChoreographer::new(
        ctx,
        options,
        Box::new(transport),
        Box::new(audio),
        graph,
        config,
    );
    router.start().unwrap();
    Rig {
        router,
        input,
        output,
        device,
        halt,
    }
}

fn wait_for(mut f: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

fn all_running(router: &ThreadChoreographer) -> bool {
    [Subsystem::Audio, Subsystem::Rx, Subsystem::Tx]
        .iter()
        .all(|&s| router.state(s) == SubsystemState::Running)
}

// ---------------------------------------------------------------------------
// Event flow
// ---------------------------------------------------------------------------

#[test]
fn test_hardware_note_reaches_graph() {
    let mut rig = rig(RouterOptions::default());
    assert!(all_running(&rig.router));

    assert!(rig.device.send(&[0x90, 60, 100]));
    let mut sysex = Vec::new();
    let mut received = None;
    assert!(wait_for(|| {
        received = rig.output.recv(&mut sysex);
        received.is_some()
    }));

    let event = received.unwrap();
    assert_eq!(event.message, MidiMessage::note_on(0, 60, 100));
    assert!(event.frame < 256);
}

#[test]
fn test_graph_note_reaches_hardware() {
    let mut rig = rig(RouterOptions::default());

    assert!(rig.input.send(10, &MidiMessage::note_on(1, 64, 90), &[]));
    let bytes = rig.device.recv_timeout(Duration::from_secs(5));
    assert_eq!(bytes, Some(vec![0x91, 64, 90]));

    assert!(rig.input.send(0, &MidiMessage::note_on(1, 64, 0), &[]));
    let bytes = rig.device.recv_timeout(Duration::from_secs(5));
    assert_eq!(bytes, Some(vec![0x91, 64, 0]));
}

#[test]
fn test_sysex_round_trip_through_hardware_side() {
    let mut rig = rig(RouterOptions::default());

    let payload = [0xF0, 0x7D, 0x01, 0x02, 0xF7];
    assert!(rig.input.send(0, &MidiMessage::SysEx, &payload));
    assert_eq!(rig.device.recv_timeout(Duration::from_secs(5)), Some(payload.to_vec()));

    assert!(rig.device.send(&payload));
    let mut sysex = Vec::new();
    assert!(wait_for(|| rig.output.recv(&mut sysex).is_some()));
    assert_eq!(sysex, payload);
}

// ---------------------------------------------------------------------------
// Watchdog
// ---------------------------------------------------------------------------

#[test]
fn test_unplugged_input_restarts_alone() {
    let mut rig = rig(RouterOptions::default());
    assert!(rig.router.watchdog_cycle().is_quiet());

    rig.device.unplug();
    assert!(wait_for(|| rig.router.state(Subsystem::Rx) == SubsystemState::Stopped));
    assert_eq!(rig.router.state(Subsystem::Tx), SubsystemState::Running);
    assert_eq!(rig.router.state(Subsystem::Audio), SubsystemState::Running);

    rig.device.replug();
    let report = rig.router.watchdog_cycle();
    assert!(report.rx);
    assert!(!report.tx);
    assert!(!report.audio);
    assert!(all_running(&rig.router));

    // the restarted Rx thread delivers again
    rig.device.send(&[0xB0, 7, 100]);
    let mut sysex = Vec::new();
    let mut received = None;
    assert!(wait_for(|| {
        received = rig.output.recv(&mut sysex);
        received.is_some()
    }));
    assert_eq!(received.unwrap().message, MidiMessage::controller(0, 7, 100));
}

#[test]
fn test_lost_audio_restarts_alone() {
    let mut rig = rig(RouterOptions::default());

    rig.halt.halt();
    assert!(wait_for(|| rig.router.state(Subsystem::Audio) == SubsystemState::Stopped));

    let report = rig.router.watchdog_cycle();
    assert!(report.audio);
    assert!(!report.rx && !report.tx);
    assert!(all_running(&rig.router));

    assert!(rig.input.send(0, &MidiMessage::Start, &[]));
    assert_eq!(rig.device.recv_timeout(Duration::from_secs(5)), Some(vec![0xFA]));
}

#[test]
fn test_transport_change_restarts_both_midi_threads() {
    let mut rig = rig(RouterOptions::default());

    rig.device.request_reconnect();
    let report = rig.router.watchdog_cycle();
    assert!(report.rx && report.tx);
    assert!(!report.audio);
    assert!(all_running(&rig.router));
    assert!(rig.router.watchdog_cycle().is_quiet());
}

#[test]
fn test_shutdown_stops_everything() {
    let mut rig = rig(RouterOptions::default());
    let handle = rig.router.shutdown_handle();

    rig.router.shutdown();
    assert!(handle.is_requested());
    for s in [Subsystem::Audio, Subsystem::Rx, Subsystem::Tx] {
        assert_eq!(rig.router.state(s), SubsystemState::Stopped);
    }
    assert!(rig.router.watchdog_cycle().is_quiet());
}

#[test]
fn test_run_watchdog_returns_on_shutdown_request() {
    let mut rig = rig(RouterOptions::default());
    let handle = rig.router.shutdown_handle();

    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        handle.request();
    });
    rig.router.run_watchdog();
    stopper.join().unwrap();

    rig.router.shutdown();
    assert_eq!(rig.router.state(Subsystem::Rx), SubsystemState::Stopped);
}
