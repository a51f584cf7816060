//! Router built from a configuration file: loopback transport, timer-clocked
//! graph, both directions and the run loop.

use std::thread;
use std::time::{Duration, Instant};

use jamrouter::prelude::*;
use jamrouter::{MidiDriverKind, SubsystemState};

const CONFIG: &str = r#"
[timing]
sample_rate = 48000

[options]
keymaps = ["1,2,74"]

[midi]
driver = "loopback"
client_name = "router-test"

[audio]
driver = "timer"
period_size = 128

[watchdog]
interval_us = 5000
audio_retry_ms = 10
"#;

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

fn router() -> JamRouter {
    let config = RouterConfig::from_toml_str(CONFIG).unwrap();
    JamRouter::from_config(config).unwrap()
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

#[test]
fn test_config_selects_loopback_and_timer() {
    let mut router = router();
    assert_eq!(router.config().midi.driver, MidiDriverKind::Loopback);
    assert_eq!(router.config().audio.period_size, 128);
    assert!(router.loopback_device().is_some());

    assert!(router.take_graph_ports().is_some());
    assert!(router.take_graph_ports().is_none());
    assert_eq!(router.state(Subsystem::Rx), SubsystemState::Stopped);
}

#[test]
fn test_invalid_builder_rejected() {
    let result = JamRouter::builder().period_size(0).build();
    assert!(matches!(result, Err(Error::Config(_))));

    let result = JamRouter::builder().graph_capacity(0).build();
    assert!(matches!(result, Err(Error::Config(_))));
}

// ---------------------------------------------------------------------------
// Event flow
// ---------------------------------------------------------------------------

#[test]
fn test_routes_both_directions() {
    let mut router = router();
    let (mut input, mut output) = router.take_graph_ports().unwrap();
    let device = router.loopback_device().cloned().unwrap();
    router.start().unwrap();

    assert!(device.send(&[0x93, 48, 80]));
    let mut sysex = Vec::new();
    let mut received = None;
    assert!(wait_for(|| {
        received = output.recv(&mut sysex);
        received.is_some()
    }));
    let event = received.unwrap();
    assert_eq!(event.message, MidiMessage::note_on(3, 48, 80));
    assert!(event.frame < 128);

    // Channel 1 is key-mapped to controller 74 on channel 2.
    assert!(input.send(0, &MidiMessage::note_on(0, 60, 100), &[]));
    assert_eq!(
        device.recv_timeout(Duration::from_secs(5)),
        Some(vec![0xB1, 74, 60])
    );

    router.shutdown();
    assert_eq!(router.state(Subsystem::Tx), SubsystemState::Stopped);
}

#[test]
fn test_run_returns_after_shutdown_request() {
    let mut router = router();
    let handle = router.shutdown_handle();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        handle.request();
    });

    router.run().unwrap();
    stopper.join().unwrap();

    for subsystem in [Subsystem::Audio, Subsystem::Rx, Subsystem::Tx] {
        assert_eq!(router.state(subsystem), SubsystemState::Stopped);
    }
}
