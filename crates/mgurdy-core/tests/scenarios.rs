//! Integration scenarios driving a full `Core` through a synthetic sensor
//! source and an in-process output, exercising the concrete cross-component
//! behavior unit tests on individual modules can't see: sensor conditioning
//! feeding the instrument model feeding output reconciliation, end to end.

use std::sync::mpsc;
use std::sync::Arc;

use mgurdy_core::outputs::inprocess::{InProcessOutput, Message, MessageLog};
use mgurdy_core::sensors::{ChannelSensorSource, RawSensorEvent};
use mgurdy_core::telemetry::NullTelemetrySink;
use mgurdy_core::Core;
use mgurdy_protocol::string::{StringId, StringParam};

const WHEEL_ELAPSED_US: u32 = 1100;

fn new_core() -> (Arc<Core>, mpsc::Sender<RawSensorEvent>, MessageLog) {
    let (tx, rx) = mpsc::channel();
    let core = Arc::new(Core::new(Box::new(ChannelSensorSource::new(rx)), Box::new(NullTelemetrySink)));
    let (out, log) = InProcessOutput::new();
    core.add_output(Box::new(out), 0).expect("room for one output");
    (core, tx, log)
}

/// Sends one tick's worth of wheel movement: a distance chosen so that
/// `calc_wheel_speed`'s `distance * 100 * WHEEL_EXPECTED_US / elapsed_us`
/// formula lands on `target_speed` directly when `elapsed_us` is
/// `WHEEL_EXPECTED_US`, then lets `tick()` pull it off the channel.
fn send_wheel_tick(tx: &mpsc::Sender<RawSensorEvent>, target_speed: i32) {
    let distance = target_speed / 100;
    tx.send(RawSensorEvent::WheelDistance(distance)).unwrap();
    tx.send(RawSensorEvent::WheelElapsedUs(WHEEL_ELAPSED_US)).unwrap();
    tx.send(RawSensorEvent::WheelSync).unwrap();
}

fn send_key_pressure(tx: &mpsc::Sender<RawSensorEvent>, index: usize, value: i32) {
    tx.send(RawSensorEvent::KeyPressure { index, value }).unwrap();
}

/// Runs `tick()` up to `max` times, feeding `per_tick` before each one, until
/// `done` reports the awaited condition; fails the test if it never does.
fn run_until(core: &Core, max: u32, mut per_tick: impl FnMut(u32), mut done: impl FnMut() -> bool) {
    for i in 0..max {
        per_tick(i);
        core.tick();
        if done() {
            return;
        }
    }
    panic!("condition not reached within {max} ticks");
}

#[test]
fn scenario_idle_produces_no_events() {
    let (core, _tx, log) = new_core();
    core.start();
    for _ in 0..20 {
        core.tick();
    }
    assert!(log.is_empty(), "no keys pressed, wheel stationary, all strings muted by default: nothing should be sent");
}

#[test]
fn scenario_wheel_onset_then_melody_key_press() {
    let (core, tx, log) = new_core();
    core.set_string(StringId::Melody(0), StringParam::Mute(false)).unwrap();
    core.set_base_note_delay(0);
    core.start();

    // Wheel speed ramps up past the start threshold; expect the base note
    // (channel 0, note 60) to eventually sound since no key is pressed yet.
    run_until(
        &core,
        200,
        |_| send_wheel_tick(&tx, 500),
        || log.drain().iter().any(|m| matches!(m, Message::NoteOn { channel: 0, note: 60, .. })),
    );

    // Press key index 4: after `key_on_debounce` (2) ticks of held pressure
    // the key registers, the highest active key index (4) is no longer below
    // `empty_key` (0), and the base note gives way to the tangent note.
    run_until(
        &core,
        200,
        |_| {
            send_wheel_tick(&tx, 500);
            send_key_pressure(&tx, 4, 2000);
        },
        || log.drain().iter().any(|m| matches!(m, Message::NoteOn { channel: 0, note: 65, .. })),
    );
}

#[test]
fn scenario_polyphonic_melody_tracks_both_keys() {
    let (core, tx, log) = new_core();
    core.set_string(StringId::Melody(0), StringParam::Mute(false)).unwrap();
    core.set_string(StringId::Melody(0), StringParam::Polyphonic(true)).unwrap();
    core.set_feature(mgurdy_core::control::Feature::PolyBaseNote, true);
    core.set_feature(mgurdy_core::control::Feature::PolyPitchBend, false);
    core.set_base_note_delay(0);
    core.start();

    let mut seen_64 = false;
    let mut seen_68 = false;
    let mut seen_pitch = false;
    for _ in 0..300 {
        send_wheel_tick(&tx, 500);
        send_key_pressure(&tx, 3, 2000);
        send_key_pressure(&tx, 7, 2000);
        core.tick();
        for msg in log.drain() {
            match msg {
                Message::NoteOn { channel: 0, note: 64, .. } => seen_64 = true,
                Message::NoteOn { channel: 0, note: 68, .. } => seen_68 = true,
                Message::PitchBend { channel: 0, value: 0x2000 } => seen_pitch = true,
                _ => {}
            }
        }
        if seen_64 && seen_68 && seen_pitch {
            break;
        }
    }
    assert!(seen_64, "key index 3 should sound at base_note + 3 + 1 = 64");
    assert!(seen_68, "key index 7 should sound at base_note + 7 + 1 = 68");
    assert!(seen_pitch, "poly_pitch_bend disabled: pitch bend should stay centered");
}

#[test]
fn scenario_trompette_threshold_crossing() {
    let (core, tx, log) = new_core();
    core.set_string(StringId::Trompette(0), StringParam::Mute(false)).unwrap();
    core.set_string(StringId::Trompette(0), StringParam::Threshold(600)).unwrap();
    core.start();

    // Trompette(0) defaults to channel 6 (melody 0-2, trompette 6-8, drone 3-5).
    let mut seen_note_on = false;
    let mut seen_pressure = false;
    for _ in 0..300 {
        send_wheel_tick(&tx, 800);
        core.tick();
        for msg in log.drain() {
            match msg {
                Message::NoteOn { channel: 6, note: 60, .. } => seen_note_on = true,
                Message::ChannelPressure { channel: 6, value } if value > 0 => seen_pressure = true,
                _ => {}
            }
        }
        if seen_note_on && seen_pressure {
            break;
        }
    }
    assert!(seen_note_on, "wheel speed above threshold should sound the trompette base note");
    assert!(seen_pressure, "chien speed above threshold should drive nonzero channel pressure");
}

#[test]
fn scenario_percussion_mode_debounces_on_and_off() {
    let (core, tx, log) = new_core();
    core.set_string(StringId::Trompette(0), StringParam::Mute(false)).unwrap();
    core.set_string(StringId::Trompette(0), StringParam::Mode(1)).unwrap(); // Generic
    core.set_string(StringId::Trompette(0), StringParam::Threshold(400)).unwrap();
    core.start();

    run_until(
        &core,
        300,
        |_| send_wheel_tick(&tx, 700),
        || log.drain().iter().any(|m| matches!(m, Message::NoteOn { channel: 6, note: 60, .. })),
    );

    run_until(
        &core,
        300,
        |_| send_wheel_tick(&tx, 0),
        || log.drain().iter().any(|m| matches!(m, Message::NoteOff { channel: 6, note: 60 })),
    );
}

#[test]
fn scenario_halt_outputs_resets_and_silences() {
    let (core, tx, log) = new_core();
    core.set_string(StringId::Drone(0), StringParam::Mute(false)).unwrap();
    core.start();

    run_until(
        &core,
        50,
        |_| send_wheel_tick(&tx, 1000),
        || log.drain().iter().any(|m| matches!(m, Message::NoteOn { channel: 3, note: 60, .. })),
    );

    core.halt_outputs(true);
    let after_halt = log.drain();
    assert!(
        after_halt.iter().any(|m| matches!(m, Message::Reset { channel: 3 })),
        "halting should reset every active channel"
    );

    log.drain();
    for _ in 0..10 {
        send_wheel_tick(&tx, 1000);
        core.tick();
    }
    assert!(log.is_empty(), "no further events should be emitted while halted");
}
