//! Sensor conditioning: turns decoded raw sensor events into debounced key
//! state and a smoothed, gated wheel speed. Reading the actual input
//! devices is out of scope for this core -- see [`SensorSource`] for the
//! trait boundary a real reader implements.

use mgurdy_protocol::key::{Key, KeyAction, KeyCalibration, KeyState};
use mgurdy_protocol::state::SharedState;
use mgurdy_protocol::wheel::Wheel;
use mgurdy_protocol::wire::KeyRecord;
use mgurdy_protocol::KEY_COUNT;

use crate::{WHEEL_EXPECTED_US, WHEEL_START_SPEED};

/// A single decoded sensor event, mirroring the kernel input-event encoding
/// the original reads straight off the character devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawSensorEvent {
    /// Raw pressure reading for key `index` (0..24).
    KeyPressure { index: usize, value: i32 },
    WheelPosition(u32),
    WheelDistance(i32),
    WheelElapsedUs(u32),
    WheelGain(u32),
    /// Marks the end of one coherent batch of wheel readings.
    WheelSync,
}

/// Supplies decoded sensor events to the conditioner every tick. A real
/// implementation reads `/dev/input/event*`; tests and demos can use
/// [`NullSensorSource`] or [`ChannelSensorSource`].
pub trait SensorSource: Send {
    /// Return any events that arrived since the last call. Must not block.
    fn poll(&mut self) -> Vec<RawSensorEvent>;
}

/// A source that never produces events, for headless operation.
#[derive(Debug, Default)]
pub struct NullSensorSource;

impl SensorSource for NullSensorSource {
    fn poll(&mut self) -> Vec<RawSensorEvent> {
        Vec::new()
    }
}

/// A source fed by an MPSC channel, useful for tests and demo CLIs that
/// synthesize sensor input.
pub struct ChannelSensorSource {
    rx: std::sync::mpsc::Receiver<RawSensorEvent>,
}

impl ChannelSensorSource {
    pub fn new(rx: std::sync::mpsc::Receiver<RawSensorEvent>) -> Self {
        Self { rx }
    }
}

impl SensorSource for ChannelSensorSource {
    fn poll(&mut self) -> Vec<RawSensorEvent> {
        self.rx.try_iter().collect()
    }
}

/// Aggregate debounced keyboard state, recomputed every tick from the raw
/// per-key pressure readings.
#[derive(Debug, Clone)]
pub struct Keyboard {
    pub keys: [Key; KEY_COUNT],
    pub key_calib: [KeyCalibration; KEY_COUNT],

    /// Indices of currently-active keys (including keys mid-release
    /// debounce), in ascending key-index order.
    pub active_keys: Vec<usize>,
    /// Indices of keys whose pressed/released action changed this tick.
    pub changed_keys: Vec<usize>,
    /// Ticks since any key was last active; saturates at `base_note_delay`.
    pub inactive_count: i32,
}

impl Keyboard {
    /// Telemetry records for every key that changed action this tick.
    pub fn telemetry_records(&self) -> Vec<KeyRecord> {
        self.changed_keys
            .iter()
            .map(|&i| {
                let key = &self.keys[i];
                KeyRecord {
                    index: i as u16,
                    raw_pressure: key.raw_pressure.max(0) as u16,
                    smoothed_pressure: key.smoothed_pressure.max(0) as u16,
                    velocity: key.velocity.max(0) as u16,
                    action: key_action_code(key.action),
                }
            })
            .collect()
    }
}

fn key_action_code(action: KeyAction) -> u16 {
    match action {
        KeyAction::None => 0,
        KeyAction::Pressed => 1,
        KeyAction::Released => 2,
    }
}

impl Default for Keyboard {
    fn default() -> Self {
        Self {
            keys: [Key::default(); KEY_COUNT],
            key_calib: [KeyCalibration::default(); KEY_COUNT],
            active_keys: Vec::with_capacity(KEY_COUNT),
            changed_keys: Vec::with_capacity(KEY_COUNT),
            inactive_count: 0,
        }
    }
}

/// Accumulates decoded sensor events and turns them, once per tick, into
/// debounced key state and a gated wheel speed.
#[derive(Debug, Default)]
pub struct SensorConditioner {
    pub keyboard: Keyboard,
    pub wheel: Wheel,

    distance_acc: i32,
    elapsed_acc: u32,
}

impl SensorConditioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one tick's worth of raw events: update raw key pressures
    /// immediately (mirroring the original's "update on every sensor read,
    /// not once per tick" behavior) and accumulate wheel distance/time
    /// until a sync event flushes them.
    pub fn apply_events(&mut self, events: &[RawSensorEvent]) {
        let mut pending_distance: Option<i32> = None;
        let mut pending_elapsed: u32 = 0;

        for ev in events {
            match *ev {
                RawSensorEvent::KeyPressure { index, value } => {
                    if index >= KEY_COUNT {
                        continue;
                    }
                    let calib = self.keyboard.key_calib[index];
                    let key = &mut self.keyboard.keys[index];
                    let adjusted = (value as f32 * calib.pressure_adjust) as i32;
                    key.raw_pressure = value;
                    key.pressure = adjusted;
                    key.max_pressure = key.max_pressure.max(adjusted);
                    key.smoothed_pressure = mgurdy_protocol::mapping::smooth(adjusted, key.smoothed_pressure, 0.9);
                }
                RawSensorEvent::WheelPosition(raw) => {
                    self.wheel.position = 16383 - raw.min(16383);
                }
                RawSensorEvent::WheelDistance(d) => {
                    pending_distance = Some(d);
                }
                RawSensorEvent::WheelElapsedUs(us) => {
                    pending_elapsed = us;
                }
                RawSensorEvent::WheelGain(g) => {
                    self.wheel.gain = g;
                }
                RawSensorEvent::WheelSync => {
                    if let Some(d) = pending_distance.take() {
                        self.wheel.last_distance = d;
                        self.distance_acc += d;
                        self.elapsed_acc += pending_elapsed;
                        pending_elapsed = 0;
                    }
                }
            }
        }

        if self.elapsed_acc > 0 {
            self.wheel.distance = self.distance_acc;
            self.wheel.elapsed_us = self.elapsed_acc;
            self.distance_acc = 0;
            self.elapsed_acc = 0;
        }
    }

    /// Run debounce and wheel-speed calculation for the current tick. Must
    /// be called exactly once per tick, after `apply_events`, with the
    /// state mutex held.
    pub fn update(&mut self, state: &SharedState) {
        calc_wheel_speed(&mut self.wheel);
        debounce_keys(
            &mut self.keyboard,
            state.key_on_debounce,
            state.key_off_debounce,
            state.base_note_delay,
            self.wheel.speed,
        );
    }
}

fn debounce_keys(kb: &mut Keyboard, on_count: i32, off_count: i32, base_note_delay: i32, wheel_speed: u32) {
    kb.active_keys.clear();
    kb.changed_keys.clear();

    for i in 0..KEY_COUNT {
        let key = &mut kb.keys[i];
        key.action = KeyAction::None;

        if key.pressure > 0 {
            if key.state == KeyState::Active {
                kb.active_keys.push(i);
                key.debounce = 0;
                if key.active_since < base_note_delay {
                    key.active_since += 1;
                }
            } else {
                key.debounce += 1;
                if key.debounce > on_count {
                    key.state = KeyState::Active;
                    key.action = KeyAction::Pressed;
                    key.active_since = 0;

                    kb.changed_keys.push(i);
                    kb.active_keys.push(i);

                    let adjust = kb.key_calib[i].velocity_adjust;
                    key.velocity = (key.max_pressure as f32 * adjust) as i32;
                    key.debounce = 0;
                }
            }
        } else if key.state == KeyState::Inactive {
            key.debounce = 0;
        } else {
            key.debounce += 1;
            if key.debounce > off_count {
                key.state = KeyState::Inactive;
                key.action = KeyAction::Released;
                key.active_since = 0;

                kb.changed_keys.push(i);

                let adjust = kb.key_calib[i].velocity_adjust;
                key.velocity = (key.smoothed_pressure as f32 * adjust) as i32;
                key.max_pressure = 0;
                key.smoothed_pressure = 0;
                key.debounce = 0;
            } else {
                kb.active_keys.push(i);
            }
        }
    }

    if kb.active_keys.is_empty() {
        if wheel_speed == 0 {
            // A stopped wheel means the next onset should resolve the base
            // note immediately rather than wait out the full delay.
            kb.inactive_count = base_note_delay;
        } else if kb.inactive_count < base_note_delay {
            kb.inactive_count += 1;
        }
    } else {
        kb.inactive_count = 0;
    }
}

fn calc_wheel_speed(wheel: &mut Wheel) {
    if !(500..=3000).contains(&wheel.elapsed_us) {
        return;
    }

    let sign = if wheel.distance < 0 { -100 } else { 100 };
    let speed = (wheel.distance * sign * WHEEL_EXPECTED_US) / wheel.elapsed_us as i32;

    if speed > 0 || wheel.raw_speed > 0 {
        wheel.raw_speed = mgurdy_protocol::mapping::smooth(speed, wheel.raw_speed, 0.8);
    }

    if wheel.speed > 0 || wheel.raw_speed >= WHEEL_START_SPEED {
        wheel.speed = wheel.raw_speed.max(0) as u32;
    } else {
        wheel.speed = 0;
    }
}

#[cfg(target_os = "linux")]
pub mod platform {
    use super::{RawSensorEvent, SensorSource, KEY_COUNT_HINT};
    use std::fs::File;
    use std::io::Read;
    use std::os::unix::fs::OpenOptionsExt;

    /// Reads key/wheel events directly off the kernel input-event character
    /// devices. Grounded on the original's `sensors.c` decode loop: event
    /// type 3 carries absolute values (key pressure on `code < 24`, wheel
    /// position/distance/gain on codes 0/1/2), type 4 code 1 carries
    /// elapsed microseconds, and type 0 code 0 value 0 is the sync barrier
    /// that flushes a batch of wheel readings.
    pub struct EvdevSensorSource {
        keys_fd: File,
        wheel_fd: File,
    }

    const INPUT_EVENT_SIZE: usize = 24;

    impl EvdevSensorSource {
        pub fn open(keys_device: &str, wheel_device: &str) -> std::io::Result<Self> {
            use std::fs::OpenOptions;
            let keys_fd = OpenOptions::new().read(true).custom_flags(libc::O_NONBLOCK).open(keys_device)?;
            let wheel_fd = OpenOptions::new().read(true).custom_flags(libc::O_NONBLOCK).open(wheel_device)?;
            Ok(Self { keys_fd, wheel_fd })
        }

        fn drain(fd: &mut File) -> Vec<(u16, u16, i32)> {
            let mut events = Vec::new();
            let mut buf = [0u8; INPUT_EVENT_SIZE * 16];
            loop {
                match fd.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        for chunk in buf[..n].chunks_exact(INPUT_EVENT_SIZE) {
                            let ev_type = u16::from_ne_bytes([chunk[16], chunk[17]]);
                            let code = u16::from_ne_bytes([chunk[18], chunk[19]]);
                            let value = i32::from_ne_bytes([chunk[20], chunk[21], chunk[22], chunk[23]]);
                            events.push((ev_type, code, value));
                        }
                        if n < buf.len() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(_) => break,
                }
            }
            events
        }
    }

    impl SensorSource for EvdevSensorSource {
        fn poll(&mut self) -> Vec<RawSensorEvent> {
            let mut out = Vec::new();

            for (ev_type, code, value) in Self::drain(&mut self.keys_fd) {
                if ev_type == 3 && (code as usize) < KEY_COUNT_HINT {
                    out.push(RawSensorEvent::KeyPressure { index: code as usize, value });
                }
            }

            for (ev_type, code, value) in Self::drain(&mut self.wheel_fd) {
                match (ev_type, code) {
                    (3, 0) => out.push(RawSensorEvent::WheelPosition(value as u32)),
                    (3, 1) => out.push(RawSensorEvent::WheelDistance(value)),
                    (3, 2) => out.push(RawSensorEvent::WheelGain(value as u32)),
                    (4, 1) => out.push(RawSensorEvent::WheelElapsedUs(value as u32)),
                    (0, 0) if value == 0 => out.push(RawSensorEvent::WheelSync),
                    _ => {}
                }
            }

            out
        }
    }

}

#[cfg(not(target_os = "linux"))]
pub mod platform {
    use super::{RawSensorEvent, SensorSource};

    /// Stub sensor source for non-Linux targets; always empty.
    pub struct EvdevSensorSource;

    impl EvdevSensorSource {
        pub fn open(_keys_device: &str, _wheel_device: &str) -> std::io::Result<Self> {
            Ok(Self)
        }
    }

    impl SensorSource for EvdevSensorSource {
        fn poll(&mut self) -> Vec<RawSensorEvent> {
            Vec::new()
        }
    }
}

/// Used by the Linux platform module to bound-check key indices without a
/// circular dependency on the protocol crate's constant from a `cfg`-gated
/// inner module.
const KEY_COUNT_HINT: usize = KEY_COUNT;
