//! The control plane (C7): the single entry point external code uses to
//! configure and run the instrument. Owns two independently-locked pieces of
//! state so that control-plane calls (which only ever touch configuration)
//! never contend with, or recursively lock against, the realtime worker's
//! per-tick access to sensors and outputs.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use mgurdy_protocol::mapping::Mapping;
use mgurdy_protocol::state::{MappingId, SharedState};
use mgurdy_protocol::string::{StringId, StringParam};
use mgurdy_protocol::wire::{KeyTelemetry, WheelTelemetry};
use mgurdy_protocol::ConfigError;

use crate::error::OutputError;
use crate::model;
use crate::output::{Output, OutputManager};
use crate::outputs::wire::MidiDeviceOutput;
use crate::sensors::SensorConditioner;
use crate::sensors::SensorSource;
use crate::telemetry::TelemetrySink;
use crate::worker::{self, TelemetryDecimator, WorkerHandle};

/// A feature toggle settable independently of any one string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    /// Whether polyphonic melody strings still emit a base note when no key
    /// reaches the empty-key threshold.
    PolyBaseNote,
    /// Whether polyphonic melody strings still apply pitch bend.
    PolyPitchBend,
}

/// Output rate-limit presets exposed to the control plane, mapped to
/// tokens-per-tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSpeed {
    Normal,
    Fast,
    Unlimited,
}

impl OutputSpeed {
    fn tokens_per_tick(self) -> i32 {
        match self {
            Self::Normal => 3000,
            Self::Fast => 6000,
            Self::Unlimited => 0,
        }
    }
}

/// Everything the worker thread touches on every tick. Kept separate from
/// [`SharedState`] so a control-plane call never has to take more than one
/// lock at a time.
struct Runtime {
    sensors: Box<dyn SensorSource>,
    conditioner: SensorConditioner,
    outputs: OutputManager,
    telemetry: Box<dyn TelemetrySink>,
    decimator: TelemetryDecimator,
}

/// Owns the instrument's configuration and runtime state, and drives the
/// realtime worker. Shared between the control plane and the worker thread
/// via `Arc<Core>`.
pub struct Core {
    state: Mutex<SharedState>,
    runtime: Mutex<Runtime>,
    halted: AtomicBool,
    started: AtomicBool,
    worker: Mutex<Option<WorkerHandle>>,
}

impl Core {
    pub fn new(sensors: Box<dyn SensorSource>, telemetry: Box<dyn TelemetrySink>) -> Self {
        Self {
            state: Mutex::new(SharedState::new()),
            runtime: Mutex::new(Runtime {
                sensors,
                conditioner: SensorConditioner::new(),
                outputs: OutputManager::new(),
                telemetry,
                decimator: TelemetryDecimator::new(),
            }),
            halted: AtomicBool::new(false),
            started: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the realtime worker thread. The worker idles (polling sensors
    /// but not updating the model or outputs) until [`Self::start`] is
    /// called, mirroring the original's `mg->started` gate.
    pub fn spawn_worker(self: &std::sync::Arc<Self>) {
        let core = std::sync::Arc::clone(self);
        let handle = worker::spawn(move || core.tick());
        *self.worker.lock() = Some(handle);
    }

    pub fn stop_worker(&self) {
        if let Some(handle) = self.worker.lock().take() {
            handle.stop();
        }
    }

    pub fn start(&self) {
        self.started.store(true, Ordering::Release);
    }

    pub fn stop(&self) {
        self.started.store(false, Ordering::Release);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Halt or resume output delivery. Halting resets every output's
    /// channels immediately, so a synth left mid-note doesn't hang stuck
    /// notes for the duration of the halt.
    pub fn halt_outputs(&self, halt: bool) {
        self.halted.store(halt, Ordering::Release);
        if halt {
            self.reset_outputs();
        }
    }

    /// Run exactly one tick: read sensors, debounce/smooth them, recompute
    /// the instrument model, and (unless halted) reconcile it against every
    /// registered output. Called by the worker thread; exposed so tests can
    /// drive a `Core` deterministically without a realtime thread.
    pub fn tick(&self) {
        if !self.is_started() {
            // Still drain the sensor source so events don't pile up while
            // stopped, matching the original's behavior of always reading
            // sensors regardless of `mg->started`.
            self.runtime.lock().sensors.poll();
            return;
        }

        let mut runtime = self.runtime.lock();
        let events = runtime.sensors.poll();
        runtime.conditioner.apply_events(&events);

        let mut state = self.state.lock();
        runtime.conditioner.update(&state);
        model::update(&mut state, &runtime.conditioner.keyboard, &runtime.conditioner.wheel);

        if !self.halted.load(Ordering::Acquire) {
            runtime.outputs.sync_all(&state);
        }

        let wheel = runtime.conditioner.wheel;
        drop(state);

        let wheel_sample = WheelTelemetry {
            position: wheel.position,
            speed: wheel.speed,
            chien_volume: 0,
            chien_speed: wheel.raw_speed,
        };
        let keyboard = &runtime.conditioner.keyboard;
        let key_sample = || KeyTelemetry { records: keyboard.telemetry_records() };
        let Runtime { telemetry, decimator, .. } = &mut *runtime;
        decimator.on_tick(wheel_sample, key_sample, telemetry.as_mut());
    }

    pub fn set_pitchbend_factor(&self, factor: f32) {
        self.state.lock().set_pitchbend_factor(factor);
    }

    pub fn set_key_on_debounce(&self, n: i32) {
        self.state.lock().set_key_on_debounce(n);
    }

    pub fn set_key_off_debounce(&self, n: i32) {
        self.state.lock().set_key_off_debounce(n);
    }

    pub fn set_base_note_delay(&self, n: i32) {
        self.state.lock().set_base_note_delay(n);
    }

    pub fn set_feature(&self, feature: Feature, enabled: bool) {
        let mut state = self.state.lock();
        match feature {
            Feature::PolyBaseNote => state.poly_base_note = enabled,
            Feature::PolyPitchBend => state.poly_pitch_bend = enabled,
        }
    }

    /// Set a string parameter. A channel switch resets the old channel on
    /// every output carrying this string before the new channel sees any
    /// event, per the ordering guarantee on reset sequences. Locks `runtime`
    /// before `state`, matching every other path that needs both (`tick`,
    /// `reset_outputs`), so the two never deadlock against each other.
    pub fn set_string(&self, id: StringId, param: StringParam) -> Result<(), ConfigError> {
        if let StringParam::Channel(new_channel) = param {
            let mut runtime = self.runtime.lock();
            let mut state = self.state.lock();
            let old_channel = state.string(id).channel;
            state.set_string(id, param)?;
            drop(state);
            if old_channel != new_channel {
                runtime.outputs.reset_stream_all(id, old_channel);
            }
            return Ok(());
        }
        self.state.lock().set_string(id, param)
    }

    pub fn get_mapping(&self, id: MappingId) -> Mapping {
        self.state.lock().mapping(id).clone()
    }

    pub fn set_mapping(&self, id: MappingId, mapping: Mapping) {
        self.state.lock().set_mapping(id, mapping);
    }

    pub fn reset_mapping(&self, id: MappingId) {
        self.state.lock().reset_mapping(id);
    }

    pub fn add_output(&self, output: Box<dyn Output>, tokens_per_tick: i32) -> Result<u32, OutputError> {
        self.runtime.lock().outputs.add(output, tokens_per_tick)
    }

    /// Register an in-process synth sink (stands in for the out-of-scope
    /// fluidsynth collaborator) at the normal-speed default token rate.
    pub fn add_fluid_output(&self, output: Box<dyn Output>) -> Result<u32, OutputError> {
        self.add_output(output, OutputSpeed::Normal.tokens_per_tick())
    }

    /// Open a raw MIDI device node and register it as an output.
    pub fn add_midi_output(&self, device: &str) -> Result<u32, OutputError> {
        let output = MidiDeviceOutput::open(device)?;
        self.add_output(Box::new(output), OutputSpeed::Normal.tokens_per_tick())
    }

    /// Reconfigure an already-registered MIDI output: the channels its
    /// melody/drone/trompette role families play on, whether it receives
    /// bank/program-change messages, and its token-bucket rate.
    pub fn config_midi_output(
        &self,
        id: u32,
        melody_channel: i32,
        drone_channel: i32,
        trompette_channel: i32,
        send_prog_change: bool,
        speed: OutputSpeed,
    ) -> Result<(), OutputError> {
        let mut runtime = self.runtime.lock();
        let mut state = self.state.lock();
        for s in state.melody.iter_mut() {
            s.channel = melody_channel;
        }
        for s in state.drone.iter_mut() {
            s.channel = drone_channel;
        }
        for s in state.trompette.iter_mut() {
            s.channel = trompette_channel;
        }
        drop(state);
        runtime.outputs.set_tokens_per_tick(id, speed.tokens_per_tick())?;
        runtime.outputs.set_send_program_change(id, send_prog_change)
    }

    pub fn remove_output(&self, id: u32) -> Result<(), OutputError> {
        self.runtime.lock().outputs.remove(id)
    }

    pub fn set_output_enabled(&self, id: u32, enabled: bool) -> Result<(), OutputError> {
        self.runtime.lock().outputs.set_enabled(id, enabled)
    }

    pub fn reset_outputs(&self) {
        let mut runtime = self.runtime.lock();
        let state = self.state.lock();
        runtime.outputs.reset_all(&state);
    }

    /// Overwrite one key's pressure/velocity calibration factors.
    pub fn calibrate_set_key(&self, index: usize, pressure_adjust: f32, velocity_adjust: f32) {
        let mut runtime = self.runtime.lock();
        if let Some(calib) = runtime.conditioner.keyboard.key_calib.get_mut(index) {
            calib.pressure_adjust = pressure_adjust;
            calib.velocity_adjust = velocity_adjust;
        }
    }

    /// Read back one key's calibration factors.
    pub fn calibrate_get_key(&self, index: usize) -> Option<(f32, f32)> {
        let runtime = self.runtime.lock();
        runtime.conditioner.keyboard.key_calib.get(index).map(|c| (c.pressure_adjust, c.velocity_adjust))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outputs::inprocess::InProcessOutput;
    use crate::sensors::{ChannelSensorSource, RawSensorEvent};
    use crate::telemetry::NullTelemetrySink;
    use std::sync::mpsc;
    use std::sync::Arc;

    fn core_with_channel() -> (Arc<Core>, mpsc::Sender<RawSensorEvent>) {
        let (tx, rx) = mpsc::channel();
        let core = Arc::new(Core::new(Box::new(ChannelSensorSource::new(rx)), Box::new(NullTelemetrySink)));
        (core, tx)
    }

    #[test]
    fn test_tick_is_noop_until_started() {
        let (core, _tx) = core_with_channel();
        core.set_string(StringId::Melody(0), StringParam::Mute(false)).unwrap();
        core.tick();
        // Stopped core should not compute a model; nothing to assert on the
        // model directly here since state is private, but this should not
        // panic and should leave `started` false.
        assert!(!core.is_started());
    }

    #[test]
    fn test_start_stop_toggles_gate() {
        let (core, _tx) = core_with_channel();
        assert!(!core.is_started());
        core.start();
        assert!(core.is_started());
        core.stop();
        assert!(!core.is_started());
    }

    #[test]
    fn test_add_and_remove_output() {
        let (core, _tx) = core_with_channel();
        let (out, _log) = InProcessOutput::new();
        let id = core.add_output(Box::new(out), 3000).unwrap();
        core.remove_output(id).unwrap();
        assert!(core.remove_output(id).is_err());
    }

    #[test]
    fn test_tick_drives_output_when_started() {
        let (core, _tx) = core_with_channel();
        let (out, log) = InProcessOutput::new();
        core.add_output(Box::new(out), 0).unwrap();
        core.set_string(StringId::Drone(0), StringParam::Mute(false)).unwrap();
        core.start();
        core.tick();
        assert!(!log.is_empty(), "drone base note should have been sent");
    }

    #[test]
    fn test_mapping_roundtrip_through_core() {
        let (core, _tx) = core_with_channel();
        let custom = Mapping::new(vec![(0, 0), (10, 5)]).unwrap();
        core.set_mapping(MappingId::SpeedToChien, custom.clone());
        assert_eq!(core.get_mapping(MappingId::SpeedToChien), custom);
        core.reset_mapping(MappingId::SpeedToChien);
        assert_ne!(core.get_mapping(MappingId::SpeedToChien), custom);
    }

    #[test]
    fn test_calibrate_set_and_get_key() {
        let (core, _tx) = core_with_channel();
        core.calibrate_set_key(5, 1.5, 0.8);
        assert_eq!(core.calibrate_get_key(5), Some((1.5, 0.8)));
        assert_eq!(core.calibrate_get_key(999), None, "out-of-range index returns None");
    }

    #[test]
    fn test_config_midi_output_applies_channels_and_speed() {
        let (core, _tx) = core_with_channel();
        let (out, _log) = InProcessOutput::new();
        let id = core.add_output(Box::new(out), 3000).unwrap();
        core.config_midi_output(id, 0, 3, 6, false, OutputSpeed::Fast).unwrap();
        assert!(core.config_midi_output(id + 1, 0, 0, 0, true, OutputSpeed::Normal).is_err());
    }

    #[test]
    fn test_halt_outputs_resets_and_gates_sync() {
        let (core, _tx) = core_with_channel();
        let (out, log) = InProcessOutput::new();
        core.add_output(Box::new(out), 0).unwrap();
        core.set_string(StringId::Drone(0), StringParam::Mute(false)).unwrap();
        core.start();
        core.halt_outputs(true);
        log.drain();
        core.tick();
        assert!(log.is_empty(), "halted core should not reconcile outputs");
    }
}
