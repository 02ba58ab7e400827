//! The instrument model (C4): turns debounced sensor state into the
//! per-string `model` voice that the output reconciliation engine (C5)
//! diffs against what has actually been sent.

use mgurdy_protocol::state::{MappingId, SharedState};
use mgurdy_protocol::string::{StringConfig, StringMode};
use mgurdy_protocol::wheel::Wheel;
use mgurdy_protocol::{CHIEN_MAX, MELODY_EXPRESSION_THRESHOLD};

use crate::sensors::Keyboard;

/// Recompute every string's model voice from the current sensor state. Must
/// be called with the state mutex held, once per tick.
pub fn update(state: &mut SharedState, kb: &Keyboard, wheel: &Wheel) {
    update_melody_streams(state, kb, wheel);
    update_trompette_streams(state, wheel);
    update_drone_streams(state, wheel);
    update_keynoise_stream(state, kb, wheel);
}

fn update_melody_streams(state: &mut SharedState, kb: &Keyboard, wheel: &Wheel) {
    let expression = state.mapping(MappingId::SpeedToMelodyVolume).map(wheel.speed as i32);
    let pressure_to_pitch = state.mapping(MappingId::PressureToPitch).clone();
    let keyvel_to_tangent = state.mapping(MappingId::KeyvelToTangent).clone();
    let keyvel_to_notevel = state.mapping(MappingId::KeyvelToNotevel).clone();
    let pitchbend_factor = state.pitchbend_factor;
    let poly_base_note = state.poly_base_note;
    let poly_pitch_bend = state.poly_pitch_bend;
    let base_note_delay = state.base_note_delay;

    for st in state.melody.iter_mut() {
        if st.muted {
            if st.model.note_count() > 0 {
                st.model.clear_notes();
            }
            continue;
        }

        if st.rendered_mode != st.mode {
            st.model.clear_notes();
            st.rendered_mode = st.mode;
        }

        st.model.volume = st.volume;
        st.model.panning = st.panning;
        st.model.bank = st.bank;
        st.model.program = st.program;

        match st.mode {
            StringMode::Midigurdy => melody_model_midigurdy(
                st, kb, expression, &pressure_to_pitch, &keyvel_to_tangent,
                pitchbend_factor, poly_base_note, poly_pitch_bend, base_note_delay, true,
            ),
            StringMode::Generic => melody_model_midigurdy(
                st, kb, expression, &pressure_to_pitch, &keyvel_to_tangent,
                pitchbend_factor, poly_base_note, poly_pitch_bend, base_note_delay, false,
            ),
            StringMode::Keyboard => melody_model_keyboard(st, &keyvel_to_notevel, kb, base_note_delay),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn melody_model_midigurdy(
    st: &mut StringConfig,
    kb: &Keyboard,
    expression: i32,
    pressure_to_pitch: &mgurdy_protocol::mapping::Mapping,
    keyvel_to_tangent: &mgurdy_protocol::mapping::Mapping,
    pitchbend_factor: f32,
    poly_base_note: bool,
    poly_pitch_bend: bool,
    base_note_delay: i32,
    velocity_switching: bool,
) {
    let prev_expression = st.model.expression;
    st.model.expression = expression;

    if expression == 0 {
        st.model.clear_notes();
        return;
    }

    let highest_below_empty_key = kb.active_keys.is_empty()
        || *kb.active_keys.last().unwrap() < st.empty_key as usize;

    if highest_below_empty_key {
        st.model.pitch = 0x2000;

        if kb.inactive_count < base_note_delay {
            return;
        }

        st.model.clear_notes();

        if st.polyphonic && !poly_base_note {
            return;
        }

        let note = st.model.enable_note(st.channel, st.base_note + st.empty_key);
        note.velocity = if velocity_switching {
            if prev_expression < MELODY_EXPRESSION_THRESHOLD { 1 } else { 31 }
        } else {
            120
        };
        return;
    }

    st.model.clear_notes();

    let mut key_idx = kb.active_keys.len() - 1;
    let highest_key = kb.active_keys[key_idx];
    let highest = &kb.keys[highest_key];

    st.model.pitch = if st.polyphonic && !poly_pitch_bend {
        0x2000
    } else {
        0x2000 + (pitchbend_factor * pressure_to_pitch.map(highest.smoothed_pressure) as f32) as i32
    };

    loop {
        let key_num = kb.active_keys[key_idx];
        let key = &kb.keys[key_num];
        let channel = st.channel;
        let base_note = st.base_note;
        let note = st.model.enable_note(channel, base_note + key_num as i32 + 1);

        note.velocity = if velocity_switching {
            if key.active_since < base_note_delay {
                64 + keyvel_to_tangent.map(key.velocity)
            } else {
                32
            }
        } else {
            120
        };

        if key_idx == 0 || !st.polyphonic {
            break;
        }
        key_idx -= 1;
    }
}

fn melody_model_keyboard(
    st: &mut StringConfig,
    keyvel_to_notevel: &mgurdy_protocol::mapping::Mapping,
    kb: &Keyboard,
    base_note_delay: i32,
) {
    st.model.expression = 127;

    let highest_below_empty_key = kb.active_keys.is_empty()
        || *kb.active_keys.last().unwrap() < st.empty_key as usize;

    if highest_below_empty_key {
        st.model.pitch = 0x2000;

        if kb.inactive_count < base_note_delay {
            return;
        }
        st.model.clear_notes();
        return;
    }

    st.model.clear_notes();
    st.model.pitch = 0x2000;

    let mut key_idx = kb.active_keys.len() - 1;
    loop {
        let key_num = kb.active_keys[key_idx];
        let key = &kb.keys[key_num];
        let channel = st.channel;
        let base_note = st.base_note;
        let note = st.model.enable_note(channel, base_note + key_num as i32 + 1);
        note.velocity = keyvel_to_notevel.map(key.velocity);

        if key_idx == 0 || !st.polyphonic {
            break;
        }
        key_idx -= 1;
    }
}

fn update_drone_streams(state: &mut SharedState, wheel: &Wheel) {
    let expression = state.mapping(MappingId::SpeedToDroneVolume).map(wheel.speed as i32);

    for st in state.drone.iter_mut() {
        st.model.expression = if st.muted { 0 } else { expression };

        if st.model.expression <= 0 {
            if st.model.note_count() > 0 {
                st.model.clear_notes();
            }
            continue;
        }

        st.model.volume = st.volume;
        st.model.panning = st.panning;
        st.model.bank = st.bank;
        st.model.program = st.program;

        if st.model.note_count() > 0 && st.model.active_notes[0] == st.base_note as usize {
            continue;
        }

        st.model.clear_notes();
        let channel = st.channel;
        let base_note = st.base_note;
        st.model.enable_note(channel, base_note).velocity = 127;
    }
}

fn update_trompette_streams(state: &mut SharedState, wheel: &Wheel) {
    let chien_threshold_to_range = state.mapping(MappingId::ChienThresholdToRange).clone();
    let speed_to_chien = state.mapping(MappingId::SpeedToChien).clone();
    let speed_to_trompette_volume = state.mapping(MappingId::SpeedToTrompetteVolume).clone();
    let speed_to_percussion = state.mapping(MappingId::SpeedToPercussion).clone();

    for st in state.trompette.iter_mut() {
        if st.muted {
            if st.model.note_count() > 0 {
                st.model.clear_notes();
            }
            continue;
        }

        if st.rendered_mode != st.mode {
            st.model.clear_notes();
            st.rendered_mode = st.mode;
        }

        st.model.volume = st.volume;
        st.model.panning = st.panning;
        st.model.bank = st.bank;
        st.model.program = st.program;

        match st.mode {
            StringMode::Midigurdy | StringMode::Keyboard => trompette_model_midigurdy(
                st, wheel.speed as i32, &chien_threshold_to_range, &speed_to_chien, &speed_to_trompette_volume,
            ),
            StringMode::Generic => trompette_model_percussion(st, wheel.speed as i32, &speed_to_percussion),
        }
    }
}

fn trompette_model_midigurdy(
    st: &mut StringConfig,
    wheel_speed: i32,
    chien_threshold_to_range: &mgurdy_protocol::mapping::Mapping,
    speed_to_chien: &mgurdy_protocol::mapping::Mapping,
    speed_to_trompette_volume: &mgurdy_protocol::mapping::Mapping,
) {
    let raw_chien_speed = wheel_speed - st.threshold;
    let mut normalized_chien_speed = 0;

    if raw_chien_speed > 0 {
        let chien_speed_factor = chien_threshold_to_range.map((5000 - st.threshold) / 50);

        normalized_chien_speed = match chien_speed_factor {
            f if f > 0 => (raw_chien_speed * (f + 100)) / 100,
            f if f < 0 => (raw_chien_speed * -100) / (f - 100),
            _ => raw_chien_speed,
        };

        if normalized_chien_speed > CHIEN_MAX {
            normalized_chien_speed = CHIEN_MAX;
        }
    }

    st.model.pressure = if normalized_chien_speed > 0 {
        speed_to_chien.map(normalized_chien_speed)
    } else {
        0
    };

    st.model.expression = speed_to_trompette_volume.map(wheel_speed);

    if st.model.expression <= 0 {
        if st.model.note_count() > 0 {
            st.model.clear_notes();
        }
        return;
    }

    if st.model.note_count() > 0 && st.model.active_notes[0] == st.base_note as usize {
        return;
    }

    st.model.clear_notes();
    let channel = st.channel;
    let base_note = st.base_note;
    st.model.enable_note(channel, base_note).velocity = 127;
}

fn trompette_model_percussion(st: &mut StringConfig, wheel_speed: i32, speed_to_percussion: &mgurdy_protocol::mapping::Mapping) {
    let raw_chien_speed = (wheel_speed - st.threshold).max(0);

    st.model.expression = 127;

    if raw_chien_speed > 0 {
        if st.model.note_count() == 0 {
            if st.chien_debounce < st.chien_on_debounce {
                st.chien_debounce += 1;
                return;
            }
        }
    } else if st.model.note_count() > 0 && st.chien_debounce < st.chien_off_debounce {
        st.chien_debounce += 1;
        return;
    }
    st.chien_debounce = 0;

    if raw_chien_speed <= 0 {
        if st.model.note_count() > 0 {
            st.model.clear_notes();
        }
        return;
    }

    if st.model.note_count() > 0 && st.model.active_notes[0] == st.base_note as usize {
        return;
    }

    let velocity = speed_to_percussion.map(raw_chien_speed);

    st.model.clear_notes();
    let channel = st.channel;
    let base_note = st.base_note;
    st.model.enable_note(channel, base_note).velocity = velocity;
}

fn update_keynoise_stream(state: &mut SharedState, kb: &Keyboard, wheel: &Wheel) {
    let keyvel_to_keynoise = state.mapping(MappingId::KeyvelToKeynoise).clone();
    let st = &mut state.keynoise;

    if st.model.note_count() > 0 {
        st.model.clear_notes();
    }

    if st.muted {
        return;
    }

    st.model.volume = st.volume;
    st.model.panning = st.panning;
    st.model.bank = st.bank;
    st.model.program = st.program;
    st.model.pressure = if wheel.speed > 0 { 127 } else { 0 };

    for &key_num in &kb.changed_keys {
        let key = &kb.keys[key_num];
        let velocity = keyvel_to_keynoise.map(key.velocity.max(0));
        if velocity == 0 {
            continue;
        }

        let midi_note = if key.action == mgurdy_protocol::key::KeyAction::Pressed {
            60 + key_num as i32
        } else {
            30 + key_num as i32
        };

        let channel = st.channel;
        st.model.enable_note(channel, midi_note).velocity = velocity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kb_with_keys(active: &[usize]) -> Keyboard {
        let mut kb = Keyboard::default();
        kb.active_keys = active.to_vec();
        kb.inactive_count = 100;
        for &k in active {
            kb.keys[k].smoothed_pressure = 500;
            kb.keys[k].velocity = 100;
            kb.keys[k].active_since = 100;
        }
        kb
    }

    #[test]
    fn test_melody_silent_when_wheel_stopped() {
        let mut state = SharedState::new();
        state.melody[0].muted = false;
        let kb = kb_with_keys(&[5]);
        let wheel = Wheel { speed: 0, ..Default::default() };
        update_melody_streams(&mut state, &kb, &wheel);
        assert_eq!(state.melody[0].model.note_count(), 0);
    }

    #[test]
    fn test_melody_plays_base_note_when_no_key_pressed() {
        let mut state = SharedState::new();
        state.melody[0].muted = false;
        let kb = kb_with_keys(&[]);
        let wheel = Wheel { speed: 1000, ..Default::default() };
        update_melody_streams(&mut state, &kb, &wheel);
        let m = &state.melody[0].model;
        assert_eq!(m.note_count(), 1);
        assert_eq!(m.active_notes[0], 60);
    }

    #[test]
    fn test_melody_empty_key_compares_against_key_index() {
        let mut state = SharedState::new();
        state.melody[0].muted = false;
        state.melody[0].empty_key = 5;
        // highest active key index is 3, below empty_key(5): treated as "no key pressed"
        let kb = kb_with_keys(&[1, 3]);
        let wheel = Wheel { speed: 1000, ..Default::default() };
        update_melody_streams(&mut state, &kb, &wheel);
        let m = &state.melody[0].model;
        assert_eq!(m.active_notes[0], 60 + 5);
    }

    #[test]
    fn test_melody_monophonic_only_plays_highest_key() {
        let mut state = SharedState::new();
        state.melody[0].muted = false;
        state.melody[0].polyphonic = false;
        let kb = kb_with_keys(&[2, 7]);
        let wheel = Wheel { speed: 1000, ..Default::default() };
        update_melody_streams(&mut state, &kb, &wheel);
        assert_eq!(state.melody[0].model.note_count(), 1);
        assert_eq!(state.melody[0].model.active_notes[0], 60 + 7 + 1);
    }

    #[test]
    fn test_melody_polyphonic_plays_all_active_keys() {
        let mut state = SharedState::new();
        state.melody[0].muted = false;
        state.melody[0].polyphonic = true;
        let kb = kb_with_keys(&[2, 7]);
        let wheel = Wheel { speed: 1000, ..Default::default() };
        update_melody_streams(&mut state, &kb, &wheel);
        assert_eq!(state.melody[0].model.note_count(), 2);
    }

    #[test]
    fn test_drone_holds_single_base_note_while_unchanged() {
        let mut state = SharedState::new();
        state.drone[0].muted = false;
        let wheel = Wheel { speed: 1000, ..Default::default() };
        update_drone_streams(&mut state, &wheel);
        assert_eq!(state.drone[0].model.note_count(), 1);
        update_drone_streams(&mut state, &wheel);
        assert_eq!(state.drone[0].model.note_count(), 1, "note should not be re-triggered");
    }

    #[test]
    fn test_drone_silences_when_muted() {
        let mut state = SharedState::new();
        state.drone[0].muted = true;
        let wheel = Wheel { speed: 1000, ..Default::default() };
        update_drone_streams(&mut state, &wheel);
        assert_eq!(state.drone[0].model.note_count(), 0);
    }

    #[test]
    fn test_trompette_midigurdy_plays_base_note_above_threshold() {
        let mut state = SharedState::new();
        state.trompette[0].muted = false;
        state.trompette[0].threshold = 100;
        let wheel = Wheel { speed: 1000, ..Default::default() };
        update_trompette_streams(&mut state, &wheel);
        assert_eq!(state.trompette[0].model.note_count(), 1);
    }

    #[test]
    fn test_trompette_percussion_debounces_note_on() {
        let mut state = SharedState::new();
        state.trompette[0].muted = false;
        state.trompette[0].mode = StringMode::Generic;
        state.trompette[0].threshold = 0;
        state.trompette[0].chien_on_debounce = 2;
        let wheel = Wheel { speed: 1000, ..Default::default() };
        update_trompette_streams(&mut state, &wheel);
        assert_eq!(state.trompette[0].model.note_count(), 0, "still debouncing on");
        update_trompette_streams(&mut state, &wheel);
        update_trompette_streams(&mut state, &wheel);
        assert_eq!(state.trompette[0].model.note_count(), 1);
    }

    #[test]
    fn test_keynoise_plays_on_press_and_release() {
        let mut state = SharedState::new();
        state.keynoise.muted = false;
        let mut kb = Keyboard::default();
        kb.changed_keys = vec![3];
        kb.keys[3].velocity = 100;
        kb.keys[3].action = mgurdy_protocol::key::KeyAction::Pressed;
        let wheel = Wheel::default();
        update_keynoise_stream(&mut state, &kb, &wheel);
        assert_eq!(state.keynoise.model.active_notes[0], 60 + 3);
    }

    #[test]
    fn test_output_voice_bug_fixed() {
        // The original initializes the sink voice's `program` sentinel to 1,
        // which the upstream author flagged as a likely typo. This port uses
        // -1, consistent with every other sentinel field.
        let sink = mgurdy_protocol::voice::Voice::new_sink();
        assert_eq!(sink.program, -1);
    }
}
