use crate::error::ConfigError;
use crate::mapping::Mapping;
use crate::string::{StringConfig, StringId, StringParam, StringRole};
use crate::PRESSURE_MAX;

/// Identifies one of the mapping tables stored on [`SharedState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingId {
    PressureToPoly,
    PressureToPitch,
    SpeedToMelodyVolume,
    SpeedToDroneVolume,
    SpeedToTrompetteVolume,
    SpeedToChien,
    KeyvelToNotevel,
    KeyvelToTangent,
    KeyvelToKeynoise,
    /// Supplemented: used by the MidiGurdy trompette model to normalize
    /// chien speed by the configured threshold range.
    ChienThresholdToRange,
    /// Supplemented: used by the percussive trompette model to turn
    /// above-threshold wheel speed into note-on velocity.
    SpeedToPercussion,
}

fn default_mapping(id: MappingId) -> Mapping {
    let ranges: &[(i32, i32)] = match id {
        MappingId::PressureToPitch => &[(0, -0x2000), (650, -280), (2400, 360), (PRESSURE_MAX, 0x2000)],
        MappingId::PressureToPoly => &[(0, 0), (600, 100), (1000, 120), (PRESSURE_MAX, 127)],
        MappingId::SpeedToMelodyVolume => &[(0, 0), (430, 35), (900, 60), (1400, 75), (2000, 87), (5000, 127)],
        MappingId::SpeedToDroneVolume => &[(0, 0), (430, 35), (900, 60), (1400, 75), (2000, 87), (5000, 127)],
        MappingId::SpeedToTrompetteVolume => &[(0, 0), (430, 35), (900, 60), (1400, 75), (2000, 87), (5000, 127)],
        MappingId::SpeedToChien => &[(0, 0), (100, 80), (250, 120), (1000, 127)],
        MappingId::KeyvelToNotevel => &[(0, 20), (crate::KEYVEL_MAX, 127)],
        MappingId::KeyvelToTangent => &[(0, 0), (crate::KEYVEL_MAX, 63)],
        MappingId::KeyvelToKeynoise => &[(0, 0), (crate::KEYVEL_MAX, 127)],
        MappingId::ChienThresholdToRange => &[(0, -100), (50, 0), (100, 100)],
        MappingId::SpeedToPercussion => &[(0, 1), (5000, 127)],
    };
    Mapping::new(ranges.to_vec()).expect("built-in default mappings are always valid")
}

/// The complete, shareable configuration and modelling state of the
/// instrument: every string's configuration, the debounce/timing
/// parameters, and the mapping tables that translate sensor input into
/// musical parameters.
///
/// This struct holds no lock itself -- see `mgurdy_core::control::Core` for
/// how it is shared between the control plane and the worker thread.
pub struct SharedState {
    pub melody: [StringConfig; 3],
    pub drone: [StringConfig; 3],
    pub trompette: [StringConfig; 3],
    pub keynoise: StringConfig,

    /// Pitch bend range scale factor; 0.5 gives +/-100 cents at full tilt.
    pub pitchbend_factor: f32,

    pub key_on_debounce: i32,
    pub key_off_debounce: i32,
    pub base_note_delay: i32,

    /// Whether polyphonic melody strings still emit a base note when no key
    /// reaches the empty-key threshold.
    pub poly_base_note: bool,
    /// Whether polyphonic melody strings still apply pitch bend.
    pub poly_pitch_bend: bool,

    pressure_to_poly: Mapping,
    pressure_to_pitch: Mapping,
    speed_to_melody_volume: Mapping,
    speed_to_drone_volume: Mapping,
    speed_to_trompette_volume: Mapping,
    speed_to_chien: Mapping,
    keyvel_to_notevel: Mapping,
    keyvel_to_tangent: Mapping,
    keyvel_to_keynoise: Mapping,
    chien_threshold_to_range: Mapping,
    speed_to_percussion: Mapping,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            melody: [
                StringConfig::new(StringRole::Melody, 0),
                StringConfig::new(StringRole::Melody, 1),
                StringConfig::new(StringRole::Melody, 2),
            ],
            drone: [
                StringConfig::new(StringRole::Drone, 3),
                StringConfig::new(StringRole::Drone, 4),
                StringConfig::new(StringRole::Drone, 5),
            ],
            trompette: [
                StringConfig::new(StringRole::Trompette, 6),
                StringConfig::new(StringRole::Trompette, 7),
                StringConfig::new(StringRole::Trompette, 8),
            ],
            keynoise: StringConfig::new(StringRole::Keynoise, 9),

            pitchbend_factor: 0.5,
            key_on_debounce: 2,
            key_off_debounce: 10,
            base_note_delay: 20,
            poly_base_note: true,
            poly_pitch_bend: true,

            pressure_to_poly: default_mapping(MappingId::PressureToPoly),
            pressure_to_pitch: default_mapping(MappingId::PressureToPitch),
            speed_to_melody_volume: default_mapping(MappingId::SpeedToMelodyVolume),
            speed_to_drone_volume: default_mapping(MappingId::SpeedToDroneVolume),
            speed_to_trompette_volume: default_mapping(MappingId::SpeedToTrompetteVolume),
            speed_to_chien: default_mapping(MappingId::SpeedToChien),
            keyvel_to_notevel: default_mapping(MappingId::KeyvelToNotevel),
            keyvel_to_tangent: default_mapping(MappingId::KeyvelToTangent),
            keyvel_to_keynoise: default_mapping(MappingId::KeyvelToKeynoise),
            chien_threshold_to_range: default_mapping(MappingId::ChienThresholdToRange),
            speed_to_percussion: default_mapping(MappingId::SpeedToPercussion),
        }
    }

    pub fn mapping(&self, id: MappingId) -> &Mapping {
        match id {
            MappingId::PressureToPoly => &self.pressure_to_poly,
            MappingId::PressureToPitch => &self.pressure_to_pitch,
            MappingId::SpeedToMelodyVolume => &self.speed_to_melody_volume,
            MappingId::SpeedToDroneVolume => &self.speed_to_drone_volume,
            MappingId::SpeedToTrompetteVolume => &self.speed_to_trompette_volume,
            MappingId::SpeedToChien => &self.speed_to_chien,
            MappingId::KeyvelToNotevel => &self.keyvel_to_notevel,
            MappingId::KeyvelToTangent => &self.keyvel_to_tangent,
            MappingId::KeyvelToKeynoise => &self.keyvel_to_keynoise,
            MappingId::ChienThresholdToRange => &self.chien_threshold_to_range,
            MappingId::SpeedToPercussion => &self.speed_to_percussion,
        }
    }

    pub fn set_mapping(&mut self, id: MappingId, mapping: Mapping) {
        let slot = match id {
            MappingId::PressureToPoly => &mut self.pressure_to_poly,
            MappingId::PressureToPitch => &mut self.pressure_to_pitch,
            MappingId::SpeedToMelodyVolume => &mut self.speed_to_melody_volume,
            MappingId::SpeedToDroneVolume => &mut self.speed_to_drone_volume,
            MappingId::SpeedToTrompetteVolume => &mut self.speed_to_trompette_volume,
            MappingId::SpeedToChien => &mut self.speed_to_chien,
            MappingId::KeyvelToNotevel => &mut self.keyvel_to_notevel,
            MappingId::KeyvelToTangent => &mut self.keyvel_to_tangent,
            MappingId::KeyvelToKeynoise => &mut self.keyvel_to_keynoise,
            MappingId::ChienThresholdToRange => &mut self.chien_threshold_to_range,
            MappingId::SpeedToPercussion => &mut self.speed_to_percussion,
        };
        *slot = mapping;
    }

    pub fn reset_mapping(&mut self, id: MappingId) {
        self.set_mapping(id, default_mapping(id));
    }

    pub fn string(&self, id: StringId) -> &StringConfig {
        match id {
            StringId::Melody(i) => &self.melody[i as usize],
            StringId::Drone(i) => &self.drone[i as usize],
            StringId::Trompette(i) => &self.trompette[i as usize],
            StringId::Keynoise => &self.keynoise,
        }
    }

    pub fn string_mut(&mut self, id: StringId) -> &mut StringConfig {
        match id {
            StringId::Melody(i) => &mut self.melody[i as usize],
            StringId::Drone(i) => &mut self.drone[i as usize],
            StringId::Trompette(i) => &mut self.trompette[i as usize],
            StringId::Keynoise => &mut self.keynoise,
        }
    }

    pub fn set_string(&mut self, id: StringId, param: StringParam) -> Result<(), ConfigError> {
        self.string_mut(id).apply(param)
    }

    pub fn set_key_on_debounce(&mut self, n: i32) {
        self.key_on_debounce = n.max(0);
    }

    pub fn set_key_off_debounce(&mut self, n: i32) {
        self.key_off_debounce = n.max(0);
    }

    pub fn set_base_note_delay(&mut self, n: i32) {
        self.base_note_delay = n.max(0);
    }

    pub fn set_pitchbend_factor(&mut self, factor: f32) {
        self.pitchbend_factor = factor;
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_has_ten_strings_all_muted() {
        let st = SharedState::new();
        assert!(st.melody.iter().all(|s| s.muted));
        assert!(st.drone.iter().all(|s| s.muted));
        assert!(st.trompette.iter().all(|s| s.muted));
        assert!(st.keynoise.muted);
    }

    #[test]
    fn test_channels_assigned_sequentially() {
        let st = SharedState::new();
        assert_eq!(st.melody.map(|s| s.channel), [0, 1, 2]);
        assert_eq!(st.drone.map(|s| s.channel), [3, 4, 5]);
        assert_eq!(st.trompette.map(|s| s.channel), [6, 7, 8]);
        assert_eq!(st.keynoise.channel, 9);
    }

    #[test]
    fn test_default_debounce_values() {
        let st = SharedState::new();
        assert_eq!(st.key_on_debounce, 2);
        assert_eq!(st.key_off_debounce, 10);
        assert_eq!(st.base_note_delay, 20);
    }

    #[test]
    fn test_reset_mapping_restores_default() {
        let mut st = SharedState::new();
        let custom = Mapping::new(vec![(0, 0), (10, 10)]).unwrap();
        st.set_mapping(MappingId::SpeedToChien, custom);
        st.reset_mapping(MappingId::SpeedToChien);
        assert_eq!(st.mapping(MappingId::SpeedToChien).map(100), 80);
    }

    #[test]
    fn test_set_string_applies_param() {
        let mut st = SharedState::new();
        st.set_string(StringId::Melody(0), StringParam::Volume(100)).unwrap();
        assert_eq!(st.melody[0].volume, 100);
    }
}
