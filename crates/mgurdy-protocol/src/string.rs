use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::voice::Voice;

/// Which family of string a [`StringConfig`] belongs to. Determines which
/// instrument model function is applied to it every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StringRole {
    Melody,
    Drone,
    Trompette,
    Keynoise,
}

/// A string's playing mode, settable independently of its role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StringMode {
    /// MidiGurdy-style soundfont modelling (velocity switching, chien mixed
    /// into the trompette preset via pressure).
    Midigurdy,
    /// Same algorithm as `Midigurdy` but without velocity switching /
    /// percussive debounce, suited to generic soundfonts.
    Generic,
    /// Piano-like: one voice per key, no pitch bend, velocity from key
    /// pressure directly. Melody strings only.
    Keyboard,
}

impl StringMode {
    pub fn from_i32(v: i32) -> Result<Self, ConfigError> {
        match v {
            0 => Ok(Self::Midigurdy),
            1 => Ok(Self::Generic),
            2 => Ok(Self::Keyboard),
            other => Err(ConfigError::InvalidMode(other)),
        }
    }
}

/// Identifies one of the ten addressable strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringId {
    Melody(u8),
    Drone(u8),
    Trompette(u8),
    Keynoise,
}

impl StringId {
    pub fn from_raw(v: i32) -> Result<Self, ConfigError> {
        match v {
            0 => Ok(Self::Melody(0)),
            1 => Ok(Self::Melody(1)),
            2 => Ok(Self::Melody(2)),
            3 => Ok(Self::Trompette(0)),
            4 => Ok(Self::Trompette(1)),
            5 => Ok(Self::Trompette(2)),
            6 => Ok(Self::Drone(0)),
            7 => Ok(Self::Drone(1)),
            8 => Ok(Self::Drone(2)),
            9 => Ok(Self::Keynoise),
            other => Err(ConfigError::InvalidStringId(other)),
        }
    }
}

/// Settable parameters on a string, addressed via [`crate::state::SharedState::set_string`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringParam {
    Mute(bool),
    Volume(i32),
    Channel(i32),
    BaseNote(i32),
    Panning(i32),
    /// Melody strings only.
    Polyphonic(bool),
    /// Melody strings only.
    EmptyKey(i32),
    /// Trompette strings only.
    Threshold(i32),
    /// Trompette strings only.
    Attack(i32),
    NoteEnable { note: i32, velocity: i32 },
    NoteDisable { note: i32 },
    NoteClear,
    Mode(i32),
}

/// The configuration and intended (model) state of one string. Output
/// streams reference this struct's `model` voice and never write to it.
#[derive(Debug, Clone)]
pub struct StringConfig {
    pub role: StringRole,
    pub channel: i32,

    pub base_note: i32,
    pub muted: bool,
    pub volume: i32,
    pub panning: i32,
    pub bank: i32,
    pub program: i32,

    pub base_note_count: i32,

    pub mode: StringMode,

    /// Melody strings only.
    pub polyphonic: bool,
    /// Melody strings only: key index below which no note sounds ("capo").
    pub empty_key: i32,

    /// Trompette strings only.
    pub threshold: i32,
    pub attack: i32,

    /// Trompette strings in generic (percussive) mode only: debounce
    /// thresholds for the chien on/off transition, and the running
    /// debounce counter.
    pub chien_on_debounce: i32,
    pub chien_off_debounce: i32,
    pub chien_debounce: i32,

    /// Trompette / drone strings only: notes staged by the control plane,
    /// separate from the model voice's currently-sounding notes.
    pub fixed_notes: Vec<i32>,

    pub model: Voice,

    /// Mode the model voice was last computed under. A mode change forces
    /// the model to drop its notes before the new mode's logic runs, since
    /// the two modes don't agree on what an active note means.
    pub rendered_mode: StringMode,
}

impl StringConfig {
    pub fn new(role: StringRole, channel: i32) -> Self {
        Self {
            role,
            channel,
            base_note: 60,
            muted: true,
            volume: 127,
            panning: 64,
            bank: 0,
            program: 0,
            base_note_count: 0,
            mode: StringMode::Midigurdy,
            polyphonic: false,
            empty_key: 0,
            threshold: 0,
            attack: 0,
            chien_on_debounce: 3,
            chien_off_debounce: 3,
            chien_debounce: 0,
            fixed_notes: Vec::new(),
            model: Voice::new_model(),
            rendered_mode: StringMode::Midigurdy,
        }
    }

    pub fn set_mute(&mut self, muted: bool) {
        self.muted = muted;
        self.model.volume = if muted { 0 } else { self.volume };
    }

    pub fn set_volume(&mut self, volume: i32) {
        self.volume = volume.clamp(0, 127);
        if !self.muted {
            self.model.volume = self.volume;
        }
    }

    pub fn set_base_note(&mut self, base_note: i32) {
        self.base_note = base_note.clamp(0, 127);
    }

    /// Mirrors `mg_string_set_fixed_note`: `velocity == 0` removes the note
    /// if present, otherwise it is added (if not already present).
    pub fn set_fixed_note(&mut self, midi_note: i32, velocity: i32) {
        let midi_note = midi_note.clamp(0, 127);
        let found = self.fixed_notes.iter().position(|&n| n == midi_note);
        match (found, velocity > 0) {
            (Some(idx), false) => {
                self.fixed_notes.remove(idx);
            }
            (None, true) => {
                self.fixed_notes.push(midi_note);
            }
            _ => {}
        }
    }

    pub fn clear_fixed_notes(&mut self) {
        self.fixed_notes.clear();
    }

    pub fn clear_notes(&mut self) {
        self.model.clear_notes();
    }

    pub fn apply(&mut self, param: StringParam) -> Result<(), ConfigError> {
        match param {
            StringParam::Mute(m) => self.set_mute(m),
            StringParam::Volume(v) => self.set_volume(v),
            StringParam::Channel(c) => self.channel = c,
            StringParam::BaseNote(n) => self.set_base_note(n),
            StringParam::Panning(p) => self.panning = p.clamp(0, 127),
            StringParam::Polyphonic(p) => self.polyphonic = p,
            StringParam::EmptyKey(k) => self.empty_key = k.clamp(0, crate::KEY_COUNT as i32 - 1),
            StringParam::Threshold(t) => self.threshold = t,
            StringParam::Attack(a) => self.attack = a,
            StringParam::NoteEnable { note, velocity } => self.set_fixed_note(note, velocity.max(1)),
            StringParam::NoteDisable { note } => self.set_fixed_note(note, 0),
            StringParam::NoteClear => self.clear_fixed_notes(),
            StringParam::Mode(m) => self.mode = StringMode::from_i32(m)?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_string_is_muted() {
        let st = StringConfig::new(StringRole::Melody, 0);
        assert!(st.muted);
        assert_eq!(st.model.volume, 127);
    }

    #[test]
    fn test_mute_zeroes_model_volume() {
        let mut st = StringConfig::new(StringRole::Drone, 3);
        st.set_mute(false);
        assert_eq!(st.model.volume, 127);
        st.set_mute(true);
        assert_eq!(st.model.volume, 0);
    }

    #[test]
    fn test_set_volume_clips_and_respects_mute() {
        let mut st = StringConfig::new(StringRole::Drone, 3);
        st.set_mute(true);
        st.set_volume(200);
        assert_eq!(st.volume, 127);
        assert_eq!(st.model.volume, 0, "muted string stays silent even after volume change");
    }

    #[test]
    fn test_fixed_note_add_and_remove() {
        let mut st = StringConfig::new(StringRole::Drone, 3);
        st.set_fixed_note(60, 100);
        assert_eq!(st.fixed_notes, vec![60]);
        st.set_fixed_note(60, 100);
        assert_eq!(st.fixed_notes, vec![60], "duplicate add is a no-op");
        st.set_fixed_note(60, 0);
        assert!(st.fixed_notes.is_empty());
    }

    #[test]
    fn test_string_id_roundtrip() {
        assert_eq!(StringId::from_raw(9), Ok(StringId::Keynoise));
        assert!(StringId::from_raw(10).is_err());
    }
}
