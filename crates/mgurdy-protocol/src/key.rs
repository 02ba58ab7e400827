/// Whether a key is currently considered pressed or released, after
/// debouncing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Inactive,
    Active,
}

/// What changed about a key on the most recent tick, if anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    None,
    Pressed,
    Released,
}

/// Sensor-derived state for a single pressure-sensitive key.
#[derive(Debug, Clone, Copy)]
pub struct Key {
    pub raw_pressure: i32,
    pub pressure: i32,
    pub max_pressure: i32,
    pub smoothed_pressure: i32,

    pub velocity: i32,
    pub state: KeyState,
    pub action: KeyAction,
    /// Number of ticks the key has been continuously active.
    pub active_since: i32,

    /// Debounce counter: counts up while the raw state disagrees with
    /// `state`, resets to 0 once it is applied.
    pub debounce: i32,
}

impl Default for Key {
    fn default() -> Self {
        Self {
            raw_pressure: 0,
            pressure: 0,
            max_pressure: 0,
            smoothed_pressure: 0,
            velocity: 0,
            state: KeyState::Inactive,
            action: KeyAction::None,
            active_since: 0,
            debounce: 0,
        }
    }
}

/// Per-key pressure/velocity calibration factors, applied to raw sensor
/// readings before they reach [`Key`].
#[derive(Debug, Clone, Copy)]
pub struct KeyCalibration {
    pub pressure_adjust: f32,
    pub velocity_adjust: f32,
}

impl Default for KeyCalibration {
    fn default() -> Self {
        Self {
            pressure_adjust: 1.0,
            velocity_adjust: 1.0,
        }
    }
}
