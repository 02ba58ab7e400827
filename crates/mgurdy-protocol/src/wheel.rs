/// The current state of the wheel sensor.
#[derive(Debug, Clone, Copy, Default)]
pub struct Wheel {
    /// Current position as a 14-bit number (0..16384).
    pub position: u32,

    /// Distance travelled since the previous reading; positive is forward.
    pub distance: i32,

    /// Microseconds over which `distance` was travelled. Only meaningful
    /// alongside a nonzero `distance`.
    pub elapsed_us: u32,

    /// The last individual distance reading seen, used to detect a
    /// genuinely stationary wheel across sync-event boundaries.
    pub last_distance: i32,

    /// Diagnostic virtual gain reported by the sensor, used to calibrate
    /// magnet distance; not used by any model computation.
    pub gain: u32,

    pub speed: u32,

    /// Smoothed speed before the start-threshold gate is applied; retained
    /// across ticks so `calc_wheel_speed` can keep exponentially smoothing
    /// it even while the gated `speed` reads zero.
    pub raw_speed: i32,

    /// Diagnostic acceleration; not used by any model computation.
    pub accel: i32,
}
