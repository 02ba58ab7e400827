pub mod config;
pub mod control;
pub mod error;
pub mod model;
pub mod output;
pub mod outputs;
pub mod sensors;
pub mod telemetry;
pub mod worker;

pub use control::Core;
pub use error::OutputError;

/// Expected interval (microseconds) the wheel speed formula is normalized
/// against.
pub const WHEEL_EXPECTED_US: i32 = 1100;
/// Minimum smoothed wheel speed before `Wheel::speed` leaves zero.
pub const WHEEL_START_SPEED: i32 = 80;
