pub mod error;
pub mod key;
pub mod mapping;
pub mod state;
pub mod string;
pub mod voice;
pub mod wheel;
pub mod wire;

pub use error::ConfigError;
pub use mapping::Mapping;
pub use state::SharedState;
pub use string::{StringConfig, StringId, StringParam, StringRole};
pub use voice::{Note, Voice};
pub use wheel::Wheel;

/// Number of pressure-sensitive keyboard keys.
pub const KEY_COUNT: usize = 24;

/// Number of addressable MIDI notes per voice.
pub const NUM_NOTES: usize = 128;

/// Maximum number of breakpoints in a single mapping.
pub const MAP_MAX_RANGES: usize = 20;

/// How often (in ticks) wheel telemetry is published.
pub const WHEEL_REPORT_INTERVAL: u32 = 10;

/// How often (in ticks) key telemetry is published.
pub const KEY_REPORT_INTERVAL: u32 = 50;

/// Wheel speed below which melody expression is considered silent.
pub const MELODY_EXPRESSION_THRESHOLD: i32 = 10;

pub const SPEED_MAX: i32 = 5000;
pub const PRESSURE_MAX: i32 = 3000;
pub const KEYVEL_MAX: i32 = PRESSURE_MAX;

pub const CHANNEL_OFF: i32 = -1;

pub const OUTPUT_STREAM_MAX: usize = 10;
pub const STREAM_SENDER_MAX: usize = 10;

pub const CC_BANK_MSB: u8 = 0;
pub const CC_VOLUME: u8 = 7;
pub const CC_PANNING: u8 = 8;
pub const CC_EXPRESSION: u8 = 11;
pub const CC_BANK_LSB: u8 = 32;
pub const CC_ALL_SOUNDS_OFF: u8 = 0x78;
pub const CC_ALL_CTRL_OFF: u8 = 0x79;

pub const CHIEN_MAX: i32 = 4000;

/// Tick period of the realtime worker, in microseconds.
pub const WORKER_INTERVAL_US: u64 = 1000;
pub const WORKER_PRIO: i32 = 50;
