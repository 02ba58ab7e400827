use thiserror::Error;

/// Errors returned when applying configuration to shared state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown string id: {0}")]
    InvalidStringId(i32),

    #[error("unknown parameter: {0}")]
    InvalidParam(i32),

    #[error("unknown mapping index: {0}")]
    InvalidMapping(i32),

    #[error("unknown mode: {0}")]
    InvalidMode(i32),

    #[error("mapping must have at least one breakpoint")]
    EmptyMapping,

    #[error("mapping has too many breakpoints: {0} (max {max})", max = crate::MAP_MAX_RANGES)]
    MappingTooLarge(usize),

    #[error("value {value} out of range {min}..={max}")]
    OutOfRange { value: i32, min: i32, max: i32 },
}
