use thiserror::Error;

/// Errors raised while writing to an output stream.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("short write: expected {expected} bytes, wrote {actual}")]
    ShortWrite { expected: usize, actual: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("maximum number of outputs already registered")]
    MaxOutputsReached,

    #[error("no output with id {0}")]
    UnknownOutput(u32),
}
