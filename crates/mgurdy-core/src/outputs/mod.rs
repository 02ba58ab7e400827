//! Concrete [`crate::output::Output`] implementations.

pub mod inprocess;
pub mod wire;

pub use inprocess::InProcessOutput;
pub use wire::MidiDeviceOutput;
