//! An in-process [`Output`] that records every message it receives instead
//! of writing bytes anywhere. Stands in for the actual synthesizer backend,
//! which is out of scope for this core -- useful for tests, demos, and a CLI
//! that wants to print what the instrument is doing without real hardware.

use std::sync::{Arc, Mutex};

use crate::error::OutputError;
use crate::output::Output;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    NoteOn { channel: i32, note: usize, velocity: i32 },
    NoteOff { channel: i32, note: usize },
    ControlChange { channel: i32, controller: u8, value: i32 },
    PitchBend { channel: i32, value: i32 },
    ChannelPressure { channel: i32, value: i32 },
    Reset { channel: i32 },
    ProgramChange { channel: i32, bank: i32, program: i32 },
}

/// A handle to the messages an [`InProcessOutput`] has recorded, shareable
/// with whatever is inspecting them (a test, or a CLI's status command).
#[derive(Debug, Clone, Default)]
pub struct MessageLog(Arc<Mutex<Vec<Message>>>);

impl MessageLog {
    pub fn drain(&self) -> Vec<Message> {
        std::mem::take(&mut self.0.lock().unwrap())
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct InProcessOutput {
    log: MessageLog,
}

impl InProcessOutput {
    pub fn new() -> (Self, MessageLog) {
        let log = MessageLog::default();
        (Self { log: log.clone() }, log)
    }

    fn push(&mut self, msg: Message) {
        self.log.0.lock().unwrap().push(msg);
    }
}

impl Output for InProcessOutput {
    fn note_on(&mut self, channel: i32, note: usize, velocity: i32) -> Result<(), OutputError> {
        self.push(Message::NoteOn { channel, note, velocity });
        Ok(())
    }

    fn note_off(&mut self, channel: i32, note: usize) -> Result<(), OutputError> {
        self.push(Message::NoteOff { channel, note });
        Ok(())
    }

    fn control_change(&mut self, channel: i32, controller: u8, value: i32) -> Result<(), OutputError> {
        self.push(Message::ControlChange { channel, controller, value });
        Ok(())
    }

    fn pitch_bend(&mut self, channel: i32, value: i32) -> Result<(), OutputError> {
        self.push(Message::PitchBend { channel, value });
        Ok(())
    }

    fn channel_pressure(&mut self, channel: i32, value: i32) -> Result<(), OutputError> {
        self.push(Message::ChannelPressure { channel, value });
        Ok(())
    }

    fn reset_channel(&mut self, channel: i32) -> Result<(), OutputError> {
        self.push(Message::Reset { channel });
        Ok(())
    }

    fn program_change(&mut self, channel: i32, bank: i32, program: i32) -> Result<(), OutputError> {
        self.push(Message::ProgramChange { channel, bank, program });
        Ok(())
    }
}
