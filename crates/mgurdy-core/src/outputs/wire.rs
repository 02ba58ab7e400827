//! A raw MIDI byte-stream output. Grounded on the original's
//! `midi_output.rs`: on Linux it writes through an ALSA rawmidi playback
//! handle opened by device name, with a short write marking the output
//! failed rather than panicking; non-Linux platforms get the same stub
//! shape the original falls back to there.

use mgurdy_protocol::wire;

use crate::error::OutputError;
use crate::output::Output;

fn write_all_or_fail(device: &mut platform::MidiDevice, buf: &[u8]) -> Result<(), OutputError> {
    let n = device.write(buf)?;
    if n != buf.len() {
        return Err(OutputError::ShortWrite { expected: buf.len(), actual: n });
    }
    Ok(())
}

/// Writes raw MIDI bytes to a device node (e.g. `hw:1,0,0` on Linux, or a
/// named pipe feeding a synth on other platforms).
pub struct MidiDeviceOutput {
    device: platform::MidiDevice,
}

impl MidiDeviceOutput {
    pub fn open(path: &str) -> std::io::Result<Self> {
        Ok(Self { device: platform::MidiDevice::open(path)? })
    }
}

impl Output for MidiDeviceOutput {
    fn note_on(&mut self, channel: i32, note: usize, velocity: i32) -> Result<(), OutputError> {
        write_all_or_fail(&mut self.device, &wire::note_on(channel, note as i32, velocity))
    }

    fn note_off(&mut self, channel: i32, note: usize) -> Result<(), OutputError> {
        write_all_or_fail(&mut self.device, &wire::note_off(channel, note as i32))
    }

    fn control_change(&mut self, channel: i32, controller: u8, value: i32) -> Result<(), OutputError> {
        write_all_or_fail(&mut self.device, &wire::control_change(channel, controller, value))
    }

    fn pitch_bend(&mut self, channel: i32, value: i32) -> Result<(), OutputError> {
        write_all_or_fail(&mut self.device, &wire::pitch_bend(channel, value))
    }

    fn channel_pressure(&mut self, channel: i32, value: i32) -> Result<(), OutputError> {
        write_all_or_fail(&mut self.device, &wire::channel_pressure(channel, value))
    }

    fn reset_channel(&mut self, channel: i32) -> Result<(), OutputError> {
        write_all_or_fail(&mut self.device, &wire::all_sounds_off(channel))?;
        write_all_or_fail(&mut self.device, &wire::all_ctrl_off(channel))
    }

    fn program_change(&mut self, channel: i32, bank: i32, program: i32) -> Result<(), OutputError> {
        write_all_or_fail(&mut self.device, &wire::bank_select_msb(channel, bank))?;
        write_all_or_fail(&mut self.device, &wire::bank_select_lsb(channel, bank))?;
        write_all_or_fail(&mut self.device, &wire::program_change(channel, program))
    }
}

#[cfg(target_os = "linux")]
mod platform {
    use alsa::rawmidi::Rawmidi;
    use alsa::Direction;
    use std::ffi::CString;
    use std::io;

    /// A single ALSA rawmidi playback handle, opened by device name (e.g.
    /// `hw:1,0,0`). Mirrors the original's `MidiOutputWriter`, narrowed to
    /// one device per [`super::MidiDeviceOutput`] since each output stream
    /// in this core already owns exactly one transport.
    pub struct MidiDevice {
        rawmidi: Rawmidi,
    }

    impl MidiDevice {
        pub fn open(name: &str) -> io::Result<Self> {
            let cstr = CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            let rawmidi = Rawmidi::open(&cstr, Direction::Playback, false)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
            Ok(Self { rawmidi })
        }

        pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            use std::io::Write as _;
            self.rawmidi.io().write(buf)
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod platform {
    use std::io;

    /// Stub MIDI device for non-Linux platforms: writes are accepted and
    /// discarded, matching the original's non-Linux `MidiOutputWriter` stub.
    pub struct MidiDevice {
        name: String,
    }

    impl MidiDevice {
        pub fn open(name: &str) -> io::Result<Self> {
            tracing::warn!(device = %name, "MIDI output not supported on this platform (Linux only)");
            Ok(Self { name: name.to_string() })
        }

        pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let _ = &self.name;
            Ok(buf.len())
        }
    }
}
