//! Wire-format byte encoders: the MIDI message bytes an [`crate::state`]
//! reconciliation pass emits, and the telemetry packet layouts published to
//! diagnostic listeners.

use crate::{CC_ALL_CTRL_OFF, CC_ALL_SOUNDS_OFF, CC_BANK_LSB, CC_BANK_MSB, CC_EXPRESSION, CC_PANNING, CC_VOLUME};

const NOTEON: u8 = 0x90;
const NOTEOFF: u8 = 0x80;
const CONTROL_CHANGE: u8 = 0xB0;
const CHANNEL_PRESSURE: u8 = 0xD0;
const PITCH_BEND: u8 = 0xE0;
const PROGRAM_CHANGE: u8 = 0xC0;

fn status(msg: u8, channel: i32) -> u8 {
    msg | (channel as u8 & 0x0F)
}

fn lsb(val: i32) -> u8 {
    (val & 0x7F) as u8
}

fn msb(val: i32) -> u8 {
    ((val & (0x7F << 7)) >> 7) as u8
}

pub fn note_on(channel: i32, note: i32, velocity: i32) -> [u8; 3] {
    [status(NOTEON, channel), (note & 0x7F) as u8, (velocity & 0x7F) as u8]
}

pub fn note_off(channel: i32, note: i32) -> [u8; 3] {
    [status(NOTEOFF, channel), (note & 0x7F) as u8, 0]
}

pub fn control_change(channel: i32, controller: u8, value: i32) -> [u8; 3] {
    [status(CONTROL_CHANGE, channel), controller & 0x7F, (value & 0x7F) as u8]
}

pub fn volume(channel: i32, value: i32) -> [u8; 3] {
    control_change(channel, CC_VOLUME, value)
}

pub fn panning(channel: i32, value: i32) -> [u8; 3] {
    control_change(channel, CC_PANNING, value)
}

/// Mirrors the original's wire quirk: an expression value of exactly 0 is
/// sent as 1, since some soundfonts treat expression 0 as "reset to full"
/// rather than silence.
pub fn expression(channel: i32, value: i32) -> [u8; 3] {
    let value = if value == 0 { 1 } else { value };
    control_change(channel, CC_EXPRESSION, value)
}

pub fn channel_pressure(channel: i32, value: i32) -> [u8; 2] {
    [status(CHANNEL_PRESSURE, channel), (value & 0x7F) as u8]
}

pub fn program_change(channel: i32, program: i32) -> [u8; 2] {
    [status(PROGRAM_CHANGE, channel), (program & 0x7F) as u8]
}

/// Bank select is sent as an MSB/LSB control-change pair ahead of the
/// program change, per the General MIDI convention.
pub fn bank_select_msb(channel: i32, bank: i32) -> [u8; 3] {
    control_change(channel, CC_BANK_MSB, (bank >> 7) & 0x7F)
}

pub fn bank_select_lsb(channel: i32, bank: i32) -> [u8; 3] {
    control_change(channel, CC_BANK_LSB, bank & 0x7F)
}

/// 14-bit pitch bend, split into LSB/MSB data bytes.
pub fn pitch_bend(channel: i32, value: i32) -> [u8; 3] {
    [status(PITCH_BEND, channel), lsb(value), msb(value)]
}

pub fn all_sounds_off(channel: i32) -> [u8; 3] {
    control_change(channel, CC_ALL_SOUNDS_OFF, 0)
}

pub fn all_ctrl_off(channel: i32) -> [u8; 3] {
    control_change(channel, CC_ALL_CTRL_OFF, 0)
}

/// Wheel telemetry sample, published at most once every
/// [`crate::WHEEL_REPORT_INTERVAL`] ticks (and only when it has changed).
/// Wire format: little-endian `uint16` quadruple
/// `(position, speed, chien_volume, chien_speed)`, up to 100 packets per
/// flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WheelTelemetry {
    pub position: u32,
    pub speed: u32,
    pub chien_volume: i32,
    pub chien_speed: i32,
}

/// Maximum wheel telemetry packets sent per flush.
pub const WHEEL_TELEMETRY_MAX_PACKETS: usize = 100;

impl WheelTelemetry {
    /// Little-endian `[position:u16][speed:u16][chien_volume:u16][chien_speed:u16]`.
    /// Values are truncated to 16 bits, matching the original wire protocol.
    pub fn to_bytes(self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[0..2].copy_from_slice(&(self.position as u16).to_le_bytes());
        buf[2..4].copy_from_slice(&(self.speed as u16).to_le_bytes());
        buf[4..6].copy_from_slice(&(self.chien_volume as u16).to_le_bytes());
        buf[6..8].copy_from_slice(&(self.chien_speed as u16).to_le_bytes());
        buf
    }
}

/// One key's telemetry record: its index plus raw/smoothed pressure,
/// derived velocity, and the edge action it took this tick (if any).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRecord {
    pub index: u16,
    pub raw_pressure: u16,
    pub smoothed_pressure: u16,
    pub velocity: u16,
    /// `0 = none, 1 = pressed, 2 = released`, matching `KeyAction`'s
    /// discriminant order.
    pub action: u16,
}

impl KeyRecord {
    /// 10-byte little-endian record:
    /// `(index:u16, raw_pressure:u16, smoothed_pressure:u16, velocity:u16, action:u16)`.
    pub fn to_bytes(self) -> [u8; 10] {
        let mut buf = [0u8; 10];
        buf[0..2].copy_from_slice(&self.index.to_le_bytes());
        buf[2..4].copy_from_slice(&self.raw_pressure.to_le_bytes());
        buf[4..6].copy_from_slice(&self.smoothed_pressure.to_le_bytes());
        buf[6..8].copy_from_slice(&self.velocity.to_le_bytes());
        buf[8..10].copy_from_slice(&self.action.to_le_bytes());
        buf
    }
}

/// Key telemetry sample, published at most once every
/// [`crate::KEY_REPORT_INTERVAL`] ticks: one 10-byte record per key that
/// changed (action != none) since the last emission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyTelemetry {
    pub records: Vec<KeyRecord>,
}

impl KeyTelemetry {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.records.len() * 10);
        for r in &self.records {
            buf.extend_from_slice(&r.to_bytes());
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_on_masks_channel_and_data() {
        assert_eq!(note_on(3, 200, 300), [0x93, 0x48, 0x2C]);
    }

    #[test]
    fn test_expression_zero_becomes_one() {
        assert_eq!(expression(0, 0), [0xB0, 11, 1]);
        assert_eq!(expression(0, 50), [0xB0, 11, 50]);
    }

    #[test]
    fn test_pitch_bend_splits_14_bits() {
        let bytes = pitch_bend(2, 0x2000);
        assert_eq!(bytes, [0xE2, 0x00, 0x40]);
    }

    #[test]
    fn test_reset_sends_all_sounds_and_ctrl_off() {
        assert_eq!(all_sounds_off(1), [0xB1, 0x78, 0]);
        assert_eq!(all_ctrl_off(1), [0xB1, 0x79, 0]);
    }

    #[test]
    fn test_wheel_telemetry_is_little_endian_u16_quadruple() {
        let t = WheelTelemetry { position: 100, speed: 200, chien_volume: 10, chien_speed: 5 };
        assert_eq!(t.to_bytes(), [100, 0, 200, 0, 10, 0, 5, 0]);
    }

    #[test]
    fn test_key_record_is_ten_bytes_little_endian() {
        let r = KeyRecord { index: 3, raw_pressure: 500, smoothed_pressure: 480, velocity: 90, action: 1 };
        assert_eq!(r.to_bytes(), [3, 0, 244, 1, 224, 1, 90, 0, 1, 0]);
    }

    #[test]
    fn test_key_telemetry_concatenates_only_given_records() {
        let t = KeyTelemetry {
            records: vec![
                KeyRecord { index: 0, raw_pressure: 1, smoothed_pressure: 1, velocity: 1, action: 1 },
                KeyRecord { index: 1, raw_pressure: 2, smoothed_pressure: 2, velocity: 2, action: 2 },
            ],
        };
        assert_eq!(t.to_bytes().len(), 20);
    }
}
