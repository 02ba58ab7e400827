//! Output reconciliation (C5): diffs each string's model voice against what
//! was actually sent to a given output, and dispatches the difference under
//! a per-stream token bucket so a slow transport can't starve note-on/off
//! messages.
//!
//! Grounded on the original's `output.c` (token bucket + diffing) and
//! `output_midi.c` (concrete sender list per string role, fixed per-message
//! token costs).

use mgurdy_protocol::state::SharedState;
use mgurdy_protocol::string::{StringId, StringRole};
use mgurdy_protocol::voice::{Note, Voice};
use mgurdy_protocol::{CC_EXPRESSION, CC_PANNING, CC_VOLUME, CHANNEL_OFF};

use crate::error::OutputError;

/// Fixed per-message token costs, independent of transport. Matches the
/// constants returned by the original's `mg_output_midi_*` senders.
pub const COST_NOTE: i32 = 3000;
pub const COST_CC: i32 = 3000;
pub const COST_PRESSURE: i32 = 2000;
pub const COST_PROGRAM: i32 = 2000;
pub const COST_BANK: i32 = 6000;
pub const COST_RESET: i32 = 6000;

/// How many ticks (~1 at 1kHz) a failing output is suspended for after a
/// sender or note op returns an error, to avoid a tight error-retry loop.
pub const OUTPUT_SUSPEND_TICKS: u32 = 1000;

/// A transport a [`OutputManager`] can dispatch reconciled messages to.
/// Implementations never see the token bucket or diffing logic -- they only
/// need to know how to put one message on the wire.
pub trait Output: Send {
    fn note_on(&mut self, channel: i32, note: usize, velocity: i32) -> Result<(), OutputError>;
    fn note_off(&mut self, channel: i32, note: usize) -> Result<(), OutputError>;
    fn control_change(&mut self, channel: i32, controller: u8, value: i32) -> Result<(), OutputError>;
    fn pitch_bend(&mut self, channel: i32, value: i32) -> Result<(), OutputError>;
    fn channel_pressure(&mut self, channel: i32, value: i32) -> Result<(), OutputError>;
    fn program_change(&mut self, channel: i32, bank: i32, program: i32) -> Result<(), OutputError>;
    fn reset_channel(&mut self, channel: i32) -> Result<(), OutputError>;
}

/// One of the continuous-controller senders round-robined across a stream's
/// token budget. Note on/off are handled separately and are never rate
/// limited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sender {
    Expression,
    Pitch,
    ChannelPressure,
    Volume,
    Panning,
    BankProgram,
}

impl Sender {
    /// Send and return the token cost of what was actually emitted (0 if the
    /// comparison found nothing to send). Returns `Err` only if the
    /// underlying output reported a failure -- the caller aborts the whole
    /// stream sync on the first one, per the reconciliation contract.
    fn run(self, output: &mut dyn Output, channel: i32, model: &Voice, dst: &mut Voice) -> Result<i32, OutputError> {
        Ok(match self {
            Sender::Expression => {
                let expression = if model.expression == 0 { 1 } else { model.expression };
                if dst.expression != expression {
                    output.control_change(channel, CC_EXPRESSION, expression)?;
                    dst.expression = expression;
                    COST_CC
                } else {
                    0
                }
            }
            Sender::Pitch => {
                if dst.pitch != model.pitch {
                    output.pitch_bend(channel, model.pitch)?;
                    dst.pitch = model.pitch;
                    COST_CC
                } else {
                    0
                }
            }
            Sender::ChannelPressure => {
                if dst.pressure != model.pressure {
                    output.channel_pressure(channel, model.pressure)?;
                    dst.pressure = model.pressure;
                    COST_PRESSURE
                } else {
                    0
                }
            }
            Sender::Volume => {
                if dst.volume != model.volume {
                    output.control_change(channel, CC_VOLUME, model.volume)?;
                    dst.volume = model.volume;
                    COST_CC
                } else {
                    0
                }
            }
            Sender::Panning => {
                if dst.panning != model.panning {
                    output.control_change(channel, CC_PANNING, model.panning)?;
                    dst.panning = model.panning;
                    COST_CC
                } else {
                    0
                }
            }
            Sender::BankProgram => {
                if dst.bank != model.bank || dst.program != model.program {
                    output.program_change(channel, model.bank, model.program)?;
                    dst.bank = model.bank;
                    dst.program = model.program;
                    COST_BANK + COST_PROGRAM
                } else {
                    0
                }
            }
        })
    }
}

fn senders_for_role(role: StringRole) -> Vec<Sender> {
    match role {
        StringRole::Melody => vec![
            Sender::Expression, Sender::Pitch, Sender::ChannelPressure, Sender::Volume, Sender::Panning, Sender::BankProgram,
        ],
        StringRole::Trompette => vec![Sender::Expression, Sender::ChannelPressure, Sender::Volume, Sender::Panning, Sender::BankProgram],
        StringRole::Drone => vec![Sender::Expression, Sender::Volume, Sender::Panning, Sender::BankProgram],
        StringRole::Keynoise => vec![Sender::ChannelPressure, Sender::Volume, Sender::Panning, Sender::BankProgram],
    }
}

/// One string's reconciliation state against a single output.
pub struct Stream {
    id: StringId,
    pub enabled: bool,
    tokens: i32,
    tokens_per_tick: i32,
    max_tokens: i32,
    tokens_percent: i32,
    senders: Vec<Sender>,
    sender_idx: usize,
    dst: Voice,
    /// Keynoise samples are one-shot -- an output that plays them must never
    /// receive a note-off, since there is nothing to release.
    suppress_note_off: bool,
    /// Whether this stream's `BankProgram` sender is allowed to run. An
    /// output that doesn't want bank/program-change traffic (e.g. a synth
    /// configured entirely by its own presets) can disable it.
    send_program_change: bool,
}

impl Stream {
    fn new(id: StringId, role: StringRole, tokens_percent: i32) -> Self {
        Self {
            id,
            enabled: true,
            tokens: 0,
            tokens_per_tick: 0,
            max_tokens: 9000,
            tokens_percent,
            senders: senders_for_role(role),
            sender_idx: 0,
            dst: Voice::new_sink(),
            suppress_note_off: role == StringRole::Keynoise,
            send_program_change: true,
        }
    }
}

/// Default stream wiring: every one of the ten strings gets a stream, with
/// token-percent shares proportional to the original's melody/trompette/drone
/// 60/30/10 split (the original only wired up one representative string per
/// role; here all ten are addressable, so the split is spread evenly within
/// each role plus a share for key noise).
fn default_streams() -> Vec<Stream> {
    let mut streams = Vec::with_capacity(10);
    for i in 0..3u8 {
        streams.push(Stream::new(StringId::Melody(i), StringRole::Melody, 18));
    }
    for i in 0..3u8 {
        streams.push(Stream::new(StringId::Trompette(i), StringRole::Trompette, 9));
    }
    for i in 0..3u8 {
        streams.push(Stream::new(StringId::Drone(i), StringRole::Drone, 4));
    }
    streams.push(Stream::new(StringId::Keynoise, StringRole::Keynoise, 7));
    streams
}

/// One registered output transport plus its per-string reconciliation
/// streams and overall token budget.
pub struct OutputSlot {
    output: Box<dyn Output>,
    pub enabled: bool,
    tokens_per_tick: i32,
    streams: Vec<Stream>,
    pub failed: bool,
    /// Ticks remaining before this output is synced again, set to
    /// [`OUTPUT_SUSPEND_TICKS`] whenever a sender or note op errors, so a
    /// sink stuck failing (disconnected pipe, full buffer) doesn't spin the
    /// worker in a tight error-retry loop.
    skip_iterations: u32,
}

impl OutputSlot {
    pub fn new(output: Box<dyn Output>, tokens_per_tick: i32) -> Self {
        let mut slot = Self {
            output,
            enabled: true,
            tokens_per_tick,
            streams: default_streams(),
            failed: false,
            skip_iterations: 0,
        };
        slot.recalculate_tokens_per_tick();
        slot
    }

    pub fn is_suspended(&self) -> bool {
        self.skip_iterations > 0
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        self.recalculate_tokens_per_tick();
    }

    pub fn set_tokens_per_tick(&mut self, tokens_per_tick: i32) {
        self.tokens_per_tick = tokens_per_tick;
        self.recalculate_tokens_per_tick();
    }

    pub fn set_send_program_change(&mut self, enabled: bool) {
        for stream in self.streams.iter_mut() {
            stream.send_program_change = enabled;
        }
    }

    pub fn set_stream_enabled(&mut self, id: StringId, enabled: bool) {
        if let Some(stream) = self.streams.iter_mut().find(|s| s.id == id) {
            if stream.enabled != enabled {
                stream.enabled = enabled;
            }
        }
        self.recalculate_tokens_per_tick();
    }

    /// Mirrors `mg_output_calculate_tokens_per_tick`: redistributes the
    /// token share of disabled streams proportionally across enabled ones.
    fn recalculate_tokens_per_tick(&mut self) {
        let mut toks = self.tokens_per_tick;
        for stream in self.streams.iter_mut() {
            if !stream.enabled {
                toks += (stream.tokens_percent * self.tokens_per_tick) / 100;
                stream.tokens_per_tick = 0;
            }
        }
        for stream in self.streams.iter_mut() {
            if stream.enabled {
                stream.tokens_per_tick = stream.tokens_percent * toks / 100;
            }
        }
    }

    fn add_tokens(&mut self) {
        if self.tokens_per_tick != 0 {
            for stream in self.streams.iter_mut() {
                if stream.enabled && stream.tokens < stream.max_tokens {
                    stream.tokens = (stream.tokens + stream.tokens_per_tick).min(stream.max_tokens);
                }
            }
        } else {
            for stream in self.streams.iter_mut() {
                stream.tokens = 0;
            }
        }
    }

    /// Run one tick's reconciliation. A suspended output (mid-1000-tick
    /// timeout after a previous failure) is skipped entirely -- its streams
    /// and shadows are left exactly where the failed sync left them, so the
    /// next real sync attempt replays only the unsent work.
    fn sync(&mut self, state: &SharedState) {
        if self.skip_iterations > 0 {
            self.skip_iterations -= 1;
            return;
        }

        let rate_limited = self.tokens_per_tick > 0;
        let OutputSlot { output, streams, failed, .. } = self;
        let mut any_failed = false;

        for stream in streams.iter_mut() {
            if !stream.enabled {
                continue;
            }
            let string = state.string(stream.id);
            if sync_stream(output.as_mut(), stream, string.channel, &string.model, rate_limited).is_err() {
                any_failed = true;
            }
        }

        if any_failed {
            *failed = true;
            self.skip_iterations = OUTPUT_SUSPEND_TICKS;
        }
    }

    pub fn reset(&mut self, state: &SharedState) {
        for stream in self.streams.iter_mut() {
            let channel = state.string(stream.id).channel;
            if self.output.reset_channel(channel).is_err() {
                self.failed = true;
                self.skip_iterations = OUTPUT_SUSPEND_TICKS;
            }
            stream.dst.reset_sink();
        }
    }

    /// Reset a single stream's channel (e.g. on a control-plane channel
    /// switch): reset must complete on the old channel before the new
    /// channel's events, and the sink voice's sentinel reset forces every
    /// field to be re-emitted on the next sync.
    pub fn reset_stream(&mut self, id: StringId, old_channel: i32) {
        if let Some(stream) = self.streams.iter_mut().find(|s| s.id == id) {
            if self.output.reset_channel(old_channel).is_err() {
                self.failed = true;
                self.skip_iterations = OUTPUT_SUSPEND_TICKS;
            }
            stream.dst.reset_sink();
        }
    }
}

fn sync_stream(output: &mut dyn Output, stream: &mut Stream, channel: i32, model: &Voice, rate_limited: bool) -> Result<(), OutputError> {
    sync_notes(output, model, &mut stream.dst, stream.suppress_note_off)?;

    let n = stream.senders.len();
    if n == 0 {
        return Ok(());
    }
    for _ in 0..n {
        if rate_limited && stream.tokens <= 0 {
            break;
        }
        let sender = stream.senders[stream.sender_idx];
        stream.sender_idx = (stream.sender_idx + 1) % n;
        if sender == Sender::BankProgram && !stream.send_program_change {
            continue;
        }
        stream.tokens -= sender.run(output, channel, model, &mut stream.dst)?;
    }
    Ok(())
}

/// Note on/off are never rate limited, mirroring the original: a stream that
/// has run out of tokens still gets its notes turned on and off correctly,
/// only its continuous-controller updates fall behind. On a send failure,
/// the notes already emitted are persisted into the sink's active-list
/// before the error propagates, so a retried sync doesn't re-emit a note-on
/// the transport already received and doesn't lose track of it when it's
/// later cleared (a note whose channel already matches `dst` but is absent
/// from `dst.active_notes` would otherwise never get its note-off).
fn sync_notes(output: &mut dyn Output, model: &Voice, dst: &mut Voice, suppress_note_off: bool) -> Result<(), OutputError> {
    let mut new_active = Vec::with_capacity(model.active_notes.len());

    for &key in &model.active_notes {
        let src: &Note = &model.notes[key];
        if src.channel != dst.notes[key].channel {
            if let Err(err) = output.note_on(src.channel, key, src.velocity) {
                dst.active_notes = new_active;
                return Err(err);
            }
            dst.notes[key].channel = src.channel;
            new_active.push(key);
        }
    }

    let still_active = dst.active_notes.clone();
    for key in still_active {
        let dst_channel = dst.notes[key].channel;
        if dst_channel == model.notes[key].channel {
            new_active.push(key);
        } else if suppress_note_off {
            dst.notes[key].channel = CHANNEL_OFF;
        } else if let Err(err) = output.note_off(dst_channel, key) {
            dst.active_notes = new_active;
            return Err(err);
        } else {
            dst.notes[key].channel = CHANNEL_OFF;
        }
    }

    dst.active_notes = new_active;
    Ok(())
}

/// Owns every registered output and drives reconciliation against the
/// shared state once per tick.
#[derive(Default)]
pub struct OutputManager {
    slots: Vec<OutputSlot>,
    next_id: u32,
    ids: Vec<u32>,
}

impl OutputManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, output: Box<dyn Output>, tokens_per_tick: i32) -> Result<u32, OutputError> {
        if self.slots.len() >= mgurdy_protocol::OUTPUT_STREAM_MAX {
            return Err(OutputError::MaxOutputsReached);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.slots.push(OutputSlot::new(output, tokens_per_tick));
        self.ids.push(id);
        Ok(id)
    }

    pub fn remove(&mut self, id: u32) -> Result<(), OutputError> {
        let pos = self.ids.iter().position(|&i| i == id).ok_or(OutputError::UnknownOutput(id))?;
        self.ids.remove(pos);
        self.slots.remove(pos);
        Ok(())
    }

    pub fn set_enabled(&mut self, id: u32, enabled: bool) -> Result<(), OutputError> {
        let pos = self.ids.iter().position(|&i| i == id).ok_or(OutputError::UnknownOutput(id))?;
        self.slots[pos].set_enabled(enabled);
        Ok(())
    }

    /// Reset a single string's channel on one output (e.g. a control-plane
    /// channel switch), returning an error if the output id is unknown.
    pub fn reset_stream(&mut self, id: u32, string_id: StringId, old_channel: i32) -> Result<(), OutputError> {
        let pos = self.ids.iter().position(|&i| i == id).ok_or(OutputError::UnknownOutput(id))?;
        self.slots[pos].reset_stream(string_id, old_channel);
        Ok(())
    }

    /// Reset a single string's channel on every registered output. Used when
    /// a channel switch is a global configuration change rather than
    /// targeting one particular output.
    pub fn reset_stream_all(&mut self, string_id: StringId, old_channel: i32) {
        for slot in self.slots.iter_mut() {
            slot.reset_stream(string_id, old_channel);
        }
    }

    pub fn set_tokens_per_tick(&mut self, id: u32, tokens_per_tick: i32) -> Result<(), OutputError> {
        let pos = self.ids.iter().position(|&i| i == id).ok_or(OutputError::UnknownOutput(id))?;
        self.slots[pos].set_tokens_per_tick(tokens_per_tick);
        Ok(())
    }

    pub fn set_send_program_change(&mut self, id: u32, enabled: bool) -> Result<(), OutputError> {
        let pos = self.ids.iter().position(|&i| i == id).ok_or(OutputError::UnknownOutput(id))?;
        self.slots[pos].set_send_program_change(enabled);
        Ok(())
    }

    pub fn sync_all(&mut self, state: &SharedState) {
        for slot in self.slots.iter_mut() {
            if !slot.enabled {
                continue;
            }
            slot.add_tokens();
            slot.sync(state);
        }
    }

    pub fn reset_all(&mut self, state: &SharedState) {
        for slot in self.slots.iter_mut() {
            if slot.enabled {
                slot.reset(state);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
