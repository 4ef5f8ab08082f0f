//! MIDI messages and the output transport boundary.
//!
//! Channels in [`MidiMessage`] and [`MidiOutput`] are wire channels (0..=15).
//! Scheduler events use 1-based channels; [`TransportSink`] converts.

#[cfg(feature = "native")]
pub mod native;

use std::sync::{Arc, Mutex, PoisonError};

use crate::error::Result;
use crate::events::{EventKind, ScheduledEvent};

pub const CC_BREATH: u8 = 2;
pub const CC_VOLUME: u8 = 7;
pub const CC_SUSTAIN: u8 = 64;
pub const CC_ALL_SOUND_OFF: u8 = 120;
pub const CC_ALL_NOTES_OFF: u8 = 123;

/// Up to three raw bytes of a channel-voice message, stored inline so
/// hardware callbacks never allocate.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawMessage {
    bytes: [u8; 3],
    len: u8,
}

impl RawMessage {
    /// Copy the first (up to) three bytes; `None` for an empty slice.
    pub fn new(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }
        let len = bytes.len().min(3);
        let mut buf = [0u8; 3];
        buf[..len].copy_from_slice(&bytes[..len]);
        Some(Self {
            bytes: buf,
            len: len as u8,
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn status(&self) -> u8 {
        self.bytes[0]
    }

    /// Status nibble (0x80, 0x90, ...).
    pub fn kind(&self) -> u8 {
        self.bytes[0] & 0xF0
    }

    pub fn channel(&self) -> u8 {
        self.bytes[0] & 0x0F
    }

    pub fn data1(&self) -> Option<u8> {
        (self.len >= 2).then_some(self.bytes[1])
    }

    pub fn data2(&self) -> Option<u8> {
        (self.len >= 3).then_some(self.bytes[2])
    }
}

impl std::fmt::Debug for RawMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RawMessage({:02X?})", self.as_slice())
    }
}

/// Parsed channel-voice message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8, velocity: u8 },
    PolyPressure { channel: u8, note: u8, pressure: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    ChannelPressure { channel: u8, pressure: u8 },
    /// 14-bit bend centered at 0 (-8192..=8191)
    PitchBend { channel: u8, value: i16 },
}

impl MidiMessage {
    /// Parse raw bytes. System messages and truncated messages yield `None`.
    ///
    /// A NoteOn with velocity 0 parses as NoteOff.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let status = *bytes.first()?;
        if !(0x80..0xF0).contains(&status) {
            return None;
        }
        let channel = status & 0x0F;
        let data = |i: usize| bytes.get(i).copied().filter(|b| *b < 0x80);

        match status & 0xF0 {
            0x80 => Some(MidiMessage::NoteOff {
                channel,
                note: data(1)?,
                velocity: data(2)?,
            }),
            0x90 => {
                let note = data(1)?;
                let velocity = data(2)?;
                if velocity == 0 {
                    Some(MidiMessage::NoteOff {
                        channel,
                        note,
                        velocity: 0,
                    })
                } else {
                    Some(MidiMessage::NoteOn {
                        channel,
                        note,
                        velocity,
                    })
                }
            }
            0xA0 => Some(MidiMessage::PolyPressure {
                channel,
                note: data(1)?,
                pressure: data(2)?,
            }),
            0xB0 => Some(MidiMessage::ControlChange {
                channel,
                controller: data(1)?,
                value: data(2)?,
            }),
            0xC0 => Some(MidiMessage::ProgramChange {
                channel,
                program: data(1)?,
            }),
            0xD0 => Some(MidiMessage::ChannelPressure {
                channel,
                pressure: data(1)?,
            }),
            0xE0 => {
                let lsb = data(1)? as i16;
                let msb = data(2)? as i16;
                Some(MidiMessage::PitchBend {
                    channel,
                    value: ((msb << 7) | lsb) - 8192,
                })
            }
            _ => None,
        }
    }

    /// Encode to raw bytes; out-of-range fields are masked.
    pub fn to_raw(&self) -> RawMessage {
        let (bytes, len) = match *self {
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => ([0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F], 3),
            MidiMessage::NoteOff {
                channel,
                note,
                velocity,
            } => ([0x80 | (channel & 0x0F), note & 0x7F, velocity & 0x7F], 3),
            MidiMessage::PolyPressure {
                channel,
                note,
                pressure,
            } => ([0xA0 | (channel & 0x0F), note & 0x7F, pressure & 0x7F], 3),
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } => ([0xB0 | (channel & 0x0F), controller & 0x7F, value & 0x7F], 3),
            MidiMessage::ProgramChange { channel, program } => ([0xC0 | (channel & 0x0F), program & 0x7F, 0], 2),
            MidiMessage::ChannelPressure { channel, pressure } => {
                ([0xD0 | (channel & 0x0F), pressure & 0x7F, 0], 2)
            }
            MidiMessage::PitchBend { channel, value } => {
                let raw = (value.clamp(-8192, 8191) + 8192) as u16;
                ([0xE0 | (channel & 0x0F), (raw & 0x7F) as u8, (raw >> 7) as u8], 3)
            }
        };
        RawMessage { bytes, len }
    }

    pub fn channel(&self) -> u8 {
        match *self {
            MidiMessage::NoteOn { channel, .. }
            | MidiMessage::NoteOff { channel, .. }
            | MidiMessage::PolyPressure { channel, .. }
            | MidiMessage::ControlChange { channel, .. }
            | MidiMessage::ProgramChange { channel, .. }
            | MidiMessage::ChannelPressure { channel, .. }
            | MidiMessage::PitchBend { channel, .. } => channel,
        }
    }

    /// Same message on another wire channel.
    pub fn with_channel(mut self, new_channel: u8) -> Self {
        let new_channel = new_channel & 0x0F;
        match &mut self {
            MidiMessage::NoteOn { channel, .. }
            | MidiMessage::NoteOff { channel, .. }
            | MidiMessage::PolyPressure { channel, .. }
            | MidiMessage::ControlChange { channel, .. }
            | MidiMessage::ProgramChange { channel, .. }
            | MidiMessage::ChannelPressure { channel, .. }
            | MidiMessage::PitchBend { channel, .. } => *channel = new_channel,
        }
        self
    }
}

/// MIDI output port.
///
/// Only [`send_raw`](MidiOutput::send_raw) and [`port_name`](MidiOutput::port_name)
/// are required. Channels are wire channels (0..=15).
pub trait MidiOutput: Send {
    /// Write one complete message.
    fn send_raw(&mut self, bytes: &[u8]) -> Result<()>;

    /// Get the port name
    fn port_name(&self) -> &str;

    fn send_message(&mut self, message: &MidiMessage) -> Result<()> {
        self.send_raw(message.to_raw().as_slice())
    }

    fn note_on(&mut self, channel: u8, note: u8, velocity: u8) -> Result<()> {
        self.send_message(&MidiMessage::NoteOn {
            channel,
            note,
            velocity,
        })
    }

    fn note_off(&mut self, channel: u8, note: u8) -> Result<()> {
        self.send_message(&MidiMessage::NoteOff {
            channel,
            note,
            velocity: 0,
        })
    }

    fn control_change(&mut self, channel: u8, controller: u8, value: u8) -> Result<()> {
        self.send_message(&MidiMessage::ControlChange {
            channel,
            controller,
            value,
        })
    }

    fn all_notes_off(&mut self, channel: u8) -> Result<()> {
        self.control_change(channel, CC_ALL_NOTES_OFF, 0)
    }
}

impl<T: MidiOutput + ?Sized> MidiOutput for Box<T> {
    fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).send_raw(bytes)
    }

    fn port_name(&self) -> &str {
        (**self).port_name()
    }
}

/// Silence every note on every channel.
///
/// Sends NoteOff and a velocity-0 NoteOn for all 128 notes (some receivers
/// only honor one form), then sustain off, all-notes-off and all-sound-off.
/// Every message is attempted even after a failed send; the first error is
/// returned once the sweep is done.
pub fn panic_all(output: &mut dyn MidiOutput) -> Result<()> {
    let mut failures = 0usize;
    let mut first_error = None;
    let mut check = |result: Result<()>| {
        if let Err(e) = result {
            failures += 1;
            first_error.get_or_insert(e);
        }
    };

    for channel in 0..16u8 {
        for note in 0..128u8 {
            check(output.note_off(channel, note));
            check(output.note_on(channel, note, 0));
        }
        check(output.control_change(channel, CC_SUSTAIN, 0));
        check(output.control_change(channel, CC_ALL_NOTES_OFF, 0));
        check(output.control_change(channel, CC_ALL_SOUND_OFF, 0));
    }

    match first_error {
        Some(e) => {
            log::warn!("[MIDI] Panic on '{}': {} send(s) failed", output.port_name(), failures);
            Err(e)
        }
        None => Ok(()),
    }
}

/// Output that records every message; clones share the same log.
#[derive(Clone, Debug)]
pub struct RecordingOutput {
    name: String,
    sent: Arc<Mutex<Vec<RawMessage>>>,
}

impl RecordingOutput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Copy of everything sent so far.
    pub fn messages(&self) -> Vec<RawMessage> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Everything sent so far, parsed.
    pub fn parsed(&self) -> Vec<MidiMessage> {
        self.messages()
            .iter()
            .filter_map(|m| MidiMessage::from_bytes(m.as_slice()))
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl Default for RecordingOutput {
    fn default() -> Self {
        Self::new("recording")
    }
}

impl MidiOutput for RecordingOutput {
    fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        if let Some(message) = RawMessage::new(bytes) {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(message);
        }
        Ok(())
    }

    fn port_name(&self) -> &str {
        &self.name
    }
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullOutput;

impl MidiOutput for NullOutput {
    fn send_raw(&mut self, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }

    fn port_name(&self) -> &str {
        "null"
    }
}

/// Forwards scheduler output to a [`MidiOutput`].
///
/// Send failures are logged and counted; they never stop dispatch.
pub struct TransportSink<O: MidiOutput> {
    output: O,
    failures: u64,
}

impl<O: MidiOutput> TransportSink<O> {
    pub fn new(output: O) -> Self {
        Self {
            output,
            failures: 0,
        }
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Send one dispatched event. Explainability records are ignored.
    pub fn handle(&mut self, event: &ScheduledEvent) {
        let wire = |channel: u8| channel.saturating_sub(1) & 0x0F;
        let result = match event.kind {
            EventKind::NoteOn {
                channel,
                note,
                velocity,
                ..
            } => self.output.note_on(wire(channel), note, velocity),
            EventKind::NoteOff { channel, note, .. } => self.output.note_off(wire(channel), note),
            EventKind::AllNotesOff { channel } => self.output.all_notes_off(wire(channel)),
            EventKind::ControlChange { channel, cc, value } => {
                self.output.control_change(wire(channel), cc, value)
            }
            EventKind::Explain(_) => return,
        };
        if let Err(e) = result {
            self.failures += 1;
            log::warn!("[SCHED] Send to '{}' failed: {}", self.output.port_name(), e);
        }
    }
}

impl<O: MidiOutput + 'static> TransportSink<O> {
    /// Wrap as a scheduler listener.
    pub fn into_listener(mut self) -> impl FnMut(&ScheduledEvent) + Send + 'static {
        move |event| self.handle(event)
    }
}
