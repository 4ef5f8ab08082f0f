//! Scheduled output events and explainability records.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Identifies one scheduled note instance so stale releases can be told apart
/// from the release of a re-triggered note of the same pitch.
pub type NoteId = u32;

/// A fully resolved instruction, due at an absolute clock time.
#[derive(Clone, Debug, PartialEq)]
pub struct ScheduledEvent {
    /// Absolute due time in performance-clock milliseconds.
    pub due_ms: i64,
    pub kind: EventKind,
}

impl ScheduledEvent {
    pub fn new(due_ms: i64, kind: EventKind) -> Self {
        Self { due_ms, kind }
    }
}

/// What a scheduled event does. Channels are 1-based (1..=16).
#[derive(Clone, Debug, PartialEq)]
pub enum EventKind {
    NoteOn {
        channel: u8,
        note: u8,
        velocity: u8,
        note_id: Option<NoteId>,
    },
    NoteOff {
        channel: u8,
        note: u8,
        note_id: Option<NoteId>,
    },
    AllNotesOff {
        channel: u8,
    },
    ControlChange {
        channel: u8,
        cc: u8,
        value: u8,
    },
    Explain(Box<ExplainRecord>),
}

impl EventKind {
    pub fn channel(&self) -> Option<u8> {
        match self {
            EventKind::NoteOn { channel, .. }
            | EventKind::NoteOff { channel, .. }
            | EventKind::AllNotesOff { channel }
            | EventKind::ControlChange { channel, .. } => Some(*channel),
            EventKind::Explain(_) => None,
        }
    }
}

/// What an explainability record describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplainKind {
    Note,
    Cc,
    Keyswitch,
}

/// Compact per-action record of why something landed where it did.
///
/// Serialized by the caller (the CLI prints it as one JSON line).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExplainRecord {
    pub event_kind: ExplainKind,
    pub agent: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub logic_tag: String,

    /// `"bar.beat@num/denw"`, empty for actions placed at an absolute time.
    pub grid_pos: String,
    pub groove_template: String,
    pub timing_offset_ms: i32,
    pub velocity_adjustment: i32,
    pub humanize_seed: u32,

    pub channel: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc_value: Option<u8>,
    pub on_ms: i64,
    pub off_ms: i64,

    pub tempo_bpm: i32,
    pub ts_num: i32,
    pub ts_den: i32,
    /// Clock time when the record was planned.
    pub engine_now_ms: i64,
}

impl ExplainRecord {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
