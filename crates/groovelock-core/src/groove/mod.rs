//! Groove vocabulary and per-performer humanization.

mod feel;
mod humanizer;
mod profile;
mod registry;
mod template;

use std::sync::Arc;

pub use feel::{FeelKind, FeelTemplate};
pub use humanizer::{HumanizedEvent, HumanizerSnapshot, TimingHumanizer};
pub use profile::InstrumentGrooveProfile;
pub use registry::{GrooveRegistry, StylePreset};
pub use template::{GrooveGridKind, GrooveTemplate, OffsetPoint, OffsetUnit};

use crate::timing::{GridPos, TimeSignature};

/// The template a humanizer follows: a parametric feel or a tabulated groove.
#[derive(Clone, Debug, PartialEq)]
pub enum TimingTemplate {
    Feel(FeelTemplate),
    Groove(Arc<GrooveTemplate>),
}

impl Default for TimingTemplate {
    fn default() -> Self {
        TimingTemplate::Feel(FeelTemplate::straight())
    }
}

impl TimingTemplate {
    pub fn key(&self) -> &str {
        match self {
            TimingTemplate::Feel(feel) => &feel.key,
            TimingTemplate::Groove(groove) => groove.key(),
        }
    }

    pub fn offset_ms_for(&self, pos: &GridPos, ts: TimeSignature, bpm: i32) -> i32 {
        match self {
            TimingTemplate::Feel(feel) => feel.offset_ms_for(pos, ts, bpm),
            TimingTemplate::Groove(groove) => groove.offset_ms_for(pos, ts, bpm),
        }
    }
}

impl From<FeelTemplate> for TimingTemplate {
    fn from(feel: FeelTemplate) -> Self {
        TimingTemplate::Feel(feel)
    }
}

impl From<Arc<GrooveTemplate>> for TimingTemplate {
    fn from(groove: Arc<GrooveTemplate>) -> Self {
        TimingTemplate::Groove(groove)
    }
}
