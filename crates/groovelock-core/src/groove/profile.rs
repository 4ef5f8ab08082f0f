//! Per-performer timing and velocity shaping parameters.

use serde::{Deserialize, Serialize};

/// Unified groove profile for one performer (agent).
///
/// Loaded from the `[profiles.<agent>]` tables of the config file; every field
/// is optional there and falls back to the defaults below.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentGrooveProfile {
    /// Display name, e.g. "Bass" or "Piano"
    pub instrument: String,

    /// Ahead-of-the-beat bias
    pub push_ms: i32,
    /// Behind-the-beat bias
    pub laid_back_ms: i32,
    /// Per-note timing jitter (triangular, +/-)
    pub micro_jitter_ms: i32,
    /// Extra per-note attack variance (triangular, +/-)
    pub attack_variance_ms: i32,

    /// Bar-level random-walk bound
    pub drift_max_ms: i32,
    /// Random-walk step relative to `drift_max_ms` (0..1)
    pub drift_rate: f64,

    /// Velocity jitter (triangular, +/-)
    pub velocity_jitter: i32,
    /// Multiplier on beat 1
    pub accent_downbeat: f64,
    /// Multiplier on odd beats (2 and 4 in common time)
    pub accent_backbeat: f64,

    pub humanize_seed: u32,

    /// Offset clamp on chord arrivals and strong beats
    pub clamp_ms_structural: i32,
    /// Offset clamp elsewhere
    pub clamp_ms_loose: i32,

    /// Phrase length in bars; values <= 1 disable phrase shaping
    pub phrase_bars: i32,
    pub phrase_timing_max_ms: i32,
    /// Relative velocity swing per phrase (0.10 = up to 10%)
    pub phrase_velocity_max: f64,
}

impl Default for InstrumentGrooveProfile {
    fn default() -> Self {
        Self {
            instrument: String::new(),
            push_ms: 0,
            laid_back_ms: 0,
            micro_jitter_ms: 0,
            attack_variance_ms: 0,
            drift_max_ms: 0,
            drift_rate: 0.0,
            velocity_jitter: 0,
            accent_downbeat: 1.0,
            accent_backbeat: 1.0,
            humanize_seed: 1,
            clamp_ms_structural: 18,
            clamp_ms_loose: 32,
            phrase_bars: 4,
            phrase_timing_max_ms: 6,
            phrase_velocity_max: 0.10,
        }
    }
}

impl InstrumentGrooveProfile {
    /// Default profile labelled with an instrument name.
    pub fn named(instrument: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            ..Self::default()
        }
    }

    /// Seed actually used for the RNG streams (0 is promoted to 1).
    pub fn effective_seed(&self) -> u32 {
        if self.humanize_seed == 0 {
            1
        } else {
            self.humanize_seed
        }
    }

    /// Clamp for a structural or loose note.
    pub fn clamp_ms(&self, structural: bool) -> i32 {
        if structural {
            self.clamp_ms_structural
        } else {
            self.clamp_ms_loose
        }
    }

    /// Copy with every field pulled into a usable range.
    pub fn sanitized(&self) -> Self {
        Self {
            instrument: self.instrument.clone(),
            push_ms: self.push_ms,
            laid_back_ms: self.laid_back_ms,
            micro_jitter_ms: self.micro_jitter_ms.max(0),
            attack_variance_ms: self.attack_variance_ms.max(0),
            drift_max_ms: self.drift_max_ms.max(0),
            drift_rate: self.drift_rate.clamp(0.0, 1.0),
            velocity_jitter: self.velocity_jitter.max(0),
            accent_downbeat: self.accent_downbeat.max(0.0),
            accent_backbeat: self.accent_backbeat.max(0.0),
            humanize_seed: self.humanize_seed,
            clamp_ms_structural: self.clamp_ms_structural.max(0),
            clamp_ms_loose: self.clamp_ms_loose.max(0),
            phrase_bars: self.phrase_bars.max(1),
            phrase_timing_max_ms: self.phrase_timing_max_ms.max(0),
            phrase_velocity_max: self.phrase_velocity_max.clamp(0.0, 0.5),
        }
    }
}
