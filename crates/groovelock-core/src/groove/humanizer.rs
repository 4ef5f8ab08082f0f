//! Deterministic timing humanization with seeded stochastic layers.
//!
//! A [`TimingHumanizer`] is owned per performer and layers, on top of the
//! groove-template offset:
//!
//! - push / laid-back bias
//! - per-note micro jitter and attack variance (center-weighted)
//! - a bar-level drift random walk, bounded by the profile
//! - a per-phrase timing nudge and velocity arc
//!
//! Every millisecond layer shrinks at fast tempos, and the final offset is
//! clamped to a fraction of a sixteenth note so extreme profiles cannot
//! destabilize the feel.

use serde::Serialize;

use super::{InstrumentGrooveProfile, TimingTemplate};
use crate::timing::{effective_bpm, sixteenth_ms, whole_notes_to_ms, GridPos, Rational, TimeSignature};
use crate::util::StableRng;

/// Reference tempo below which ms-denominated humanization is used unscaled.
const TEMPO_SCALE_REFERENCE_BPM: f64 = 90.0;
const TEMPO_SCALE_MIN: f64 = 0.35;
/// Largest total offset as a fraction of a sixteenth note.
const MUSICAL_CLAMP_SIXTEENTH_FRACTION: f64 = 0.22;

const STRUCTURAL_BIAS_SCALE: f64 = 0.40;
const STRUCTURAL_DRIFT_SCALE: f64 = 0.30;

const NOTE_STREAM_SALT: u32 = 0xA5C3_91E5;
const PHRASE_STREAM_SALT: u32 = 0x51ED_BEEF;
const PHRASE_INDEX_MULTIPLIER: u32 = 1_315_423_911;

/// Fully resolved note timing plus explainability fields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HumanizedEvent {
    pub on_ms: i64,
    pub off_ms: i64,
    pub velocity: u8,

    pub groove_template: String,
    pub grid_pos: String,
    pub timing_offset_ms: i32,
    pub velocity_adjustment: i32,
    pub humanize_seed: u32,
}

/// Owned copy of a humanizer's evolving state, for cross-agent reads.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HumanizerSnapshot {
    pub instrument: String,
    pub template_key: String,
    pub current_bar: Option<u32>,
    pub current_phrase: Option<u32>,
    pub drift_ms: i32,
    pub phrase_offset_ms: i32,
    pub phrase_velocity_multiplier: f64,
}

/// Per-performer humanization state machine.
///
/// State only moves forward: calls must arrive in non-decreasing bar order.
/// A call for an earlier bar is humanized against the current state without
/// rewinding it.
#[derive(Clone, Debug)]
pub struct TimingHumanizer {
    profile: InstrumentGrooveProfile,
    template: TimingTemplate,
    rng: StableRng,
    current_bar: Option<u32>,
    current_phrase: Option<u32>,
    drift_ms: i32,
    phrase_offset_ms: i32,
    phrase_velocity_multiplier: f64,
}

impl Default for TimingHumanizer {
    fn default() -> Self {
        Self::new(InstrumentGrooveProfile::default())
    }
}

impl TimingHumanizer {
    pub fn new(profile: InstrumentGrooveProfile) -> Self {
        let mut humanizer = Self {
            profile: InstrumentGrooveProfile::default(),
            template: TimingTemplate::default(),
            rng: StableRng::default(),
            current_bar: None,
            current_phrase: None,
            drift_ms: 0,
            phrase_offset_ms: 0,
            phrase_velocity_multiplier: 1.0,
        };
        humanizer.set_profile(profile);
        humanizer
    }

    /// Replace the profile; this also resets all state and reseeds.
    pub fn set_profile(&mut self, profile: InstrumentGrooveProfile) {
        self.profile = profile.sanitized();
        self.reset();
    }

    pub fn profile(&self) -> &InstrumentGrooveProfile {
        &self.profile
    }

    pub fn set_template(&mut self, template: TimingTemplate) {
        self.template = template;
    }

    pub fn template(&self) -> &TimingTemplate {
        &self.template
    }

    /// Clear drift and phrase state and reseed from the profile seed.
    pub fn reset(&mut self) {
        self.rng
            .seed((self.profile.effective_seed() ^ NOTE_STREAM_SALT) as u64);
        self.current_bar = None;
        self.current_phrase = None;
        self.drift_ms = 0;
        self.phrase_offset_ms = 0;
        self.phrase_velocity_multiplier = 1.0;
    }

    pub fn snapshot(&self) -> HumanizerSnapshot {
        HumanizerSnapshot {
            instrument: self.profile.instrument.clone(),
            template_key: self.template.key().to_string(),
            current_bar: self.current_bar,
            current_phrase: self.current_phrase,
            drift_ms: self.drift_ms,
            phrase_offset_ms: self.phrase_offset_ms,
            phrase_velocity_multiplier: self.phrase_velocity_multiplier,
        }
    }

    /// Humanize one note.
    ///
    /// `structural` marks chord arrivals and strong beats, which are pulled
    /// toward the grid. Inputs are clamped; this never fails.
    pub fn humanize_note(
        &mut self,
        start: &GridPos,
        ts: TimeSignature,
        bpm: i32,
        base_velocity: i32,
        duration: Rational,
        structural: bool,
    ) -> HumanizedEvent {
        self.advance_to_bar(start.bar_index);

        let bpm = effective_bpm(bpm);
        let ts = ts.sanitized();
        let base_velocity = base_velocity.clamp(1, 127);
        let tempo_scale = (TEMPO_SCALE_REFERENCE_BPM / bpm as f64).clamp(TEMPO_SCALE_MIN, 1.0);

        let base_on = start.to_ms(ts, bpm);
        let base_off = base_on + whole_notes_to_ms(duration, bpm).max(1);

        let feel_ms = self.template.offset_ms_for(start, ts, bpm);

        let profile = &self.profile;
        let mut jitter = scale(self.rng.triangular(profile.micro_jitter_ms), tempo_scale);
        let mut attack_variance = scale(self.rng.triangular(profile.attack_variance_ms), tempo_scale);
        let mut push = scale(profile.push_ms, tempo_scale);
        let mut laid_back = scale(profile.laid_back_ms, tempo_scale);
        let mut drift = scale(self.drift_ms, tempo_scale);

        if structural {
            jitter = 0;
            attack_variance = 0;
            push = scale(push, STRUCTURAL_BIAS_SCALE);
            laid_back = scale(laid_back, STRUCTURAL_BIAS_SCALE);
            drift = scale(drift, STRUCTURAL_DRIFT_SCALE);
        }

        // Phrase arc: peaks mid-phrase, relaxes toward the phrase edges.
        let mut phrase_offset = self.phrase_offset_ms;
        let mut phrase_velocity = self.phrase_velocity_multiplier;
        if profile.phrase_bars > 1 {
            let phrase_bars = profile.phrase_bars as u32;
            let pos_in_phrase = start.bar_index % phrase_bars;
            let t = pos_in_phrase as f64 / (phrase_bars - 1) as f64;
            let arc = 1.0 - (2.0 * t - 1.0).abs();
            phrase_velocity *= 1.0 + (arc - 0.5) * profile.phrase_velocity_max * 0.40;
            phrase_offset += ((arc - 0.5) * profile.phrase_timing_max_ms as f64 * 0.30).round() as i32;
        }
        let phrase_offset = scale(phrase_offset, tempo_scale);

        let musical_clamp = (MUSICAL_CLAMP_SIXTEENTH_FRACTION * sixteenth_ms(bpm)).round() as i32;
        let clamp_ms = profile.clamp_ms(structural).min(musical_clamp).max(0);
        let total_offset = (feel_ms + laid_back - push + drift + phrase_offset + jitter + attack_variance)
            .clamp(-clamp_ms, clamp_ms);

        // Accents only at the exact start of a beat, so subdivisions are not double-accented.
        let (beat_in_bar, within_beat) = start.split_within_bar(ts);
        let mut velocity_multiplier = 1.0;
        if within_beat.is_zero() && beat_in_bar == 0 {
            velocity_multiplier *= profile.accent_downbeat;
        }
        if within_beat.is_zero() && beat_in_bar % 2 == 1 {
            velocity_multiplier *= profile.accent_backbeat;
        }
        velocity_multiplier *= phrase_velocity;

        let mut velocity_jitter = self.rng.triangular(self.profile.velocity_jitter);
        if structural {
            velocity_jitter = 0;
        }
        let velocity = ((base_velocity as f64 * velocity_multiplier).round() as i32 + velocity_jitter)
            .clamp(1, 127);

        HumanizedEvent {
            on_ms: base_on + total_offset as i64,
            off_ms: base_off + total_offset as i64,
            velocity: velocity as u8,
            groove_template: self.template.key().to_string(),
            grid_pos: start.describe(ts),
            timing_offset_ms: total_offset,
            velocity_adjustment: velocity - base_velocity,
            humanize_seed: self.profile.effective_seed(),
        }
    }

    fn advance_to_bar(&mut self, bar_index: u32) {
        let phrase_bars = self.profile.phrase_bars.max(1) as u32;
        let Some(current) = self.current_bar else {
            self.current_bar = Some(bar_index);
            self.drift_ms = 0;
            self.enter_phrase(bar_index / phrase_bars);
            return;
        };

        for bar in current.saturating_add(1)..=bar_index {
            let phrase = bar / phrase_bars;
            if self.current_phrase != Some(phrase) {
                self.enter_phrase(phrase);
            }
            self.step_drift();
        }
        if bar_index > current {
            self.current_bar = Some(bar_index);
        }
    }

    /// Draw phrase parameters from a phrase-indexed stream, independent of
    /// how many notes land in the phrase.
    fn enter_phrase(&mut self, phrase_index: u32) {
        self.current_phrase = Some(phrase_index);
        let seed = self.profile.effective_seed()
            ^ PHRASE_STREAM_SALT
            ^ phrase_index.wrapping_mul(PHRASE_INDEX_MULTIPLIER);
        let mut phrase_rng = StableRng::new(seed as u64);

        let max_ms = self.profile.phrase_timing_max_ms.max(0);
        self.phrase_offset_ms = phrase_rng.triangular(max_ms).clamp(-max_ms, max_ms);

        let velocity_max = self.profile.phrase_velocity_max.clamp(0.0, 0.5);
        let u = phrase_rng.next_f64();
        self.phrase_velocity_multiplier = (1.0 + (u * 2.0 - 1.0) * velocity_max).clamp(0.5, 1.5);
    }

    fn step_drift(&mut self) {
        let max = self.profile.drift_max_ms;
        if max <= 0 || self.profile.drift_rate <= 0.0 {
            self.drift_ms = 0;
            return;
        }
        let step = ((max as f64 * self.profile.drift_rate).round() as i32).max(1);
        self.drift_ms = (self.drift_ms + self.rng.triangular(step)).clamp(-max, max);
    }
}

fn scale(ms: i32, factor: f64) -> i32 {
    (ms as f64 * factor).round() as i32
}
