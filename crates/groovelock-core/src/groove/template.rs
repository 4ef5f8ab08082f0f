//! Groove templates: named offset maps over canonical within-beat positions.

use crate::timing::{GridPos, Rational, TimeSignature};

/// How an offset-map value is expressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OffsetUnit {
    /// Milliseconds, tempo-independent.
    Ms,
    /// Fraction of the current beat duration, tempo-scaled.
    BeatFraction,
}

/// Subdivision grid a template is designed for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GrooveGridKind {
    /// No systematic offsets
    Straight,
    /// Swung upbeat eighth
    Swing8,
    /// Triplet feel (1/3 grid)
    Triplet8,
    /// 12/8 shuffle
    Shuffle12_8,
    /// Straight sixteenths
    Straight16,
}

/// One tabulated point of an offset map.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OffsetPoint {
    /// Position inside the beat as a normalized fraction (1/2 = upbeat eighth).
    pub within_beat: Rational,
    pub unit: OffsetUnit,
    /// Milliseconds or beat fraction, depending on `unit`.
    pub value: f64,
}

/// A reusable, deterministic offset map.
///
/// Immutable once built; share it behind an `Arc` when several humanizers
/// follow the same template.
#[derive(Clone, Debug, PartialEq)]
pub struct GrooveTemplate {
    key: String,
    name: String,
    category: String,
    grid_kind: GrooveGridKind,
    amount: f64,
    offset_map: Vec<OffsetPoint>,
}

impl GrooveTemplate {
    /// Start a template with an empty offset map.
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        category: impl Into<String>,
        grid_kind: GrooveGridKind,
        amount: f64,
    ) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            category: category.into(),
            grid_kind,
            amount: amount.clamp(0.0, 1.0),
            offset_map: Vec::new(),
        }
    }

    /// Append an offset point.
    pub fn with_offset(mut self, within_beat: Rational, unit: OffsetUnit, value: f64) -> Self {
        self.offset_map.push(OffsetPoint {
            within_beat,
            unit,
            value,
        });
        self
    }

    /// Copy of this template with a different amount.
    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = amount.clamp(0.0, 1.0);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn grid_kind(&self) -> GrooveGridKind {
        self.grid_kind
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn offset_map(&self) -> &[OffsetPoint] {
        &self.offset_map
    }

    /// Template-only timing offset in ms for a grid position.
    ///
    /// The within-beat offset must coincide exactly with a tabulated point;
    /// there is no tolerance, so only canonical subdivisions are moved.
    /// Per-instrument push, jitter and drift are not included.
    pub fn offset_ms_for(&self, pos: &GridPos, ts: TimeSignature, bpm: i32) -> i32 {
        if self.amount <= 0.0 {
            return 0;
        }
        let within_beat = pos.within_beat_fraction(ts);
        self.offset_map
            .iter()
            .find(|p| p.within_beat == within_beat)
            .map(|p| {
                let ms = match p.unit {
                    OffsetUnit::Ms => p.value,
                    OffsetUnit::BeatFraction => p.value * ts.beat_ms(bpm),
                };
                (ms * self.amount).round() as i32
            })
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn swing_2to1(amount: f64) -> GrooveTemplate {
        GrooveTemplate::new("swing", "Swing", "Test", GrooveGridKind::Swing8, amount).with_offset(
            Rational::new(1, 2),
            OffsetUnit::BeatFraction,
            1.0 / 6.0,
        )
    }

    #[test]
    fn test_swing_delays_upbeat_eighth() {
        let ts = TimeSignature::default();
        let t = swing_2to1(1.0);
        let upbeat = GridPos::from_bar_beat_tuplet(0, 0, 1, 2, ts);
        assert_eq!(t.offset_ms_for(&upbeat, ts, 120), 83);
        let downbeat = GridPos::from_bar_beat_tuplet(0, 0, 0, 2, ts);
        assert_eq!(t.offset_ms_for(&downbeat, ts, 120), 0);
    }

    #[test]
    fn test_lookup_is_exact_only() {
        let ts = TimeSignature::default();
        let t = swing_2to1(1.0);
        // 1/2 of a beat plus a 1/96 nudge is not a tabulated point.
        let near = GridPos::new(0, Rational::new(1, 8) + Rational::new(1, 384));
        assert_eq!(t.offset_ms_for(&near, ts, 120), 0);
        // Sixteenth-note 2/4 of the beat normalizes to exactly 1/2.
        let sixteenth = GridPos::from_bar_beat_tuplet(3, 2, 2, 4, ts);
        assert_eq!(t.offset_ms_for(&sixteenth, ts, 120), 83);
    }

    #[test]
    fn test_amount_scaling_and_short_circuit() {
        let ts = TimeSignature::default();
        let upbeat = GridPos::from_bar_beat_tuplet(0, 1, 1, 2, ts);
        assert_eq!(swing_2to1(0.0).offset_ms_for(&upbeat, ts, 120), 0);
        assert_eq!(swing_2to1(0.5).offset_ms_for(&upbeat, ts, 120), 42);

        let pocket = GrooveTemplate::new("p", "Pocket", "Test", GrooveGridKind::Straight, 0.5)
            .with_offset(Rational::ZERO, OffsetUnit::Ms, 14.0);
        let beat = GridPos::from_bar_beat_tuplet(0, 3, 0, 1, ts);
        assert_eq!(pocket.offset_ms_for(&beat, ts, 200), 7);
    }

    #[test]
    fn test_beat_fraction_follows_beat_unit() {
        let ts = TimeSignature::new(6, 8);
        let t = swing_2to1(1.0);
        let upbeat = GridPos::from_bar_beat_tuplet(0, 0, 1, 2, ts);
        // Eighth-note beat at 120 BPM lasts 250ms.
        assert_eq!(t.offset_ms_for(&upbeat, ts, 120), 42);
    }

    #[test]
    fn test_lookup_is_pure() {
        let ts = TimeSignature::default();
        let t = swing_2to1(0.8);
        let pos = GridPos::from_bar_beat_tuplet(5, 2, 1, 2, ts);
        let first = t.offset_ms_for(&pos, ts, 137);
        assert!((0..50).all(|_| t.offset_ms_for(&pos, ts, 137) == first));
    }
}
