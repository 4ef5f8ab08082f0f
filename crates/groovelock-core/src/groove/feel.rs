//! Minimal parametric feel templates (swing ratios and pocket).

use crate::timing::{GridPos, Rational, TimeSignature};

/// Built-in feel families.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeelKind {
    Straight,
    Swing2to1,
    Swing3to1,
    LaidBackPocket,
}

/// A parametric alternative to a tabulated [`GrooveTemplate`](super::GrooveTemplate).
#[derive(Clone, Debug, PartialEq)]
pub struct FeelTemplate {
    pub key: String,
    pub name: String,
    pub kind: FeelKind,
    /// 0..1 scaling; 0 disables the template.
    pub amount: f64,
    /// Pocket templates only: ms added on weak beats (positive = laid back).
    pub pocket_ms: i32,
}

impl Default for FeelTemplate {
    fn default() -> Self {
        Self::straight()
    }
}

impl FeelTemplate {
    pub fn straight() -> Self {
        Self {
            key: "straight".to_string(),
            name: "Straight".to_string(),
            kind: FeelKind::Straight,
            amount: 1.0,
            pocket_ms: 0,
        }
    }

    pub fn swing_2to1(amount: f64) -> Self {
        Self {
            key: "swing_2to1".to_string(),
            name: "Swing (2:1)".to_string(),
            kind: FeelKind::Swing2to1,
            amount,
            pocket_ms: 0,
        }
    }

    pub fn swing_3to1(amount: f64) -> Self {
        Self {
            key: "swing_3to1".to_string(),
            name: "Swing (3:1)".to_string(),
            kind: FeelKind::Swing3to1,
            amount,
            pocket_ms: 0,
        }
    }

    pub fn laid_back_pocket(pocket_ms: i32, amount: f64) -> Self {
        Self {
            key: "laid_back_pocket".to_string(),
            name: "Laid-back pocket".to_string(),
            kind: FeelKind::LaidBackPocket,
            amount,
            pocket_ms,
        }
    }

    /// Template-only timing offset in ms.
    pub fn offset_ms_for(&self, pos: &GridPos, ts: TimeSignature, bpm: i32) -> i32 {
        if self.amount <= 0.0 {
            return 0;
        }
        let (beat_in_bar, _) = pos.split_within_bar(ts);
        let on_upbeat = pos.within_beat_fraction(ts) == Rational::new(1, 2);

        match self.kind {
            FeelKind::Straight => 0,
            FeelKind::Swing2to1 | FeelKind::Swing3to1 => {
                if !on_upbeat {
                    return 0;
                }
                let ratio = if self.kind == FeelKind::Swing3to1 { 3.0 } else { 2.0 };
                let delta = ratio / (ratio + 1.0) - 0.5;
                (delta * ts.beat_ms(bpm) * self.amount).round() as i32
            }
            FeelKind::LaidBackPocket => {
                let mut ms = 0;
                if beat_in_bar % 2 == 1 {
                    ms += self.pocket_ms;
                }
                if on_upbeat {
                    ms += (0.5 * self.pocket_ms as f64).round() as i32;
                }
                (ms as f64 * self.amount).round() as i32
            }
        }
    }
}
