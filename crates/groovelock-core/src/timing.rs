//! Exact musical-time primitives.
//!
//! This module provides the fundamental timing types used by the humanizer
//! and the engine:
//!
//! - [`Rational`] - Normalized fraction for exact tuplet/subdivision math
//! - [`TimeSignature`] - Musical time signature (e.g., 4/4, 3/4, 6/8)
//! - [`GridPos`] - A bar index plus an exact offset into the bar
//!
//! Positions are measured in whole-note units. Conversions to milliseconds
//! happen at the very end so triplets and quintuplets never accumulate
//! floating-point drift across long pieces.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Tempo used whenever a caller passes a non-positive BPM.
pub const FALLBACK_BPM: i32 = 120;

/// Exact fraction, always in lowest terms with a positive denominator.
///
/// A zero denominator is repaired to 1 on construction, so a `Rational` is
/// always well formed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Rational {
    num: i64,
    den: i64,
}

impl Rational {
    /// Zero whole notes.
    pub const ZERO: Rational = Rational { num: 0, den: 1 };

    /// Create a normalized fraction `num/den`.
    pub fn new(num: i64, den: i64) -> Self {
        let (mut num, mut den) = (num, den);
        if den == 0 {
            den = 1;
        }
        if den < 0 {
            num = num.checked_neg().unwrap_or(i64::MAX);
            den = den.checked_neg().unwrap_or(i64::MAX);
        }
        let g = gcd(num.unsigned_abs(), den.unsigned_abs()).max(1) as i64;
        Self {
            num: num / g,
            den: den / g,
        }
    }

    /// Create an integral value.
    pub fn from_integer(value: i64) -> Self {
        Self { num: value, den: 1 }
    }

    /// Numerator (sign-carrying).
    pub fn num(self) -> i64 {
        self.num
    }

    /// Denominator (always positive).
    pub fn den(self) -> i64 {
        self.den
    }

    pub fn is_zero(self) -> bool {
        self.num == 0
    }

    /// Lossy conversion for the final millisecond step.
    pub fn to_f64(self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Integer floor of this fraction.
    pub fn floor(self) -> i64 {
        self.num.div_euclid(self.den)
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::ZERO
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Reduce a wide intermediate. Results outside the `i64` range saturate.
fn from_wide(num: i128, den: i128) -> Rational {
    if den == 0 {
        return Rational::ZERO;
    }
    let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };
    let g = {
        let (mut a, mut b) = (num.unsigned_abs(), den.unsigned_abs());
        while b != 0 {
            let t = a % b;
            a = b;
            b = t;
        }
        a.max(1) as i128
    };
    Rational::new(saturate(num / g), saturate(den / g))
}

fn saturate(v: i128) -> i64 {
    v.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

impl std::ops::Add for Rational {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        from_wide(
            self.num as i128 * rhs.den as i128 + rhs.num as i128 * self.den as i128,
            self.den as i128 * rhs.den as i128,
        )
    }
}

impl std::ops::Sub for Rational {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        from_wide(
            self.num as i128 * rhs.den as i128 - rhs.num as i128 * self.den as i128,
            self.den as i128 * rhs.den as i128,
        )
    }
}

impl std::ops::Mul<i64> for Rational {
    type Output = Self;

    fn mul(self, k: i64) -> Self::Output {
        from_wide(self.num as i128 * k as i128, self.den as i128)
    }
}

impl std::ops::Div<i64> for Rational {
    type Output = Self;

    /// Dividing by zero yields zero rather than panicking.
    fn div(self, k: i64) -> Self::Output {
        if k == 0 {
            return Rational::ZERO;
        }
        from_wide(self.num as i128, self.den as i128 * k as i128)
    }
}

impl Ord for Rational {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.num as i128 * other.den as i128).cmp(&(other.num as i128 * self.den as i128))
    }
}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Musical time signature (numerator/denominator).
///
/// The denominator is the beat unit (4 = quarter note, 8 = eighth note) and is
/// assumed to be a power of two.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub num: i32,
    pub den: i32,
}

impl TimeSignature {
    /// Create a new time signature.
    ///
    /// Non-positive values are repaired to 4.
    pub fn new(num: i32, den: i32) -> Self {
        Self {
            num: if num <= 0 { 4 } else { num },
            den: if den <= 0 { 4 } else { den },
        }
    }

    /// Return a copy with any invalid field repaired.
    pub fn sanitized(self) -> Self {
        Self::new(self.num, self.den)
    }

    /// Length of one bar in whole notes (`num/den`).
    pub fn bar_duration(&self) -> Rational {
        let ts = self.sanitized();
        Rational::new(ts.num as i64, ts.den as i64)
    }

    /// Length of one beat in whole notes (`1/den`).
    pub fn beat_duration(&self) -> Rational {
        Rational::new(1, self.sanitized().den as i64)
    }

    /// Length of one beat in milliseconds at the given quarter-note tempo.
    pub fn beat_ms(&self, bpm: i32) -> f64 {
        let quarter_ms = 60_000.0 / effective_bpm(bpm) as f64;
        quarter_ms * (4.0 / self.sanitized().den as f64)
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::new(4, 4)
    }
}

/// Tempo with the non-positive fallback applied.
pub fn effective_bpm(bpm: i32) -> i32 {
    if bpm <= 0 {
        FALLBACK_BPM
    } else {
        bpm
    }
}

/// Milliseconds in one whole note (`240000 / bpm`).
pub fn whole_note_ms(bpm: i32) -> f64 {
    240_000.0 / effective_bpm(bpm) as f64
}

/// Milliseconds in one sixteenth note.
pub fn sixteenth_ms(bpm: i32) -> f64 {
    whole_note_ms(bpm) / 16.0
}

/// Convert a whole-note duration to rounded milliseconds.
pub fn whole_notes_to_ms(whole_notes: Rational, bpm: i32) -> i64 {
    (whole_notes.to_f64() * whole_note_ms(bpm)).round() as i64
}

/// Position inside a chart in musical units.
///
/// `within_bar` is the offset from the bar start in whole notes and is
/// expected to lie in `[0, bar_duration)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct GridPos {
    pub bar_index: u32,
    pub within_bar: Rational,
}

impl GridPos {
    pub fn new(bar_index: u32, within_bar: Rational) -> Self {
        Self {
            bar_index,
            within_bar,
        }
    }

    /// Position at a bar, a beat, and an N-tuplet subdivision of that beat.
    ///
    /// `sub_index` is clamped into `[0, sub_count)`; a non-positive
    /// `sub_count` means "no subdivision". Negative bars and beats clamp to 0.
    ///
    /// ```
    /// use groovelock_core::timing::{GridPos, Rational, TimeSignature};
    /// let ts = TimeSignature::new(4, 4);
    /// // Last eighth-note triplet of beat 2.
    /// let pos = GridPos::from_bar_beat_tuplet(0, 1, 2, 3, ts);
    /// assert_eq!(pos.within_bar, Rational::new(1, 4) + Rational::new(1, 6));
    /// ```
    pub fn from_bar_beat_tuplet(
        bar: i32,
        beat: i32,
        sub_index: i32,
        sub_count: i32,
        ts: TimeSignature,
    ) -> Self {
        let sub_count = sub_count.max(1);
        let sub_index = sub_index.clamp(0, sub_count - 1);
        let beat_len = ts.beat_duration();
        let within_beat = beat_len / sub_count as i64 * sub_index as i64;
        Self {
            bar_index: bar.max(0) as u32,
            within_bar: beat_len * beat.max(0) as i64 + within_beat,
        }
    }

    /// Absolute offset from the chart start in whole notes.
    pub fn to_absolute_whole_notes(&self, ts: TimeSignature) -> Rational {
        ts.bar_duration() * self.bar_index as i64 + self.within_bar
    }

    /// Absolute offset from the chart start in rounded milliseconds.
    pub fn to_ms(&self, ts: TimeSignature, bpm: i32) -> i64 {
        whole_notes_to_ms(self.to_absolute_whole_notes(ts), bpm)
    }

    /// Split the in-bar offset into `(beat_in_bar, within_beat_whole)`.
    ///
    /// Uses integer floor division on the fraction, so tuplet offsets stay exact.
    pub fn split_within_bar(&self, ts: TimeSignature) -> (u32, Rational) {
        let beat_len = ts.beat_duration();
        let scaled = self.within_bar.num() as i128 * beat_len.den() as i128;
        let divisor = self.within_bar.den() as i128 * beat_len.num() as i128;
        let beat = if divisor == 0 {
            0
        } else {
            scaled.div_euclid(divisor).max(0)
        };
        let beat = beat.min(u32::MAX as i128) as u32;
        (beat, self.within_bar - beat_len * beat as i64)
    }

    /// Offset inside the current beat as a fraction of one beat (0..1).
    pub fn within_beat_fraction(&self, ts: TimeSignature) -> Rational {
        let (_, within_beat) = self.split_within_bar(ts);
        let beat_len = ts.beat_duration();
        Rational::new(
            within_beat.num() * beat_len.den(),
            within_beat.den() * beat_len.num(),
        )
    }

    /// Human-readable position `"bar.beat@num/denw"` (bar and beat 1-based).
    pub fn describe(&self, ts: TimeSignature) -> String {
        let (beat, within_beat) = self.split_within_bar(ts);
        format!(
            "{}.{}@{}/{}w",
            self.bar_index as u64 + 1,
            beat as u64 + 1,
            within_beat.num(),
            within_beat.den()
        )
    }
}
