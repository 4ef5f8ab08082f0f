//! Built-in groove vocabulary: feels, groove templates, and style presets.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{FeelTemplate, GrooveGridKind, GrooveTemplate, InstrumentGrooveProfile, OffsetUnit, TimingTemplate};
use crate::timing::{Rational, TimeSignature};
use crate::util::StableHash;

/// A named style: groove template plus per-agent profiles and defaults.
#[derive(Clone, Debug, PartialEq)]
pub struct StylePreset {
    pub key: String,
    pub name: String,
    pub groove_template_key: String,
    pub template_amount: f64,
    pub default_bpm: i32,
    pub default_time_signature: TimeSignature,
    /// Agent name -> profile
    pub profiles: BTreeMap<String, InstrumentGrooveProfile>,
}

/// Key-addressed registry with stable enumeration order.
#[derive(Clone, Debug, Default)]
pub struct GrooveRegistry {
    feels: Vec<FeelTemplate>,
    templates: Vec<Arc<GrooveTemplate>>,
    presets: Vec<StylePreset>,
}

impl GrooveRegistry {
    /// The built-in vocabulary.
    pub fn builtins() -> Self {
        let mut registry = Self::default();

        registry.feels = vec![
            FeelTemplate::straight(),
            FeelTemplate::swing_2to1(0.80),
            FeelTemplate::swing_3to1(0.80),
            FeelTemplate::laid_back_pocket(18, 1.0),
        ];

        for template in builtin_templates() {
            registry.add_template(template);
        }
        for preset in builtin_presets() {
            registry.add_preset(preset);
        }
        registry
    }

    /// Add or replace a groove template, keeping its original position on replace.
    pub fn add_template(&mut self, template: GrooveTemplate) {
        let template = Arc::new(template);
        match self.templates.iter_mut().find(|t| t.key() == template.key()) {
            Some(slot) => *slot = template,
            None => self.templates.push(template),
        }
    }

    /// Add or replace a style preset.
    pub fn add_preset(&mut self, preset: StylePreset) {
        match self.presets.iter_mut().find(|p| p.key == preset.key) {
            Some(slot) => *slot = preset,
            None => self.presets.push(preset),
        }
    }

    pub fn feel(&self, key: &str) -> Option<&FeelTemplate> {
        self.feels.iter().find(|f| f.key == key)
    }

    pub fn feels(&self) -> &[FeelTemplate] {
        &self.feels
    }

    pub fn groove_template(&self, key: &str) -> Option<Arc<GrooveTemplate>> {
        self.templates.iter().find(|t| t.key() == key).cloned()
    }

    pub fn groove_templates(&self) -> &[Arc<GrooveTemplate>] {
        &self.templates
    }

    pub fn style_preset(&self, key: &str) -> Option<&StylePreset> {
        self.presets.iter().find(|p| p.key == key)
    }

    pub fn style_presets(&self) -> &[StylePreset] {
        &self.presets
    }

    /// Resolve a key against groove templates first, then feels.
    pub fn timing_template(&self, key: &str) -> Option<TimingTemplate> {
        if let Some(template) = self.groove_template(key) {
            return Some(TimingTemplate::Groove(template));
        }
        self.feel(key).cloned().map(TimingTemplate::Feel)
    }
}

fn swing(key: &str, name: &str, category: &str, grid_kind: GrooveGridKind, amount: f64, upbeat_fraction: f64) -> GrooveTemplate {
    GrooveTemplate::new(key, name, category, grid_kind, amount).with_offset(
        Rational::new(1, 2),
        OffsetUnit::BeatFraction,
        upbeat_fraction,
    )
}

fn pocket(key: &str, name: &str, category: &str, grid_kind: GrooveGridKind, points: &[(Rational, f64)]) -> GrooveTemplate {
    points.iter().fold(
        GrooveTemplate::new(key, name, category, grid_kind, 1.0),
        |t, &(at, ms)| t.with_offset(at, OffsetUnit::Ms, ms),
    )
}

fn builtin_templates() -> Vec<GrooveTemplate> {
    use GrooveGridKind::*;
    let beat = Rational::ZERO;
    let half = Rational::new(1, 2);
    let third = Rational::new(1, 3);
    let two_thirds = Rational::new(2, 3);

    vec![
        swing("jazz_swing_2to1", "Jazz Swing (2:1)", "Jazz/Swing", Swing8, 0.80, 1.0 / 6.0),
        swing("jazz_swing_3to1", "Jazz Swing (3:1)", "Jazz/Swing", Swing8, 0.75, 1.0 / 4.0),
        swing("jazz_swing_light", "Jazz Swing (light)", "Jazz/Swing", Swing8, 0.55, 1.0 / 6.0),
        swing("jazz_swing_heavy", "Jazz Swing (heavy)", "Jazz/Swing", Swing8, 0.95, 1.0 / 6.0),
        swing("jazz_ballad_laidback", "Jazz Ballad (Laid back)", "Jazz/Ballad", Swing8, 1.0, 1.0 / 7.0)
            .with_offset(two_thirds, OffsetUnit::BeatFraction, 1.0 / 18.0),
        pocket(
            "jazz_ballad_pocket_light",
            "Ballad pocket (light)",
            "Jazz/Ballad",
            Straight,
            &[(beat, 10.0), (half, 14.0)],
        ),
        pocket(
            "jazz_ballad_pocket_medium",
            "Ballad pocket (medium)",
            "Jazz/Ballad",
            Straight,
            &[(beat, 18.0), (half, 26.0)],
        ),
        pocket(
            "jazz_ballad_pocket_deep",
            "Ballad pocket (deep)",
            "Jazz/Ballad",
            Straight,
            &[(beat, 28.0), (half, 40.0)],
        ),
        swing("jazz_ballad_swing_soft", "Ballad swing (soft)", "Jazz/Ballad", Swing8, 0.55, 1.0 / 6.0)
            .with_offset(two_thirds, OffsetUnit::Ms, 6.0),
        swing("jazz_ballad_swing_deep", "Ballad swing (deep)", "Jazz/Ballad", Swing8, 0.85, 1.0 / 6.0)
            .with_offset(two_thirds, OffsetUnit::Ms, 10.0),
        pocket(
            "jazz_ballad_triplet_drag",
            "Ballad triplet drag",
            "Jazz/Ballad",
            Triplet8,
            &[(third, 4.0), (two_thirds, 12.0)],
        ),
        pocket(
            "jazz_ballad_brushes_chet",
            "Brushes Ballad (Chet)",
            "Jazz/Ballad/Brushes",
            Swing8,
            &[(beat, 22.0), (half, 30.0), (two_thirds, 10.0)],
        ),
        pocket(
            "jazz_ballad_brushes_evans",
            "Brushes Ballad (Evans)",
            "Jazz/Ballad/Brushes",
            Swing8,
            &[(beat, 16.0), (half, 22.0), (two_thirds, 8.0)],
        ),
        pocket("jazz_ecm_straight8", "ECM Straight 8 (soft pocket)", "Jazz/ECM", Straight, &[(half, 8.0)]),
        pocket(
            "jazz_elvin_triplet_roll",
            "Elvin Triplet Roll (hint)",
            "Jazz/Triplet",
            Triplet8,
            &[(third, -6.0), (two_thirds, 6.0)],
        ),
        pocket(
            "jazz_triplet_tight",
            "Triplet feel (tight)",
            "Jazz/Triplet",
            Triplet8,
            &[(third, -3.0), (two_thirds, 3.0)],
        )
        .with_amount(0.65),
        swing("jazz_shuffle_12_8", "Shuffle (12/8)", "Jazz/Shuffle", Shuffle12_8, 1.0, 1.0 / 6.0)
            .with_offset(two_thirds, OffsetUnit::Ms, 4.0),
        swing("jazz_waltz_swing_2to1", "Jazz Waltz Swing (2:1)", "Jazz/Waltz", Swing8, 0.75, 1.0 / 6.0),
    ]
}

#[allow(clippy::too_many_arguments)]
fn performer(
    instrument: &str,
    laid_back_ms: i32,
    micro_jitter_ms: i32,
    attack_variance_ms: i32,
    drift_max_ms: i32,
    drift_rate: f64,
    velocity_jitter: i32,
    (accent_downbeat, accent_backbeat): (f64, f64),
) -> (String, InstrumentGrooveProfile) {
    let profile = InstrumentGrooveProfile {
        laid_back_ms,
        micro_jitter_ms,
        attack_variance_ms,
        drift_max_ms,
        drift_rate,
        velocity_jitter,
        accent_downbeat,
        accent_backbeat,
        ..InstrumentGrooveProfile::named(instrument)
    };
    (instrument.to_string(), profile)
}

fn preset(
    key: &str,
    name: &str,
    template: (&str, f64),
    default_bpm: i32,
    ts: TimeSignature,
    profiles: Vec<(String, InstrumentGrooveProfile)>,
) -> StylePreset {
    StylePreset {
        key: key.to_string(),
        name: name.to_string(),
        groove_template_key: template.0.to_string(),
        template_amount: template.1,
        default_bpm,
        default_time_signature: ts,
        profiles: profiles
            .into_iter()
            .map(|(agent, mut profile)| {
                profile.humanize_seed = StableHash::seed_for(&["humanize", &agent, key]);
                (agent, profile)
            })
            .collect(),
    }
}

fn builtin_presets() -> Vec<StylePreset> {
    let common = TimeSignature::new(4, 4);
    vec![
        preset(
            "jazz_swing_medium",
            "Jazz Swing Medium",
            ("jazz_swing_2to1", 0.80),
            130,
            common,
            vec![
                performer("Piano", 6, 3, 2, 10, 0.15, 10, (1.05, 0.95)),
                performer("Bass", 2, 2, 1, 8, 0.12, 6, (1.10, 0.85)),
            ],
        ),
        preset(
            "jazz_ballad_60",
            "Jazz Swing Ballad (60)",
            ("jazz_ballad_laidback", 1.0),
            60,
            common,
            vec![
                performer("Piano", 18, 5, 4, 20, 0.18, 8, (1.08, 0.95)),
                performer("Bass", 10, 3, 3, 18, 0.20, 5, (1.12, 0.82)),
            ],
        ),
        preset(
            "jazz_ballad_50",
            "Jazz Ballad (50, deep pocket)",
            ("jazz_ballad_pocket_deep", 1.0),
            50,
            common,
            vec![
                performer("Piano", 20, 6, 5, 26, 0.20, 6, (1.08, 0.96)),
                performer("Bass", 14, 4, 4, 24, 0.22, 4, (1.14, 0.84)),
            ],
        ),
        preset(
            "jazz_bebop_240",
            "Bebop Up-tempo (240)",
            ("jazz_swing_light", 0.55),
            240,
            common,
            vec![
                performer("Piano", 1, 1, 1, 5, 0.10, 6, (1.03, 0.97)),
                performer("Bass", 0, 1, 0, 4, 0.08, 4, (1.08, 0.88)),
            ],
        ),
        preset(
            "jazz_hardbop_160",
            "Hard Bop (160)",
            ("jazz_swing_heavy", 0.95),
            160,
            common,
            vec![
                performer("Piano", 4, 3, 2, 10, 0.15, 10, (1.06, 0.94)),
                performer("Bass", 1, 2, 1, 8, 0.12, 6, (1.12, 0.86)),
            ],
        ),
        preset(
            "jazz_waltz_180",
            "Jazz Waltz (180)",
            ("jazz_waltz_swing_2to1", 0.75),
            180,
            TimeSignature::new(3, 4),
            vec![
                performer("Piano", 3, 2, 2, 8, 0.12, 8, (1.10, 1.00)),
                performer("Bass", 1, 2, 1, 7, 0.10, 5, (1.12, 1.00)),
            ],
        ),
        preset(
            "jazz_shuffle_120",
            "Jazz Shuffle (120)",
            ("jazz_shuffle_12_8", 1.0),
            120,
            common,
            vec![
                performer("Piano", 5, 3, 3, 14, 0.16, 9, (1.07, 0.96)),
                performer("Bass", 2, 2, 2, 10, 0.12, 5, (1.14, 0.88)),
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::GridPos;

    #[test]
    fn test_builtins_enumerate_in_stable_order() {
        let r = GrooveRegistry::builtins();
        let feels: Vec<&str> = r.feels().iter().map(|f| f.key.as_str()).collect();
        assert_eq!(feels, ["straight", "swing_2to1", "swing_3to1", "laid_back_pocket"]);
        assert_eq!(r.groove_templates()[0].key(), "jazz_swing_2to1");
        assert_eq!(r.style_presets()[0].key, "jazz_swing_medium");
        assert_eq!(
            GrooveRegistry::builtins()
                .groove_templates()
                .iter()
                .map(|t| t.key().to_string())
                .collect::<Vec<_>>(),
            r.groove_templates().iter().map(|t| t.key().to_string()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_every_preset_names_a_known_template() {
        let r = GrooveRegistry::builtins();
        for p in r.style_presets() {
            assert!(r.groove_template(&p.groove_template_key).is_some(), "{}", p.key);
            assert!(p.profiles.contains_key("Piano"));
            assert!(p.profiles.contains_key("Bass"));
        }
    }

    #[test]
    fn test_preset_seeds_are_keyed_by_agent_and_preset() {
        let r = GrooveRegistry::builtins();
        let medium = r.style_preset("jazz_swing_medium").unwrap();
        let piano = &medium.profiles["Piano"];
        assert_eq!(
            piano.humanize_seed,
            StableHash::seed_for(&["humanize", "Piano", "jazz_swing_medium"])
        );
        assert_ne!(piano.humanize_seed, medium.profiles["Bass"].humanize_seed);

        let ballad = r.style_preset("jazz_ballad_60").unwrap();
        assert_ne!(piano.humanize_seed, ballad.profiles["Piano"].humanize_seed);
    }

    #[test]
    fn test_lookup_unknown_keys() {
        let r = GrooveRegistry::builtins();
        assert!(r.feel("bossa").is_none());
        assert!(r.groove_template("bossa").is_none());
        assert!(r.style_preset("bossa").is_none());
        assert!(r.timing_template("bossa").is_none());
    }

    #[test]
    fn test_timing_template_resolves_both_kinds() {
        let r = GrooveRegistry::builtins();
        let ts = TimeSignature::default();
        let upbeat = GridPos::from_bar_beat_tuplet(0, 0, 1, 2, ts);

        let groove = r.timing_template("jazz_swing_2to1").unwrap();
        assert_eq!(groove.key(), "jazz_swing_2to1");
        // 83.3ms * 0.80
        assert_eq!(groove.offset_ms_for(&upbeat, ts, 120), 67);

        let feel = r.timing_template("laid_back_pocket").unwrap();
        assert_eq!(feel.key(), "laid_back_pocket");
    }

    #[test]
    fn test_add_template_replaces_in_place() {
        let mut r = GrooveRegistry::builtins();
        let count = r.groove_templates().len();
        r.add_template(GrooveTemplate::new(
            "jazz_swing_3to1",
            "Replaced",
            "Jazz/Swing",
            GrooveGridKind::Swing8,
            0.1,
        ));
        assert_eq!(r.groove_templates().len(), count);
        assert_eq!(r.groove_templates()[1].name(), "Replaced");
    }
}
