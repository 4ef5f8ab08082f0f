//! Configuration file support for groovelock
//!
//! Configuration is stored in TOML format at:
//! - Linux: `~/.config/groovelock/config.toml`
//! - macOS: `~/Library/Application Support/groovelock/config.toml`
//! - Windows: `%APPDATA%\groovelock\config.toml`

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::engine::{Engine, MAX_BPM, MIN_BPM};
use crate::error::{Error, Result};
use crate::groove::{GrooveRegistry, InstrumentGrooveProfile};
use crate::ingest::queue::{DEFAULT_DROP_LOG_INTERVAL, DEFAULT_QUEUE_CAPACITY};
use crate::timing::TimeSignature;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tempo, meter and groove selection
    pub engine: EngineSettings,
    /// Ingestion queue sizing
    pub ingest: IngestSettings,
    /// Live-input processor behaviour
    pub live: LiveSettings,
    /// MIDI port selection
    pub midi: MidiSettings,
    /// Per-agent groove profile overrides
    pub profiles: BTreeMap<String, InstrumentGrooveProfile>,
}

impl Config {
    /// Load configuration from the default config file location
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Err(Error::Config(format!("Config file not found at {:?}", path)))
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config.sanitized())
    }

    /// Load configuration or return default if not found
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }

    /// Save configuration to the default config file location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = ProjectDirs::from("", "", "groovelock") {
            Ok(proj_dirs.config_dir().join("config.toml"))
        } else {
            Err(Error::Config("Could not determine config directory".to_string()))
        }
    }

    /// Create a default config file with a comment header
    pub fn create_default_config_file() -> Result<PathBuf> {
        let path = Self::config_path()?;
        Self::create_default_config_file_at(&path)?;
        Ok(path)
    }

    pub fn create_default_config_file_at(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let header = r#"# groovelock configuration file
#
# [engine]    tempo (30-300 bpm), meter, groove template or feel key,
#             optional style preset (overrides tempo, meter and template)
# [ingest]    live input queue capacity and overload log decimation
# [live]      command mode, programs and track toggles for the live rig
# [midi]      port name substrings (case-insensitive)
# [profiles.<agent>]  per-agent groove profile overrides, e.g.
#
# [profiles.Piano]
# laid_back_ms = 6
# micro_jitter_ms = 3

"#;
        let body = toml::to_string_pretty(&Config::default())?;
        fs::write(path, format!("{}{}", header, body))?;
        Ok(())
    }

    /// Copy with every numeric field clamped into range.
    pub fn sanitized(&self) -> Self {
        Self {
            engine: self.engine.sanitized(),
            ingest: self.ingest.sanitized(),
            live: self.live.sanitized(),
            midi: self.midi.clone(),
            profiles: self
                .profiles
                .iter()
                .map(|(agent, profile)| (agent.clone(), profile.sanitized()))
                .collect(),
        }
    }

    /// Configure an engine: tempo, meter and template first, then the style
    /// preset (if any), then the `[profiles]` overrides.
    pub fn apply_to_engine(&self, engine: &mut Engine, registry: &GrooveRegistry) {
        let settings = self.engine.sanitized();
        engine.set_tempo_bpm(settings.bpm);
        engine.set_time_signature(settings.time_signature());
        engine.set_start_guard_ms(settings.start_guard_ms);

        match registry.timing_template(&settings.template) {
            Some(template) => engine.set_template(template),
            None => log::warn!("[CONFIG] Unknown groove template '{}'", settings.template),
        }

        if let Some(key) = &settings.style_preset {
            match registry.style_preset(key) {
                Some(preset) => {
                    engine.apply_style_preset(preset, registry);
                }
                None => log::warn!("[CONFIG] Unknown style preset '{}'", key),
            }
        }

        for (agent, profile) in &self.profiles {
            engine.set_instrument_profile(agent, profile.sanitized());
        }
    }
}

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Tempo in BPM (30-300)
    pub bpm: i32,
    pub time_signature_num: i32,
    pub time_signature_den: i32,
    /// Groove template or feel key
    pub template: String,
    /// Style preset key; overrides tempo, meter and template when set
    pub style_preset: Option<String>,
    /// Distance from start to the first downbeat
    pub start_guard_ms: i64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            bpm: 120,
            time_signature_num: 4,
            time_signature_den: 4,
            template: "straight".to_string(),
            style_preset: None,
            start_guard_ms: crate::engine::DEFAULT_START_GUARD_MS,
        }
    }
}

impl EngineSettings {
    pub fn time_signature(&self) -> TimeSignature {
        TimeSignature::new(self.time_signature_num, self.time_signature_den)
    }

    fn sanitized(&self) -> Self {
        Self {
            bpm: self.bpm.clamp(MIN_BPM, MAX_BPM),
            time_signature_num: self.time_signature_num.max(1),
            time_signature_den: self.time_signature_den.max(1),
            template: self.template.clone(),
            style_preset: self.style_preset.clone(),
            start_guard_ms: self.start_guard_ms.max(0),
        }
    }
}

/// Ingestion queue settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Hard queue bound
    pub queue_capacity: usize,
    /// Log the 1st overload drop, then every Nth
    pub drop_log_interval: u64,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            drop_log_interval: DEFAULT_DROP_LOG_INTERVAL,
        }
    }
}

impl IngestSettings {
    fn sanitized(&self) -> Self {
        Self {
            queue_capacity: self.queue_capacity.max(1),
            drop_log_interval: self.drop_log_interval.max(1),
        }
    }
}

/// One selectable rig program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramSettings {
    pub name: String,
    /// Note that selects this program while command mode is armed
    pub trigger_note: u8,
    /// Value sent with the program-select CC
    pub program: u8,
    /// Value sent with CC 7
    pub volume: u8,
    /// Desired track states; empty means the default map
    pub tracks: BTreeMap<String, bool>,
}

impl Default for ProgramSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            trigger_note: 0,
            program: 0,
            volume: 100,
            tracks: BTreeMap::new(),
        }
    }
}

impl ProgramSettings {
    fn sanitized(&self) -> Self {
        Self {
            name: self.name.clone(),
            trigger_note: self.trigger_note.min(127),
            program: self.program.min(127),
            volume: self.volume.min(127),
            tracks: self.tracks.clone(),
        }
    }
}

fn track_map(states: [bool; 3]) -> BTreeMap<String, bool> {
    states
        .iter()
        .enumerate()
        .map(|(i, on)| (format!("track{}", i + 1), *on))
        .collect()
}

fn program(name: &str, trigger_note: u8, program: u8, volume: u8, tracks: Option<[bool; 3]>) -> ProgramSettings {
    ProgramSettings {
        name: name.to_string(),
        trigger_note,
        program,
        volume,
        tracks: tracks.map(track_map).unwrap_or_default(),
    }
}

/// Live-input processor settings.
///
/// Channels here are 1-based (1..=16).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveSettings {
    /// NoteOn that arms command mode
    pub command_note: u8,
    pub program_select_cc: u8,
    /// Channel for performer notes, program/volume CCs and pitch-follow CCs
    pub output_channel: u8,
    /// Channel for track toggle notes
    pub toggle_channel: u8,
    pub toggle_velocity: u8,
    /// Largest transpose in either direction
    pub max_transpose: i32,
    /// Subtracted from voice aftertouch before it becomes the breath CC
    pub breath_offset: u8,
    pub bend_down_cc: u8,
    pub bend_up_cc: u8,
    pub bend_dead_zone_cents: i32,
    /// Cents past the dead zone at which the bend-down CC reaches 127
    pub bend_down_range_cents: i32,
    /// Cents past the dead zone at which the bend-up CC reaches 127
    pub bend_up_range_cents: i32,
    /// Voice pitch-bend range used to refine the voice pitch
    pub voice_bend_range_cents: i32,
    pub programs: Vec<ProgramSettings>,
    pub track_toggle_notes: BTreeMap<String, u8>,
    /// Track states when the processor starts
    pub initial_track_states: BTreeMap<String, bool>,
    /// Target states for programs with an empty track map
    pub default_track_states: BTreeMap<String, bool>,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            command_note: 86,
            program_select_cc: 119,
            output_channel: 1,
            toggle_channel: 16,
            toggle_velocity: 100,
            max_transpose: 24,
            breath_offset: 16,
            bend_down_cc: 102,
            bend_up_cc: 103,
            bend_dead_zone_cents: 50,
            bend_down_range_cents: 200,
            bend_up_range_cents: 200,
            voice_bend_range_cents: 200,
            programs: vec![
                program("Program 1", 85, 0, 127, Some([false, true, true])),
                program("Program 2", 84, 1, 96, Some([false, true, false])),
                program("Program 3", 83, 2, 112, None),
                program("Program 4", 82, 3, 70, None),
                program("Program 5", 81, 4, 70, None),
                program("Program 6", 80, 5, 64, None),
                program("Program 7", 79, 6, 108, None),
                program("Program 8", 78, 7, 112, None),
                program("Program 9", 77, 8, 125, None),
                program("Program 10", 76, 9, 125, None),
            ],
            track_toggle_notes: [("track1", 0), ("track2", 1), ("track3", 2)]
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            initial_track_states: track_map([false, true, true]),
            default_track_states: track_map([true, false, false]),
        }
    }
}

impl LiveSettings {
    /// Copy with notes, CCs and channels clamped into range.
    pub fn sanitized(&self) -> Self {
        let channel = |c: u8| c.clamp(1, 16);
        Self {
            command_note: self.command_note.min(127),
            program_select_cc: self.program_select_cc.min(127),
            output_channel: channel(self.output_channel),
            toggle_channel: channel(self.toggle_channel),
            toggle_velocity: self.toggle_velocity.clamp(1, 127),
            max_transpose: self.max_transpose.clamp(0, 127),
            breath_offset: self.breath_offset.min(127),
            bend_down_cc: self.bend_down_cc.min(127),
            bend_up_cc: self.bend_up_cc.min(127),
            bend_dead_zone_cents: self.bend_dead_zone_cents.max(0),
            bend_down_range_cents: self.bend_down_range_cents.max(1),
            bend_up_range_cents: self.bend_up_range_cents.max(1),
            voice_bend_range_cents: self.voice_bend_range_cents.max(0),
            programs: self.programs.iter().map(ProgramSettings::sanitized).collect(),
            track_toggle_notes: self
                .track_toggle_notes
                .iter()
                .map(|(k, v)| (k.clone(), (*v).min(127)))
                .collect(),
            initial_track_states: self.initial_track_states.clone(),
            default_track_states: self.default_track_states.clone(),
        }
    }
}

/// MIDI port settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiSettings {
    /// Client name shown to the MIDI system
    pub client_name: String,
    /// Substring of the performer's input port
    pub performer_input: Option<String>,
    /// Substring of the voice processor's input port
    pub voice_input: Option<String>,
    /// Substring of the virtual band's input port
    pub band_input: Option<String>,
    /// Substring of the output port
    pub output: Option<String>,
}

impl Default for MidiSettings {
    fn default() -> Self {
        Self {
            client_name: "groovelock".to_string(),
            performer_input: None,
            voice_input: None,
            band_input: None,
            output: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualTime, PerformanceClock};
    use std::sync::Arc;

    #[test]
    fn test_default_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        Config::create_default_config_file_at(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, Config::default());
        assert_eq!(loaded.live.programs.len(), 10);
        assert_eq!(loaded.live.programs[1].volume, 96);
    }

    #[test]
    fn test_partial_file_uses_defaults_and_clamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[engine]
bpm = 900
time_signature_den = 0

[ingest]
queue_capacity = 0

[profiles.Bass]
push_ms = 4
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.engine.bpm, MAX_BPM);
        assert_eq!(config.engine.time_signature_den, 1);
        assert_eq!(config.engine.time_signature_num, 4);
        assert_eq!(config.ingest.queue_capacity, 1);
        assert_eq!(config.live.command_note, 86);
        assert_eq!(config.profiles["Bass"].push_ms, 4);
        assert_eq!(config.profiles["Bass"].clamp_ms_loose, 32);
    }

    #[test]
    fn test_save_to_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.engine.style_preset = Some("jazz_ballad_60".to_string());
        config.midi.output = Some("loopMIDI".to_string());
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[engine\nbpm = ").unwrap();
        assert!(matches!(Config::load_from(&path), Err(Error::TomlParse(_))));
        assert!(matches!(
            Config::load_from(&dir.path().join("missing.toml")),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_apply_to_engine() {
        let registry = GrooveRegistry::builtins();
        let mut engine = Engine::new(PerformanceClock::new(Arc::new(ManualTime::new(0))));

        let mut config = Config::default();
        config.engine.bpm = 96;
        config.engine.template = "jazz_swing_2to1".to_string();
        config.apply_to_engine(&mut engine, &registry);
        assert_eq!(engine.tempo_bpm(), 96);
        assert_eq!(engine.template().key(), "jazz_swing_2to1");

        config.engine.style_preset = Some("jazz_waltz_180".to_string());
        config.apply_to_engine(&mut engine, &registry);
        assert_eq!(engine.tempo_bpm(), 180);
        assert_eq!(engine.time_signature(), TimeSignature::new(3, 4));

        config.engine.template = "no_such_template".to_string();
        config.engine.style_preset = None;
        config.apply_to_engine(&mut engine, &registry);
        assert_eq!(engine.tempo_bpm(), 96);
    }
}
