//! Live rig processor: performer transposition, command-mode program
//! selection, track toggles, breath control and pitch following.

use std::collections::{BTreeMap, HashMap};

use crossbeam_channel::{unbounded, Receiver, Sender};

use super::pipeline::EventHandler;
use super::queue::{EventSource, MidiEvent};
use crate::config::{LiveSettings, ProgramSettings};
use crate::midi::{panic_all, MidiMessage, MidiOutput, RawMessage, CC_BREATH, CC_VOLUME};

/// State changes published for observers (UI, logs).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LiveStatus {
    ProgramChanged { index: usize, name: String },
    TrackChanged { track: String, enabled: bool },
    TransposeChanged { semitones: i32 },
}

/// Consumer of the ingestion pipeline for the live rig.
pub struct LiveProcessor<O: MidiOutput> {
    settings: LiveSettings,
    output: O,
    status_tx: Sender<LiveStatus>,

    transpose: i32,
    command_armed: bool,
    current_program: Option<usize>,
    track_states: BTreeMap<String, bool>,
    /// Performer input note -> note actually sent
    held: HashMap<u8, u8>,

    performer_note: Option<u8>,
    voice_note: Option<u8>,
    voice_bend_cents: i32,
    last_bend_down: u8,
    last_bend_up: u8,
}

impl<O: MidiOutput> LiveProcessor<O> {
    pub fn new(settings: LiveSettings, output: O) -> (Self, Receiver<LiveStatus>) {
        let settings = settings.sanitized();
        let (status_tx, status_rx) = unbounded();
        let track_states = settings.initial_track_states.clone();
        let processor = Self {
            settings,
            output,
            status_tx,
            transpose: 0,
            command_armed: false,
            current_program: None,
            track_states,
            held: HashMap::new(),
            performer_note: None,
            voice_note: None,
            voice_bend_cents: 0,
            last_bend_down: 0,
            last_bend_up: 0,
        };
        (processor, status_rx)
    }

    /// Select the first program, as the rig does on power-up.
    pub fn initialize(&mut self) {
        if !self.settings.programs.is_empty() {
            self.apply_program(0);
        }
    }

    pub fn settings(&self) -> &LiveSettings {
        &self.settings
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn transpose(&self) -> i32 {
        self.transpose
    }

    pub fn is_command_armed(&self) -> bool {
        self.command_armed
    }

    pub fn current_program(&self) -> Option<usize> {
        self.current_program
    }

    pub fn track_state(&self, track: &str) -> Option<bool> {
        self.track_states.get(track).copied()
    }

    pub fn handle(&mut self, event: MidiEvent) {
        match event {
            MidiEvent::Raw { source, message } => self.handle_raw(source, message),
            MidiEvent::ProgramChange { program } => self.apply_program(program),
            MidiEvent::TransposeChange { semitones } => self.set_transpose(semitones),
            MidiEvent::TrackToggle { track } => self.toggle_track(&track),
        }
    }

    /// Send the program's select CC and volume, then toggle tracks until they
    /// match the program's track map (or the default map when it has none).
    pub fn apply_program(&mut self, index: usize) {
        let Some(program) = self.settings.programs.get(index).cloned() else {
            log::warn!("[LIVE] No program at index {}", index);
            return;
        };
        let ProgramSettings {
            name,
            program: number,
            volume,
            tracks,
            ..
        } = program;

        let channel = self.output_channel();
        self.send(MidiMessage::ControlChange {
            channel,
            controller: self.settings.program_select_cc,
            value: number,
        });
        self.send(MidiMessage::ControlChange {
            channel,
            controller: CC_VOLUME,
            value: volume,
        });
        self.current_program = Some(index);
        log::info!("[LIVE] Program {} '{}' (volume {})", number, name, volume);
        self.publish(LiveStatus::ProgramChanged { index, name });

        let desired = if tracks.is_empty() {
            self.settings.default_track_states.clone()
        } else {
            tracks
        };
        for (track, want) in desired {
            if self.track_state(&track).unwrap_or(false) != want {
                self.toggle_track(&track);
            }
        }
    }

    /// Pulse the track's toggle note and flip its stored state.
    pub fn toggle_track(&mut self, track: &str) {
        let Some(&note) = self.settings.track_toggle_notes.get(track) else {
            log::warn!("[LIVE] Unknown track '{}'", track);
            return;
        };
        let channel = self.settings.toggle_channel - 1;
        self.send(MidiMessage::NoteOn {
            channel,
            note,
            velocity: self.settings.toggle_velocity,
        });
        self.send(MidiMessage::NoteOff {
            channel,
            note,
            velocity: 0,
        });

        let enabled = !self.track_state(track).unwrap_or(false);
        self.track_states.insert(track.to_string(), enabled);
        log::debug!("[LIVE] Track '{}' {}", track, if enabled { "on" } else { "off" });
        self.publish(LiveStatus::TrackChanged {
            track: track.to_string(),
            enabled,
        });
    }

    /// Held notes keep their original output pitch.
    pub fn set_transpose(&mut self, semitones: i32) {
        let max = self.settings.max_transpose;
        self.transpose = semitones.clamp(-max, max);
        log::debug!("[LIVE] Transpose {:+}", self.transpose);
        self.publish(LiveStatus::TransposeChanged {
            semitones: self.transpose,
        });
    }

    fn handle_raw(&mut self, source: EventSource, raw: RawMessage) {
        let Some(message) = MidiMessage::from_bytes(raw.as_slice()) else {
            log::trace!("[LIVE] Ignoring {:?} from {:?}", raw, source);
            return;
        };
        match source {
            EventSource::Performer => self.handle_performer(message),
            EventSource::Voice => self.handle_voice(message),
            EventSource::VirtualBand | EventSource::Api => self.send_raw(&raw),
        }
    }

    fn handle_performer(&mut self, message: MidiMessage) {
        let channel = self.output_channel();
        match message {
            MidiMessage::NoteOn { note, velocity, .. } => {
                self.handle_command(note);
                let out = self.transposed(note);
                self.held.insert(note, out);
                self.performer_note = Some(note);
                self.send(MidiMessage::NoteOn {
                    channel,
                    note: out,
                    velocity,
                });
                self.update_pitch_follow();
            }
            MidiMessage::NoteOff { note, velocity, .. } => {
                let out = self.held.remove(&note).unwrap_or_else(|| self.transposed(note));
                if self.performer_note == Some(note) {
                    self.performer_note = None;
                }
                self.send(MidiMessage::NoteOff {
                    channel,
                    note: out,
                    velocity,
                });
                self.update_pitch_follow();
            }
            other => self.send(other.with_channel(channel)),
        }
    }

    fn handle_command(&mut self, note: u8) {
        if note == self.settings.command_note {
            self.command_armed = true;
            log::debug!("[LIVE] Command mode armed");
            return;
        }
        if !self.command_armed {
            return;
        }
        self.command_armed = false;
        match self.settings.programs.iter().position(|p| p.trigger_note == note) {
            Some(index) => self.apply_program(index),
            None => log::debug!("[LIVE] Note {} selects no program", note),
        }
    }

    fn handle_voice(&mut self, message: MidiMessage) {
        match message {
            MidiMessage::ChannelPressure { pressure, .. } => {
                let value = pressure.saturating_sub(self.settings.breath_offset);
                self.send(MidiMessage::ControlChange {
                    channel: self.output_channel(),
                    controller: CC_BREATH,
                    value,
                });
            }
            MidiMessage::NoteOn { note, .. } => {
                self.voice_note = Some(note);
                self.update_pitch_follow();
            }
            MidiMessage::NoteOff { note, .. } => {
                if self.voice_note == Some(note) {
                    self.voice_note = None;
                }
                self.update_pitch_follow();
            }
            MidiMessage::PitchBend { value, .. } => {
                let range = self.settings.voice_bend_range_cents as f64;
                self.voice_bend_cents = (value as f64 * range / 8192.0).round() as i32;
                self.update_pitch_follow();
            }
            _ => {}
        }
    }

    /// Deviation of the voice from the performer's note, in cents, mapped
    /// onto the bend CCs outside the dead zone.
    fn bend_values(&self) -> (u8, u8) {
        let (Some(performer), Some(voice)) = (self.performer_note, self.voice_note) else {
            return (0, 0);
        };
        let deviation = (voice as i32 - performer as i32) * 100 + self.voice_bend_cents;
        let dead_zone = self.settings.bend_dead_zone_cents;
        let scale = |cents: i32, range: i32| -> u8 {
            ((cents as f64 * 127.0 / range as f64).round() as i32).clamp(0, 127) as u8
        };

        if deviation < -dead_zone {
            (scale(-deviation - dead_zone, self.settings.bend_down_range_cents), 0)
        } else if deviation > dead_zone {
            (0, scale(deviation - dead_zone, self.settings.bend_up_range_cents))
        } else {
            (0, 0)
        }
    }

    fn update_pitch_follow(&mut self) {
        let (down, up) = self.bend_values();
        let channel = self.output_channel();
        if down != self.last_bend_down {
            self.last_bend_down = down;
            self.send(MidiMessage::ControlChange {
                channel,
                controller: self.settings.bend_down_cc,
                value: down,
            });
        }
        if up != self.last_bend_up {
            self.last_bend_up = up;
            self.send(MidiMessage::ControlChange {
                channel,
                controller: self.settings.bend_up_cc,
                value: up,
            });
        }
    }

    fn transposed(&self, note: u8) -> u8 {
        (note as i32 + self.transpose).clamp(0, 127) as u8
    }

    fn output_channel(&self) -> u8 {
        self.settings.output_channel - 1
    }

    fn send(&mut self, message: MidiMessage) {
        if let Err(e) = self.output.send_message(&message) {
            log::warn!("[LIVE] Send to '{}' failed: {}", self.output.port_name(), e);
        }
    }

    fn send_raw(&mut self, raw: &RawMessage) {
        if let Err(e) = self.output.send_raw(raw.as_slice()) {
            log::warn!("[LIVE] Send to '{}' failed: {}", self.output.port_name(), e);
        }
    }

    fn publish(&self, status: LiveStatus) {
        let _ = self.status_tx.send(status);
    }
}

impl<O: MidiOutput + 'static> EventHandler for LiveProcessor<O> {
    fn handle(&mut self, event: MidiEvent) {
        LiveProcessor::handle(self, event);
    }

    fn panic_silence(&mut self) {
        self.held.clear();
        self.performer_note = None;
        self.voice_note = None;
        self.last_bend_down = 0;
        self.last_bend_up = 0;
        if let Err(e) = panic_all(&mut self.output) {
            log::error!("[LIVE] Panic on '{}' failed: {}", self.output.port_name(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::RecordingOutput;

    fn processor() -> (LiveProcessor<RecordingOutput>, RecordingOutput, Receiver<LiveStatus>) {
        let out = RecordingOutput::default();
        let (p, rx) = LiveProcessor::new(LiveSettings::default(), out.clone());
        (p, out, rx)
    }

    fn raw(source: EventSource, bytes: &[u8]) -> MidiEvent {
        MidiEvent::raw(source, RawMessage::new(bytes).unwrap())
    }

    fn sent(out: &RecordingOutput) -> Vec<Vec<u8>> {
        out.messages().iter().map(|m| m.as_slice().to_vec()).collect()
    }

    #[test]
    fn test_command_mode_selects_program() {
        let (mut p, out, rx) = processor();
        p.handle(raw(EventSource::Performer, &[0x90, 86, 100]));
        assert!(p.is_command_armed());
        p.handle(raw(EventSource::Performer, &[0x90, 84, 100]));
        assert!(!p.is_command_armed());

        assert_eq!(
            sent(&out),
            vec![
                vec![0x90, 86, 100],
                vec![0xB0, 119, 1],
                vec![0xB0, 7, 96],
                vec![0x9F, 2, 100],
                vec![0x8F, 2, 0],
                vec![0x90, 84, 100],
            ]
        );
        assert_eq!(p.current_program(), Some(1));
        assert_eq!(p.track_state("track3"), Some(false));
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            vec![
                LiveStatus::ProgramChanged {
                    index: 1,
                    name: "Program 2".to_string()
                },
                LiveStatus::TrackChanged {
                    track: "track3".to_string(),
                    enabled: false
                },
            ]
        );
    }

    #[test]
    fn test_armed_note_without_program_disarms() {
        let (mut p, out, _rx) = processor();
        p.handle(raw(EventSource::Performer, &[0x90, 86, 100]));
        p.handle(raw(EventSource::Performer, &[0x90, 40, 100]));
        assert!(!p.is_command_armed());
        assert_eq!(p.current_program(), None);
        p.handle(raw(EventSource::Performer, &[0x90, 84, 100]));
        assert_eq!(p.current_program(), None);
        assert_eq!(out.messages().len(), 3);
    }

    #[test]
    fn test_empty_track_map_uses_defaults() {
        let (mut p, out, _rx) = processor();
        p.apply_program(2);
        assert_eq!(p.track_state("track1"), Some(true));
        assert_eq!(p.track_state("track2"), Some(false));
        assert_eq!(p.track_state("track3"), Some(false));
        assert_eq!(
            sent(&out),
            vec![
                vec![0xB0, 119, 2],
                vec![0xB0, 7, 112],
                vec![0x9F, 0, 100],
                vec![0x8F, 0, 0],
                vec![0x9F, 1, 100],
                vec![0x8F, 1, 0],
                vec![0x9F, 2, 100],
                vec![0x8F, 2, 0],
            ]
        );

        out.clear();
        p.apply_program(42);
        assert!(out.messages().is_empty());
    }

    #[test]
    fn test_initialize_applies_first_program() {
        let (mut p, out, _rx) = processor();
        p.initialize();
        assert_eq!(p.current_program(), Some(0));
        assert_eq!(&sent(&out)[..2], &[vec![0xB0, 119, 0], vec![0xB0, 7, 127]]);
    }

    #[test]
    fn test_transpose_keeps_held_release() {
        let (mut p, out, _rx) = processor();
        p.handle(MidiEvent::TransposeChange { semitones: 12 });
        p.handle(raw(EventSource::Performer, &[0x92, 60, 90]));
        p.handle(MidiEvent::TransposeChange { semitones: -5 });
        p.handle(raw(EventSource::Performer, &[0x82, 60, 0]));
        p.handle(raw(EventSource::Performer, &[0x90, 60, 90]));
        assert_eq!(
            sent(&out),
            vec![vec![0x90, 72, 90], vec![0x80, 72, 0], vec![0x90, 55, 90]]
        );
    }

    #[test]
    fn test_transpose_is_clamped() {
        let (mut p, out, _rx) = processor();
        p.set_transpose(100);
        assert_eq!(p.transpose(), 24);
        p.handle(raw(EventSource::Performer, &[0x90, 120, 64]));
        assert_eq!(sent(&out), vec![vec![0x90, 127, 64]]);
    }

    #[test]
    fn test_performer_controls_forced_to_output_channel() {
        let (mut p, out, _rx) = processor();
        p.handle(raw(EventSource::Performer, &[0xB5, 64, 127]));
        p.handle(raw(EventSource::Performer, &[0xE3, 0, 64]));
        assert_eq!(sent(&out), vec![vec![0xB0, 64, 127], vec![0xE0, 0, 64]]);
    }

    #[test]
    fn test_voice_aftertouch_becomes_breath() {
        let (mut p, out, _rx) = processor();
        p.handle(raw(EventSource::Voice, &[0xD0, 10]));
        p.handle(raw(EventSource::Voice, &[0xD4, 100]));
        assert_eq!(sent(&out), vec![vec![0xB0, 2, 0], vec![0xB0, 2, 84]]);
    }

    #[test]
    fn test_pitch_follow_maps_deviation() {
        let (mut p, out, _rx) = processor();
        p.handle(raw(EventSource::Performer, &[0x90, 60, 100]));
        out.clear();

        // +200 cents: 150 past the dead zone
        p.handle(raw(EventSource::Voice, &[0x90, 62, 100]));
        // +100 cents
        p.handle(raw(EventSource::Voice, &[0x90, 61, 100]));
        // inside the dead zone: nothing new beyond resetting up
        p.handle(raw(EventSource::Voice, &[0x90, 60, 100]));
        // -300 cents saturates
        p.handle(raw(EventSource::Voice, &[0x90, 57, 100]));
        p.handle(raw(EventSource::Voice, &[0x90, 57, 100]));
        p.handle(raw(EventSource::Voice, &[0x80, 57, 0]));

        assert_eq!(
            sent(&out),
            vec![
                vec![0xB0, 103, 95],
                vec![0xB0, 103, 32],
                vec![0xB0, 103, 0],
                vec![0xB0, 102, 127],
                vec![0xB0, 102, 0],
            ]
        );
    }

    #[test]
    fn test_voice_bend_refines_pitch() {
        let (mut p, out, _rx) = processor();
        p.handle(raw(EventSource::Performer, &[0x90, 60, 100]));
        p.handle(raw(EventSource::Voice, &[0x90, 60, 100]));
        out.clear();
        // full upward bend = +200 cents
        p.handle(raw(EventSource::Voice, &[0xE0, 0x7F, 0x7F]));
        assert_eq!(sent(&out), vec![vec![0xB0, 103, 95]]);
    }

    #[test]
    fn test_band_passes_through_and_garbage_is_ignored() {
        let (mut p, out, _rx) = processor();
        p.handle(raw(EventSource::VirtualBand, &[0x93, 40, 50]));
        p.handle(raw(EventSource::VirtualBand, &[0x93, 40, 0]));
        p.handle(raw(EventSource::Performer, &[0xF8]));
        p.handle(raw(EventSource::Performer, &[0x90, 60]));
        p.handle(raw(EventSource::Voice, &[0x12, 3, 4]));
        assert_eq!(sent(&out), vec![vec![0x93, 40, 50], vec![0x93, 40, 0]]);
    }

    #[test]
    fn test_unknown_track_is_ignored() {
        let (mut p, out, rx) = processor();
        p.handle(MidiEvent::TrackToggle {
            track: "track9".to_string(),
        });
        assert!(out.messages().is_empty());
        assert!(rx.try_recv().is_err());

        p.handle(MidiEvent::TrackToggle {
            track: "track1".to_string(),
        });
        assert_eq!(p.track_state("track1"), Some(true));
    }

    #[test]
    fn test_panic_silences_everything() {
        let (mut p, out, _rx) = processor();
        p.handle(raw(EventSource::Performer, &[0x90, 60, 100]));
        EventHandler::panic_silence(&mut p);
        assert_eq!(out.messages().len(), 1 + 16 * (128 * 2 + 3));
    }
}
