//! Per-agent humanize-and-schedule facade.
//!
//! The [`Engine`] owns one [`TimingHumanizer`] per agent, the active groove
//! template, tempo and meter, and the [`EventScheduler`]. It turns note,
//! control-change and keyswitch intents into scheduled events plus an
//! explainability record per action.
//!
//! Invalid intents (channel outside 1..=16, note/velocity/CC out of range) are
//! discarded with a debug log; nothing here returns an error.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::clock::PerformanceClock;
use crate::events::{EventKind, ExplainKind, ExplainRecord, NoteId, ScheduledEvent};
use crate::groove::{
    FeelTemplate, GrooveRegistry, GrooveTemplate, HumanizedEvent, HumanizerSnapshot,
    InstrumentGrooveProfile, StylePreset, TimingHumanizer, TimingTemplate,
};
use crate::scheduler::{EventScheduler, WakeTarget, Waker};
use crate::timing::{GridPos, Rational, TimeSignature};

pub const MIN_BPM: i32 = 30;
pub const MAX_BPM: i32 = 300;
/// Default distance between `start()` and the first downbeat.
pub const DEFAULT_START_GUARD_MS: i64 = 35;

const CC_LEAD_STRUCTURAL_MS: i64 = 12;
const CC_LEAD_MS: i64 = 8;
const KEYSWITCH_MIN_HOLD_MS: i64 = 6;
const KEYSWITCH_VELOCITY: u8 = 1;

/// "Play this note, roughly here" from one agent.
#[derive(Clone, Debug, PartialEq)]
pub struct NoteIntent {
    pub agent: String,
    /// 1..=16
    pub channel: i32,
    /// 0..=127
    pub note: i32,
    /// 1..=127
    pub base_velocity: i32,
    pub start: GridPos,
    /// Length in whole notes
    pub duration: Rational,
    /// Chord arrival or strong beat
    pub structural: bool,
    pub logic_tag: String,
}

impl NoteIntent {
    /// A quarter-note intent.
    pub fn new(agent: impl Into<String>, channel: i32, note: i32, base_velocity: i32, start: GridPos) -> Self {
        Self {
            agent: agent.into(),
            channel,
            note,
            base_velocity,
            start,
            duration: Rational::new(1, 4),
            structural: false,
            logic_tag: String::new(),
        }
    }

    pub fn with_duration(mut self, duration: Rational) -> Self {
        self.duration = duration;
        self
    }

    pub fn structural(mut self, structural: bool) -> Self {
        self.structural = structural;
        self
    }

    pub fn with_logic_tag(mut self, tag: impl Into<String>) -> Self {
        self.logic_tag = tag.into();
        self
    }
}

/// A grid-aligned control change.
#[derive(Clone, Debug, PartialEq)]
pub struct CcIntent {
    pub agent: String,
    pub channel: i32,
    pub cc: i32,
    pub value: i32,
    pub start: GridPos,
    /// Structural CCs get a longer lead so they land before dependent notes.
    pub structural: bool,
    pub logic_tag: String,
}

impl CcIntent {
    pub fn new(agent: impl Into<String>, channel: i32, cc: i32, value: i32, start: GridPos) -> Self {
        Self {
            agent: agent.into(),
            channel,
            cc,
            value,
            start,
            structural: false,
            logic_tag: String::new(),
        }
    }
}

/// A sampler articulation keyswitch.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyswitchIntent {
    pub agent: String,
    pub channel: i32,
    pub note: i32,
    /// How far ahead of the grid position the switch is pressed
    pub lead_ms: i64,
    /// How long it is held; `<= 0` latches (no release)
    pub hold_ms: i64,
    pub logic_tag: String,
}

impl KeyswitchIntent {
    pub fn new(agent: impl Into<String>, channel: i32, note: i32) -> Self {
        Self {
            agent: agent.into(),
            channel,
            note,
            lead_ms: 16,
            hold_ms: 28,
            logic_tag: String::new(),
        }
    }

    pub fn with_hold_ms(mut self, hold_ms: i64) -> Self {
        self.hold_ms = hold_ms;
        self
    }

    pub fn with_lead_ms(mut self, lead_ms: i64) -> Self {
        self.lead_ms = lead_ms;
        self
    }
}

fn valid_channel(channel: i32) -> Option<u8> {
    (1..=16).contains(&channel).then_some(channel as u8)
}

fn valid_data(value: i32) -> Option<u8> {
    (0..=127).contains(&value).then_some(value as u8)
}

/// Humanize-and-schedule engine.
pub struct Engine {
    bpm: i32,
    ts: TimeSignature,
    template: TimingTemplate,
    start_guard_ms: i64,
    grid_base_ms: Option<i64>,

    scheduler: EventScheduler,
    profiles: HashMap<String, InstrumentGrooveProfile>,
    humanizers: HashMap<String, TimingHumanizer>,
    next_note_id: NoteId,
    planned: Vec<Sender<ExplainRecord>>,
}

impl Engine {
    pub fn new(clock: PerformanceClock) -> Self {
        Self {
            bpm: 120,
            ts: TimeSignature::default(),
            template: TimingTemplate::default(),
            start_guard_ms: DEFAULT_START_GUARD_MS,
            grid_base_ms: None,
            scheduler: EventScheduler::new(clock),
            profiles: HashMap::new(),
            humanizers: HashMap::new(),
            next_note_id: 0,
            planned: Vec::new(),
        }
    }

    pub fn set_start_guard_ms(&mut self, guard_ms: i64) {
        self.start_guard_ms = guard_ms.max(0);
    }

    /// Set the tempo, clamped to 30..=300 BPM.
    pub fn set_tempo_bpm(&mut self, bpm: i32) {
        self.bpm = bpm.clamp(MIN_BPM, MAX_BPM);
    }

    pub fn tempo_bpm(&self) -> i32 {
        self.bpm
    }

    pub fn set_time_signature(&mut self, ts: TimeSignature) {
        self.ts = ts.sanitized();
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.ts
    }

    /// Follow a template on every current and future agent.
    pub fn set_template(&mut self, template: TimingTemplate) {
        log::debug!("[SCHED] Timing template -> {}", template.key());
        for humanizer in self.humanizers.values_mut() {
            humanizer.set_template(template.clone());
        }
        self.template = template;
    }

    pub fn set_feel_template(&mut self, feel: FeelTemplate) {
        self.set_template(TimingTemplate::Feel(feel));
    }

    pub fn set_groove_template(&mut self, template: Arc<GrooveTemplate>) {
        self.set_template(TimingTemplate::Groove(template));
    }

    pub fn template(&self) -> &TimingTemplate {
        &self.template
    }

    /// Register a profile for an agent; its humanizer restarts from the new seed.
    pub fn set_instrument_profile(&mut self, agent: &str, profile: InstrumentGrooveProfile) {
        self.profiles.insert(agent.to_string(), profile.clone());
        self.humanizer_for(agent).set_profile(profile);
    }

    /// Apply a style preset: template at the preset's amount, per-agent
    /// profiles, tempo and meter.
    ///
    /// Returns false (leaving the template unchanged) when the preset names an
    /// unknown groove template; profiles and tempo are applied either way.
    pub fn apply_style_preset(&mut self, preset: &StylePreset, registry: &GrooveRegistry) -> bool {
        let found = match registry.groove_template(&preset.groove_template_key) {
            Some(template) => {
                let scaled = template.as_ref().clone().with_amount(preset.template_amount);
                self.set_groove_template(Arc::new(scaled));
                true
            }
            None => {
                log::warn!(
                    "[SCHED] Preset '{}' names unknown groove template '{}'",
                    preset.key,
                    preset.groove_template_key
                );
                false
            }
        };
        for (agent, profile) in &preset.profiles {
            self.set_instrument_profile(agent, profile.clone());
        }
        self.set_tempo_bpm(preset.default_bpm);
        self.set_time_signature(preset.default_time_signature);
        log::info!("[SCHED] Applied style preset '{}'", preset.key);
        found
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.clock().is_running()
    }

    pub fn elapsed_ms(&self) -> i64 {
        self.scheduler.now_ms()
    }

    /// Begin a run: drop stale events, restart the clock and every humanizer.
    pub fn start(&mut self) {
        self.scheduler.clear();
        self.scheduler.clock_mut().start();
        self.grid_base_ms = None;
        for humanizer in self.humanizers.values_mut() {
            humanizer.reset();
        }
        log::info!("[SCHED] Engine started at {} BPM {}/{}", self.bpm, self.ts.num, self.ts.den);
    }

    /// Silence everything that sounds, then stop the clock.
    pub fn stop(&mut self) {
        self.scheduler.panic_silence();
        if self.is_running() {
            self.scheduler.clock_mut().stop();
        }
        log::info!("[SCHED] Engine stopped");
    }

    pub fn panic_silence(&mut self) {
        self.scheduler.panic_silence();
    }

    pub fn scheduler(&self) -> &EventScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut EventScheduler {
        &mut self.scheduler
    }

    /// Dispatch due events; see [`EventScheduler::on_wake`].
    pub fn poll(&mut self) -> usize {
        self.scheduler.on_wake()
    }

    pub fn next_deadline(&self) -> Option<i64> {
        self.scheduler.next_deadline()
    }

    /// Receive every explainability record at planning time.
    pub fn subscribe_planned(&mut self) -> Receiver<ExplainRecord> {
        let (tx, rx) = unbounded();
        self.planned.push(tx);
        rx
    }

    /// Owned copy of an agent's humanizer state.
    pub fn humanizer_snapshot(&self, agent: &str) -> Option<HumanizerSnapshot> {
        self.humanizers.get(agent).map(TimingHumanizer::snapshot)
    }

    /// Humanize and schedule a note.
    pub fn schedule_note(&mut self, intent: &NoteIntent) {
        if let Some(event) = self.humanize_intent(intent) {
            self.schedule_humanized_note(intent, &event);
        }
    }

    /// Humanize without scheduling.
    ///
    /// Advances the agent's humanizer exactly as [`schedule_note`](Self::schedule_note)
    /// would, so a result can be adjusted (e.g. time-locked to another agent)
    /// and passed to [`schedule_humanized_note`](Self::schedule_humanized_note).
    /// Returns `None` for invalid intents or while stopped.
    pub fn humanize_intent(&mut self, intent: &NoteIntent) -> Option<HumanizedEvent> {
        if !self.is_running() {
            return None;
        }
        if valid_channel(intent.channel).is_none()
            || valid_data(intent.note).is_none()
            || !(1..=127).contains(&intent.base_velocity)
        {
            log::debug!(
                "[SCHED] Discarding note intent from '{}': ch{} note {} vel {}",
                intent.agent,
                intent.channel,
                intent.note,
                intent.base_velocity
            );
            return None;
        }

        let (ts, bpm) = (self.ts, self.bpm);
        let mut event = self.humanizer_for(&intent.agent).humanize_note(
            &intent.start,
            ts,
            bpm,
            intent.base_velocity,
            intent.duration,
            intent.structural,
        );
        let base = self.grid_base_ms();
        event.on_ms += base;
        event.off_ms += base;
        Some(event)
    }

    /// Schedule an already humanized note (NoteOn, NoteOff, explain record).
    pub fn schedule_humanized_note(&mut self, intent: &NoteIntent, event: &HumanizedEvent) {
        if !self.is_running() {
            return;
        }
        let (Some(channel), Some(note)) = (valid_channel(intent.channel), valid_data(intent.note)) else {
            return;
        };
        if !(1..=127).contains(&event.velocity) || event.off_ms <= event.on_ms {
            log::debug!("[SCHED] Discarding humanized note from '{}'", intent.agent);
            return;
        }

        let note_id = self.next_note_id();
        self.scheduler.schedule(ScheduledEvent::new(
            event.on_ms,
            EventKind::NoteOn {
                channel,
                note,
                velocity: event.velocity,
                note_id: Some(note_id),
            },
        ));
        self.scheduler.schedule(ScheduledEvent::new(
            event.off_ms,
            EventKind::NoteOff {
                channel,
                note,
                note_id: Some(note_id),
            },
        ));

        let record = ExplainRecord {
            event_kind: ExplainKind::Note,
            agent: intent.agent.clone(),
            logic_tag: intent.logic_tag.clone(),
            grid_pos: event.grid_pos.clone(),
            groove_template: event.groove_template.clone(),
            timing_offset_ms: event.timing_offset_ms,
            velocity_adjustment: event.velocity_adjustment,
            humanize_seed: event.humanize_seed,
            channel,
            note: Some(note),
            velocity: Some(event.velocity),
            cc: None,
            cc_value: None,
            on_ms: event.on_ms,
            off_ms: event.off_ms,
            tempo_bpm: self.bpm,
            ts_num: self.ts.num,
            ts_den: self.ts.den,
            engine_now_ms: self.elapsed_ms(),
        };
        self.publish(record, event.on_ms);
    }

    /// Schedule a control change slightly ahead of its grid position.
    pub fn schedule_cc(&mut self, intent: &CcIntent) {
        if !self.is_running() {
            return;
        }
        let (Some(channel), Some(cc), Some(value)) = (
            valid_channel(intent.channel),
            valid_data(intent.cc),
            valid_data(intent.value),
        ) else {
            log::debug!("[SCHED] Discarding CC intent from '{}'", intent.agent);
            return;
        };

        let grid_ms = intent.start.to_ms(self.ts, self.bpm) + self.grid_base_ms();
        let lead = if intent.structural {
            CC_LEAD_STRUCTURAL_MS
        } else {
            CC_LEAD_MS
        };
        let on_ms = (grid_ms - lead).max(0);

        self.scheduler.schedule(ScheduledEvent::new(
            on_ms,
            EventKind::ControlChange { channel, cc, value },
        ));

        let record = ExplainRecord {
            event_kind: ExplainKind::Cc,
            agent: intent.agent.clone(),
            logic_tag: intent.logic_tag.clone(),
            grid_pos: intent.start.describe(self.ts),
            groove_template: String::new(),
            timing_offset_ms: (on_ms - grid_ms) as i32,
            velocity_adjustment: 0,
            humanize_seed: 0,
            channel,
            note: None,
            velocity: None,
            cc: Some(cc),
            cc_value: Some(value),
            on_ms,
            off_ms: on_ms,
            tempo_bpm: self.bpm,
            ts_num: self.ts.num,
            ts_den: self.ts.den,
            engine_now_ms: self.elapsed_ms(),
        };
        self.publish(record, on_ms);
    }

    /// Press a keyswitch `lead_ms` ahead of a grid position.
    pub fn schedule_keyswitch(&mut self, intent: &KeyswitchIntent, start: &GridPos) {
        if !self.is_running() {
            return;
        }
        let grid_ms = start.to_ms(self.ts, self.bpm) + self.grid_base_ms();
        let on_ms = (grid_ms - intent.lead_ms.max(0)).max(0);
        let grid_pos = start.describe(self.ts);
        self.place_keyswitch(intent, on_ms, grid_pos, (on_ms - grid_ms) as i32);
    }

    /// Press a keyswitch at an absolute clock time.
    pub fn schedule_keyswitch_at_ms(&mut self, intent: &KeyswitchIntent, on_ms: i64) {
        if !self.is_running() {
            return;
        }
        self.place_keyswitch(intent, on_ms.max(0), String::new(), 0);
    }

    fn place_keyswitch(&mut self, intent: &KeyswitchIntent, on_ms: i64, grid_pos: String, offset_ms: i32) {
        let (Some(channel), Some(note)) = (valid_channel(intent.channel), valid_data(intent.note)) else {
            log::debug!("[SCHED] Discarding keyswitch from '{}'", intent.agent);
            return;
        };
        let latch = intent.hold_ms <= 0;
        let off_ms = on_ms + intent.hold_ms.max(KEYSWITCH_MIN_HOLD_MS);
        let note_id = self.next_note_id();

        self.scheduler.schedule(ScheduledEvent::new(
            on_ms,
            EventKind::NoteOn {
                channel,
                note,
                velocity: KEYSWITCH_VELOCITY,
                note_id: Some(note_id),
            },
        ));
        if !latch {
            self.scheduler.schedule(ScheduledEvent::new(
                off_ms,
                EventKind::NoteOff {
                    channel,
                    note,
                    note_id: Some(note_id),
                },
            ));
        }

        let record = ExplainRecord {
            event_kind: ExplainKind::Keyswitch,
            agent: intent.agent.clone(),
            logic_tag: intent.logic_tag.clone(),
            grid_pos,
            groove_template: String::new(),
            timing_offset_ms: offset_ms,
            velocity_adjustment: 0,
            humanize_seed: 0,
            channel,
            note: Some(note),
            velocity: Some(KEYSWITCH_VELOCITY),
            cc: None,
            cc_value: None,
            on_ms,
            off_ms: if latch { on_ms } else { off_ms },
            tempo_bpm: self.bpm,
            ts_num: self.ts.num,
            ts_den: self.ts.den,
            engine_now_ms: self.elapsed_ms(),
        };
        self.publish(record, on_ms);
    }

    /// Send a record to planned subscribers now and schedule it for dispatch.
    fn publish(&mut self, record: ExplainRecord, due_ms: i64) {
        self.planned.retain(|tx| tx.send(record.clone()).is_ok());
        self.scheduler
            .schedule(ScheduledEvent::new(due_ms, EventKind::Explain(Box::new(record))));
    }

    fn humanizer_for(&mut self, agent: &str) -> &mut TimingHumanizer {
        let profiles = &self.profiles;
        let template = &self.template;
        self.humanizers.entry(agent.to_string()).or_insert_with(|| {
            let profile = profiles
                .get(agent)
                .cloned()
                .unwrap_or_else(|| InstrumentGrooveProfile::named(agent));
            let mut humanizer = TimingHumanizer::new(profile);
            humanizer.set_template(template.clone());
            humanizer
        })
    }

    /// The first call after `start()` fixes the grid origin in the near future.
    fn grid_base_ms(&mut self) -> i64 {
        if !self.is_running() {
            return 0;
        }
        let now = self.elapsed_ms();
        let guard = self.start_guard_ms;
        *self.grid_base_ms.get_or_insert_with(|| (now + guard).max(0))
    }

    fn next_note_id(&mut self) -> NoteId {
        self.next_note_id = self.next_note_id.wrapping_add(1);
        self.next_note_id
    }
}

impl WakeTarget for Engine {
    fn wake_delay_ms(&self) -> Option<i64> {
        self.scheduler.wake_delay_ms()
    }

    fn on_wake(&mut self) -> usize {
        self.poll()
    }

    fn set_waker(&mut self, waker: Waker) {
        self.scheduler.set_waker(waker);
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("bpm", &self.bpm)
            .field("ts", &self.ts)
            .field("template", &self.template.key())
            .field("agents", &self.humanizers.len())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}
