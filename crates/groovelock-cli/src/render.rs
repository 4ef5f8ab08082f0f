//! Offline render of a demo comping pattern.
//!
//! Runs the engine against a manual clock, stepping straight from deadline to
//! deadline, so the output is identical on every run for the same config.

use crate::RenderArgs;
use anyhow::{Context, Result};
use groovelock_core::{
    CcIntent, Config, Engine, EventKind, GridPos, GrooveRegistry, ManualTime, NoteIntent, PerformanceClock,
    Rational, ScheduledEvent,
};
use serde::Serialize;
use std::io::{self, Write};
use std::sync::Arc;

const PIANO: &str = "Piano";
const BASS: &str = "Bass";
const PIANO_CHANNEL: i32 = 1;
const BASS_CHANNEL: i32 = 2;

/// ii-V-I-I in C: (bass line, piano voicing)
const PROGRESSION: [([i32; 4], [i32; 4]); 4] = [
    ([38, 41, 45, 48], [62, 65, 69, 72]),
    ([43, 47, 50, 49], [59, 62, 65, 67]),
    ([36, 40, 43, 47], [60, 64, 67, 71]),
    ([48, 47, 45, 37], [60, 64, 67, 71]),
];

/// Safety bound on dispatch steps.
const MAX_STEPS: usize = 1_000_000;

#[derive(Serialize)]
struct EventLine {
    t_ms: i64,
    #[serde(rename = "type")]
    kind: &'static str,
    channel: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    velocity: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cc: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<u8>,
}

impl EventLine {
    fn from_event(event: &ScheduledEvent) -> Option<Self> {
        let line = |kind: &'static str, channel: u8| EventLine {
            t_ms: event.due_ms,
            kind,
            channel,
            note: None,
            velocity: None,
            cc: None,
            value: None,
        };
        match event.kind {
            EventKind::NoteOn {
                channel,
                note,
                velocity,
                ..
            } => Some(EventLine {
                note: Some(note),
                velocity: Some(velocity),
                ..line("note_on", channel)
            }),
            EventKind::NoteOff { channel, note, .. } => Some(EventLine {
                note: Some(note),
                ..line("note_off", channel)
            }),
            EventKind::AllNotesOff { channel } => Some(line("all_notes_off", channel)),
            EventKind::ControlChange { channel, cc, value } => Some(EventLine {
                cc: Some(cc),
                value: Some(value),
                ..line("cc", channel)
            }),
            EventKind::Explain(_) => None,
        }
    }
}

/// Render the demo pattern to stdout.
pub fn render(config: &Config, args: RenderArgs) -> Result<()> {
    let registry = GrooveRegistry::builtins();
    let mut config = config.clone();
    if let Some(bpm) = args.bpm {
        config.engine.bpm = bpm;
    }
    if let Some(template) = args.template {
        config.engine.template = template;
    }
    if args.preset.is_some() {
        config.engine.style_preset = args.preset;
    }

    let time = ManualTime::new(0);
    let mut engine = Engine::new(PerformanceClock::new(Arc::new(time.clone())));
    config.apply_to_engine(&mut engine, &registry);

    log::info!(
        "Rendering {} bars at {} bpm, {}/{}, template '{}'",
        args.bars,
        engine.tempo_bpm(),
        engine.time_signature().num,
        engine.time_signature().den,
        engine.template().key()
    );

    let dispatched = engine.scheduler_mut().subscribe();
    engine.start();
    for bar in 0..args.bars {
        schedule_bar(&mut engine, bar);
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut steps = 0;
    while let Some(deadline) = engine.next_deadline() {
        time.set_ms(deadline);
        engine.poll();
        for event in dispatched.try_iter() {
            write_event(&mut out, &event, args.explain)?;
        }
        steps += 1;
        if steps >= MAX_STEPS {
            log::warn!("Stopping render after {} steps", steps);
            break;
        }
    }
    engine.stop();
    for event in dispatched.try_iter() {
        write_event(&mut out, &event, args.explain)?;
    }
    out.flush().context("Failed to flush output")?;
    Ok(())
}

fn write_event(out: &mut impl Write, event: &ScheduledEvent, explain: bool) -> Result<()> {
    let json = match (&event.kind, EventLine::from_event(event)) {
        (EventKind::Explain(record), _) if explain => record.to_json()?,
        (_, Some(line)) => serde_json::to_string(&line)?,
        _ => return Ok(()),
    };
    writeln!(out, "{}", json).context("Failed to write output")?;
    Ok(())
}

/// Walking bass on every beat, piano on the downbeat (time-locked to the
/// bass) and on the upbeat of the last beat, sustain pedal per bar.
fn schedule_bar(engine: &mut Engine, bar: u32) {
    let ts = engine.time_signature();
    let (bass_line, voicing) = PROGRESSION[bar as usize % PROGRESSION.len()];
    let beats = ts.num.max(1);
    let bar_index = bar as i32;
    let downbeat = GridPos::from_bar_beat_tuplet(bar_index, 0, 0, 1, ts);

    let mut pedal = CcIntent::new(PIANO, PIANO_CHANNEL, 64, 127, downbeat);
    pedal.structural = true;
    engine.schedule_cc(&pedal);

    // Downbeat: bass and piano root land together.
    let bass_one = NoteIntent::new(BASS, BASS_CHANNEL, bass_line[0], 92, downbeat)
        .structural(true)
        .with_logic_tag("walk:root");
    let bass_event = engine.humanize_intent(&bass_one);
    if let Some(bass_event) = &bass_event {
        engine.schedule_humanized_note(&bass_one, bass_event);
    }
    for &note in &voicing {
        let intent = NoteIntent::new(PIANO, PIANO_CHANNEL, note, 78, downbeat)
            .with_duration(Rational::new(1, 2))
            .structural(true)
            .with_logic_tag("comp:downbeat");
        let Some(mut event) = engine.humanize_intent(&intent) else {
            continue;
        };
        if let Some(bass_event) = &bass_event {
            let shift = bass_event.on_ms - event.on_ms;
            event.on_ms += shift;
            event.off_ms += shift;
            event.timing_offset_ms += shift as i32;
        }
        engine.schedule_humanized_note(&intent, &event);
    }

    for beat in 1..beats {
        let pos = GridPos::from_bar_beat_tuplet(bar_index, beat, 0, 1, ts);
        let note = bass_line[(beat as usize).min(bass_line.len() - 1)];
        engine.schedule_note(&NoteIntent::new(BASS, BASS_CHANNEL, note, 84, pos).with_logic_tag("walk"));
    }

    let push = GridPos::from_bar_beat_tuplet(bar_index, beats - 1, 1, 2, ts);
    for &note in &voicing[1..] {
        engine.schedule_note(
            &NoteIntent::new(PIANO, PIANO_CHANNEL, note, 70, push)
                .with_duration(Rational::new(1, 8))
                .with_logic_tag("comp:push"),
        );
    }

    let lift = GridPos::from_bar_beat_tuplet(bar_index, beats - 1, 0, 1, ts);
    engine.schedule_cc(&CcIntent::new(PIANO, PIANO_CHANNEL, 64, 0, lift));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_line_shapes() {
        let on = ScheduledEvent::new(
            35,
            EventKind::NoteOn {
                channel: 1,
                note: 60,
                velocity: 80,
                note_id: Some(3),
            },
        );
        let json = serde_json::to_string(&EventLine::from_event(&on).unwrap()).unwrap();
        assert_eq!(json, r#"{"t_ms":35,"type":"note_on","channel":1,"note":60,"velocity":80}"#);

        let cc = ScheduledEvent::new(
            23,
            EventKind::ControlChange {
                channel: 1,
                cc: 64,
                value: 0,
            },
        );
        let json = serde_json::to_string(&EventLine::from_event(&cc).unwrap()).unwrap();
        assert_eq!(json, r#"{"t_ms":23,"type":"cc","channel":1,"cc":64,"value":0}"#);
    }

    #[test]
    fn test_render_is_deterministic() {
        fn capture() -> Vec<String> {
            let time = ManualTime::new(0);
            let mut engine = Engine::new(PerformanceClock::new(Arc::new(time.clone())));
            Config::default().apply_to_engine(&mut engine, &GrooveRegistry::builtins());
            let rx = engine.scheduler_mut().subscribe();
            engine.start();
            for bar in 0..2 {
                schedule_bar(&mut engine, bar);
            }
            let mut lines = Vec::new();
            while let Some(deadline) = engine.next_deadline() {
                time.set_ms(deadline);
                engine.poll();
                for event in rx.try_iter() {
                    let mut buf = Vec::new();
                    write_event(&mut buf, &event, true).unwrap();
                    lines.push(String::from_utf8(buf).unwrap());
                }
            }
            lines
        }

        let first = capture();
        assert!(!first.is_empty());
        assert_eq!(first, capture());
    }
}
