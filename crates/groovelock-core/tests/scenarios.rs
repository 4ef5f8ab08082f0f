//! End-to-end scenarios across the grid, humanizer, scheduler, engine and
//! ingestion pipeline.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use groovelock_core::config::LiveSettings;
use groovelock_core::ingest::BoundedEventQueue;
use groovelock_core::midi::RecordingOutput;
use groovelock_core::{
    EventKind, EventScheduler, EventSource, FeelTemplate, GridPos, GrooveRegistry, IngestionPipeline,
    InstrumentGrooveProfile, LiveProcessor, ManualTime, MidiEvent, NoteIntent, PerformanceClock, RawMessage,
    Rational, ScheduledEvent, SchedulerDriver, ThreadSleeper, TimeSignature, TimingHumanizer, TimingTemplate,
    TransportSink,
};

fn quiet(agent: &str) -> InstrumentGrooveProfile {
    InstrumentGrooveProfile {
        phrase_timing_max_ms: 0,
        phrase_velocity_max: 0.0,
        ..InstrumentGrooveProfile::named(agent)
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn raw(source: EventSource, bytes: &[u8]) -> MidiEvent {
    MidiEvent::raw(source, RawMessage::new(bytes).unwrap())
}

#[test]
fn test_straight_quarter_note_is_untouched() {
    let ts = TimeSignature::new(4, 4);
    let mut humanizer = TimingHumanizer::new(quiet("Piano"));
    humanizer.set_template(TimingTemplate::Feel(FeelTemplate::swing_2to1(0.0)));

    let event = humanizer.humanize_note(&GridPos::new(0, Rational::ZERO), ts, 120, 96, Rational::new(1, 4), false);
    assert_eq!(event.on_ms, 0);
    assert_eq!(event.off_ms, 500);
    assert_eq!(event.velocity, 96);
    assert_eq!(event.grid_pos, "1.1@0/1w");
}

#[test]
fn test_swing_template_delays_upbeat() {
    let ts = TimeSignature::new(4, 4);
    let upbeat = GridPos::from_bar_beat_tuplet(0, 0, 1, 2, ts);

    let feel = FeelTemplate::swing_2to1(1.0);
    assert_eq!(feel.offset_ms_for(&upbeat, ts, 120), 83);

    let registry = GrooveRegistry::builtins();
    let groove = registry.groove_template("jazz_swing_2to1").unwrap();
    let full = groove.as_ref().clone().with_amount(1.0);
    assert_eq!(full.offset_ms_for(&upbeat, ts, 120), 83);
    assert_eq!(full.offset_ms_for(&upbeat, ts, 120), full.offset_ms_for(&upbeat, ts, 120));
}

#[test]
fn test_full_queue_keeps_note_off() {
    let mut queue = BoundedEventQueue::new(4);
    for n in 0..4 {
        assert!(queue.try_push(raw(EventSource::Performer, &[0x90, 60 + n, 100])).is_queued());
    }
    let off = raw(EventSource::Performer, &[0x80, 60, 0]);
    queue.try_push(off.clone());

    assert!(queue.len() <= 4);
    assert!(queue.contains(&off));
    assert_eq!(queue.dropped(), 1);
}

#[test]
fn test_critical_event_survives_sustained_overload() {
    init_logging();
    let capacity = 64;
    let mut queue = BoundedEventQueue::new(capacity);
    for n in 0..capacity + 1000 {
        queue.try_push(raw(EventSource::VirtualBand, &[0x90, (n % 128) as u8, 80]));
    }
    assert_eq!(queue.dropped(), 1000);

    let off = raw(EventSource::VirtualBand, &[0xB0, 123, 0]);
    assert!(queue.try_push(off.clone()).is_queued());
    assert!(queue.contains(&off));
    assert_eq!(queue.len(), capacity);
}

#[test]
fn test_scheduler_dispatches_in_due_order_to_transport() {
    let time = ManualTime::new(0);
    let mut clock = PerformanceClock::new(Arc::new(time.clone()));
    clock.start();
    let mut scheduler = EventScheduler::new(clock);

    let out = RecordingOutput::default();
    scheduler.add_listener(TransportSink::new(out.clone()).into_listener());

    for (due, note) in [(300, 64), (100, 60), (200, 62), (100, 61), (0, 59)] {
        scheduler.schedule(ScheduledEvent::new(
            due,
            EventKind::NoteOn {
                channel: 3,
                note,
                velocity: 70,
                note_id: None,
            },
        ));
    }

    time.set_ms(250);
    assert_eq!(scheduler.on_wake(), 4);
    time.set_ms(300);
    assert_eq!(scheduler.on_wake(), 1);

    let notes: Vec<u8> = out.messages().iter().map(|m| m.as_slice()[1]).collect();
    assert_eq!(notes, vec![59, 60, 61, 62, 64]);
    assert!(out.messages().iter().all(|m| m.status() == 0x92));
}

#[test]
fn test_engine_driven_by_driver_thread() {
    let time = ManualTime::new(0);
    let mut engine = groovelock_core::Engine::new(PerformanceClock::new(Arc::new(time.clone())));
    engine.set_instrument_profile("Bass", quiet("Bass"));

    let out = RecordingOutput::default();
    engine
        .scheduler_mut()
        .add_listener(TransportSink::new(out.clone()).into_listener());
    engine.start();

    let ts = TimeSignature::new(4, 4);
    for beat in 0..4 {
        let pos = GridPos::from_bar_beat_tuplet(0, beat, 0, 1, ts);
        engine.schedule_note(&NoteIntent::new("Bass", 2, 36 + beat, 90, pos).with_duration(Rational::new(1, 8)));
    }

    let engine = Arc::new(Mutex::new(engine));
    let mut driver = SchedulerDriver::spawn(Arc::clone(&engine), ThreadSleeper);
    time.set_ms(2_500);

    let deadline = Instant::now() + Duration::from_secs(5);
    while out.messages().len() < 8 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(2));
    }
    driver.stop();

    let sent: Vec<Vec<u8>> = out.messages().iter().map(|m| m.as_slice().to_vec()).collect();
    assert_eq!(
        sent,
        vec![
            vec![0x91, 36, 90],
            vec![0x81, 36, 0],
            vec![0x91, 37, 90],
            vec![0x81, 37, 0],
            vec![0x91, 38, 90],
            vec![0x81, 38, 0],
            vec![0x91, 39, 90],
            vec![0x81, 39, 0],
        ]
    );
}

#[test]
fn test_live_pipeline_end_to_end() {
    init_logging();
    let out = RecordingOutput::default();
    let (mut processor, status) = LiveProcessor::new(LiveSettings::default(), out.clone());
    processor.initialize();
    out.clear();

    let mut pipeline = IngestionPipeline::spawn(processor, 128, 1024).unwrap();
    let performer = pipeline.sender();
    let api = pipeline.sender();

    api.try_enqueue(MidiEvent::TransposeChange { semitones: 2 });
    performer.try_enqueue(raw(EventSource::Performer, &[0x90, 60, 100]));
    performer.try_enqueue(raw(EventSource::Performer, &[0xF8]));
    performer.try_enqueue(raw(EventSource::Performer, &[0x80, 60, 0]));

    let processor = pipeline.shutdown().unwrap();
    assert_eq!(processor.transpose(), 2);

    let sent = out.messages();
    assert_eq!(sent[0].as_slice(), &[0x90, 62, 100]);
    assert_eq!(sent[1].as_slice(), &[0x80, 62, 0]);
    // the rest is the panic pass
    assert_eq!(sent.len(), 2 + 16 * (128 * 2 + 3));

    assert!(status.try_iter().count() >= 2);
}
