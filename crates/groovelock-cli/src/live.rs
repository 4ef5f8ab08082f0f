//! Live mode: MIDI inputs -> ingestion pipeline -> live processor -> output.

use anyhow::{Context, Result};
use groovelock_core::ingest::LiveStatus;
use groovelock_core::midi::native::{self, InputBinding, MidirOutput};
use groovelock_core::{Config, EventSource, IngestionPipeline, LiveProcessor, MidiEvent, RawMessage};
use signal_hook::consts::{SIGINT, SIGTERM};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Print available ports.
pub fn list_ports() -> Result<()> {
    println!("MIDI inputs:");
    for port in native::list_input_ports().context("Failed to list MIDI inputs")? {
        println!("  [{}] {}", port.index, port.name);
    }
    println!();
    println!("MIDI outputs:");
    for port in native::list_output_ports().context("Failed to list MIDI outputs")? {
        println!("  [{}] {}", port.index, port.name);
    }
    Ok(())
}

/// Run until SIGINT/SIGTERM, then close inputs, stop the worker and panic.
pub fn run(config: &Config) -> Result<()> {
    let midi = &config.midi;
    let output_pattern = midi
        .output
        .as_deref()
        .context("No output port configured (set [midi] output)")?;
    let output = MidirOutput::connect(&midi.client_name, output_pattern)
        .with_context(|| format!("Failed to open MIDI output '{}'", output_pattern))?;

    let (mut processor, status) = LiveProcessor::new(config.live.clone(), output);
    processor.initialize();

    let mut pipeline = IngestionPipeline::spawn(
        processor,
        config.ingest.queue_capacity,
        config.ingest.drop_log_interval,
    )
    .context("Failed to start ingestion pipeline")?;

    let mut inputs: Vec<InputBinding> = Vec::new();
    for (source, pattern) in [
        (EventSource::Performer, &midi.performer_input),
        (EventSource::Voice, &midi.voice_input),
        (EventSource::VirtualBand, &midi.band_input),
    ] {
        let Some(pattern) = pattern else {
            continue;
        };
        let sender = pipeline.sender();
        let binding = native::connect_input(&midi.client_name, pattern, move |bytes| {
            if let Some(message) = RawMessage::new(bytes) {
                sender.try_enqueue(MidiEvent::raw(source, message));
            }
        })
        .with_context(|| format!("Failed to open {:?} input '{}'", source, pattern))?;
        inputs.push(binding);
    }
    if inputs.is_empty() {
        log::warn!("No input ports configured; only program changes from startup will be sent");
    }

    let term = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, Arc::clone(&term)).context("Failed to register SIGINT handler")?;
    signal_hook::flag::register(SIGTERM, Arc::clone(&term)).context("Failed to register SIGTERM handler")?;

    log::info!("Live mode running with {} input(s); press Ctrl+C to stop", inputs.len());
    while !term.load(Ordering::Relaxed) {
        for change in status.try_iter() {
            report(&change);
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    log::info!("Shutting down");
    drop(inputs);
    pipeline.shutdown();
    Ok(())
}

fn report(status: &LiveStatus) {
    match status {
        LiveStatus::ProgramChanged { index, name } => log::info!("Program {}: {}", index + 1, name),
        LiveStatus::TrackChanged { track, enabled } => {
            log::info!("{} {}", track, if *enabled { "on" } else { "off" })
        }
        LiveStatus::TransposeChanged { semitones } => log::info!("Transpose {:+}", semitones),
    }
}
