//! groovelock-core - humanized real-time MIDI scheduling
//!
//! Turns musical intents from virtual band members into precisely timed,
//! humanized MIDI output, and carries live performer input through a bounded
//! ingestion pipeline.
//!
//! - Exact rational musical time and a bar/beat groove grid
//! - Groove and feel templates plus per-performer humanization that is fully
//!   reproducible from a seed
//! - A min-heap event scheduler with an explicit wake deadline
//! - A per-agent scheduling engine with explainability records
//! - A bounded multi-producer queue that never loses note-offs under overload
//!
//! # Usage as a Library
//!
//! ```no_run
//! use groovelock_core::{Engine, GridPos, NoteIntent, PerformanceClock, Rational};
//!
//! let mut engine = Engine::new(PerformanceClock::monotonic());
//! engine.set_tempo_bpm(120);
//! engine.start();
//!
//! // Piano plays middle C on the second eighth of bar 1
//! let pos = GridPos::new(0, Rational::new(1, 8));
//! engine.schedule_note(&NoteIntent::new("Piano", 1, 60, 90, pos));
//!
//! // Drive dispatch from your run loop
//! engine.poll();
//! ```

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod groove;
pub mod ingest;
pub mod midi;
pub mod scheduler;
pub mod timing;
pub mod util;

// Re-export main types
pub use clock::{ManualTime, MonotonicTime, PerformanceClock, TimeSource};
pub use config::Config;
pub use engine::{CcIntent, Engine, KeyswitchIntent, NoteIntent};
pub use error::{Error, Result};
pub use events::{EventKind, ExplainKind, ExplainRecord, NoteId, ScheduledEvent};
pub use groove::{
    FeelTemplate, GrooveRegistry, GrooveTemplate, HumanizedEvent, InstrumentGrooveProfile, StylePreset,
    TimingHumanizer, TimingTemplate,
};
pub use ingest::{Admission, EventSource, IngestionPipeline, LiveProcessor, MidiEvent};
pub use midi::{MidiMessage, MidiOutput, RawMessage, TransportSink};
pub use scheduler::{EventScheduler, SchedulerDriver, Sleeper, ThreadSleeper, WakeTarget, Waker};
pub use timing::{GridPos, Rational, TimeSignature};
pub use util::{StableHash, StableRng};
