//! Live input ingestion: a bounded queue shared by many producers, one
//! worker thread, and the live rig processor that consumes it.

pub mod pipeline;
pub mod processor;
pub mod queue;

pub use pipeline::{EventHandler, IngestionPipeline, PipelineSender};
pub use processor::{LiveProcessor, LiveStatus};
pub use queue::{Admission, BoundedEventQueue, EventSource, MidiEvent};
