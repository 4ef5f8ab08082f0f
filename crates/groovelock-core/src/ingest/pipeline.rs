//! Multi-producer, single-consumer ingestion with a dedicated worker thread.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use super::queue::{Admission, BoundedEventQueue, MidiEvent};
use crate::error::Result;

/// Consumer side of the pipeline. Runs on the worker thread.
pub trait EventHandler: Send + 'static {
    /// Process one event to completion.
    fn handle(&mut self, event: MidiEvent);

    /// Silence all hardware output. Called once after the worker has exited.
    fn panic_silence(&mut self);
}

struct QueueState {
    queue: BoundedEventQueue,
    running: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable producer handle. Never blocks beyond the queue mutex.
#[derive(Clone)]
pub struct PipelineSender {
    shared: Arc<Shared>,
}

impl PipelineSender {
    /// Offer an event. After shutdown everything is dropped.
    pub fn try_enqueue(&self, event: MidiEvent) -> Admission {
        let admission = {
            let mut state = self.shared.lock();
            if !state.running {
                log::debug!("[INGEST] Pipeline stopped, ignoring {:?}", event);
                return Admission::Dropped;
            }
            state.queue.try_push(event)
        };
        if admission.is_queued() {
            self.shared.ready.notify_one();
        }
        admission
    }

    pub fn dropped(&self) -> u64 {
        self.shared.lock().queue.dropped()
    }

    pub fn len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for PipelineSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineSender").field("queued", &self.len()).finish()
    }
}

/// Bounded queue plus one worker thread feeding an [`EventHandler`].
///
/// Shutdown is two-phase: the worker is stopped and joined first (it drains
/// whatever is still queued), then the handler's panic pass runs on the
/// calling thread, so panic output never interleaves with worker sends.
pub struct IngestionPipeline<H: EventHandler> {
    sender: PipelineSender,
    worker: Option<JoinHandle<H>>,
}

impl<H: EventHandler> IngestionPipeline<H> {
    pub fn spawn(handler: H, capacity: usize, drop_log_interval: u64) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                queue: BoundedEventQueue::with_drop_log_interval(capacity, drop_log_interval),
                running: true,
            }),
            ready: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("groovelock-ingest".to_string())
            .spawn(move || run_worker(worker_shared, handler))?;

        log::info!("[INGEST] Pipeline started (capacity {})", capacity.max(1));
        Ok(Self {
            sender: PipelineSender { shared },
            worker: Some(worker),
        })
    }

    pub fn sender(&self) -> PipelineSender {
        self.sender.clone()
    }

    pub fn try_enqueue(&self, event: MidiEvent) -> Admission {
        self.sender.try_enqueue(event)
    }

    pub fn dropped(&self) -> u64 {
        self.sender.dropped()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Stop the worker, join it, then run the panic pass.
    ///
    /// Returns the handler, or `None` if already shut down or the worker
    /// panicked.
    pub fn shutdown(&mut self) -> Option<H> {
        let worker = self.worker.take()?;
        self.sender.shared.lock().running = false;
        self.sender.shared.ready.notify_all();

        match worker.join() {
            Ok(mut handler) => {
                handler.panic_silence();
                log::info!(
                    "[INGEST] Pipeline stopped ({} events lost to overload)",
                    self.dropped()
                );
                Some(handler)
            }
            Err(_) => {
                log::error!("[INGEST] Worker thread panicked; skipping panic pass");
                None
            }
        }
    }
}

impl<H: EventHandler> Drop for IngestionPipeline<H> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker<H: EventHandler>(shared: Arc<Shared>, mut handler: H) -> H {
    log::debug!("[INGEST] Worker thread started");
    loop {
        let next = {
            let mut state = shared.lock();
            loop {
                if let Some(event) = state.queue.pop() {
                    break Some(event);
                }
                if !state.running {
                    break None;
                }
                state = shared.ready.wait(state).unwrap_or_else(PoisonError::into_inner);
            }
        };
        match next {
            Some(event) => handler.handle(event),
            None => break,
        }
    }
    log::debug!("[INGEST] Worker thread stopped");
    handler
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::queue::EventSource;
    use crate::midi::RawMessage;
    use std::sync::mpsc;
    use std::time::Duration;

    #[derive(Default)]
    struct Collecting {
        seen: Vec<MidiEvent>,
        panicked: bool,
    }

    impl EventHandler for Collecting {
        fn handle(&mut self, event: MidiEvent) {
            assert!(!self.panicked, "event handled after panic pass");
            self.seen.push(event);
        }

        fn panic_silence(&mut self) {
            self.panicked = true;
        }
    }

    fn note(n: u8) -> MidiEvent {
        MidiEvent::raw(EventSource::Performer, RawMessage::new(&[0x90, n, 100]).unwrap())
    }

    #[test]
    fn test_delivers_in_order_then_panics() {
        let mut pipeline = IngestionPipeline::spawn(Collecting::default(), 256, 1024).unwrap();
        for n in 0..100 {
            assert!(pipeline.try_enqueue(note(n)).is_queued());
        }
        let handler = pipeline.shutdown().unwrap();
        assert!(handler.panicked);
        let expected: Vec<MidiEvent> = (0..100).map(note).collect();
        assert_eq!(handler.seen, expected);
    }

    #[test]
    fn test_enqueue_after_shutdown_is_dropped() {
        let mut pipeline = IngestionPipeline::spawn(Collecting::default(), 4, 1024).unwrap();
        let sender = pipeline.sender();
        assert!(pipeline.shutdown().is_some());
        assert!(pipeline.shutdown().is_none());
        assert_eq!(sender.try_enqueue(note(1)), Admission::Dropped);
        assert!(!pipeline.is_running());
    }

    struct Gated {
        gate: mpsc::Receiver<()>,
        seen: Arc<Mutex<Vec<MidiEvent>>>,
    }

    impl EventHandler for Gated {
        fn handle(&mut self, event: MidiEvent) {
            let _ = self.gate.recv_timeout(Duration::from_secs(5));
            self.seen.lock().unwrap().push(event);
        }

        fn panic_silence(&mut self) {}
    }

    #[test]
    fn test_critical_event_survives_overload() {
        let (open, gate) = mpsc::channel();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = IngestionPipeline::spawn(
            Gated {
                gate,
                seen: Arc::clone(&seen),
            },
            8,
            1024,
        )
        .unwrap();

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let sender = pipeline.sender();
                thread::spawn(move || {
                    for n in 0..500u32 {
                        sender.try_enqueue(note((n % 100) as u8));
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        let off = MidiEvent::raw(EventSource::Performer, RawMessage::new(&[0x80, 60, 0]).unwrap());
        assert!(pipeline.try_enqueue(off.clone()).is_queued());
        assert!(pipeline.dropped() > 0);

        drop(open);
        pipeline.shutdown().unwrap();
        assert!(seen.lock().unwrap().contains(&off));
    }
}
