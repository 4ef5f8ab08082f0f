//! Min-heap event dispatcher with a single wake deadline.
//!
//! The scheduler never sleeps on its own. It reports the next deadline via
//! [`EventScheduler::next_deadline`] and expects its owner to call
//! [`EventScheduler::on_wake`] at (or after) that time. [`SchedulerDriver`]
//! does exactly that on a dedicated thread, parked until the deadline or a
//! [`Waker`] signal; tests step a [`ManualTime`] instead.
//!
//! [`ManualTime`]: crate::clock::ManualTime

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use crate::clock::PerformanceClock;
use crate::events::{EventKind, NoteId, ScheduledEvent};

/// Callback invoked for every dispatched event.
pub type Listener = Box<dyn FnMut(&ScheduledEvent) + Send>;

/// Heap entry; `seq` breaks due-time ties in insertion order.
#[derive(Debug)]
struct Pending {
    due_ms: i64,
    seq: u64,
    event: ScheduledEvent,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.due_ms == other.due_ms && self.seq == other.seq
    }
}

impl Eq for Pending {}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (self.due_ms, self.seq).cmp(&(other.due_ms, other.seq))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// Real-time dispatcher: Idle (no deadline) or Armed (deadline set).
///
/// Invariant: when armed, the deadline is never later than the earliest
/// pending due time.
pub struct EventScheduler {
    clock: PerformanceClock,
    heap: BinaryHeap<Reverse<Pending>>,
    next_seq: u64,
    deadline: Option<i64>,
    /// (channel, note) -> id of the sounding instance
    active: HashMap<(u8, u8), Option<NoteId>>,
    listeners: Vec<Listener>,
    subscribers: Vec<Sender<ScheduledEvent>>,
    waker: Option<Waker>,
}

impl EventScheduler {
    pub fn new(clock: PerformanceClock) -> Self {
        Self {
            clock,
            heap: BinaryHeap::new(),
            next_seq: 0,
            deadline: None,
            active: HashMap::new(),
            listeners: Vec::new(),
            subscribers: Vec::new(),
            waker: None,
        }
    }

    pub fn clock(&self) -> &PerformanceClock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut PerformanceClock {
        &mut self.clock
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.elapsed_ms()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Register a callback listener.
    pub fn add_listener<F>(&mut self, listener: F)
    where
        F: FnMut(&ScheduledEvent) + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Subscribe to dispatched events through a channel.
    ///
    /// Dropping the receiver unsubscribes on the next dispatch.
    pub fn subscribe(&mut self) -> Receiver<ScheduledEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Queue an event.
    ///
    /// Dropped when the clock is not running.
    pub fn schedule(&mut self, event: ScheduledEvent) {
        if !self.clock.is_running() {
            log::debug!("[SCHED] Clock stopped, dropping event due at {}ms", event.due_ms);
            return;
        }

        let due_ms = event.due_ms;
        self.heap.push(Reverse(Pending {
            due_ms,
            seq: self.next_seq,
            event,
        }));
        self.next_seq += 1;

        // A later event leaves an earlier deadline alone; it is picked up on re-arm.
        let min_due = self.heap.peek().map_or(due_ms, |Reverse(p)| p.due_ms);
        let deadline = min_due.max(self.now_ms());
        if self.deadline.map_or(true, |armed| deadline < armed) {
            self.deadline = Some(deadline);
            self.wake_driver();
        }
    }

    /// Signal used to interrupt a parked driver when the deadline moves.
    pub fn set_waker(&mut self, waker: Waker) {
        self.waker = Some(waker);
    }

    fn wake_driver(&self) {
        if let Some(waker) = &self.waker {
            waker.wake();
        }
    }

    /// Absolute clock time of the armed wake-up, if any.
    pub fn next_deadline(&self) -> Option<i64> {
        self.deadline
    }

    /// Milliseconds until the armed wake-up (0 when already due).
    ///
    /// `None` while idle or while the clock is stopped.
    pub fn wake_delay_ms(&self) -> Option<i64> {
        if !self.clock.is_running() {
            return None;
        }
        self.deadline.map(|d| (d - self.now_ms()).max(0))
    }

    /// Dispatch every event due at the current clock time.
    ///
    /// Returns the number of events emitted. Events not yet due stay queued
    /// and the deadline is re-armed for the new minimum.
    pub fn on_wake(&mut self) -> usize {
        if !self.clock.is_running() {
            return 0;
        }

        self.deadline = None;
        let now = self.now_ms();
        let mut emitted = 0;
        while self.heap.peek().is_some_and(|Reverse(p)| p.due_ms <= now) {
            if let Some(Reverse(pending)) = self.heap.pop() {
                if self.dispatch(pending.event) {
                    emitted += 1;
                }
            }
        }

        if let Some(Reverse(next)) = self.heap.peek() {
            self.deadline = Some(next.due_ms.max(now));
        }
        emitted
    }

    /// Discard pending events and disarm. Sounding notes are left alone.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.deadline = None;
        self.wake_driver();
    }

    /// Release every sounding note, then clear.
    ///
    /// Emits a NoteOff per active note and an AllNotesOff on each channel
    /// that had one. Works whether or not the clock is running.
    pub fn panic_silence(&mut self) {
        self.deadline = None;
        let now = self.now_ms();

        let mut sounding: Vec<(u8, u8)> = self.active.drain().map(|(key, _)| key).collect();
        sounding.sort_unstable();

        let mut channels: Vec<u8> = Vec::new();
        for (channel, note) in sounding {
            self.emit(&ScheduledEvent::new(
                now,
                EventKind::NoteOff {
                    channel,
                    note,
                    note_id: None,
                },
            ));
            if channels.last() != Some(&channel) {
                channels.push(channel);
            }
        }
        for channel in channels {
            self.emit(&ScheduledEvent::new(now, EventKind::AllNotesOff { channel }));
        }

        log::debug!("[SCHED] Panic silence, discarding {} pending events", self.heap.len());
        self.heap.clear();
    }

    /// Number of notes currently sounding.
    pub fn active_note_count(&self) -> usize {
        self.active.len()
    }

    fn dispatch(&mut self, event: ScheduledEvent) -> bool {
        match &event.kind {
            EventKind::NoteOn {
                channel,
                note,
                note_id,
                ..
            } => {
                self.active.insert((*channel, *note), *note_id);
            }
            EventKind::NoteOff {
                channel,
                note,
                note_id,
            } => {
                let key = (*channel, *note);
                if note_id.is_some() && self.active.get(&key) != Some(note_id) {
                    log::trace!("[SCHED] Suppressed stale note-off ch{} note {}", channel, note);
                    return false;
                }
                self.active.remove(&key);
            }
            EventKind::AllNotesOff { channel } => {
                self.active.retain(|(ch, _), _| ch != channel);
            }
            EventKind::ControlChange { .. } | EventKind::Explain(_) => {}
        }
        self.emit(&event);
        true
    }

    fn emit(&mut self, event: &ScheduledEvent) {
        for listener in &mut self.listeners {
            listener(event);
        }
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl std::fmt::Debug for EventScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventScheduler")
            .field("clock", &self.clock)
            .field("pending", &self.heap.len())
            .field("deadline", &self.deadline)
            .field("active", &self.active.len())
            .finish()
    }
}

/// Something with a wake deadline that a [`SchedulerDriver`] can service.
pub trait WakeTarget: Send + 'static {
    /// Milliseconds until the next wake-up, `None` when idle.
    fn wake_delay_ms(&self) -> Option<i64>;
    /// Dispatch whatever is due.
    fn on_wake(&mut self) -> usize;
    /// Install the signal fired when an earlier deadline is armed.
    fn set_waker(&mut self, waker: Waker);
}

impl WakeTarget for EventScheduler {
    fn wake_delay_ms(&self) -> Option<i64> {
        EventScheduler::wake_delay_ms(self)
    }

    fn on_wake(&mut self) -> usize {
        EventScheduler::on_wake(self)
    }

    fn set_waker(&mut self, waker: Waker) {
        EventScheduler::set_waker(self, waker);
    }
}

/// Interrupts a driver's wait. Signals coalesce; at most one is pending.
#[derive(Clone, Debug)]
pub struct Waker {
    tx: Sender<()>,
}

impl Waker {
    /// A waker and the receiver a [`Sleeper`] waits on.
    pub fn new() -> (Self, Receiver<()>) {
        let (tx, rx) = bounded(1);
        (Self { tx }, rx)
    }

    pub fn wake(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Blocking wait abstraction so the driver loop can run against fake time.
pub trait Sleeper: Send + 'static {
    /// Block until `timeout` elapses or `wake` fires. `None` waits for
    /// `wake` only.
    fn wait(&self, wake: &Receiver<()>, timeout: Option<Duration>);
}

/// Parks the current thread on the wake channel.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn wait(&self, wake: &Receiver<()>, timeout: Option<Duration>) {
        match timeout {
            Some(timeout) => {
                let _ = wake.recv_timeout(timeout);
            }
            None => {
                let _ = wake.recv();
            }
        }
    }
}

/// Runs a shared [`WakeTarget`]'s wake loop on a dedicated thread.
///
/// The thread sleeps until the armed deadline, or indefinitely while idle,
/// and is woken early when an earlier deadline is armed or on [`stop`].
///
/// [`stop`]: SchedulerDriver::stop
pub struct SchedulerDriver {
    running: Arc<AtomicBool>,
    waker: Waker,
    handle: Option<JoinHandle<()>>,
}

impl SchedulerDriver {
    pub fn spawn<W: WakeTarget, S: Sleeper>(target: Arc<Mutex<W>>, sleeper: S) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let (waker, wake_rx) = Waker::new();
        target
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_waker(waker.clone());

        let handle = thread::Builder::new()
            .name("groovelock-scheduler".to_string())
            .spawn(move || {
                log::debug!("[SCHED] Driver thread started");
                while flag.load(Ordering::Acquire) {
                    let delay = {
                        let mut target = target.lock().unwrap_or_else(PoisonError::into_inner);
                        if target.wake_delay_ms() == Some(0) {
                            target.on_wake();
                        }
                        target.wake_delay_ms()
                    };
                    if !flag.load(Ordering::Acquire) {
                        break;
                    }
                    sleeper.wait(&wake_rx, delay.map(|ms| Duration::from_millis(ms.max(0) as u64)));
                }
                log::debug!("[SCHED] Driver thread stopped");
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("[SCHED] Failed to spawn driver thread: {}", e);
                None
            }
        };

        Self {
            running,
            waker,
            handle,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some() && self.running.load(Ordering::Acquire)
    }

    /// Stop the loop and join the thread.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.waker.wake();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("[SCHED] Driver thread panicked");
            }
        }
    }
}

impl Drop for SchedulerDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualTime;

    fn running_scheduler() -> (EventScheduler, ManualTime) {
        let time = ManualTime::new(0);
        let mut clock = PerformanceClock::new(Arc::new(time.clone()));
        clock.start();
        (EventScheduler::new(clock), time)
    }

    fn cc(due_ms: i64, value: u8) -> ScheduledEvent {
        ScheduledEvent::new(
            due_ms,
            EventKind::ControlChange {
                channel: 1,
                cc: 1,
                value,
            },
        )
    }

    fn note_on(due_ms: i64, note: u8, id: NoteId) -> ScheduledEvent {
        ScheduledEvent::new(
            due_ms,
            EventKind::NoteOn {
                channel: 1,
                note,
                velocity: 90,
                note_id: Some(id),
            },
        )
    }

    fn note_off(due_ms: i64, note: u8, id: NoteId) -> ScheduledEvent {
        ScheduledEvent::new(
            due_ms,
            EventKind::NoteOff {
                channel: 1,
                note,
                note_id: Some(id),
            },
        )
    }

    #[test]
    fn test_dispatches_in_due_order() {
        let (mut sched, time) = running_scheduler();
        let rx = sched.subscribe();
        for (due, value) in [(30, 3), (10, 1), (20, 2), (10, 4), (0, 0)] {
            sched.schedule(cc(due, value));
        }
        time.set_ms(100);
        assert_eq!(sched.on_wake(), 5);

        let got: Vec<(i64, u8)> = rx
            .try_iter()
            .map(|e| match e.kind {
                EventKind::ControlChange { value, .. } => (e.due_ms, value),
                _ => unreachable!(),
            })
            .collect();
        // Equal due times keep insertion order.
        assert_eq!(got, vec![(0, 0), (10, 1), (10, 4), (20, 2), (30, 3)]);
        assert_eq!(sched.next_deadline(), None);
    }

    #[test]
    fn test_deadline_tracks_minimum() {
        let (mut sched, time) = running_scheduler();
        assert_eq!(sched.next_deadline(), None);

        sched.schedule(cc(50, 0));
        assert_eq!(sched.next_deadline(), Some(50));
        sched.schedule(cc(80, 0));
        assert_eq!(sched.next_deadline(), Some(50));
        sched.schedule(cc(20, 0));
        assert_eq!(sched.next_deadline(), Some(20));

        time.set_ms(10);
        assert_eq!(sched.wake_delay_ms(), Some(10));

        // Past-due events arm for "now".
        sched.schedule(cc(5, 0));
        assert_eq!(sched.next_deadline(), Some(10));
        assert_eq!(sched.wake_delay_ms(), Some(0));
    }

    #[test]
    fn test_only_due_events_fire() {
        let (mut sched, time) = running_scheduler();
        sched.schedule(cc(10, 1));
        sched.schedule(cc(40, 2));
        time.set_ms(25);
        assert_eq!(sched.on_wake(), 1);
        assert_eq!(sched.len(), 1);
        assert_eq!(sched.next_deadline(), Some(40));

        // Early wake (timer granularity) does nothing.
        time.set_ms(39);
        assert_eq!(sched.on_wake(), 0);
        assert_eq!(sched.next_deadline(), Some(40));
        time.set_ms(40);
        assert_eq!(sched.on_wake(), 1);
        assert!(sched.is_empty());
    }

    #[test]
    fn test_schedule_without_running_clock_is_noop() {
        let time = ManualTime::new(0);
        let mut sched = EventScheduler::new(PerformanceClock::new(Arc::new(time)));
        sched.schedule(cc(0, 1));
        assert!(sched.is_empty());
        assert_eq!(sched.next_deadline(), None);
    }

    #[test]
    fn test_clear_disarms() {
        let (mut sched, time) = running_scheduler();
        sched.schedule(cc(10, 1));
        sched.clear();
        assert!(sched.is_empty());
        assert_eq!(sched.next_deadline(), None);
        time.set_ms(20);
        assert_eq!(sched.on_wake(), 0);
    }

    #[test]
    fn test_stale_note_off_is_suppressed() {
        let (mut sched, time) = running_scheduler();
        let rx = sched.subscribe();
        // First instance, then a re-trigger before the first release.
        sched.schedule(note_on(0, 60, 1));
        sched.schedule(note_on(10, 60, 2));
        sched.schedule(note_off(15, 60, 1));
        sched.schedule(note_off(30, 60, 2));

        time.set_ms(20);
        sched.on_wake();
        assert_eq!(sched.active_note_count(), 1);
        time.set_ms(30);
        sched.on_wake();
        assert_eq!(sched.active_note_count(), 0);

        let offs = rx
            .try_iter()
            .filter(|e| matches!(e.kind, EventKind::NoteOff { .. }))
            .count();
        assert_eq!(offs, 1);
    }

    #[test]
    fn test_all_notes_off_clears_channel() {
        let (mut sched, time) = running_scheduler();
        sched.schedule(note_on(0, 60, 1));
        sched.schedule(note_on(0, 64, 2));
        sched.schedule(ScheduledEvent::new(5, EventKind::AllNotesOff { channel: 1 }));
        time.set_ms(5);
        sched.on_wake();
        assert_eq!(sched.active_note_count(), 0);
    }

    #[test]
    fn test_panic_silence_releases_active_notes() {
        let (mut sched, time) = running_scheduler();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        sched.add_listener(move |e| sink.lock().unwrap().push(e.kind.clone()));

        sched.schedule(note_on(0, 60, 1));
        sched.schedule(ScheduledEvent::new(
            0,
            EventKind::NoteOn {
                channel: 3,
                note: 40,
                velocity: 70,
                note_id: Some(2),
            },
        ));
        sched.schedule(note_off(500, 60, 1));
        time.set_ms(1);
        sched.on_wake();
        seen.lock().unwrap().clear();

        sched.panic_silence();
        assert!(sched.is_empty());
        assert_eq!(sched.next_deadline(), None);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                EventKind::NoteOff {
                    channel: 1,
                    note: 60,
                    note_id: None
                },
                EventKind::NoteOff {
                    channel: 3,
                    note: 40,
                    note_id: None
                },
                EventKind::AllNotesOff { channel: 1 },
                EventKind::AllNotesOff { channel: 3 },
            ]
        );
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let (mut sched, time) = running_scheduler();
        let rx = sched.subscribe();
        drop(rx);
        let live = sched.subscribe();
        sched.schedule(cc(0, 1));
        time.set_ms(1);
        sched.on_wake();
        assert_eq!(sched.subscribers.len(), 1);
        assert_eq!(live.try_iter().count(), 1);
    }

    /// Never trusts the timeout; re-checks after a yield.
    struct YieldSleeper;

    impl Sleeper for YieldSleeper {
        fn wait(&self, wake: &Receiver<()>, timeout: Option<Duration>) {
            match timeout {
                Some(_) => thread::yield_now(),
                None => {
                    let _ = wake.recv();
                }
            }
        }
    }

    #[derive(Clone, Default)]
    struct CountingSleeper {
        waits: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl Sleeper for CountingSleeper {
        fn wait(&self, wake: &Receiver<()>, timeout: Option<Duration>) {
            self.waits.fetch_add(1, Ordering::SeqCst);
            ThreadSleeper.wait(wake, timeout);
        }
    }

    #[test]
    fn test_driver_dispatches_due_events() {
        let (mut sched, time) = running_scheduler();
        let rx = sched.subscribe();
        sched.schedule(cc(10, 7));
        let shared = Arc::new(Mutex::new(sched));

        let mut driver = SchedulerDriver::spawn(Arc::clone(&shared), YieldSleeper);
        assert!(driver.is_running());
        time.set_ms(10);
        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(event.due_ms, 10);

        driver.stop();
        assert!(!driver.is_running());
    }

    #[test]
    fn test_idle_driver_parks_until_scheduled() {
        let (sched, time) = running_scheduler();
        let shared = Arc::new(Mutex::new(sched));
        let sleeper = CountingSleeper::default();
        let waits = Arc::clone(&sleeper.waits);

        let mut driver = SchedulerDriver::spawn(Arc::clone(&shared), sleeper);
        thread::sleep(Duration::from_millis(100));
        assert!(waits.load(Ordering::SeqCst) <= 2);

        let rx = {
            let mut sched = shared.lock().unwrap();
            let rx = sched.subscribe();
            time.set_ms(5);
            sched.schedule(cc(5, 9));
            rx
        };
        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(event.due_ms, 5);

        driver.stop();
        assert!(!driver.is_running());
    }

    #[test]
    fn test_stopped_clock_reports_no_wake_delay() {
        let (mut sched, _time) = running_scheduler();
        sched.schedule(cc(10, 1));
        assert_eq!(sched.wake_delay_ms(), Some(10));
        sched.clock_mut().stop();
        assert_eq!(sched.wake_delay_ms(), None);
    }
}
