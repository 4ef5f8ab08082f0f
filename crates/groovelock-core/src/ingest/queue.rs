//! Bounded event queue with critical-event preservation.

use std::collections::VecDeque;

use crate::midi::{RawMessage, CC_ALL_NOTES_OFF, CC_ALL_SOUND_OFF, CC_SUSTAIN};

pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;
pub const DEFAULT_DROP_LOG_INTERVAL: u64 = 1024;

/// Logical origin of an ingested event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventSource {
    /// Instrument played by the performer (guitar controller).
    Performer,
    /// Voice/pitch tracker.
    Voice,
    /// Internally generated accompaniment.
    VirtualBand,
    /// Calls from the application layer.
    Api,
}

/// One unit of work for the live processor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MidiEvent {
    Raw { source: EventSource, message: RawMessage },
    ProgramChange { program: usize },
    TransposeChange { semitones: i32 },
    TrackToggle { track: String },
}

impl MidiEvent {
    pub fn raw(source: EventSource, message: RawMessage) -> Self {
        MidiEvent::Raw { source, message }
    }

    /// Events whose loss could leave a note or pedal stuck: NoteOff,
    /// velocity-0 NoteOn, and sustain/all-notes-off/all-sound-off at value 0.
    pub fn is_critical(&self) -> bool {
        let MidiEvent::Raw { message, .. } = self else {
            return false;
        };
        match message.kind() {
            0x80 => true,
            0x90 => message.data2() == Some(0),
            0xB0 => {
                matches!(
                    message.data1(),
                    Some(CC_SUSTAIN | CC_ALL_NOTES_OFF | CC_ALL_SOUND_OFF)
                ) && message.data2() == Some(0)
            }
            _ => false,
        }
    }
}

/// Outcome of [`BoundedEventQueue::try_push`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    /// Queue full; a queued event was evicted to make room.
    Evicted,
    /// Queue full; the incoming non-critical event was dropped.
    Dropped,
}

impl Admission {
    pub fn is_queued(self) -> bool {
        !matches!(self, Admission::Dropped)
    }
}

/// FIFO with a hard capacity that never blocks the producer.
///
/// When full, non-critical arrivals are dropped. Critical arrivals evict the
/// newest queued non-critical event, or the oldest event if everything queued
/// is critical.
#[derive(Debug)]
pub struct BoundedEventQueue {
    items: VecDeque<MidiEvent>,
    capacity: usize,
    dropped: u64,
    drop_log_interval: u64,
}

impl BoundedEventQueue {
    pub fn new(capacity: usize) -> Self {
        Self::with_drop_log_interval(capacity, DEFAULT_DROP_LOG_INTERVAL)
    }

    pub fn with_drop_log_interval(capacity: usize, drop_log_interval: u64) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
            drop_log_interval: drop_log_interval.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Events lost to overload, both dropped arrivals and evictions.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn try_push(&mut self, event: MidiEvent) -> Admission {
        if self.items.len() < self.capacity {
            self.items.push_back(event);
            return Admission::Accepted;
        }

        if !event.is_critical() {
            self.record_drop("dropped non-critical event");
            return Admission::Dropped;
        }

        let victim = self.items.iter().rposition(|e| !e.is_critical()).unwrap_or(0);
        self.items.remove(victim);
        self.items.push_back(event);
        self.record_drop("evicted queued event for critical event");
        Admission::Evicted
    }

    pub fn pop(&mut self) -> Option<MidiEvent> {
        self.items.pop_front()
    }

    pub fn contains(&self, event: &MidiEvent) -> bool {
        self.items.contains(event)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MidiEvent> {
        self.items.iter()
    }

    fn record_drop(&mut self, what: &str) {
        self.dropped += 1;
        if self.dropped == 1 || self.dropped % self.drop_log_interval == 0 {
            log::warn!(
                "[INGEST] Queue full ({}): {}, {} lost so far",
                self.capacity,
                what,
                self.dropped
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(bytes: &[u8]) -> MidiEvent {
        MidiEvent::raw(EventSource::Performer, RawMessage::new(bytes).unwrap())
    }

    #[test]
    fn test_critical_classification() {
        assert!(raw(&[0x80, 60, 0]).is_critical());
        assert!(raw(&[0x93, 60, 0]).is_critical());
        assert!(raw(&[0xB0, 64, 0]).is_critical());
        assert!(raw(&[0xB5, 123, 0]).is_critical());
        assert!(raw(&[0xB0, 120, 0]).is_critical());

        assert!(!raw(&[0x90, 60, 1]).is_critical());
        assert!(!raw(&[0xB0, 64, 127]).is_critical());
        assert!(!raw(&[0xB0, 1, 0]).is_critical());
        assert!(!raw(&[0xE0, 0, 64]).is_critical());
        assert!(!MidiEvent::ProgramChange { program: 1 }.is_critical());
    }

    #[test]
    fn test_full_queue_drops_non_critical() {
        let mut q = BoundedEventQueue::new(2);
        assert_eq!(q.try_push(raw(&[0x90, 1, 1])), Admission::Accepted);
        assert_eq!(q.try_push(raw(&[0x90, 2, 1])), Admission::Accepted);
        assert_eq!(q.try_push(raw(&[0x90, 3, 1])), Admission::Dropped);
        assert_eq!(q.len(), 2);
        assert_eq!(q.dropped(), 1);
        assert_eq!(q.pop(), Some(raw(&[0x90, 1, 1])));
    }

    #[test]
    fn test_critical_evicts_newest_non_critical() {
        let mut q = BoundedEventQueue::new(3);
        q.try_push(raw(&[0x90, 1, 1]));
        q.try_push(raw(&[0x80, 1, 0]));
        q.try_push(raw(&[0x90, 2, 1]));
        let off = raw(&[0x80, 2, 0]);
        assert_eq!(q.try_push(off.clone()), Admission::Evicted);

        let left: Vec<MidiEvent> = q.iter().cloned().collect();
        assert_eq!(left, vec![raw(&[0x90, 1, 1]), raw(&[0x80, 1, 0]), off]);
    }

    #[test]
    fn test_all_critical_evicts_oldest() {
        let mut q = BoundedEventQueue::new(2);
        q.try_push(raw(&[0x80, 1, 0]));
        q.try_push(raw(&[0x80, 2, 0]));
        assert_eq!(q.try_push(raw(&[0x80, 3, 0])), Admission::Evicted);
        assert_eq!(q.pop(), Some(raw(&[0x80, 2, 0])));
        assert_eq!(q.pop(), Some(raw(&[0x80, 3, 0])));
        assert!(q.is_empty());
    }

    #[test]
    fn test_zero_capacity_is_repaired() {
        let mut q = BoundedEventQueue::new(0);
        assert_eq!(q.capacity(), 1);
        assert!(q.try_push(raw(&[0x90, 1, 1])).is_queued());
    }
}
