//! Internal MIDI event types and the handler they are delivered to
//!
//! Every event received from the transport ends up here as a [`MidiEvent`]
//! and is passed to the caller's [`MidiEventHandler`]. [`MidiEventQueue`]
//! is a ready-made handler that hands events over to an audio thread
//! through a lock-free ring buffer.

use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};

/// MIDI event types delivered to the synthesizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    /// Note on event
    NoteOn {
        /// MIDI channel (0-15)
        channel: u8,
        /// MIDI note number (0-127)
        key: u8,
        /// Velocity (0-127)
        velocity: u8,
    },
    /// Note off event
    NoteOff {
        /// MIDI channel (0-15)
        channel: u8,
        /// MIDI note number (0-127)
        key: u8,
        /// Release velocity (0-127)
        velocity: u8,
    },
    /// Control change (CC) event
    ControlChange {
        /// MIDI channel (0-15)
        channel: u8,
        /// Controller number (0-127)
        controller: u8,
        /// Controller value (0-127)
        value: u8,
    },
    /// Program change event
    ProgramChange {
        /// MIDI channel (0-15)
        channel: u8,
        /// Program number (0-127)
        program: u8,
    },
    /// Pitch bend event
    PitchBend {
        /// MIDI channel (0-15)
        channel: u8,
        /// Signed bend amount (-8192 to 8191, centre at 0)
        value: i16,
    },
}

impl MidiEvent {
    /// Channel the event is addressed to
    #[inline]
    pub fn channel(&self) -> u8 {
        match *self {
            Self::NoteOn { channel, .. }
            | Self::NoteOff { channel, .. }
            | Self::ControlChange { channel, .. }
            | Self::ProgramChange { channel, .. }
            | Self::PitchBend { channel, .. } => channel,
        }
    }
}

/// Receives translated events on the transport's callback thread
///
/// Called from a thread owned by the external MIDI library, so
/// implementations must not block for long.
pub trait MidiEventHandler: Send + Sync + 'static {
    fn handle_midi_event(&self, event: MidiEvent);
}

impl<F> MidiEventHandler for F
where
    F: Fn(MidiEvent) + Send + Sync + 'static,
{
    fn handle_midi_event(&self, event: MidiEvent) {
        self(event)
    }
}

/// Thread-safe MIDI event queue using lock-free ring buffer
///
/// Producer side is fed by the driver callback.
/// Consumer side is read by the audio thread using try_lock to avoid blocking.
pub struct MidiEventQueue {
    /// Producer side, fed from the transport's callback thread
    producer: Mutex<ringbuf::HeapProd<MidiEvent>>,
    /// Consumer side, always taken with try_lock by the audio thread
    consumer: Mutex<ringbuf::HeapCons<MidiEvent>>,
    /// Capacity for overflow logging
    capacity: usize,
}

impl MidiEventQueue {
    /// Create a new MIDI event queue
    ///
    /// A capacity of 0 is raised to 1; the ring buffer cannot be empty-sized.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let rb = HeapRb::new(capacity);
        let (producer, consumer) = rb.split();
        Self {
            producer: Mutex::new(producer),
            consumer: Mutex::new(consumer),
            capacity,
        }
    }

    /// Push an event to the queue (called from the driver callback)
    /// Returns true if successful, false if queue is full or busy
    #[inline]
    pub fn push(&self, event: MidiEvent) -> bool {
        // try_lock so the MIDI library's thread never waits on another producer.
        // An event that can't get the lock is dropped rather than delaying delivery.
        if let Some(mut producer) = self.producer.try_lock() {
            if producer.try_push(event).is_ok() {
                return true;
            }
            // Queue full - debug level, a stuck consumer would flood the log
            log::debug!("MIDI queue full (capacity: {}), event dropped", self.capacity);
        }
        false
    }

    /// Drain all events into a pre-allocated buffer (called from audio thread)
    ///
    /// Clears the buffer first. If the consumer lock is held elsewhere,
    /// returns 0 and the events are picked up on the next call.
    #[inline]
    pub fn drain_into(&self, buffer: &mut Vec<MidiEvent>) -> usize {
        buffer.clear();

        // CRITICAL: Use try_lock to avoid blocking the audio thread.
        // Anything still queued is picked up on the next callback.
        if let Some(mut consumer) = self.consumer.try_lock() {
            while let Some(event) = consumer.try_pop() {
                buffer.push(event);
            }
        }

        buffer.len()
    }

    /// Pop a single event
    #[inline]
    pub fn pop(&self) -> Option<MidiEvent> {
        self.consumer.try_lock()?.try_pop()
    }

    /// Check if the queue is empty (non-blocking)
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.consumer.try_lock().map(|c| c.is_empty()).unwrap_or(true)
    }

    /// Get number of events in queue (non-blocking)
    #[inline]
    pub fn len(&self) -> usize {
        self.consumer.try_lock().map(|c| c.occupied_len()).unwrap_or(0)
    }
}

impl MidiEventHandler for MidiEventQueue {
    fn handle_midi_event(&self, event: MidiEvent) {
        self.push(event);
    }
}

impl<H: MidiEventHandler> MidiEventHandler for std::sync::Arc<H> {
    fn handle_midi_event(&self, event: MidiEvent) {
        (**self).handle_midi_event(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn note_on(key: u8, velocity: u8) -> MidiEvent {
        MidiEvent::NoteOn {
            channel: 0,
            key,
            velocity,
        }
    }

    #[test]
    fn test_midi_queue() {
        let queue = MidiEventQueue::new(16);

        assert!(queue.push(note_on(60, 100)));
        assert!(queue.push(note_on(64, 80)));
        assert!(queue.push(MidiEvent::NoteOff {
            channel: 0,
            key: 60,
            velocity: 0,
        }));
        assert_eq!(queue.len(), 3);

        let mut buffer = Vec::with_capacity(64);
        let count = queue.drain_into(&mut buffer);
        assert_eq!(count, 3);
        assert!(queue.is_empty());

        match buffer[0] {
            MidiEvent::NoteOn { key, velocity, .. } => {
                assert_eq!(key, 60);
                assert_eq!(velocity, 100);
            }
            _ => panic!("Expected NoteOn"),
        }
    }

    #[test]
    fn test_queue_overflow() {
        let queue = MidiEventQueue::new(4);

        for key in 60..64 {
            assert!(queue.push(note_on(key, 100)));
        }
        assert!(!queue.push(note_on(64, 100)));

        let mut buffer = Vec::with_capacity(8);
        assert_eq!(queue.drain_into(&mut buffer), 4);
    }

    #[test]
    fn test_zero_capacity_queue() {
        let queue = MidiEventQueue::new(0);

        assert!(queue.push(note_on(60, 100)));
        assert!(!queue.push(note_on(62, 100)));
        assert_eq!(queue.pop(), Some(note_on(60, 100)));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_as_handler() {
        let queue = Arc::new(MidiEventQueue::new(8));
        let handler: Arc<MidiEventQueue> = Arc::clone(&queue);

        handler.handle_midi_event(MidiEvent::ProgramChange {
            channel: 3,
            program: 12,
        });

        assert_eq!(
            queue.pop(),
            Some(MidiEvent::ProgramChange {
                channel: 3,
                program: 12
            })
        );
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_closure_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = move |event: MidiEvent| sink.lock().push(event);

        handler.handle_midi_event(note_on(48, 90));
        assert_eq!(seen.lock().as_slice(), &[note_on(48, 90)]);
        assert_eq!(seen.lock()[0].channel(), 0);
    }
}
