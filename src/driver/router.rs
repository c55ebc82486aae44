//! Receive and note-off callbacks: translate, forward, schedule

use crate::midi::{scheduled_note_off, translate, EventType, ExternalEvent, MidiEventHandler};

use super::transport::{EventSink, Scheduler};

/// Forwards translated events to the caller's handler
pub(crate) struct EventRouter<H> {
    handler: H,
}

impl<H: MidiEventHandler> EventRouter<H> {
    pub(crate) fn new(handler: H) -> Self {
        Self { handler }
    }
}

impl<H: MidiEventHandler> EventSink for EventRouter<H> {
    fn receive(&self, event: ExternalEvent, scheduler: &dyn Scheduler) {
        let Some(midi_event) = translate(&event) else {
            log::trace!(
                "Ignoring MIDI event: type={}, ch={}, port={}",
                event.type_code,
                event.channel,
                event.port
            );
            return;
        };

        log::trace!("MIDI in: {:?}", midi_event);
        self.handler.handle_midi_event(midi_event);

        if event.event_type() == Some(EventType::Note) {
            let date = scheduler.now().wrapping_add(event.duration());
            if let Err(e) = scheduler.schedule(date, event) {
                log::warn!("Note-off for pitch {} not scheduled: {}", event.pitch(), e);
            }
        }
    }

    fn task(&self, date: u32, event: ExternalEvent) {
        let note_off = scheduled_note_off(&event);
        log::trace!("MIDI note-off at {}ms: {:?}", date, note_off);
        self.handler.handle_midi_event(note_off);
    }
}
