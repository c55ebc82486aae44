//! MidiShare event record → internal [`MidiEvent`]

use super::events::MidiEvent;
use super::external::{EventType, ExternalEvent};

/// Centre of the 14-bit pitch wheel range
const PITCH_BEND_CENTER: i32 = 8192;

#[inline]
fn data7(value: u32) -> u8 {
    (value & 0x7F) as u8
}

#[inline]
fn channel4(channel: u8) -> u8 {
    channel & 0x0F
}

/// Rebuild a signed pitch bend from its 7-bit halves
#[inline]
pub fn pitch_bend_value(low: u32, high: u32) -> i16 {
    let raw = data7(low) as i32 + ((data7(high) as i32) << 7);
    (raw - PITCH_BEND_CENTER) as i16
}

/// Translate one received event.
///
/// Returns `None` for type codes the driver does not handle.
pub fn translate(event: &ExternalEvent) -> Option<MidiEvent> {
    let channel = channel4(event.channel);
    let translated = match event.event_type()? {
        EventType::Note | EventType::KeyOn => MidiEvent::NoteOn {
            channel,
            key: data7(event.field(0)),
            velocity: data7(event.field(1)),
        },
        EventType::KeyOff => MidiEvent::NoteOff {
            channel,
            key: data7(event.field(0)),
            velocity: data7(event.field(1)),
        },
        EventType::CtrlChange => MidiEvent::ControlChange {
            channel,
            controller: data7(event.field(0)),
            value: data7(event.field(1)),
        },
        EventType::ProgChange => MidiEvent::ProgramChange {
            channel,
            program: data7(event.field(0)),
        },
        EventType::PitchWheel => MidiEvent::PitchBend {
            channel,
            value: pitch_bend_value(event.field(0), event.field(1)),
        },
        EventType::KeyPress | EventType::ChanPress => return None,
    };
    Some(translated)
}

/// The note-off emitted once a typeNote's duration has elapsed.
///
/// The note's own velocity is reused as release velocity.
pub fn scheduled_note_off(note: &ExternalEvent) -> MidiEvent {
    MidiEvent::NoteOff {
        channel: channel4(note.channel),
        key: data7(note.field(0)),
        velocity: data7(note.field(1)),
    }
}
