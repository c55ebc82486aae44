//! MIDI event records on both sides of the driver
//!
//! Provides the internal event type and handler, the MidiShare-side event
//! record, and the translation between them.

mod events;
pub mod external;
pub mod translate;

pub use events::{MidiEvent, MidiEventHandler, MidiEventQueue};
pub use external::{EventType, ExternalEvent, MAX_FIELDS};
pub use translate::{pitch_bend_value, scheduled_note_off, translate};
