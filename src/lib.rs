//! MidiShare MIDI input driver for a software synthesizer
//!
//! Events arrive from an external MIDI transport on the transport's own
//! thread, are translated into [`MidiEvent`]s and handed to a caller-supplied
//! [`MidiEventHandler`]. Notes that carry an inline duration get a note-off
//! scheduled on the transport's clock.
//!
//! The MidiShare binding itself is behind the `midishare` feature; the
//! [`LoopbackTransport`](driver::LoopbackTransport) works everywhere.

pub mod driver;
pub mod error;
pub mod logging;
pub mod midi;
#[cfg(feature = "midishare")]
pub mod midishare;
pub mod settings;

pub use driver::{DriverStatus, MidiDriver};
pub use error::{DriverError, Result};
pub use midi::{MidiEvent, MidiEventHandler, MidiEventQueue};
pub use settings::{ClientMode, DriverSettings};
