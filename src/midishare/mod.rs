//! MidiShare input driver
//!
//! Binds the driver to Grame's MidiShare library, loaded at runtime.
//! Registers either as a MidiShare application or as a MidiShare driver
//! with an output slot, depending on [`ClientMode`](crate::settings::ClientMode).

pub mod sys;
mod transport;

pub use transport::{load_library, MidiShareTransport};

use crate::driver::MidiDriver;
use crate::error::Result;
use crate::midi::MidiEventHandler;
use crate::settings::DriverSettings;

/// Open a MidiShare-backed driver delivering events to `handler`
pub fn new_midishare_driver<H: MidiEventHandler>(
    settings: &DriverSettings,
    handler: H,
) -> Result<MidiDriver<MidiShareTransport>> {
    settings.validate()?;
    let api = load_library(settings.library_path.as_deref())?;
    MidiDriver::new(settings, MidiShareTransport::new(api), handler)
}
