//! Seam between the driver and the external MIDI library
//!
//! A [`Transport`] owns the registration with the library. Once opened it
//! calls back into an [`EventSink`] from its own thread: `receive` for every
//! incoming event and `task` when a scheduled note-off comes due.

use std::sync::Arc;

use super::filter::EventFilter;
use crate::error::Result;
use crate::midi::ExternalEvent;
use crate::settings::ClientMode;

/// Timing services the transport offers to its callbacks
pub trait Scheduler {
    /// Current transport time in milliseconds
    fn now(&self) -> u32;

    /// Call [`EventSink::task`] with `event` once the transport clock reaches `date`
    fn schedule(&self, date: u32, event: ExternalEvent) -> Result<()>;
}

/// Callbacks invoked by a transport on its own thread
pub trait EventSink: Send + Sync {
    fn receive(&self, event: ExternalEvent, scheduler: &dyn Scheduler);

    fn task(&self, date: u32, event: ExternalEvent);
}

/// Registration with an external MIDI library
pub trait Transport: Send {
    /// Register under `name` and start delivering events to `sink`
    fn open(&mut self, name: &str, mode: ClientMode, version: i16, sink: Arc<dyn EventSink>) -> Result<()>;

    /// Allocate and install the event filter
    fn install_filter(&mut self, filter: &EventFilter) -> Result<()>;

    /// Release the filter, then the registration. Safe to call repeatedly.
    fn close(&mut self);
}
