//! MIDI input driver
//!
//! [`MidiDriver`] registers with a [`Transport`], installs the event filter and
//! routes every received event through the translation layer to the caller's
//! handler. Dropping the driver releases the registration.

pub mod filter;
pub mod loopback;
mod router;
pub mod transport;

use std::sync::Arc;

pub use filter::EventFilter;
pub use loopback::{LoopbackPort, LoopbackTransport};
pub use transport::{EventSink, Scheduler, Transport};

use crate::error::Result;
use crate::midi::MidiEventHandler;
use crate::settings::DriverSettings;
use router::EventRouter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    /// Registered and delivering events
    Ready,
    /// Closed, no further events are delivered
    Done,
}

pub struct MidiDriver<T: Transport> {
    transport: T,
    status: DriverStatus,
    name: String,
}

impl<T: Transport> MidiDriver<T> {
    /// Register with `transport` and start forwarding events to `handler`.
    ///
    /// On failure, whatever was already acquired is released before the
    /// error is returned.
    pub fn new<H: MidiEventHandler>(
        settings: &DriverSettings,
        mut transport: T,
        handler: H,
    ) -> Result<Self> {
        settings.validate()?;

        let sink: Arc<dyn EventSink> = Arc::new(EventRouter::new(handler));
        if let Err(e) = transport.open(
            &settings.client_name,
            settings.mode,
            settings.driver_version,
            sink,
        ) {
            log::error!("Can not open MIDI client '{}': {}", settings.client_name, e);
            transport.close();
            return Err(e);
        }

        let filter = EventFilter::from_settings(settings);
        if let Err(e) = transport.install_filter(&filter) {
            log::error!("{}", e);
            transport.close();
            return Err(e);
        }

        log::info!(
            "MIDI driver '{}' ready ({:?} mode)",
            settings.client_name,
            settings.mode
        );

        Ok(Self {
            transport,
            status: DriverStatus::Ready,
            name: settings.client_name.clone(),
        })
    }

    pub fn status(&self) -> DriverStatus {
        self.status
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Release filter and registration. No events are delivered afterwards.
    pub fn close(&mut self) {
        if self.status == DriverStatus::Done {
            return;
        }
        log::info!("Closing MIDI driver '{}'", self.name);
        self.transport.close();
        self.status = DriverStatus::Done;
    }
}

impl<T: Transport> Drop for MidiDriver<T> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DriverError;
    use crate::midi::{ExternalEvent, MidiEvent};
    use crate::settings::ClientMode;
    use parking_lot::Mutex;
    use std::sync::mpsc;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    fn channel_handler() -> (impl MidiEventHandler, mpsc::Receiver<MidiEvent>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        (
            move |event: MidiEvent| {
                let _ = tx.lock().send(event);
            },
            rx,
        )
    }

    #[test]
    fn test_open_forward_close() {
        let transport = LoopbackTransport::new();
        let port = transport.port();
        let (handler, rx) = channel_handler();

        let mut driver = MidiDriver::new(&DriverSettings::default(), transport, handler).unwrap();
        assert_eq!(driver.status(), DriverStatus::Ready);
        assert_eq!(driver.name(), "synth");
        assert!(driver.transport().is_open());

        assert!(port.send(ExternalEvent::ctrl_change(0, 7, 99)));
        assert_eq!(
            rx.recv_timeout(WAIT).unwrap(),
            MidiEvent::ControlChange {
                channel: 0,
                controller: 7,
                value: 99
            }
        );

        driver.close();
        assert_eq!(driver.status(), DriverStatus::Done);
        assert!(!driver.transport().is_open());
        assert!(!port.send(ExternalEvent::key_on(0, 60, 100)));

        // Second close is a no-op
        driver.close();
        assert_eq!(driver.status(), DriverStatus::Done);
    }

    #[test]
    fn test_every_translated_type_reaches_handler() {
        let transport = LoopbackTransport::new();
        let port = transport.port();
        let (handler, rx) = channel_handler();
        let _driver = MidiDriver::new(&DriverSettings::default(), transport, handler).unwrap();

        port.send(ExternalEvent::key_on(1, 60, 100));
        port.send(ExternalEvent::key_off(1, 60, 30));
        port.send(ExternalEvent::prog_change(2, 5));
        port.send(ExternalEvent::pitch_wheel(3, 0, 64));

        let received: Vec<MidiEvent> = (0..4).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
        assert_eq!(
            received,
            vec![
                MidiEvent::NoteOn {
                    channel: 1,
                    key: 60,
                    velocity: 100
                },
                MidiEvent::NoteOff {
                    channel: 1,
                    key: 60,
                    velocity: 30
                },
                MidiEvent::ProgramChange {
                    channel: 2,
                    program: 5
                },
                MidiEvent::PitchBend {
                    channel: 3,
                    value: 0
                },
            ]
        );
    }

    #[test]
    fn test_note_off_follows_duration() {
        let transport = LoopbackTransport::with_manual_clock();
        let port = transport.port();
        let (handler, rx) = channel_handler();
        let _driver = MidiDriver::new(&DriverSettings::default(), transport, handler).unwrap();

        port.send(ExternalEvent::note(0, 64, 90, 500));
        assert_eq!(
            rx.recv_timeout(WAIT).unwrap(),
            MidiEvent::NoteOn {
                channel: 0,
                key: 64,
                velocity: 90
            }
        );

        // Clock has not moved, so the note-off cannot be due yet
        assert!(rx.recv_timeout(Duration::from_millis(30)).is_err());
        assert_eq!(port.pending_tasks(), 1);

        port.advance(499);
        assert!(rx.recv_timeout(Duration::from_millis(30)).is_err());

        port.advance(1);
        assert_eq!(
            rx.recv_timeout(WAIT).unwrap(),
            MidiEvent::NoteOff {
                channel: 0,
                key: 64,
                velocity: 90
            }
        );
        assert_eq!(port.pending_tasks(), 0);
    }

    #[test]
    fn test_filter_blocks_other_channels() {
        let settings = DriverSettings {
            channels: Some(vec![9]),
            ..DriverSettings::default()
        };
        let transport = LoopbackTransport::new();
        let port = transport.port();
        let (handler, rx) = channel_handler();
        let _driver = MidiDriver::new(&settings, transport, handler).unwrap();

        assert!(!port.send(ExternalEvent::key_on(0, 60, 100)));
        assert!(port.send(ExternalEvent::key_on(9, 36, 100)));

        assert_eq!(
            rx.recv_timeout(WAIT).unwrap(),
            MidiEvent::NoteOn {
                channel: 9,
                key: 36,
                velocity: 100
            }
        );
    }

    #[test]
    fn test_handler_panic_keeps_dispatching() {
        let transport = LoopbackTransport::new();
        let port = transport.port();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let handler = move |event: MidiEvent| {
            if let MidiEvent::NoteOn { key: 0, .. } = event {
                panic!("handler rejects key 0");
            }
            let _ = tx.lock().send(event);
        };
        let driver = MidiDriver::new(&DriverSettings::default(), transport, handler).unwrap();

        assert!(port.send(ExternalEvent::key_on(0, 0, 100)));
        assert!(port.send(ExternalEvent::key_on(0, 60, 100)));

        assert_eq!(
            rx.recv_timeout(WAIT).unwrap(),
            MidiEvent::NoteOn {
                channel: 0,
                key: 60,
                velocity: 100
            }
        );
        assert_eq!(driver.status(), DriverStatus::Ready);
        assert!(port.is_open());

        // Later events still get through
        assert!(port.send(ExternalEvent::prog_change(1, 7)));
        assert_eq!(
            rx.recv_timeout(WAIT).unwrap(),
            MidiEvent::ProgramChange {
                channel: 1,
                program: 7
            }
        );
    }

    #[test]
    fn test_registration_failure() {
        let transport = LoopbackTransport::new();
        transport.fail_registration(true);
        let (handler, _rx) = channel_handler();

        let result = MidiDriver::new(&DriverSettings::default(), transport, handler);
        assert!(matches!(result, Err(DriverError::Registration { .. })));
    }

    #[test]
    fn test_filter_failure_releases_client() {
        let transport = LoopbackTransport::new();
        transport.fail_filter_allocation(true);
        let port = transport.port();
        let (handler, _rx) = channel_handler();

        let settings = DriverSettings {
            mode: ClientMode::Driver,
            ..DriverSettings::default()
        };
        let result = MidiDriver::new(&settings, transport, handler);

        assert!(matches!(result, Err(DriverError::FilterAllocation)));
        assert!(!port.is_open());
    }

    #[test]
    fn test_invalid_settings_rejected_before_open() {
        let transport = LoopbackTransport::new();
        let port = transport.port();
        let (handler, _rx) = channel_handler();
        let settings = DriverSettings {
            client_name: String::new(),
            ..DriverSettings::default()
        };

        let result = MidiDriver::new(&settings, transport, handler);
        assert!(matches!(result, Err(DriverError::Settings(_))));
        assert!(!port.is_open());
    }
}
