//! Which ports, channels and event types reach the driver

use crate::midi::{EventType, ExternalEvent};
use crate::settings::{DriverSettings, MIDI_CHANNELS, MIDI_PORTS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    ports: [bool; MIDI_PORTS],
    channels: [bool; MIDI_CHANNELS],
    types: [bool; 256],
}

impl EventFilter {
    /// Accept nothing
    pub fn reject_all() -> Self {
        Self {
            ports: [false; MIDI_PORTS],
            channels: [false; MIDI_CHANNELS],
            types: [false; 256],
        }
    }

    /// All ports and channels, only the types the driver translates
    pub fn new() -> Self {
        let mut filter = Self::reject_all();
        filter.ports = [true; MIDI_PORTS];
        filter.channels = [true; MIDI_CHANNELS];
        for ty in EventType::ACCEPTED {
            filter.accept_type(ty.code(), true);
        }
        filter
    }

    /// Default filter narrowed to the channels and ports in `settings`
    pub fn from_settings(settings: &DriverSettings) -> Self {
        let mut filter = Self::new();
        if let Some(channels) = &settings.channels {
            filter.channels = [false; MIDI_CHANNELS];
            for &chan in channels {
                filter.accept_channel(chan, true);
            }
        }
        if let Some(ports) = &settings.ports {
            filter.ports = [false; MIDI_PORTS];
            for &port in ports {
                filter.accept_port(port, true);
            }
        }
        filter
    }

    pub fn accept_port(&mut self, port: u8, accept: bool) {
        self.ports[port as usize] = accept;
    }

    pub fn accept_channel(&mut self, channel: u8, accept: bool) {
        if let Some(slot) = self.channels.get_mut(channel as usize) {
            *slot = accept;
        }
    }

    pub fn accept_type(&mut self, type_code: u8, accept: bool) {
        self.types[type_code as usize] = accept;
    }

    #[inline]
    pub fn port_accepted(&self, port: u8) -> bool {
        self.ports[port as usize]
    }

    #[inline]
    pub fn channel_accepted(&self, channel: u8) -> bool {
        self.channels.get(channel as usize).copied().unwrap_or(false)
    }

    #[inline]
    pub fn type_accepted(&self, type_code: u8) -> bool {
        self.types[type_code as usize]
    }

    pub fn accepts(&self, event: &ExternalEvent) -> bool {
        self.port_accepted(event.port)
            && self.channel_accepted(event.channel)
            && self.type_accepted(event.type_code)
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::new()
    }
}
