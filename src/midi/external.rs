//! Event records as the MidiShare transport delivers them
//!
//! An [`ExternalEvent`] is a type code plus up to three numbered fields,
//! using the same field numbering as MidiShare's `MidiGetField`.

/// MidiShare event type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventType {
    /// Note with an inline duration
    Note = 0,
    KeyOn = 1,
    KeyOff = 2,
    KeyPress = 3,
    CtrlChange = 4,
    ProgChange = 5,
    ChanPress = 6,
    PitchWheel = 7,
}

impl EventType {
    /// Types the driver translates. Everything else is filtered out.
    pub const ACCEPTED: [EventType; 6] = [
        EventType::Note,
        EventType::KeyOn,
        EventType::KeyOff,
        EventType::CtrlChange,
        EventType::ProgChange,
        EventType::PitchWheel,
    ];

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Note),
            1 => Some(Self::KeyOn),
            2 => Some(Self::KeyOff),
            3 => Some(Self::KeyPress),
            4 => Some(Self::CtrlChange),
            5 => Some(Self::ProgChange),
            6 => Some(Self::ChanPress),
            7 => Some(Self::PitchWheel),
            _ => None,
        }
    }

    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Number of fields carried by this type
    pub fn field_count(self) -> usize {
        match self {
            Self::Note => 3,
            Self::KeyOn | Self::KeyOff | Self::KeyPress | Self::CtrlChange | Self::PitchWheel => 2,
            Self::ProgChange | Self::ChanPress => 1,
        }
    }
}

pub const MAX_FIELDS: usize = 3;

/// One event as received from the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalEvent {
    /// Transport timestamp in milliseconds
    pub date: u32,
    pub type_code: u8,
    pub port: u8,
    pub channel: u8,
    fields: [u32; MAX_FIELDS],
}

impl ExternalEvent {
    pub fn new(type_code: u8, port: u8, channel: u8, fields: [u32; MAX_FIELDS]) -> Self {
        Self {
            date: 0,
            type_code,
            port,
            channel,
            fields,
        }
    }

    /// A note carrying its own duration in milliseconds
    pub fn note(channel: u8, pitch: u8, velocity: u8, duration: u32) -> Self {
        Self::new(
            EventType::Note.code(),
            0,
            channel,
            [pitch as u32, velocity as u32, duration],
        )
    }

    pub fn key_on(channel: u8, pitch: u8, velocity: u8) -> Self {
        Self::new(
            EventType::KeyOn.code(),
            0,
            channel,
            [pitch as u32, velocity as u32, 0],
        )
    }

    pub fn key_off(channel: u8, pitch: u8, velocity: u8) -> Self {
        Self::new(
            EventType::KeyOff.code(),
            0,
            channel,
            [pitch as u32, velocity as u32, 0],
        )
    }

    pub fn ctrl_change(channel: u8, control: u8, value: u8) -> Self {
        Self::new(
            EventType::CtrlChange.code(),
            0,
            channel,
            [control as u32, value as u32, 0],
        )
    }

    pub fn prog_change(channel: u8, program: u8) -> Self {
        Self::new(EventType::ProgChange.code(), 0, channel, [program as u32, 0, 0])
    }

    /// Pitch wheel from its two 7-bit halves
    pub fn pitch_wheel(channel: u8, low: u8, high: u8) -> Self {
        Self::new(
            EventType::PitchWheel.code(),
            0,
            channel,
            [low as u32, high as u32, 0],
        )
    }

    pub fn with_port(mut self, port: u8) -> Self {
        self.port = port;
        self
    }

    pub fn with_date(mut self, date: u32) -> Self {
        self.date = date;
        self
    }

    #[inline]
    pub fn event_type(&self) -> Option<EventType> {
        EventType::from_code(self.type_code)
    }

    /// Field by index, 0 when out of range
    #[inline]
    pub fn field(&self, index: usize) -> u32 {
        self.fields.get(index).copied().unwrap_or(0)
    }

    #[inline]
    pub fn pitch(&self) -> u8 {
        self.field(0) as u8
    }

    #[inline]
    pub fn velocity(&self) -> u8 {
        self.field(1) as u8
    }

    /// Note duration in milliseconds (typeNote only)
    #[inline]
    pub fn duration(&self) -> u32 {
        self.field(2)
    }
}
