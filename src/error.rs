use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("invalid driver settings: {0}")]
    Settings(String),
    #[error("failed to parse driver settings: {0}")]
    Config(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to load MidiShare library: {0}")]
    LibraryLoad(String),
    #[error("can not register MidiShare client '{name}': {reason}")]
    Registration { name: String, reason: String },
    #[error("can not allocate MidiShare filter")]
    FilterAllocation,
    #[error("can not schedule note-off at {date}ms")]
    Schedule { date: u32 },
    #[error("transport is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, DriverError>;
