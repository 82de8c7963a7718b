use thiserror::Error;

/// Errors that can occur while computing release instants.
#[derive(Debug, Error)]
pub enum TriggerError {
    /// Release time string is not "HH:MM" or "HH:MM:SS".
    #[error("Invalid release time: {0}")]
    InvalidTime(String),

    /// Timezone string is not a known IANA name.
    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),

    /// Date arithmetic fell off the calendar.
    #[error("Date out of range: {0}")]
    DateOutOfRange(String),
}

pub type Result<T> = std::result::Result<T, TriggerError>;
