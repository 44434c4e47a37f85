use thiserror::Error;

/// Input rejected before any network activity. The `Display` text is shown to the caller verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("❌ Invalid port: {0:?} is not a number")]
    InvalidPort(String),
    #[error("❌ Port out of range: {0} (must be 1-65535)")]
    PortOutOfRange(u32),
    #[error("❌ Invalid IP address: {0:?}")]
    InvalidIp(String),
    #[error("❌ Invalid host: {0:?}")]
    InvalidHost(String),
    #[error("❌ Invalid duration: {0:?} (must be a whole number of seconds, at least 1)")]
    InvalidDuration(String),
    #[error("❌ Invalid minutes: {0:?} is not a number")]
    InvalidMinutes(String),
    #[error("❌ Monitoring window too short: minimum is {min} minute(s)")]
    MinutesTooLow { min: u64 },
    #[error("❌ Monitoring window too long: maximum is {max} minutes")]
    MinutesTooHigh { max: u64 },
    #[error("{0}")]
    Usage(String),
    #[error("❓ Unknown command: /{0}")]
    UnknownCommand(String),
}
