use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::ValidationError;

/// Opaque identity of a requester conversation. One monitor may run per key.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct SessionKey(pub String);

impl SessionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Numeric caller id as delivered by the messaging front end.
pub type CallerId = i64;

/// Handle of a previously sent reply, used to edit it in place.
pub type MessageId = u64;

/// A host and TCP port. Only constructed through validation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProbeTarget {
    host: String,
    port: u16,
}

impl ProbeTarget {
    /// Build a target after checking the host is non-empty and the port is in `1..=65535`.
    pub fn new(host: impl Into<String>, port: u32) -> Result<Self, ValidationError> {
        let host = host.into();
        let host = host.trim();
        if host.is_empty() || host.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(ValidationError::InvalidHost(host.to_string()));
        }
        if port == 0 || port > u16::MAX as u32 {
            return Err(ValidationError::PortOutOfRange(port));
        }
        Ok(Self {
            host: host.to_string(),
            port: port as u16,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ProbeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Classified result of exactly one connect attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success(Duration),
    Timeout,
    Refused,
    OtherError(String),
}

/// Aggregate of one burst run. Built once, after every worker has joined.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct BurstReport {
    pub target: String,
    pub requested_secs: u64,
    pub duration_secs: u64,
    pub workers: usize,
    pub success: u64,
    pub timeouts: u64,
    pub refused: u64,
    pub other_errors: u64,
    pub latencies: Vec<Duration>,
}

impl BurstReport {
    pub fn total_attempts(&self) -> u64 {
        self.success + self.timeouts + self.refused + self.other_errors
    }

    /// Percentage of successful attempts in `[0, 100]`; 0 when nothing was attempted.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_attempts();
        if total == 0 {
            return 0.0;
        }
        self.success as f64 / total as f64 * 100.0
    }

    /// Mean latency over successful attempts; zero when there were none.
    pub fn mean_latency(&self) -> Duration {
        if self.latencies.is_empty() {
            return Duration::ZERO;
        }
        let sum: Duration = self.latencies.iter().sum();
        sum / self.latencies.len() as u32
    }

    pub fn was_clamped(&self) -> bool {
        self.requested_secs != self.duration_secs
    }
}

/// How a monitor tick reached its verdict.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProbeMethod {
    Direct,
    Fallback,
    Unknown,
}

impl fmt::Display for ProbeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProbeMethod::Direct => "direct",
            ProbeMethod::Fallback => "fallback",
            ProbeMethod::Unknown => "unknown",
        })
    }
}

/// Answer of the external scanning collaborator.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanVerdict {
    Open,
    Closed,
    Unknown,
}

/// Per-tick status; reported and then discarded.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PortStatus {
    pub open: bool,
    pub method: ProbeMethod,
    pub detail: Option<String>,
    pub timestamp: String,
}
