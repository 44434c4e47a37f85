use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::{self, Instant};

use crate::types::{ProbeOutcome, ProbeTarget};

/// Something that can perform one classified connect attempt.
///
/// The burst and monitor engines only talk to this trait so they can be driven
/// by deterministic fakes in tests.
#[async_trait]
pub trait Prober: Send + Sync + 'static {
    async fn probe(&self, target: &ProbeTarget, timeout: Duration) -> ProbeOutcome;
}

/// The real TCP connect prober.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProber;

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, target: &ProbeTarget, timeout: Duration) -> ProbeOutcome {
        probe(target, timeout).await
    }
}

/// Open one TCP connection to `target`, bounded by `timeout` (name resolution included).
///
/// The stream is dropped on every path, so the socket never outlives the call.
pub async fn probe(target: &ProbeTarget, timeout: Duration) -> ProbeOutcome {
    let start = Instant::now();
    let connect = TcpStream::connect((target.host(), target.port()));
    match time::timeout(timeout, connect).await {
        Ok(Ok(stream)) => {
            let latency = start.elapsed();
            drop(stream);
            ProbeOutcome::Success(latency)
        }
        Ok(Err(e)) => classify_io_error(&e),
        Err(_) => ProbeOutcome::Timeout,
    }
}

/// Map a connect error onto the closed outcome set, keeping a diagnostic for anything unexpected.
pub fn classify_io_error(err: &io::Error) -> ProbeOutcome {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => ProbeOutcome::Refused,
        io::ErrorKind::TimedOut => ProbeOutcome::Timeout,
        kind => {
            let mut detail: String = err.to_string().chars().take(120).collect();
            if detail.is_empty() {
                detail = format!("{kind:?}");
            }
            ProbeOutcome::OtherError(detail)
        }
    }
}
