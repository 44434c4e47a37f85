#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use portwatch_rs::config::Settings;
use portwatch_rs::monitor::{Monitor, SessionRegistry};
use portwatch_rs::notify::Outbox;
use portwatch_rs::probe::Prober;
use portwatch_rs::scan::ExternalScanner;
use portwatch_rs::types::{ProbeOutcome, ProbeTarget, ScanVerdict};

/// Returns the same outcome every time after a simulated network delay.
pub struct FixedProber {
    pub outcome: ProbeOutcome,
    pub delay: Duration,
    pub calls: AtomicU64,
}

impl FixedProber {
    pub fn new(outcome: ProbeOutcome, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            delay,
            calls: AtomicU64::new(0),
        })
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for FixedProber {
    async fn probe(&self, _target: &ProbeTarget, _timeout: Duration) -> ProbeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.outcome.clone()
    }
}

/// Cycles through all four outcome kinds.
pub struct CyclingProber {
    pub calls: AtomicU64,
}

#[async_trait]
impl Prober for CyclingProber {
    async fn probe(&self, _target: &ProbeTarget, _timeout: Duration) -> ProbeOutcome {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(250)).await;
        match n % 4 {
            0 => ProbeOutcome::Success(Duration::from_millis(40)),
            1 => ProbeOutcome::Timeout,
            2 => ProbeOutcome::Refused,
            _ => ProbeOutcome::OtherError("network unreachable".into()),
        }
    }
}

pub enum ScanBehavior {
    Answer(ScanVerdict),
    Fail,
    Hang,
}

pub struct FakeScanner {
    pub behavior: ScanBehavior,
    pub calls: AtomicU64,
}

impl FakeScanner {
    pub fn new(behavior: ScanBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl ExternalScanner for FakeScanner {
    async fn scan(&self, _host: &str, _port: u16, _timeout: Duration) -> Result<ScanVerdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            ScanBehavior::Answer(v) => Ok(v),
            ScanBehavior::Fail => anyhow::bail!("scan endpoint unreachable"),
            ScanBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(ScanVerdict::Open)
            }
        }
    }
}

pub fn target(host: &str, port: u32) -> ProbeTarget {
    ProbeTarget::new(host, port).unwrap()
}

pub fn monitor_with(
    prober: Arc<dyn Prober>,
    scanner: Arc<dyn ExternalScanner>,
    settings: Settings,
) -> (Monitor, Outbox) {
    let outbox = Outbox::new();
    let monitor = Monitor::new(
        SessionRegistry::new(),
        prober,
        scanner,
        Arc::new(outbox.clone()),
        Arc::new(settings),
    );
    (monitor, outbox)
}
