use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{deadline_after, Settings};
use crate::error::ValidationError;
use crate::probe::Prober;
use crate::types::{BurstReport, ProbeOutcome, ProbeTarget};

/// A validated burst: target, effective (clamped) duration and worker pool size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurstPlan {
    pub target: ProbeTarget,
    pub requested_secs: u64,
    pub duration_secs: u64,
    pub workers: usize,
}

impl BurstPlan {
    /// Clamp the requested duration to `settings.max_burst_secs` and size the pool as
    /// `min(max_concurrency, duration / 2)`, never below one worker.
    pub fn new(
        target: ProbeTarget,
        requested_secs: u64,
        settings: &Settings,
    ) -> Result<Self, ValidationError> {
        if requested_secs == 0 {
            return Err(ValidationError::InvalidDuration(requested_secs.to_string()));
        }
        let duration_secs = requested_secs.min(settings.max_burst_secs.max(1));
        let workers = pool_size(duration_secs, settings.max_concurrency);
        Ok(Self {
            target,
            requested_secs,
            duration_secs,
            workers,
        })
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }
}

pub fn pool_size(duration_secs: u64, max_concurrency: usize) -> usize {
    let half = usize::try_from(duration_secs / 2).unwrap_or(usize::MAX);
    half.min(max_concurrency).max(1)
}

/// Per-worker counters; merged only after every worker has joined.
#[derive(Debug, Default)]
struct Tally {
    success: u64,
    timeouts: u64,
    refused: u64,
    other_errors: u64,
    latencies: Vec<Duration>,
}

impl Tally {
    fn record(&mut self, outcome: ProbeOutcome) {
        match outcome {
            ProbeOutcome::Success(latency) => {
                self.success += 1;
                self.latencies.push(latency);
            }
            ProbeOutcome::Timeout => self.timeouts += 1,
            ProbeOutcome::Refused => self.refused += 1,
            ProbeOutcome::OtherError(detail) => {
                debug!(%detail, "connect attempt failed");
                self.other_errors += 1;
            }
        }
    }

    fn merge_into(self, report: &mut BurstReport) {
        report.success += self.success;
        report.timeouts += self.timeouts;
        report.refused += self.refused;
        report.other_errors += self.other_errors;
        report.latencies.extend(self.latencies);
    }
}

/// Run the burst described by `plan` to completion.
///
/// - Spawns `plan.workers` tasks on a `JoinSet`.
/// - Each worker probes in a loop until the shared end instant; the last attempt may
///   overrun it by at most `attempt_timeout`.
/// - The report is assembled only after all workers have joined.
pub async fn run_burst(
    prober: Arc<dyn Prober>,
    plan: &BurstPlan,
    attempt_timeout: Duration,
) -> BurstReport {
    let end = deadline_after(plan.duration());
    info!(
        endpoint = %plan.target,
        duration_secs = plan.duration_secs,
        workers = plan.workers,
        "burst started"
    );

    let mut set = JoinSet::new();
    for _ in 0..plan.workers {
        let prober = prober.clone();
        let target = plan.target.clone();
        set.spawn(async move {
            let mut tally = Tally::default();
            while Instant::now() < end {
                let outcome = prober.probe(&target, attempt_timeout).await;
                tally.record(outcome);
            }
            tally
        });
    }

    let mut report = BurstReport {
        target: plan.target.to_string(),
        requested_secs: plan.requested_secs,
        duration_secs: plan.duration_secs,
        workers: plan.workers,
        ..Default::default()
    };
    while let Some(res) = set.join_next().await {
        match res {
            Ok(tally) => tally.merge_into(&mut report),
            Err(e) => warn!(error = %e, "burst worker did not finish"),
        }
    }

    info!(
        endpoint = %plan.target,
        attempts = report.total_attempts(),
        success = report.success,
        timeouts = report.timeouts,
        refused = report.refused,
        other_errors = report.other_errors,
        "burst finished"
    );
    report
}
