use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{deadline_after, Settings};
use crate::error::ValidationError;
use crate::notify::{self, Notifier};
use crate::probe::Prober;
use crate::scan::ExternalScanner;
use crate::types::{PortStatus, ProbeMethod, ProbeOutcome, ProbeTarget, ScanVerdict, SessionKey};

const MIN_MONITOR_MINUTES: u64 = 1;

/// Check a monitoring window against `[1, max]`, with a distinct error per violated bound.
pub fn validate_minutes(minutes: u64, max: u64) -> Result<u64, ValidationError> {
    if minutes < MIN_MONITOR_MINUTES {
        return Err(ValidationError::MinutesTooLow {
            min: MIN_MONITOR_MINUTES,
        });
    }
    if minutes > max {
        return Err(ValidationError::MinutesTooHigh { max });
    }
    Ok(minutes)
}

#[derive(Debug)]
struct SessionHandle {
    generation: u64,
    target: ProbeTarget,
    deadline: Instant,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SessionHandle {
    fn cancel(self) -> ProbeTarget {
        self.cancel.cancel();
        // Dropping the JoinHandle detaches the task; it exits at its next cancellation check.
        drop(self.task);
        self.target
    }
}

/// Snapshot of an active session for status replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub target: ProbeTarget,
    pub remaining: Duration,
}

/// Owner of every running monitor task, keyed by session.
///
/// All inserts and removals go through one mutex, so for any key at most one task is
/// registered and a removed task is always cancelled under the same lock.
#[derive(Clone, Debug, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<SessionKey, SessionHandle>>>,
    generations: Arc<AtomicU64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn active_count(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn contains(&self, session: &SessionKey) -> bool {
        self.inner.lock().await.contains_key(session)
    }

    pub async fn info(&self, session: &SessionKey) -> Option<SessionInfo> {
        let guard = self.inner.lock().await;
        guard.get(session).map(|h| SessionInfo {
            target: h.target.clone(),
            remaining: h.deadline.saturating_duration_since(Instant::now()),
        })
    }

    /// Cancel and remove the session's task. Returns its target if one was running.
    pub async fn cancel(&self, session: &SessionKey) -> Option<ProbeTarget> {
        let mut guard = self.inner.lock().await;
        guard.remove(session).map(SessionHandle::cancel)
    }

    /// Cancel every session, used on shutdown.
    pub async fn cancel_all(&self) -> usize {
        let mut guard = self.inner.lock().await;
        let n = guard.len();
        for (_, handle) in guard.drain() {
            handle.cancel();
        }
        n
    }

    /// Remove the entry only if it still belongs to the task that is expiring.
    async fn remove_if_current(&self, session: &SessionKey, generation: u64) -> bool {
        let mut guard = self.inner.lock().await;
        match guard.get(session) {
            Some(h) if h.generation == generation => {
                guard.remove(session);
                true
            }
            _ => false,
        }
    }
}

/// Outcome of `Monitor::start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorStarted {
    pub minutes: u64,
    pub replaced: Option<ProbeTarget>,
}

/// Outcome of `Monitor::stop`; a missing session is a normal answer, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopResult {
    Stopped(ProbeTarget),
    NothingToStop,
}

/// Per-session recurring reachability checks.
#[derive(Clone)]
pub struct Monitor {
    registry: SessionRegistry,
    prober: Arc<dyn Prober>,
    scanner: Arc<dyn ExternalScanner>,
    notifier: Arc<dyn Notifier>,
    settings: Arc<Settings>,
}

impl Monitor {
    pub fn new(
        registry: SessionRegistry,
        prober: Arc<dyn Prober>,
        scanner: Arc<dyn ExternalScanner>,
        notifier: Arc<dyn Notifier>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            registry,
            prober,
            scanner,
            notifier,
            settings,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Start monitoring `target` for `minutes`, replacing any session already bound to the key.
    pub async fn start(
        &self,
        session: SessionKey,
        target: ProbeTarget,
        minutes: u64,
    ) -> Result<MonitorStarted, ValidationError> {
        let minutes = validate_minutes(minutes, self.settings.max_monitor_minutes)?;
        let deadline = deadline_after(Duration::from_secs(minutes.saturating_mul(60)));
        let generation = self.registry.generations.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        let mut guard = self.registry.inner.lock().await;
        let replaced = guard.remove(&session).map(SessionHandle::cancel);
        if let Some(old) = &replaced {
            info!(%session, previous = %old, "replacing monitor session");
        }

        let task = tokio::spawn(run_session(
            self.clone(),
            session.clone(),
            target.clone(),
            deadline,
            cancel.clone(),
            generation,
        ));
        guard.insert(
            session.clone(),
            SessionHandle {
                generation,
                target: target.clone(),
                deadline,
                cancel,
                task,
            },
        );
        drop(guard);

        info!(%session, endpoint = %target, minutes, "monitor started");
        Ok(MonitorStarted { minutes, replaced })
    }

    pub async fn stop(&self, session: &SessionKey) -> StopResult {
        match self.registry.cancel(session).await {
            Some(target) => {
                info!(%session, endpoint = %target, "monitor stopped");
                StopResult::Stopped(target)
            }
            None => StopResult::NothingToStop,
        }
    }
}

async fn run_session(
    monitor: Monitor,
    session: SessionKey,
    target: ProbeTarget,
    deadline: Instant,
    cancel: CancellationToken,
    generation: u64,
) {
    let interval = monitor.settings.tick_interval.max(Duration::from_millis(1));
    let first = if monitor.settings.delay_first_tick {
        deadline_after(interval)
    } else {
        Instant::now()
    };
    let mut ticker = time::interval_at(first, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = time::sleep_until(deadline) => break,
            _ = ticker.tick() => {}
        }
        if Instant::now() >= deadline {
            break;
        }

        let status = check_status(
            monitor.prober.as_ref(),
            monitor.scanner.as_ref(),
            &target,
            &monitor.settings,
        )
        .await;

        if cancel.is_cancelled() {
            debug!(%session, "session cancelled during tick; dropping report");
            break;
        }
        monitor
            .notifier
            .send(&session, &notify::status_text(&target, &status))
            .await;
    }

    if monitor.registry.remove_if_current(&session, generation).await {
        info!(%session, endpoint = %target, "monitor window expired");
    }
}

/// One tick of the status-check protocol.
///
/// 1. Direct connect with `settings.monitor_timeout`.
/// 2. Success, refusal and timeout are clean answers (`method = direct`).
/// 3. Any other transport error goes to the external scanner (`method = fallback`).
/// 4. If the scanner fails too, the status is unknown but still carries the details.
pub async fn check_status(
    prober: &dyn Prober,
    scanner: &dyn ExternalScanner,
    target: &ProbeTarget,
    settings: &Settings,
) -> PortStatus {
    let (open, method, detail) = match prober.probe(target, settings.monitor_timeout).await {
        ProbeOutcome::Success(latency) => (
            true,
            ProbeMethod::Direct,
            Some(format!("connected in {} ms", latency.as_millis())),
        ),
        ProbeOutcome::Refused => (false, ProbeMethod::Direct, Some("connection refused".into())),
        ProbeOutcome::Timeout => (
            false,
            ProbeMethod::Direct,
            Some(format!(
                "no answer within {}s",
                settings.monitor_timeout.as_secs_f64()
            )),
        ),
        ProbeOutcome::OtherError(direct_err) => {
            debug!(endpoint = %target, error = %direct_err, "direct probe inconclusive; trying fallback scan");
            fallback(scanner, target, settings.fallback_timeout, &direct_err).await
        }
    };
    PortStatus {
        open,
        method,
        detail,
        timestamp: notify::now_rfc3339(),
    }
}

async fn fallback(
    scanner: &dyn ExternalScanner,
    target: &ProbeTarget,
    timeout: Duration,
    direct_err: &str,
) -> (bool, ProbeMethod, Option<String>) {
    let scan = scanner.scan(target.host(), target.port(), timeout);
    match time::timeout(timeout, scan).await {
        Ok(Ok(ScanVerdict::Open)) => (
            true,
            ProbeMethod::Fallback,
            Some(format!("direct probe failed ({direct_err}); external scan reports open")),
        ),
        Ok(Ok(ScanVerdict::Closed)) => (
            false,
            ProbeMethod::Fallback,
            Some(format!("direct probe failed ({direct_err}); external scan reports closed")),
        ),
        Ok(Ok(ScanVerdict::Unknown)) => (
            false,
            ProbeMethod::Unknown,
            Some(format!("direct probe failed ({direct_err}); external scan inconclusive")),
        ),
        Ok(Err(e)) => {
            warn!(endpoint = %target, error = %e, "fallback scan failed");
            (
                false,
                ProbeMethod::Unknown,
                Some(format!("direct probe failed ({direct_err}); fallback scan failed: {e:#}")),
            )
        }
        Err(_) => {
            warn!(endpoint = %target, "fallback scan timed out");
            (
                false,
                ProbeMethod::Unknown,
                Some(format!(
                    "direct probe failed ({direct_err}); fallback scan timed out after {}s",
                    timeout.as_secs_f64()
                )),
            )
        }
    }
}
