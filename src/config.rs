use std::collections::HashSet;
use std::time::Duration;

use tokio::time::Instant;

use crate::types::CallerId;

/// Tunables shared by the burst prober and the monitor scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub max_concurrency: usize,
    pub max_burst_secs: u64,
    pub default_burst_secs: u64,
    pub burst_timeout: Duration,
    pub monitor_timeout: Duration,
    pub fallback_timeout: Duration,
    pub tick_interval: Duration,
    pub max_monitor_minutes: u64,
    /// When false the first monitor tick fires as soon as the session starts.
    pub delay_first_tick: bool,
    pub monitor_requires_admin: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_concurrency: 50,
            max_burst_secs: 300,
            default_burst_secs: 10,
            burst_timeout: Duration::from_secs(2),
            monitor_timeout: Duration::from_secs(3),
            fallback_timeout: Duration::from_secs(5),
            tick_interval: Duration::from_secs(30),
            max_monitor_minutes: 60,
            delay_first_tick: false,
            monitor_requires_admin: false,
        }
    }
}

/// Longest window any deadline is allowed to span.
pub const MAX_WINDOW: Duration = Duration::from_secs(366 * 24 * 60 * 60);

/// `now + window`, saturating at `MAX_WINDOW` so oversized settings cannot overflow the clock.
pub fn deadline_after(window: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(window.min(MAX_WINDOW))
        .unwrap_or(now)
}

/// Callers allowed to run burst tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminList {
    ids: HashSet<CallerId>,
}

impl AdminList {
    pub fn new(ids: impl IntoIterator<Item = CallerId>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    /// Parse a comma-separated id list; entries that are not integers are skipped.
    pub fn parse(s: &str) -> Self {
        Self::new(s.split(',').filter_map(|id| id.trim().parse::<CallerId>().ok()))
    }

    pub fn is_authorized(&self, caller: CallerId) -> bool {
        self.ids.contains(&caller)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
