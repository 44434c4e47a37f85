use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ::time::{format_description::well_known, OffsetDateTime};
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::types::{BurstReport, MessageId, PortStatus, ProbeMethod, ProbeTarget, SessionKey};

/// Outbound side of the messaging front end. Fire-and-forget: failures are the
/// implementation's to log, the core never waits for an acknowledgment.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    /// Send a new reply; returns a handle when the transport supports editing.
    async fn send(&self, session: &SessionKey, text: &str) -> Option<MessageId>;

    /// Replace the text of an earlier reply. Transports without editing may resend.
    async fn edit(&self, session: &SessionKey, id: MessageId, text: &str);
}

/// One entry in a session's outbox.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct OutboxMessage {
    pub id: MessageId,
    pub text: String,
    pub edited: bool,
    pub timestamp: String,
}

/// Replies kept per session; older ones are dropped first.
pub const DEFAULT_MAX_MESSAGES_PER_SESSION: usize = 50;
/// Sessions kept at once; the session with the oldest latest reply is evicted first.
pub const DEFAULT_MAX_SESSIONS: usize = 1024;

/// In-memory notifier keeping a bounded per-session log of replies, with edit-in-place.
#[derive(Clone, Debug)]
pub struct Outbox {
    next_id: Arc<AtomicU64>,
    messages: Arc<Mutex<HashMap<SessionKey, VecDeque<OutboxMessage>>>>,
    max_per_session: usize,
    max_sessions: usize,
}

impl Default for Outbox {
    fn default() -> Self {
        Self::with_limits(DEFAULT_MAX_MESSAGES_PER_SESSION, DEFAULT_MAX_SESSIONS)
    }
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(max_per_session: usize, max_sessions: usize) -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(0)),
            messages: Arc::new(Mutex::new(HashMap::new())),
            max_per_session: max_per_session.max(1),
            max_sessions: max_sessions.max(1),
        }
    }

    pub async fn messages(&self, session: &SessionKey) -> Vec<OutboxMessage> {
        let guard = self.messages.lock().await;
        guard
            .get(session)
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Return and forget the session's replies.
    pub async fn take(&self, session: &SessionKey) -> Vec<OutboxMessage> {
        let mut guard = self.messages.lock().await;
        guard
            .remove(session)
            .map(Vec::from)
            .unwrap_or_default()
    }

    pub async fn texts(&self, session: &SessionKey) -> Vec<String> {
        self.messages(session)
            .await
            .into_iter()
            .map(|m| m.text)
            .collect()
    }

    pub async fn session_count(&self) -> usize {
        self.messages.lock().await.len()
    }

    fn push(
        &self,
        map: &mut HashMap<SessionKey, VecDeque<OutboxMessage>>,
        session: &SessionKey,
        text: &str,
    ) -> MessageId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        if !map.contains_key(session) && map.len() >= self.max_sessions {
            let stalest = map
                .iter()
                .min_by_key(|(_, log)| log.back().map_or(0, |m| m.id))
                .map(|(k, _)| k.clone());
            if let Some(key) = stalest {
                debug!(session = %key, "evicting stale outbox");
                map.remove(&key);
            }
        }
        let log = map.entry(session.clone()).or_default();
        while log.len() >= self.max_per_session {
            log.pop_front();
        }
        log.push_back(OutboxMessage {
            id,
            text: text.to_string(),
            edited: false,
            timestamp: now_rfc3339(),
        });
        id
    }
}

#[async_trait]
impl Notifier for Outbox {
    async fn send(&self, session: &SessionKey, text: &str) -> Option<MessageId> {
        let mut guard = self.messages.lock().await;
        let id = self.push(&mut guard, session, text);
        debug!(%session, id, "reply queued");
        Some(id)
    }

    async fn edit(&self, session: &SessionKey, id: MessageId, text: &str) {
        let mut guard = self.messages.lock().await;
        if let Some(msg) = guard
            .get_mut(session)
            .and_then(|log| log.iter_mut().find(|m| m.id == id))
        {
            msg.text = text.to_string();
            msg.edited = true;
            msg.timestamp = now_rfc3339();
            return;
        }
        warn!(%session, id, "edit for unknown message; appending instead");
        self.push(&mut guard, session, text);
    }
}

/// Send a final text, editing `handle` in place when there is one.
pub async fn finish(notifier: &dyn Notifier, session: &SessionKey, handle: Option<MessageId>, text: &str) {
    match handle {
        Some(id) => notifier.edit(session, id, text).await,
        None => {
            notifier.send(session, text).await;
        }
    }
}

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

pub fn help_text(max_burst_secs: u64, tick_secs: u64, max_minutes: u64) -> String {
    format!(
        "📡 Port Stress Tester Bot\n\n\
         Commands:\n\
         /test <IP> <PORT> <SECONDS>\n\
         Example: /test 192.168.1.1 80 30\n\
         /monitor <HOST> <PORT> <MINUTES>\n\
         /stop\n\
         /status\n\n\
         ⚠️ Max duration: {} minutes\n\
         🔁 Monitor checks every {}s for up to {} minutes",
        max_burst_secs / 60,
        tick_secs,
        max_minutes
    )
}

pub fn burst_started_text(target: &ProbeTarget, duration_secs: u64, requested_secs: u64) -> String {
    if duration_secs == requested_secs {
        format!("🔌 Testing {target} for {duration_secs} seconds...")
    } else {
        format!(
            "🔌 Testing {target} for {duration_secs} seconds (requested {requested_secs}s, capped)..."
        )
    }
}

pub fn burst_report_text(report: &BurstReport) -> String {
    format!(
        "📊 Port Test Results for {}\n\
         ⏱ Duration: {}s | Concurrent: {}\n\
         ✅ Successful: {}\n\
         ⌛ Timeouts: {}\n\
         🚫 Refused: {}\n\
         ❌ Other Errors: {}\n\
         📈 Success Rate: {:.1}%\n\
         ⏱ Avg Response: {:.3}s",
        report.target,
        report.duration_secs,
        report.workers,
        report.success,
        report.timeouts,
        report.refused,
        report.other_errors,
        report.success_rate(),
        report.mean_latency().as_secs_f64(),
    )
}

pub fn monitor_started_text(target: &ProbeTarget, minutes: u64, tick_secs: u64, replaced: bool) -> String {
    let prefix = if replaced {
        "♻️ Previous monitor replaced.\n"
    } else {
        ""
    };
    format!("{prefix}👀 Monitoring {target} every {tick_secs}s for {minutes} minute(s). Use /stop to cancel.")
}

pub fn status_text(target: &ProbeTarget, status: &PortStatus) -> String {
    let state = match (status.method, status.open) {
        (ProbeMethod::Unknown, _) => "❔ status unknown",
        (_, true) => "🟢 open",
        (_, false) => "🔴 closed",
    };
    let mut text = format!(
        "{state} {target} (method: {}, at {})",
        status.method, status.timestamp
    );
    if let Some(detail) = &status.detail {
        text.push_str("\n↳ ");
        text.push_str(detail);
    }
    text
}
