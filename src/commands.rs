use std::net::IpAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::burst::{self, BurstPlan};
use crate::config::{AdminList, Settings};
use crate::error::ValidationError;
use crate::monitor::{Monitor, StopResult};
use crate::notify::{self, Notifier};
use crate::probe::Prober;
use crate::types::{CallerId, ProbeTarget, SessionKey};

pub const TEST_USAGE: &str = "Usage: /test <IP> <PORT> <SECONDS> (Max: 5 min)";
pub const MONITOR_USAGE: &str = "Usage: /monitor <HOST> <PORT> <MINUTES>";

/// A command as delivered by the messaging front end.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub caller_id: CallerId,
    pub session_key: SessionKey,
}

/// A parsed, validated command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Test { target: ProbeTarget, seconds: u64 },
    Monitor { target: ProbeTarget, minutes: u64 },
    Stop,
    Status,
}

impl Command {
    /// Parse a command name (leading `/` optional) and its arguments.
    pub fn parse(name: &str, args: &[String], default_secs: u64) -> Result<Self, ValidationError> {
        match command_name(name).as_str() {
            "start" | "help" => Ok(Command::Help),
            "test" => parse_test(args, default_secs),
            "monitor" => parse_monitor(args),
            "stop" => Ok(Command::Stop),
            "status" => Ok(Command::Status),
            other => Err(ValidationError::UnknownCommand(other.to_string())),
        }
    }
}

/// Lowercased command name without the leading `/` or a trailing `@botname`.
pub fn command_name(raw: &str) -> String {
    let name = raw.trim().trim_start_matches('/');
    name.split('@').next().unwrap_or(name).to_ascii_lowercase()
}

fn parse_test(args: &[String], default_secs: u64) -> Result<Command, ValidationError> {
    let (ip, port) = match args {
        [ip, port, ..] => (ip, port),
        _ => return Err(ValidationError::Usage(TEST_USAGE.into())),
    };
    let ip: IpAddr = ip
        .trim()
        .parse()
        .map_err(|_| ValidationError::InvalidIp(ip.clone()))?;
    let port = parse_port(port)?;
    let seconds = match args.get(2) {
        Some(s) => s
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|&v| v > 0)
            .ok_or_else(|| ValidationError::InvalidDuration(s.clone()))?,
        None => default_secs,
    };
    Ok(Command::Test {
        target: ProbeTarget::new(ip.to_string(), port)?,
        seconds,
    })
}

fn parse_monitor(args: &[String]) -> Result<Command, ValidationError> {
    let (host, port, minutes) = match args {
        [host, port, minutes, ..] => (host, port, minutes),
        _ => return Err(ValidationError::Usage(MONITOR_USAGE.into())),
    };
    let port = parse_port(port)?;
    let minutes = minutes
        .trim()
        .parse::<u64>()
        .map_err(|_| ValidationError::InvalidMinutes(minutes.clone()))?;
    Ok(Command::Monitor {
        target: ProbeTarget::new(host.as_str(), port)?,
        minutes,
    })
}

fn parse_port(s: &str) -> Result<u32, ValidationError> {
    s.trim()
        .parse::<u32>()
        .map_err(|_| ValidationError::InvalidPort(s.to_string()))
}

/// Routes commands to the burst prober or the monitor and replies through the notifier.
///
/// Every request produces at least one reply, including rejected ones.
#[derive(Clone)]
pub struct Dispatcher {
    settings: Arc<Settings>,
    admins: Arc<AdminList>,
    prober: Arc<dyn Prober>,
    monitor: Monitor,
    notifier: Arc<dyn Notifier>,
}

impl Dispatcher {
    pub fn new(
        settings: Arc<Settings>,
        admins: Arc<AdminList>,
        prober: Arc<dyn Prober>,
        monitor: Monitor,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            settings,
            admins,
            prober,
            monitor,
            notifier,
        }
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// Handle one request to completion. Burst tests return only after the final report.
    pub async fn dispatch(&self, req: CommandRequest) {
        let session = req.session_key.clone();
        let command = match Command::parse(&req.command, &req.args, self.settings.default_burst_secs)
        {
            Ok(c) => c,
            Err(e) => {
                info!(%session, command = %req.command, error = %e, "rejected command");
                let text = match (&e, command_name(&req.command).as_str()) {
                    (ValidationError::UnknownCommand(_) | ValidationError::Usage(_), _) => {
                        e.to_string()
                    }
                    (_, "test") => format!("{e}\n{TEST_USAGE}"),
                    (_, "monitor") => format!("{e}\n{MONITOR_USAGE}"),
                    _ => e.to_string(),
                };
                self.notifier.send(&session, &text).await;
                return;
            }
        };

        match command {
            Command::Help => {
                let text = notify::help_text(
                    self.settings.max_burst_secs,
                    self.settings.tick_interval.as_secs(),
                    self.settings.max_monitor_minutes,
                );
                self.notifier.send(&session, &text).await;
            }
            Command::Test { target, seconds } => {
                if !self.admins.is_authorized(req.caller_id) {
                    warn!(caller = req.caller_id, "unauthorized burst request");
                    self.notifier.send(&session, "❌ Admins only").await;
                    return;
                }
                self.run_test(&session, target, seconds).await;
            }
            Command::Monitor { target, minutes } => {
                if self.settings.monitor_requires_admin && !self.admins.is_authorized(req.caller_id)
                {
                    warn!(caller = req.caller_id, "unauthorized monitor request");
                    self.notifier.send(&session, "❌ Admins only").await;
                    return;
                }
                let text = match self.monitor.start(session.clone(), target.clone(), minutes).await {
                    Ok(started) => notify::monitor_started_text(
                        &target,
                        started.minutes,
                        self.settings.tick_interval.as_secs(),
                        started.replaced.is_some(),
                    ),
                    Err(e) => format!("{e}\n{MONITOR_USAGE}"),
                };
                self.notifier.send(&session, &text).await;
            }
            Command::Stop => {
                let text = match self.monitor.stop(&session).await {
                    StopResult::Stopped(target) => format!("🛑 Stopped monitoring {target}"),
                    StopResult::NothingToStop => "ℹ️ Nothing to stop: no active monitor".to_string(),
                };
                self.notifier.send(&session, &text).await;
            }
            Command::Status => {
                let text = match self.monitor.registry().info(&session).await {
                    Some(info) => format!(
                        "👀 Monitoring {} ({}s remaining)",
                        info.target,
                        info.remaining.as_secs()
                    ),
                    None => "ℹ️ No active monitor".to_string(),
                };
                self.notifier.send(&session, &text).await;
            }
        }
    }

    async fn run_test(&self, session: &SessionKey, target: ProbeTarget, seconds: u64) {
        let plan = match BurstPlan::new(target, seconds, &self.settings) {
            Ok(p) => p,
            Err(e) => {
                self.notifier
                    .send(session, &format!("{e}\n{TEST_USAGE}"))
                    .await;
                return;
            }
        };
        let started = notify::burst_started_text(&plan.target, plan.duration_secs, plan.requested_secs);
        let handle = self.notifier.send(session, &started).await;
        let report = burst::run_burst(self.prober.clone(), &plan, self.settings.burst_timeout).await;
        notify::finish(
            self.notifier.as_ref(),
            session,
            handle,
            &notify::burst_report_text(&report),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_test_with_default_duration() {
        let cmd = Command::parse("/test", &args(&["10.0.0.1", "9999"]), 10).unwrap();
        assert_eq!(
            cmd,
            Command::Test {
                target: ProbeTarget::new("10.0.0.1", 9999).unwrap(),
                seconds: 10
            }
        );
    }

    #[test]
    fn parse_test_rejects_hostnames_and_bad_ports() {
        assert!(matches!(
            Command::parse("test", &args(&["example.org", "80", "5"]), 10),
            Err(ValidationError::InvalidIp(_))
        ));
        assert!(matches!(
            Command::parse("test", &args(&["10.0.0.1", "eighty"]), 10),
            Err(ValidationError::InvalidPort(_))
        ));
        assert!(matches!(
            Command::parse("test", &args(&["10.0.0.1", "70000"]), 10),
            Err(ValidationError::PortOutOfRange(70000))
        ));
        assert!(matches!(
            Command::parse("test", &args(&["10.0.0.1", "80", "-3"]), 10),
            Err(ValidationError::InvalidDuration(_))
        ));
        assert!(matches!(
            Command::parse("test", &args(&["10.0.0.1"]), 10),
            Err(ValidationError::Usage(_))
        ));
    }

    #[test]
    fn parse_monitor_accepts_hostname() {
        let cmd = Command::parse("/monitor@portbot", &args(&["example.org", "443", "2"]), 10).unwrap();
        assert_eq!(
            cmd,
            Command::Monitor {
                target: ProbeTarget::new("example.org", 443).unwrap(),
                minutes: 2
            }
        );
    }

    #[test]
    fn command_name_strips_prefix_suffix_and_case() {
        assert_eq!(command_name("/TEST@portbot"), "test");
        assert_eq!(command_name("  monitor "), "monitor");
        assert_eq!(command_name("/Stop"), "stop");
    }

    #[test]
    fn parse_unknown_command() {
        assert_eq!(
            Command::parse("/reboot", &[], 10),
            Err(ValidationError::UnknownCommand("reboot".into()))
        );
    }
}
