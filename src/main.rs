use std::sync::Arc;
use std::time::Duration;

use portwatch_rs::commands::Dispatcher;
use portwatch_rs::config::{AdminList, Settings};
use portwatch_rs::monitor::{Monitor, SessionRegistry};
use portwatch_rs::notify::{Notifier, Outbox};
use portwatch_rs::probe::{Prober, TcpProber};
use portwatch_rs::scan::{ExternalScanner, HttpScanner, NoScanner};
use portwatch_rs::server::{self, AppState};

use anyhow::{bail, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// portwatch-rs: TCP burst tests and per-session reachability monitors behind a small HTTP front end.
#[derive(Debug, Clone, Parser)]
#[command(name = "portwatch-rs", version, about, long_about = None)]
struct Cli {
    /// Token callers must present as `Authorization: Bearer <token>`.
    #[arg(long = "bot-token", env = "BOT_TOKEN", hide_env_values = true)]
    bot_token: Option<String>,

    /// Comma-separated caller ids allowed to run burst tests.
    #[arg(long = "admin-ids", env = "ADMIN_IDS", default_value = "")]
    admin_ids: String,

    /// HTTP listen port.
    #[arg(long, env = "PORT", default_value_t = 10000)]
    port: u16,

    /// HTTP listen host.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Deployment name reported by `/status`.
    #[arg(long, env = "ENVIRONMENT", default_value = "development")]
    environment: String,

    /// Third-party port check endpoint used when a direct probe is inconclusive.
    #[arg(long = "scan-api-url", env = "SCAN_API_URL")]
    scan_api_url: Option<String>,

    /// Max concurrent burst workers.
    #[arg(long = "max-concurrency", default_value_t = 50)]
    max_concurrency: usize,

    /// Upper bound for a burst test, in seconds.
    #[arg(long = "max-burst-seconds", default_value_t = 300, value_parser = clap::value_parser!(u64).range(1..=3600))]
    max_burst_seconds: u64,

    /// Seconds between monitor ticks.
    #[arg(long = "tick-interval-secs", default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..=3600))]
    tick_interval_secs: u64,

    /// Upper bound for a monitor window, in minutes.
    #[arg(long = "max-monitor-minutes", default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..=10080))]
    max_monitor_minutes: u64,

    /// Per-attempt connect timeout during bursts, in seconds.
    #[arg(long = "burst-timeout-secs", default_value_t = 2)]
    burst_timeout_secs: u64,

    /// Connect timeout for monitor ticks, in seconds.
    #[arg(long = "monitor-timeout-secs", default_value_t = 3)]
    monitor_timeout_secs: u64,

    /// Timeout for the fallback scan request, in seconds.
    #[arg(long = "fallback-timeout-secs", default_value_t = 5)]
    fallback_timeout_secs: u64,

    /// Restrict /monitor to admins as well.
    #[arg(long = "monitor-requires-admin", default_value_t = false)]
    monitor_requires_admin: bool,

    /// Wait one interval before the first monitor tick.
    #[arg(long = "delay-first-tick", default_value_t = false)]
    delay_first_tick: bool,
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            max_concurrency: self.max_concurrency.max(1),
            max_burst_secs: self.max_burst_seconds.max(1),
            burst_timeout: Duration::from_secs(self.burst_timeout_secs.max(1)),
            monitor_timeout: Duration::from_secs(self.monitor_timeout_secs.max(1)),
            fallback_timeout: Duration::from_secs(self.fallback_timeout_secs.max(1)),
            tick_interval: Duration::from_secs(self.tick_interval_secs.max(1)),
            max_monitor_minutes: self.max_monitor_minutes.max(1),
            delay_first_tick: self.delay_first_tick,
            monitor_requires_admin: self.monitor_requires_admin,
            ..Settings::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let token = match cli.bot_token.as_deref().map(str::trim) {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => {
            error!("missing BOT_TOKEN in environment");
            bail!("missing BOT_TOKEN in environment");
        }
    };

    let settings = Arc::new(cli.settings());
    let admins = Arc::new(AdminList::parse(&cli.admin_ids));
    if admins.is_empty() {
        warn!("ADMIN_IDS is empty; burst tests are disabled for everyone");
    }

    let scanner: Arc<dyn ExternalScanner> = match cli.scan_api_url.as_deref() {
        Some(url) if !url.trim().is_empty() => Arc::new(HttpScanner::new(url.trim())),
        _ => {
            warn!("SCAN_API_URL not set; inconclusive probes will report unknown status");
            Arc::new(NoScanner)
        }
    };
    let prober: Arc<dyn Prober> = Arc::new(TcpProber);
    let outbox = Outbox::new();
    let notifier: Arc<dyn Notifier> = Arc::new(outbox.clone());

    let registry = SessionRegistry::new();
    let monitor = Monitor::new(
        registry.clone(),
        prober.clone(),
        scanner,
        notifier.clone(),
        settings.clone(),
    );
    let dispatcher = Dispatcher::new(settings.clone(), admins.clone(), prober, monitor, notifier);

    info!(
        max_concurrency = settings.max_concurrency,
        max_burst_secs = settings.max_burst_secs,
        tick_interval_secs = settings.tick_interval.as_secs(),
        max_monitor_minutes = settings.max_monitor_minutes,
        admins = admins.len(),
        "configuration loaded"
    );

    let state = AppState {
        dispatcher,
        outbox,
        api_token: token.into(),
        environment: cli.environment.clone().into(),
    };
    let bind = format!("{}:{}", cli.host, cli.port);

    tokio::select! {
        res = server::spawn_server(&bind, state) => {
            if let Err(e) = &res {
                error!(error = %e, "HTTP surface failed");
            }
            res?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
        }
    }

    let cancelled = registry.cancel_all().await;
    info!(cancelled, "monitors cancelled; bye");
    Ok(())
}
