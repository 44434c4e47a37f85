use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::types::ScanVerdict;

/// Secondary reachability check used when a direct connect cannot be classified.
///
/// Implementations are untrusted; callers collapse any error to `ScanVerdict::Unknown`.
#[async_trait]
pub trait ExternalScanner: Send + Sync + 'static {
    async fn scan(&self, host: &str, port: u16, timeout: Duration) -> Result<ScanVerdict>;
}

/// Calls a third-party port check endpoint: `GET {url}?host=<host>&port=<port>`.
///
/// The endpoint answers with JSON shaped like `{"status": "open"}`. Any status other than
/// `open`/`closed` (or a boolean `open` field) is reported as unknown.
#[derive(Debug, Clone)]
pub struct HttpScanner {
    client: reqwest::Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct ScanResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    open: Option<bool>,
}

impl HttpScanner {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl ExternalScanner for HttpScanner {
    async fn scan(&self, host: &str, port: u16, timeout: Duration) -> Result<ScanVerdict> {
        let port = port.to_string();
        let resp = self
            .client
            .get(&self.url)
            .query(&[("host", host), ("port", port.as_str())])
            .timeout(timeout)
            .send()
            .await
            .with_context(|| format!("scan request to {} failed", self.url))?
            .error_for_status()
            .context("scan endpoint returned an error status")?;
        let body: ScanResponse = resp
            .json()
            .await
            .context("scan endpoint returned malformed JSON")?;
        debug!(?body, host, "fallback scan answered");
        Ok(verdict_from(&body))
    }
}

fn verdict_from(body: &ScanResponse) -> ScanVerdict {
    if let Some(status) = body.status.as_deref() {
        return match status.trim().to_ascii_lowercase().as_str() {
            "open" => ScanVerdict::Open,
            "closed" | "filtered" => ScanVerdict::Closed,
            _ => ScanVerdict::Unknown,
        };
    }
    match body.open {
        Some(true) => ScanVerdict::Open,
        Some(false) => ScanVerdict::Closed,
        None => ScanVerdict::Unknown,
    }
}

/// Scanner used when no endpoint is configured; every answer is unknown.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoScanner;

#[async_trait]
impl ExternalScanner for NoScanner {
    async fn scan(&self, _host: &str, _port: u16, _timeout: Duration) -> Result<ScanVerdict> {
        anyhow::bail!("no fallback scan endpoint configured")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> ScanVerdict {
        let body: ScanResponse = serde_json::from_str(json).unwrap();
        verdict_from(&body)
    }

    #[test]
    fn status_field_wins() {
        assert_eq!(parse(r#"{"status":"open"}"#), ScanVerdict::Open);
        assert_eq!(parse(r#"{"status":"Closed","open":true}"#), ScanVerdict::Closed);
        assert_eq!(parse(r#"{"status":"rate limited"}"#), ScanVerdict::Unknown);
    }

    #[test]
    fn bool_field_and_empty_body() {
        assert_eq!(parse(r#"{"open":true}"#), ScanVerdict::Open);
        assert_eq!(parse(r#"{"open":false}"#), ScanVerdict::Closed);
        assert_eq!(parse(r#"{}"#), ScanVerdict::Unknown);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_error() {
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let scanner = HttpScanner::new(format!("http://127.0.0.1:{port}/check"));
        let res = scanner.scan("10.0.0.1", 80, Duration::from_secs(2)).await;
        assert!(res.is_err());
    }
}
