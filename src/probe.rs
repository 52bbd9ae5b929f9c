//! Health prober.
//!
//! A probe is a single bounded `GET <address><health_path>`. Its outcome is a
//! tagged value, never an error: the connection state machine decides what a
//! failure means. The timeout is enforced by cancelling the request future,
//! so a server that accepts the connection and then stalls still resolves at
//! the deadline.
//!
//! Expected failure classes (timeout, network-level rejection, HTTP 502) are
//! logged at `debug`; anything else at `warn`.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ProbeConfig;

/// Why a probe produced no HTTP status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProbeFailure {
    Timeout,
    Network(String),
}

/// Classified probe result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Healthy,
    /// Non-success HTTP status, kept for display.
    Unhealthy(u16),
    /// Timeout or network-level failure; no status was observed.
    Indeterminate(ProbeFailure),
}

impl ProbeOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Failures that happen routinely while a tunnel is down.
    pub fn is_expected_failure(&self) -> bool {
        matches!(self, Self::Unhealthy(502) | Self::Indeterminate(_))
    }

    /// Short status text for the UI.
    pub fn describe(&self) -> String {
        match self {
            Self::Healthy => "Healthy".to_string(),
            Self::Unhealthy(code) if *code >= 500 => format!("Server error ({code})"),
            Self::Unhealthy(404) => "Not found".to_string(),
            Self::Unhealthy(401 | 403) => "Unauthorized".to_string(),
            Self::Unhealthy(code) if *code >= 400 => format!("Client error ({code})"),
            Self::Unhealthy(_) | Self::Indeterminate(_) => "Not available".to_string(),
        }
    }
}

/// Probes candidate tunnel addresses.
#[async_trait]
pub trait HealthProber: Send + Sync {
    /// Probe `address` (no trailing slash). Must resolve within the probe timeout.
    async fn probe(&self, address: &str) -> ProbeOutcome;

    /// Optional build version (`v` + short sha). `None` on any failure.
    async fn version(&self, _address: &str) -> Option<String> {
        None
    }
}

/// Run `probe` under a hard deadline; an elapsed deadline is `Indeterminate(Timeout)`.
pub async fn bounded<F>(timeout: Duration, probe: F) -> ProbeOutcome
where
    F: Future<Output = ProbeOutcome>,
{
    tokio::time::timeout(timeout, probe)
        .await
        .unwrap_or(ProbeOutcome::Indeterminate(ProbeFailure::Timeout))
}

/// Wraps another prober and enforces a deadline on each probe.
pub struct TimeBoxed<P> {
    inner: P,
    timeout: Duration,
}

impl<P> TimeBoxed<P> {
    pub fn new(inner: P, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<P: HealthProber> HealthProber for TimeBoxed<P> {
    async fn probe(&self, address: &str) -> ProbeOutcome {
        bounded(self.timeout, self.inner.probe(address)).await
    }

    async fn version(&self, address: &str) -> Option<String> {
        tokio::time::timeout(self.timeout, self.inner.version(address))
            .await
            .ok()
            .flatten()
    }
}

#[derive(Deserialize)]
struct VersionBody {
    #[serde(rename = "gitSha")]
    git_sha: Option<String>,
}

/// Display form of a git sha: `v` + first 8 characters. Unknown shas yield `None`.
pub fn short_version(sha: &str) -> Option<String> {
    let sha = sha.trim();
    if sha.is_empty() || sha == "Unknown" {
        return None;
    }
    Some(format!("v{}", sha.chars().take(8).collect::<String>()))
}

/// Probes over HTTP with reqwest.
pub struct HttpProber {
    http: reqwest::Client,
    health_path: String,
    version_path: String,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(config: &ProbeConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.timeout())
            .build()?;
        Ok(Self {
            http,
            health_path: config.health_path.clone(),
            version_path: config.version_path.clone(),
            timeout: config.timeout(),
        })
    }

    async fn request(&self, url: String) -> ProbeOutcome {
        match self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json, text/plain, */*")
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => ProbeOutcome::Healthy,
            Ok(resp) => ProbeOutcome::Unhealthy(resp.status().as_u16()),
            Err(e) if e.is_timeout() => ProbeOutcome::Indeterminate(ProbeFailure::Timeout),
            Err(e) => ProbeOutcome::Indeterminate(ProbeFailure::Network(e.to_string())),
        }
    }
}

#[async_trait]
impl HealthProber for HttpProber {
    async fn probe(&self, address: &str) -> ProbeOutcome {
        let url = format!("{}{}", address.trim_end_matches('/'), self.health_path);
        let outcome = bounded(self.timeout, self.request(url)).await;
        log_outcome(address, &outcome);
        outcome
    }

    async fn version(&self, address: &str) -> Option<String> {
        let url = format!("{}{}", address.trim_end_matches('/'), self.version_path);
        let fetch = async {
            let resp = self
                .http
                .get(url)
                .header(reqwest::header::ACCEPT, "application/json")
                .send()
                .await
                .ok()?;
            if !resp.status().is_success() {
                return None;
            }
            let body: VersionBody = resp.json().await.ok()?;
            body.git_sha.as_deref().and_then(short_version)
        };
        tokio::time::timeout(self.timeout, fetch).await.ok().flatten()
    }
}

/// Log a probe outcome, keeping routine outage noise at `debug`.
pub fn log_outcome(address: &str, outcome: &ProbeOutcome) {
    match outcome {
        ProbeOutcome::Healthy => debug!("Health: {address} is healthy"),
        failure if failure.is_expected_failure() => {
            debug!("Health: {address} unavailable ({})", failure.describe());
        }
        failure => warn!("Health: {address} check failed: {}", failure.describe()),
    }
}
