//! Rediscovery loop.
//!
//! While an outage is in progress the runtime calls [`RediscoveryLoop::tick`]
//! on a fixed interval. One tick runs strictly in order:
//!
//! 1. reload the configuration snapshot (a failure just waits for the next tick)
//! 2. resolve the address for the current environment
//! 3. probe it, whether it is new or the address already in use
//! 4. report what a healthy probe means: a new address to switch to, or the
//!    current address coming back
//!
//! The loop never switches anything itself; the portal owns promotion. The
//! `active` flag is the single-instance guard: starting an active loop is a
//! no-op, and the runtime keeps its interval alive only while it is set.

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::environment::EnvironmentPreference;
use crate::probe::{HealthProber, ProbeOutcome};
use crate::resolver::resolve;
use crate::snapshot::{ConfigSnapshot, FetchError, SnapshotLoader};

/// What a healthy candidate means for the active session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Promotion {
    /// A different address answered; the session moves there.
    NewAddress(String),
    /// The address in use answered again.
    SameAddress,
}

/// Why a switch is being offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchTrigger {
    /// The active session is failing.
    Recovery,
    /// The active session is healthy but the configuration moved.
    Rotation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    FetchFailed(FetchError),
    Unresolved,
    CandidateUnhealthy { address: String, outcome: ProbeOutcome },
    Found(Promotion),
}

/// Result of one tick. `snapshot` is set whenever the reload succeeded.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub snapshot: Option<ConfigSnapshot>,
    pub outcome: TickOutcome,
}

/// The candidate examined by the latest tick.
#[derive(Debug, Clone, PartialEq)]
pub struct RediscoveryAttempt {
    pub candidate: Option<String>,
    pub outcome: Option<ProbeOutcome>,
    pub at: Instant,
}

#[derive(Debug, Default)]
pub struct RediscoveryLoop {
    active: bool,
    ticks: u64,
    unresolved: u64,
    last: Option<RediscoveryAttempt>,
}

impl RediscoveryLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the loop running. Returns `false` if it already was.
    pub fn start(&mut self) -> bool {
        if self.active {
            return false;
        }
        info!("Rediscovery: searching for a healthy tunnel");
        self.active = true;
        self.ticks = 0;
        self.unresolved = 0;
        true
    }

    /// Tear the loop down and forget the last attempt.
    pub fn stop(&mut self) {
        if self.active {
            debug!("Rediscovery: stopped after {} tick(s)", self.ticks);
        }
        self.active = false;
        self.last = None;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Consecutive ticks whose configuration named no usable address.
    pub fn unresolved_ticks(&self) -> u64 {
        self.unresolved
    }

    pub fn last_attempt(&self) -> Option<&RediscoveryAttempt> {
        self.last.as_ref()
    }

    /// Run one rediscovery pass against `current`, the address in use.
    pub async fn tick(
        &mut self,
        loader: &dyn SnapshotLoader,
        prober: &dyn HealthProber,
        env: EnvironmentPreference,
        current: Option<&str>,
    ) -> TickReport {
        self.ticks += 1;
        let snapshot = match loader.load().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                debug!("Rediscovery: configuration reload failed: {e}");
                self.record(None, None);
                return TickReport {
                    snapshot: None,
                    outcome: TickOutcome::FetchFailed(e),
                };
            }
        };

        let Some(candidate) = resolve(&snapshot, env) else {
            self.unresolved += 1;
            if self.unresolved == 1 {
                let names: Vec<&str> =
                    snapshot.records().iter().map(|t| t.name.as_str()).collect();
                warn!("Rediscovery: no tunnel configured for {env}; available: {names:?}");
            } else {
                debug!("Rediscovery: still no tunnel for {env} ({} ticks)", self.unresolved);
            }
            self.record(None, None);
            return TickReport {
                snapshot: Some(snapshot),
                outcome: TickOutcome::Unresolved,
            };
        };

        self.unresolved = 0;
        let outcome = prober.probe(&candidate).await;
        self.record(Some(candidate.clone()), Some(outcome.clone()));
        let is_new = current != Some(candidate.as_str());
        let outcome = if outcome.is_healthy() {
            if is_new {
                info!("Rediscovery: new tunnel address is healthy: {candidate}");
                TickOutcome::Found(Promotion::NewAddress(candidate))
            } else {
                info!("Rediscovery: current tunnel address is healthy again");
                TickOutcome::Found(Promotion::SameAddress)
            }
        } else {
            debug!(
                "Rediscovery: {} address {candidate} not healthy yet ({})",
                if is_new { "new" } else { "current" },
                outcome.describe()
            );
            TickOutcome::CandidateUnhealthy {
                address: candidate,
                outcome,
            }
        };
        TickReport {
            snapshot: Some(snapshot),
            outcome,
        }
    }

    fn record(&mut self, candidate: Option<String>, outcome: Option<ProbeOutcome>) {
        self.last = Some(RediscoveryAttempt {
            candidate,
            outcome,
            at: Instant::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::TunnelRecord;
    use async_trait::async_trait;

    struct OneLoader(Result<ConfigSnapshot, FetchError>);

    #[async_trait]
    impl SnapshotLoader for OneLoader {
        async fn load(&self) -> Result<ConfigSnapshot, FetchError> {
            self.0.clone()
        }
    }

    struct HealthyOnly(&'static str);

    #[async_trait]
    impl HealthProber for HealthyOnly {
        async fn probe(&self, address: &str) -> ProbeOutcome {
            if address == self.0 {
                ProbeOutcome::Healthy
            } else {
                ProbeOutcome::Unhealthy(502)
            }
        }
    }

    fn cloud(address: &str) -> ConfigSnapshot {
        ConfigSnapshot::new(vec![TunnelRecord {
            name: "cloud".into(),
            address: address.into(),
        }])
    }

    #[test]
    fn start_is_single_instance() {
        let mut rediscovery = RediscoveryLoop::new();
        assert!(rediscovery.start());
        assert!(!rediscovery.start());
        rediscovery.stop();
        assert!(!rediscovery.is_active());
        assert!(rediscovery.start());
    }

    #[tokio::test]
    async fn new_healthy_address_is_found() {
        let mut rediscovery = RediscoveryLoop::new();
        let report = rediscovery
            .tick(
                &OneLoader(Ok(cloud("https://y.example"))),
                &HealthyOnly("https://y.example"),
                EnvironmentPreference::Production,
                Some("https://x.example"),
            )
            .await;
        assert_eq!(
            report.outcome,
            TickOutcome::Found(Promotion::NewAddress("https://y.example".into()))
        );
        assert!(report.snapshot.is_some());
        assert_eq!(
            rediscovery.last_attempt().unwrap().candidate.as_deref(),
            Some("https://y.example")
        );
    }

    #[tokio::test]
    async fn same_address_recovering_is_found() {
        let mut rediscovery = RediscoveryLoop::new();
        let report = rediscovery
            .tick(
                &OneLoader(Ok(cloud("https://x.example/"))),
                &HealthyOnly("https://x.example"),
                EnvironmentPreference::Production,
                Some("https://x.example"),
            )
            .await;
        assert_eq!(report.outcome, TickOutcome::Found(Promotion::SameAddress));
    }

    #[tokio::test]
    async fn unhealthy_candidate_is_reported() {
        let mut rediscovery = RediscoveryLoop::new();
        let report = rediscovery
            .tick(
                &OneLoader(Ok(cloud("https://y.example"))),
                &HealthyOnly("https://z.example"),
                EnvironmentPreference::Production,
                Some("https://x.example"),
            )
            .await;
        assert_eq!(
            report.outcome,
            TickOutcome::CandidateUnhealthy {
                address: "https://y.example".into(),
                outcome: ProbeOutcome::Unhealthy(502),
            }
        );
    }

    #[tokio::test]
    async fn fetch_failure_waits_for_next_tick() {
        let mut rediscovery = RediscoveryLoop::new();
        let report = rediscovery
            .tick(
                &OneLoader(Err(FetchError::Status(404))),
                &HealthyOnly("https://x.example"),
                EnvironmentPreference::Production,
                Some("https://x.example"),
            )
            .await;
        assert_eq!(report.outcome, TickOutcome::FetchFailed(FetchError::Status(404)));
        assert!(report.snapshot.is_none());
        assert_eq!(rediscovery.ticks(), 1);
    }

    #[tokio::test]
    async fn empty_snapshot_is_unresolved() {
        let mut rediscovery = RediscoveryLoop::new();
        let report = rediscovery
            .tick(
                &OneLoader(Ok(ConfigSnapshot::default())),
                &HealthyOnly("https://x.example"),
                EnvironmentPreference::Staging,
                None,
            )
            .await;
        assert_eq!(report.outcome, TickOutcome::Unresolved);
    }

    #[tokio::test]
    async fn missing_tunnel_is_counted_until_one_appears() {
        let mut rediscovery = RediscoveryLoop::new();
        rediscovery.start();
        let empty = OneLoader(Ok(ConfigSnapshot::default()));
        let prober = HealthyOnly("https://x.example");
        for _ in 0..3 {
            rediscovery
                .tick(&empty, &prober, EnvironmentPreference::Production, None)
                .await;
        }
        assert_eq!(rediscovery.unresolved_ticks(), 3);

        let report = rediscovery
            .tick(
                &OneLoader(Ok(cloud("https://x.example"))),
                &prober,
                EnvironmentPreference::Production,
                None,
            )
            .await;
        assert_eq!(
            report.outcome,
            TickOutcome::Found(Promotion::NewAddress("https://x.example".into()))
        );
        assert_eq!(rediscovery.unresolved_ticks(), 0);

        rediscovery.tick(&empty, &prober, EnvironmentPreference::Production, None).await;
        rediscovery.stop();
        rediscovery.start();
        assert_eq!(rediscovery.unresolved_ticks(), 0);
    }
}
