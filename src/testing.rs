//! Scripted loader and prober shared by the portal and runtime tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::probe::{HealthProber, ProbeOutcome};
use crate::snapshot::{ConfigSnapshot, FetchError, SnapshotLoader, TunnelRecord};

pub fn snapshot(records: &[(&str, &str)]) -> ConfigSnapshot {
    ConfigSnapshot::new(
        records
            .iter()
            .map(|(name, address)| TunnelRecord {
                name: (*name).to_string(),
                address: (*address).to_string(),
            })
            .collect(),
    )
}

/// Serves whatever result was last set.
#[derive(Clone)]
pub struct ScriptedLoader(Arc<Mutex<Result<ConfigSnapshot, FetchError>>>);

impl ScriptedLoader {
    pub fn cloud(address: &str) -> Self {
        Self(Arc::new(Mutex::new(Ok(snapshot(&[("cloud", address)])))))
    }

    pub fn set(&self, result: Result<ConfigSnapshot, FetchError>) {
        *self.0.lock().unwrap() = result;
    }
}

#[async_trait]
impl SnapshotLoader for ScriptedLoader {
    async fn load(&self) -> Result<ConfigSnapshot, FetchError> {
        self.0.lock().unwrap().clone()
    }
}

#[derive(Default)]
struct ProberState {
    healthy: HashSet<String>,
    hanging: HashSet<String>,
    probes: usize,
}

/// Addresses are down unless marked up; hung ones never answer.
#[derive(Clone, Default)]
pub struct ScriptedProber(Arc<Mutex<ProberState>>);

impl ScriptedProber {
    pub fn up(&self, address: &str) {
        let mut state = self.0.lock().unwrap();
        state.hanging.remove(address);
        state.healthy.insert(address.to_string());
    }

    pub fn down(&self, address: &str) {
        let mut state = self.0.lock().unwrap();
        state.hanging.remove(address);
        state.healthy.remove(address);
    }

    pub fn hang(&self, address: &str) {
        let mut state = self.0.lock().unwrap();
        state.healthy.remove(address);
        state.hanging.insert(address.to_string());
    }

    /// Health probes issued so far; version lookups are not counted.
    pub fn probes(&self) -> usize {
        self.0.lock().unwrap().probes
    }
}

#[async_trait]
impl HealthProber for ScriptedProber {
    async fn probe(&self, address: &str) -> ProbeOutcome {
        let outcome = {
            let mut state = self.0.lock().unwrap();
            state.probes += 1;
            if state.hanging.contains(address) {
                None
            } else if state.healthy.contains(address) {
                Some(ProbeOutcome::Healthy)
            } else {
                Some(ProbeOutcome::Unhealthy(502))
            }
        };
        match outcome {
            Some(outcome) => outcome,
            None => std::future::pending().await,
        }
    }

    async fn version(&self, _address: &str) -> Option<String> {
        Some("vtest".to_string())
    }
}
