//! Address resolution: environment preference → tunnel address.

use tracing::debug;

use crate::environment::{EnvironmentPreference, DEFAULT_TUNNEL_NAME};
use crate::snapshot::ConfigSnapshot;

/// Pick the tunnel address for `env`.
///
/// Looks up the environment's record first, then the generic `cloud` record.
/// A record with a blank address counts as absent. The returned address has
/// no trailing slash.
pub fn resolve(snapshot: &ConfigSnapshot, env: EnvironmentPreference) -> Option<String> {
    let name = env.tunnel_name();
    if let Some(address) = usable_address(snapshot, name) {
        return Some(address);
    }
    debug!("Resolver: no '{name}' record for {env}, falling back to '{DEFAULT_TUNNEL_NAME}'");
    usable_address(snapshot, DEFAULT_TUNNEL_NAME)
}

fn usable_address(snapshot: &ConfigSnapshot, name: &str) -> Option<String> {
    let record = snapshot.find(name)?;
    let address = record.address.trim().trim_end_matches('/');
    if address.is_empty() {
        None
    } else {
        Some(address.to_string())
    }
}
