#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::too_many_arguments)]

//! tunnel-portal: keeps an embedded backend session reachable while the
//! tunnel in front of it rotates addresses or goes down.
//!
//! The crate is the portal's engine with the browser abstracted away behind
//! [`host::HostPage`] and [`host::EmbeddedFrame`]:
//!
//! ```text
//! config.rs        TOML + env-var configuration
//! environment.rs   environment preference and its persistence
//! snapshot.rs      tunnel configuration snapshot, HTTP and file loaders
//! resolver.rs      environment -> tunnel address, with `cloud` fallback
//! probe.rs         time-boxed health probes and version lookup
//! stage.rs         staged outage table and banner view
//! connection.rs    Initializing / Connected / Recovering / Offline
//! countdown.rs     pausable confirmation countdown
//! rediscovery.rs   one pass of the background search for a healthy tunnel
//! navigation/      address-bar sync, message protocol, URL contract
//! host.rs          page/container seams and in-memory doubles
//! portal.rs        context object tying it all together
//! runtime.rs       tokio event loop around a Portal
//! ```

pub mod config;
pub mod connection;
pub mod countdown;
pub mod environment;
pub mod host;
pub mod navigation;
pub mod portal;
pub mod probe;
pub mod rediscovery;
pub mod resolver;
pub mod runtime;
pub mod snapshot;
pub mod stage;

#[cfg(test)]
mod testing;

pub use config::PortalConfig;
pub use connection::{ConnectionMachine, ConnectionState};
pub use environment::EnvironmentPreference;
pub use portal::{Portal, PortalError, PortalEvent};
pub use probe::{HealthProber, HttpProber, ProbeOutcome};
pub use runtime::{Command, PortalHandle};
pub use snapshot::{ConfigSnapshot, SnapshotLoader};
