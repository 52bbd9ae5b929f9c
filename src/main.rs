//! `portal` command-line front end.
//!
//! - `portal watch`: run the engine headless against a live configuration,
//!   printing every UI event (useful for watching a tunnel rotate)
//! - `portal resolve`: print the address the current environment maps to
//! - `portal probe <address>`: one health probe plus version lookup
//! - `portal stage <secs>`: the recovery banner after `secs` of outage

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use tunnel_portal::config::PortalConfig;
use tunnel_portal::environment::{save_preference, EnvironmentPreference, FilePreferenceStore};
use tunnel_portal::host::{MemoryFrame, MemoryHost};
use tunnel_portal::portal::{Portal, PortalEvent};
use tunnel_portal::probe::{HealthProber, HttpProber};
use tunnel_portal::resolver::resolve;
use tunnel_portal::runtime::{self, Command, PortalHandle};
use tunnel_portal::snapshot::loader_for;
use tunnel_portal::stage::RecoveryView;

/// Keeps an embedded backend session reachable across tunnel rotations.
#[derive(Parser)]
#[command(name = "portal", version)]
struct Cli {
    /// Path to TOML config file.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine headless and print its events.
    Watch {
        /// Switch to this environment first (persisted).
        #[arg(long)]
        env: Option<EnvironmentPreference>,
        /// Print events as JSON lines.
        #[arg(long)]
        json: bool,
    },
    /// Print the tunnel address for an environment.
    Resolve {
        #[arg(long)]
        env: Option<EnvironmentPreference>,
    },
    /// Probe a tunnel address once.
    Probe { address: String },
    /// Show the recovery banner after SECS seconds of outage.
    Stage { secs: u64 },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let config = match PortalConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("portal: {e}");
            std::process::exit(2);
        }
    };

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .with_writer(std::io::stderr)
        .init();

    let code = match cli.command {
        Commands::Watch { env, json } => watch(config, env, json).await,
        Commands::Resolve { env } => resolve_once(&config, env).await,
        Commands::Probe { address } => probe_once(&config, &address).await,
        Commands::Stage { secs } => {
            print_json(&RecoveryView::at(secs));
            0
        }
    };
    std::process::exit(code);
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("portal: failed to serialize output: {e}"),
    }
}

async fn resolve_once(config: &PortalConfig, env: Option<EnvironmentPreference>) -> i32 {
    let env = env.unwrap_or(config.environment.default);
    let loader = match loader_for(&config.source.config_url, config.probe.timeout()) {
        Ok(loader) => loader,
        Err(e) => {
            eprintln!("portal: {e}");
            return 1;
        }
    };
    match loader.load().await {
        Ok(snapshot) => match resolve(&snapshot, env) {
            Some(address) => {
                println!("{address}");
                0
            }
            None => {
                eprintln!("portal: no tunnel configured for {env}");
                1
            }
        },
        Err(e) => {
            eprintln!("portal: {e}");
            1
        }
    }
}

async fn probe_once(config: &PortalConfig, address: &str) -> i32 {
    let prober = match HttpProber::new(&config.probe) {
        Ok(prober) => prober,
        Err(e) => {
            eprintln!("portal: {e}");
            return 1;
        }
    };
    let outcome = prober.probe(address.trim_end_matches('/')).await;
    let version = prober.version(address.trim_end_matches('/')).await;
    print_json(&serde_json::json!({
        "address": address,
        "outcome": outcome,
        "status": outcome.describe(),
        "version": version,
    }));
    i32::from(!outcome.is_healthy())
}

fn describe(event: &PortalEvent) -> String {
    match event {
        PortalEvent::StateChanged { from, to } => {
            format!("state: {} -> {}", from.as_str(), to.as_str())
        }
        PortalEvent::RecoveryBanner(view) => format!(
            "banner: {} ({}) {} left",
            view.label, view.severity.as_str(), view.countdown
        ),
        PortalEvent::Toast { title, message, .. } => format!("toast: {title}: {message}"),
        PortalEvent::CountdownStarted {
            address, seconds, ..
        } => format!("switching to {address} in {seconds}s"),
        PortalEvent::BlockingError { title, message } => format!("error: {title}: {message}"),
        PortalEvent::FrameNavigated { url } => format!("frame: {url}"),
        PortalEvent::SessionLoaded { address } => format!("loaded: {address}"),
        PortalEvent::Version { version } => format!("backend version {version}"),
        other => format!("{other:?}"),
    }
}

async fn watch(mut config: PortalConfig, env: Option<EnvironmentPreference>, json: bool) -> i32 {
    let mut preferences = FilePreferenceStore::new(&config.environment.preference_file);
    if let Some(env) = env {
        if let Err(e) = save_preference(&mut preferences, env) {
            warn!("Environment: could not persist {env}: {e}");
        }
        config.environment.default = env;
    }

    let loader = match loader_for(&config.source.config_url, config.probe.timeout()) {
        Ok(loader) => loader,
        Err(e) => {
            eprintln!("portal: {e}");
            return 1;
        }
    };
    let prober = match HttpProber::new(&config.probe) {
        Ok(prober) => Arc::new(prober),
        Err(e) => {
            eprintln!("portal: {e}");
            return 1;
        }
    };

    info!("portal v{} starting", env!("CARGO_PKG_VERSION"));
    let host = MemoryHost::new(&config.source.page_url);
    let (tx, rx) = mpsc::unbounded_channel();
    let portal = Portal::new(
        config,
        loader,
        prober,
        Box::new(preferences),
        host,
        MemoryFrame::cross_origin(),
        tx.clone(),
    );
    let handle = PortalHandle::new(tx, portal.events());
    let mut events = handle.subscribe();
    let task = tokio::spawn(runtime::run(portal, rx));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if json {
                        match serde_json::to_string(&event) {
                            Ok(line) => println!("{line}"),
                            Err(e) => warn!("Portal: unserializable event: {e}"),
                        }
                    } else {
                        println!("{}", describe(&event));
                    }
                    // Headless: a pointed container counts as loaded.
                    if matches!(event, PortalEvent::FrameNavigated { .. }) {
                        handle.send(Command::FrameLoaded);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Portal: dropped {n} events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = &mut ctrl_c => {
                info!("Portal: shutting down");
                handle.send(Command::Shutdown);
                break;
            }
        }
    }

    if let Err(e) = task.await {
        warn!("Portal: event loop ended abnormally: {e}");
        return 1;
    }
    0
}
