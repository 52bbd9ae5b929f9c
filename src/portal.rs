//! Coordinating context for one portal page.
//!
//! [`Portal`] owns every piece of mutable page state: the active tunnel, the
//! connection state machine, the rediscovery loop flag, the navigation
//! synchronizer and any pending address switch. Nothing lives in globals, so
//! each test builds its own instance. Signals for the UI go out as
//! [`PortalEvent`]s on a broadcast channel.
//!
//! ## Flows
//!
//! - **First load** ([`Portal::start`]): load the snapshot, pick the tunnel
//!   (checking a bookmarked `tunnelUrl` for staleness), point the container
//!   at it, clean the address bar, probe.
//! - **Proactive check** ([`Portal::health_check`]) while connected:
//!   re-validate the active address, and offer a confirmed switch when the
//!   configuration rotated to another healthy address.
//! - **Outage**: the first failure enters Recovering and starts rediscovery;
//!   stage ticks escalate the banner; a healthy candidate is promoted.
//! - **Navigation**: messages, polls and history events go to the
//!   synchronizer; its outcomes become events.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::PortalConfig;
use crate::connection::{ConnectionMachine, ConnectionState, FailureCause, Transition};
use crate::countdown::Countdown;
use crate::environment::{load_preference, save_preference, EnvironmentPreference, PreferenceStore};
use crate::host::{EmbeddedFrame, HostPage};
use crate::navigation::address_bar::{
    frame_target, page_base, page_url, query_param, signin_target, RETURN_URL_PARAM,
    SUBPAGE_PARAM, TOKEN_PARAM, TUNNEL_URL_PARAM,
};
use crate::navigation::messages::portal_info;
use crate::navigation::{NavigationSynchronizer, SyncOutcome};
use crate::probe::HealthProber;
use crate::rediscovery::{Promotion, RediscoveryLoop, SwitchTrigger, TickOutcome};
use crate::resolver::resolve;
use crate::runtime::Command;
use crate::snapshot::{ConfigSnapshot, FetchError, SnapshotLoader};
use crate::stage::RecoveryView;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastLevel {
    Info,
    Success,
    Error,
}

/// UI signal published by the portal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PortalEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Staged banner contents, refreshed every stage tick while failing.
    RecoveryBanner(RecoveryView),
    RecoveryDismissed,
    /// The background search stopped without a promotion.
    RediscoveryStopped,
    Toast {
        level: ToastLevel,
        title: String,
        message: String,
    },
    CountdownStarted {
        address: String,
        trigger: SwitchTrigger,
        seconds: u32,
    },
    CountdownTick {
        remaining: u32,
    },
    CountdownPaused {
        remaining: u32,
    },
    CountdownResumed {
        remaining: u32,
    },
    CountdownFinished,
    CountdownCanceled,
    /// First-load failure; only a retry moves past it.
    BlockingError {
        title: String,
        message: String,
    },
    /// The container was pointed at `url`.
    FrameNavigated {
        url: String,
    },
    SessionLoaded {
        address: String,
    },
    /// The address bar now shows `path`.
    PathSynced {
        path: String,
    },
    /// The whole page left for `url`.
    Redirect {
        url: String,
    },
    Version {
        version: String,
    },
    EnvironmentChanged {
        environment: EnvironmentPreference,
    },
}

impl From<Transition> for PortalEvent {
    fn from(t: Transition) -> Self {
        Self::StateChanged {
            from: t.from,
            to: t.to,
        }
    }
}

/// Errors that escape to the caller. Both can only happen on first load.
#[derive(Debug, thiserror::Error)]
pub enum PortalError {
    #[error("configuration unavailable: {0}")]
    ConfigUnavailable(#[from] FetchError),
    #[error("no tunnel configured for environment {0}")]
    TunnelNotConfigured(EnvironmentPreference),
}

struct PendingSwitch {
    address: String,
    trigger: SwitchTrigger,
    generation: u64,
    countdown: Countdown,
}

pub struct Portal<H, F> {
    config: PortalConfig,
    loader: Arc<dyn SnapshotLoader>,
    prober: Arc<dyn HealthProber>,
    preferences: Box<dyn PreferenceStore>,
    host: H,
    frame: F,
    events: broadcast::Sender<PortalEvent>,
    commands: mpsc::UnboundedSender<Command>,

    environment: EnvironmentPreference,
    snapshot: Option<ConfigSnapshot>,
    active: Option<String>,
    connection: ConnectionMachine,
    rediscovery: RediscoveryLoop,
    navigation: NavigationSynchronizer,
    switch: Option<PendingSwitch>,
    switch_generation: u64,
    declined: Option<String>,
    loaded_once: bool,
    frame_loaded: bool,
    load_started: Option<Instant>,
    blocked: bool,
    version: Option<String>,
}

impl<H: HostPage, F: EmbeddedFrame> Portal<H, F> {
    pub fn new(
        config: PortalConfig,
        loader: Arc<dyn SnapshotLoader>,
        prober: Arc<dyn HealthProber>,
        preferences: Box<dyn PreferenceStore>,
        host: H,
        frame: F,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let environment = load_preference(preferences.as_ref(), config.environment.default);
        let navigation = NavigationSynchronizer::new(&config.navigation);
        Self {
            config,
            loader,
            prober,
            preferences,
            host,
            frame,
            events,
            commands,
            environment,
            snapshot: None,
            active: None,
            connection: ConnectionMachine::new(),
            rediscovery: RediscoveryLoop::new(),
            navigation,
            switch: None,
            switch_generation: 0,
            declined: None,
            loaded_once: false,
            frame_loaded: false,
            load_started: None,
            blocked: false,
            version: None,
        }
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn subscribe(&self) -> broadcast::Receiver<PortalEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> broadcast::Sender<PortalEvent> {
        self.events.clone()
    }

    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_failing(&self) -> bool {
        self.connection.is_failing()
    }

    pub fn active_address(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn environment(&self) -> EnvironmentPreference {
        self.environment
    }

    pub fn snapshot(&self) -> Option<&ConfigSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn current_path(&self) -> &str {
        self.navigation.current_path()
    }

    pub fn rediscovery_active(&self) -> bool {
        self.rediscovery.is_active()
    }

    pub fn rediscovery_ticks(&self) -> u64 {
        self.rediscovery.ticks()
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub fn loaded_once(&self) -> bool {
        self.loaded_once
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn recovery_view(&self) -> Option<RecoveryView> {
        self.connection.recovery_view(Instant::now())
    }

    /// Address, trigger and remaining seconds of the offered switch.
    pub fn pending_switch(&self) -> Option<(&str, SwitchTrigger, u32)> {
        self.switch
            .as_ref()
            .map(|s| (s.address.as_str(), s.trigger, s.countdown.remaining()))
    }

    pub fn declined_address(&self) -> Option<&str> {
        self.declined.as_deref()
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn frame(&self) -> &F {
        &self.frame
    }

    /// When the first-load timeout fires, if a load is outstanding.
    pub fn load_deadline(&self) -> Option<Instant> {
        self.load_started
            .map(|t| t + self.config.recovery.initial_load_timeout())
    }

    pub fn flush_deadline(&self) -> Option<Instant> {
        self.navigation.flush_deadline()
    }

    // ── Signals ─────────────────────────────────────────────────

    fn emit(&self, event: PortalEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn toast(&self, level: ToastLevel, title: &str, message: &str) {
        self.emit(PortalEvent::Toast {
            level,
            title: title.to_string(),
            message: message.to_string(),
        });
    }

    fn block(&mut self, title: &str, message: String) {
        self.blocked = true;
        self.emit(PortalEvent::BlockingError {
            title: title.to_string(),
            message,
        });
    }

    fn emit_banner(&self, now: Instant) {
        if let Some(view) = self.connection.recovery_view(now) {
            self.emit(PortalEvent::RecoveryBanner(view));
        }
    }

    // ── First load ───────────────────────────────────────────────

    /// Resolve the tunnel, load the embedded session and probe it.
    ///
    /// Fails only when there is nothing to show at all; the portal then
    /// stays blocked until [`Portal::retry_now`].
    pub async fn start(&mut self) -> Result<(), PortalError> {
        self.blocked = false;
        let snapshot = match self.loader.load().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Portal: failed to load configuration: {e}");
                self.block(
                    "Configuration Error",
                    format!("Failed to load configuration file: {e}"),
                );
                return Err(PortalError::ConfigUnavailable(e));
            }
        };
        let configured = resolve(&snapshot, self.environment);
        self.snapshot = Some(snapshot);

        let href = self.host.href();
        let bookmarked = query_param(&href, TUNNEL_URL_PARAM)
            .map(|p| p.trim_end_matches('/').to_string())
            .filter(|p| !p.is_empty());
        let base = match (bookmarked, configured) {
            (Some(param), configured) => self.verify_bookmarked(param, configured).await,
            (None, Some(configured)) => configured,
            (None, None) => {
                warn!("Portal: no tunnel configured for {}", self.environment);
                self.block(
                    "Tunnel Not Configured",
                    "No cloud tunnel found in configuration.".to_string(),
                );
                return Err(PortalError::TunnelNotConfigured(self.environment));
            }
        };
        info!("Portal: using tunnel {base}");

        let route = query_param(&href, SUBPAGE_PARAM)
            .filter(|p| !p.is_empty())
            .or_else(|| query_param(&href, RETURN_URL_PARAM).filter(|p| !p.is_empty()))
            .unwrap_or_else(|| "/".to_string());
        let token = query_param(&href, TOKEN_PARAM).filter(|t| !t.is_empty());
        match token.as_deref().and_then(|t| signin_target(&base, t, &route)) {
            Some(signin) => {
                info!("Portal: loading tunnel with one-time sign-in");
                self.load_session(&base, &route, &signin);
            }
            None => self.load_session(&base, &route, &frame_target(&base, &route)),
        }
        self.navigation
            .write_initial(&mut self.host, &route, Instant::now());
        self.emit(PortalEvent::PathSynced { path: route });

        let outcome = self.prober.probe(&base).await;
        if outcome.is_healthy() {
            self.mark_connected().await;
        } else {
            self.enter_recovery(FailureCause::Probe {
                address: base,
                outcome,
            });
        }
        Ok(())
    }

    /// A bookmarked address wins only if it still answers.
    async fn verify_bookmarked(&mut self, param: String, configured: Option<String>) -> String {
        let Some(configured) = configured.filter(|c| *c != param) else {
            return param;
        };
        info!("Portal: bookmarked tunnel {param} differs from configured {configured}, verifying");
        if self.prober.probe(&param).await.is_healthy() {
            return param;
        }
        self.toast(
            ToastLevel::Info,
            "Stale Tunnel URL",
            "The bookmarked tunnel URL is outdated. Checking for current address...",
        );
        if self.prober.probe(&configured).await.is_healthy() {
            self.toast(
                ToastLevel::Success,
                "Using Current Tunnel",
                "Switched to the current tunnel address from config.",
            );
        } else {
            info!("Portal: neither tunnel address is healthy, using configured one");
        }
        configured
    }

    /// Point the container at `target` and start a new navigation session.
    fn load_session(&mut self, base: &str, route: &str, target: &str) {
        self.active = Some(base.to_string());
        self.frame.set_src(target);
        self.navigation.attach(base, route, target);
        self.frame_loaded = false;
        self.load_started = Some(Instant::now());
        let shown = if target.contains(TOKEN_PARAM) && target.contains("/auth/signin-token") {
            format!("{base}/auth/signin-token")
        } else {
            target.to_string()
        };
        self.emit(PortalEvent::FrameNavigated { url: shown });
    }

    /// The embedded session finished loading.
    pub fn on_frame_loaded(&mut self) {
        self.frame_loaded = true;
        self.loaded_once = true;
        self.load_started = None;
        let address = self.active.clone().unwrap_or_default();
        info!("Portal: embedded session loaded from {address}");
        self.emit(PortalEvent::SessionLoaded { address });

        let outcome = self
            .navigation
            .poll(&mut self.frame, &mut self.host, Instant::now());
        let reentered = matches!(outcome, SyncOutcome::Reentry { .. });
        self.report_sync(outcome);
        if reentered {
            return;
        }

        let href = self.host.href();
        if let (Some(base), Some(page)) = (page_base(&href), page_url(&href)) {
            self.frame.post_message(&portal_info(&base, &page));
        }
    }

    /// The embedded session did not load in time.
    pub async fn on_load_timeout(&mut self) {
        self.load_started = None;
        if self.frame_loaded || self.connection.is_failing() {
            return;
        }
        info!("Portal: initial load timed out, running health check");
        self.health_check().await;
    }

    // ── Health ─────────────────────────────────────────────────

    /// Proactive check while connected.
    ///
    /// The active address is re-validated first; failure enters recovery.
    /// If it is healthy but the configuration names another address that
    /// also answers, a rotation switch is offered, unless the user already
    /// declined that address.
    pub async fn health_check(&mut self) {
        if self.blocked || self.connection.is_failing() {
            return;
        }
        let Some(active) = self.active.clone() else {
            return;
        };
        let snapshot = match self.loader.load().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                debug!("Health: configuration reload failed: {e}");
                return;
            }
        };
        let candidate = resolve(&snapshot, self.environment);
        self.snapshot = Some(snapshot);

        let outcome = self.prober.probe(&active).await;
        if !outcome.is_healthy() {
            info!("Health: current tunnel is unhealthy ({})", outcome.describe());
            self.enter_recovery(FailureCause::Probe {
                address: active,
                outcome,
            });
            return;
        }
        if self.connection.state() == ConnectionState::Initializing {
            self.mark_connected().await;
        }

        let Some(candidate) = candidate.filter(|c| *c != active) else {
            return;
        };
        if self.declined.as_deref() == Some(candidate.as_str())
            || self
                .switch
                .as_ref()
                .is_some_and(|s| s.address == candidate)
        {
            return;
        }
        info!("Health: tunnel address changed: {active} -> {candidate}");
        let outcome = self.prober.probe(&candidate).await;
        if outcome.is_healthy() {
            self.toast(
                ToastLevel::Info,
                "Tunnel Address Changed",
                "A new tunnel address has been detected. Switching...",
            );
            self.offer_switch(candidate, SwitchTrigger::Rotation).await;
        } else {
            debug!(
                "Health: new tunnel address not healthy yet ({}), will retry next cycle",
                outcome.describe()
            );
        }
    }

    fn enter_recovery(&mut self, cause: FailureCause) {
        let now = Instant::now();
        let title = cause.title();
        let Some(transition) = self.connection.on_failure(cause, now) else {
            return;
        };
        warn!("Portal: {title}, searching for a healthy tunnel");
        if let Some(pending) = self.switch.take() {
            debug!("Portal: dropping offered switch to {}", pending.address);
            self.emit(PortalEvent::CountdownCanceled);
        }
        self.emit(transition.into());
        self.emit_banner(now);
        self.rediscovery.start();
    }

    /// Advance the staged banner.
    pub fn tick_stage(&mut self) {
        let now = Instant::now();
        if !self.connection.is_failing() {
            return;
        }
        if let Some(transition) = self.connection.tick(now) {
            info!("Portal: outage escalated to {}", transition.to.as_str());
            self.emit(transition.into());
        }
        self.emit_banner(now);
    }

    // ── Rediscovery and promotion ───────────────────────────────

    /// Scheduled rediscovery tick; does nothing unless the loop is running.
    pub async fn rediscovery_tick(&mut self) {
        if self.rediscovery.is_active() {
            self.rediscovery_pass().await;
        }
    }

    async fn rediscovery_pass(&mut self) {
        let report = self
            .rediscovery
            .tick(
                self.loader.as_ref(),
                self.prober.as_ref(),
                self.environment,
                self.active.as_deref(),
            )
            .await;
        if let Some(snapshot) = report.snapshot {
            self.snapshot = Some(snapshot);
        }
        if let TickOutcome::Found(promotion) = report.outcome {
            self.promote(promotion).await;
        }
    }

    /// Make a healthy candidate the active session.
    ///
    /// Idempotent: promoting the address already in use while connected
    /// changes nothing and does not restart rediscovery.
    pub async fn promote(&mut self, promotion: Promotion) {
        let failing = self.connection.is_failing();
        match promotion {
            Promotion::NewAddress(address) => {
                if !failing && self.active.as_deref() == Some(address.as_str()) {
                    return;
                }
                if self.switch.as_ref().is_some_and(|s| s.address == address) {
                    debug!("Portal: switch to {address} already offered");
                    return;
                }
                let trigger = if failing {
                    SwitchTrigger::Recovery
                } else {
                    SwitchTrigger::Rotation
                };
                self.offer_switch(address, trigger).await;
            }
            Promotion::SameAddress => {
                if failing {
                    self.restore_same().await;
                }
            }
        }
    }

    async fn offer_switch(&mut self, address: String, trigger: SwitchTrigger) {
        self.rediscovery.stop();
        let seconds = match trigger {
            SwitchTrigger::Recovery => self.config.recovery.recovery_confirm_secs,
            SwitchTrigger::Rotation => self.config.recovery.rotation_confirm_secs,
        };
        if seconds == 0 {
            self.switch_to(address).await;
            return;
        }

        self.switch_generation += 1;
        let generation = self.switch_generation;
        let events = self.events.clone();
        let commands = self.commands.clone();
        let countdown = Countdown::start(
            seconds,
            move |remaining| {
                let _ = events.send(PortalEvent::CountdownTick { remaining });
            },
            move || {
                let _ = commands.send(Command::SwitchCountdownElapsed(generation));
            },
        );
        info!("Portal: switching to {address} in {seconds}s unless canceled");
        self.emit(PortalEvent::CountdownStarted {
            address: address.clone(),
            trigger,
            seconds,
        });
        self.switch = Some(PendingSwitch {
            address,
            trigger,
            generation,
            countdown,
        });
    }

    /// A switch countdown ran out. Stale generations are ignored.
    pub async fn confirm_switch(&mut self, generation: u64) {
        if self
            .switch
            .as_ref()
            .is_some_and(|s| s.generation == generation)
        {
            if let Some(pending) = self.switch.take() {
                self.emit(PortalEvent::CountdownFinished);
                self.switch_to(pending.address).await;
            }
        }
    }

    async fn switch_to(&mut self, address: String) {
        self.switch = None;
        self.rediscovery.stop();
        self.declined = None;
        let route = self.navigation.current_path().to_string();
        info!("Portal: switching embedded session to {address} at {route}");
        self.load_session(&address, &route, &frame_target(&address, &route));
        self.toast(
            ToastLevel::Success,
            "New Address Found",
            "Connecting to new cloud address...",
        );
        self.mark_connected().await;
    }

    async fn restore_same(&mut self) {
        self.switch = None;
        self.rediscovery.stop();
        let Some(address) = self.active.clone() else {
            return;
        };
        let route = self.navigation.current_path().to_string();
        info!("Portal: tunnel {address} is healthy again, reloading session");
        self.load_session(&address, &route, &frame_target(&address, &route));
        self.toast(
            ToastLevel::Success,
            "Connection Restored",
            "The platform is reachable again.",
        );
        self.mark_connected().await;
    }

    async fn mark_connected(&mut self) {
        let was_failing = self.connection.is_failing();
        if let Some(transition) = self.connection.promote() {
            info!("Portal: connected");
            self.emit(transition.into());
            if was_failing {
                self.emit(PortalEvent::RecoveryDismissed);
            }
        }
        self.refresh_version().await;
    }

    async fn refresh_version(&mut self) {
        let Some(address) = self.active.clone() else {
            return;
        };
        if let Some(version) = self.prober.version(&address).await {
            if self.version.as_deref() != Some(version.as_str()) {
                debug!("Portal: backend version {version}");
                self.emit(PortalEvent::Version {
                    version: version.clone(),
                });
                self.version = Some(version);
            }
        }
    }

    // ── User controls ────────────────────────────────────────────

    /// "Retry now": one immediate pass, never resetting the outage clock.
    /// After a blocking first-load error this re-runs the first load.
    pub async fn retry_now(&mut self) {
        if self.blocked {
            info!("Portal: retrying first load");
            if let Err(e) = self.start().await {
                debug!("Portal: retry failed: {e}");
            }
            return;
        }
        if self.connection.is_failing() {
            info!("Portal: retry requested");
            self.rediscovery_pass().await;
        } else {
            self.health_check().await;
        }
    }

    /// Stop searching; the outage state and banner remain.
    pub fn cancel_recovery(&mut self) {
        if self.rediscovery.is_active() {
            info!("Portal: recovery search canceled");
            self.rediscovery.stop();
            self.emit(PortalEvent::RediscoveryStopped);
        }
    }

    pub fn pause_countdown(&mut self) {
        if let Some(pending) = &self.switch {
            pending.countdown.pause();
            self.emit(PortalEvent::CountdownPaused {
                remaining: pending.countdown.remaining(),
            });
        }
    }

    pub fn resume_countdown(&mut self) {
        if let Some(pending) = &self.switch {
            pending.countdown.resume();
            self.emit(PortalEvent::CountdownResumed {
                remaining: pending.countdown.remaining(),
            });
        }
    }

    /// Switch now instead of waiting.
    pub async fn skip_countdown(&mut self) {
        if let Some(pending) = self.switch.take() {
            pending.countdown.cancel();
            self.switch_to(pending.address).await;
        }
    }

    /// Decline the offered switch. A declined rotation is not offered again.
    pub fn cancel_countdown(&mut self) {
        if let Some(pending) = self.switch.take() {
            pending.countdown.cancel();
            info!("Portal: switch to {} declined", pending.address);
            if pending.trigger == SwitchTrigger::Rotation {
                self.declined = Some(pending.address);
            }
            self.emit(PortalEvent::CountdownCanceled);
        }
    }

    /// Persist a new environment and move to its tunnel right away if it
    /// answers. An explicit choice skips the rotation countdown.
    pub async fn set_environment(&mut self, environment: EnvironmentPreference) {
        if environment == self.environment {
            return;
        }
        if let Err(e) = save_preference(self.preferences.as_mut(), environment) {
            warn!("Portal: failed to persist environment preference: {e}");
        }
        info!("Portal: environment changed to {environment}");
        self.environment = environment;
        self.declined = None;
        self.emit(PortalEvent::EnvironmentChanged { environment });
        self.toast(
            ToastLevel::Info,
            "Environment Changed",
            &format!("Now using the {environment} environment."),
        );
        if self.connection.is_failing() {
            self.rediscovery_pass().await;
            return;
        }

        let snapshot = match self.loader.load().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                debug!("Portal: configuration reload failed: {e}");
                return;
            }
        };
        let candidate = resolve(&snapshot, environment);
        self.snapshot = Some(snapshot);
        let Some(candidate) = candidate.filter(|c| self.active.as_deref() != Some(c.as_str()))
        else {
            return;
        };
        let outcome = self.prober.probe(&candidate).await;
        if outcome.is_healthy() {
            self.switch_to(candidate).await;
        } else {
            warn!(
                "Portal: {environment} tunnel {candidate} is not healthy ({}), keeping current session",
                outcome.describe()
            );
        }
    }

    // ── Network signals ─────────────────────────────────────────

    pub fn on_network_offline(&mut self) {
        if !self.connection.is_failing() {
            self.enter_recovery(FailureCause::NetworkOffline);
        }
    }

    pub async fn on_network_online(&mut self) {
        self.toast(
            ToastLevel::Info,
            "Connection Restored",
            "Network connection restored. Running health check...",
        );
        if self.connection.is_failing() {
            self.rediscovery_pass().await;
        } else {
            self.health_check().await;
        }
    }

    // ── Navigation ──────────────────────────────────────────────

    pub fn on_frame_message(&mut self, origin: &str, message: &Value) {
        let outcome = self
            .navigation
            .on_message(origin, message, &mut self.host, Instant::now());
        self.report_sync(outcome);
    }

    pub fn on_popstate(&mut self, state_path: Option<&str>) {
        let outcome = self.navigation.on_history_navigation(
            state_path,
            &mut self.frame,
            &self.host,
            Instant::now(),
        );
        self.report_sync(outcome);
    }

    pub fn poll_navigation(&mut self) {
        let outcome = self
            .navigation
            .poll(&mut self.frame, &mut self.host, Instant::now());
        self.report_sync(outcome);
    }

    pub fn flush_navigation(&mut self) {
        let outcome = self.navigation.flush(&mut self.host, Instant::now());
        self.report_sync(outcome);
    }

    fn report_sync(&self, outcome: SyncOutcome) {
        match outcome {
            SyncOutcome::Written { path, .. } => self.emit(PortalEvent::PathSynced { path }),
            SyncOutcome::FrameNavigated { url } => self.emit(PortalEvent::FrameNavigated { url }),
            SyncOutcome::Reentry { url } => self.emit(PortalEvent::Redirect { url }),
            SyncOutcome::Deferred { path } => debug!("Navigation: write of {path} deferred"),
            SyncOutcome::Unchanged | SyncOutcome::Ignored(_) => {}
        }
    }
}
