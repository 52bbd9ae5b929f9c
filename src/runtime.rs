//! Event loop driving a [`Portal`].
//!
//! One task owns the portal and multiplexes user commands, browser signals
//! and timers with `tokio::select!`. Timers exist only while their
//! precondition holds: the stage ticker and rediscovery interval while the
//! connection is failing, health checks and navigation polling once the
//! embedded session has loaded.

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::environment::EnvironmentPreference;
use crate::host::{EmbeddedFrame, HostPage};
use crate::portal::{Portal, PortalEvent};

/// Input to the event loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// The container finished loading.
    FrameLoaded,
    /// A message posted by the embedded session.
    FrameMessage { origin: String, data: Value },
    /// Browser back/forward with the entry's state path.
    PopState(Option<String>),
    RetryNow,
    CancelRecovery,
    PauseCountdown,
    ResumeCountdown,
    SkipCountdown,
    CancelCountdown,
    /// Internal: the switch countdown with this generation ran out.
    SwitchCountdownElapsed(u64),
    SetEnvironment(EnvironmentPreference),
    NetworkOnline,
    NetworkOffline,
    Shutdown,
}

/// Cloneable handle for talking to a running loop.
#[derive(Debug, Clone)]
pub struct PortalHandle {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<PortalEvent>,
}

impl PortalHandle {
    pub fn new(
        commands: mpsc::UnboundedSender<Command>,
        events: broadcast::Sender<PortalEvent>,
    ) -> Self {
        Self { commands, events }
    }

    /// Queue a command. Returns false once the loop has exited.
    pub fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PortalEvent> {
        self.events.subscribe()
    }
}

fn every(period: std::time::Duration, immediate: bool) -> Interval {
    let start = if immediate {
        Instant::now()
    } else {
        Instant::now() + period
    };
    let mut interval = time::interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Start or stop `slot` to match `wanted`.
fn keep(slot: &mut Option<Interval>, wanted: bool, make: impl FnOnce() -> Interval) {
    match (wanted, slot.is_some()) {
        (true, false) => *slot = Some(make()),
        (false, true) => *slot = None,
        _ => {}
    }
}

async fn dispatch<H: HostPage, F: EmbeddedFrame>(portal: &mut Portal<H, F>, command: Command) {
    match command {
        Command::FrameLoaded => portal.on_frame_loaded(),
        Command::FrameMessage { origin, data } => portal.on_frame_message(&origin, &data),
        Command::PopState(state) => portal.on_popstate(state.as_deref()),
        Command::RetryNow => portal.retry_now().await,
        Command::CancelRecovery => portal.cancel_recovery(),
        Command::PauseCountdown => portal.pause_countdown(),
        Command::ResumeCountdown => portal.resume_countdown(),
        Command::SkipCountdown => portal.skip_countdown().await,
        Command::CancelCountdown => portal.cancel_countdown(),
        Command::SwitchCountdownElapsed(generation) => portal.confirm_switch(generation).await,
        Command::SetEnvironment(environment) => portal.set_environment(environment).await,
        Command::NetworkOnline => portal.on_network_online().await,
        Command::NetworkOffline => portal.on_network_offline(),
        Command::Shutdown => {}
    }
}

/// Run `portal` until [`Command::Shutdown`].
///
/// A failed first load is not fatal: the portal shows its blocking error
/// and the loop waits for [`Command::RetryNow`].
pub async fn run<H: HostPage, F: EmbeddedFrame>(
    mut portal: Portal<H, F>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) -> Portal<H, F> {
    if let Err(e) = portal.start().await {
        info!("Portal: first load failed ({e}), waiting for retry");
    }

    let recovery = portal.config().recovery.clone();
    let poll_period = std::time::Duration::from_millis(portal.config().navigation.poll_interval_ms);

    let mut stage: Option<Interval> = None;
    let mut rediscovery: Option<Interval> = None;
    let mut health: Option<Interval> = None;
    let mut navigation: Option<Interval> = None;

    loop {
        keep(&mut stage, portal.is_failing(), || every(recovery.stage_tick(), false));
        keep(&mut rediscovery, portal.rediscovery_active(), || {
            every(recovery.rediscovery_interval(), true)
        });
        keep(&mut health, portal.loaded_once(), || {
            every(recovery.health_check_interval(), false)
        });
        keep(&mut navigation, portal.loaded_once(), || every(poll_period, false));
        let flush = portal.flush_deadline();
        let load = portal.load_deadline();

        tokio::select! {
            command = commands.recv() => match command {
                None | Some(Command::Shutdown) => {
                    debug!("Portal: event loop shutting down");
                    break;
                }
                Some(command) => dispatch(&mut portal, command).await,
            },
            () = tick(&mut stage) => portal.tick_stage(),
            () = tick(&mut rediscovery) => portal.rediscovery_tick().await,
            () = tick(&mut health) => portal.health_check().await,
            () = tick(&mut navigation) => portal.poll_navigation(),
            () = sleep_until(flush) => portal.flush_navigation(),
            () = sleep_until(load) => portal.on_load_timeout().await,
        }
    }
    portal
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::task::JoinHandle;

    use super::*;
    use crate::config::PortalConfig;
    use crate::connection::ConnectionState;
    use crate::environment::MemoryPreferenceStore;
    use crate::host::{MemoryFrame, MemoryHost};
    use crate::snapshot::FetchError;
    use crate::testing::{snapshot, ScriptedLoader, ScriptedProber};

    const PAGE: &str = "https://portal.example/portal.html";
    const X: &str = "https://x.example";
    const Y: &str = "https://y.example";

    type Running = JoinHandle<Portal<MemoryHost, MemoryFrame>>;

    fn spawn(
        loader: &ScriptedLoader,
        prober: &ScriptedProber,
    ) -> (PortalHandle, broadcast::Receiver<PortalEvent>, Running) {
        let (tx, rx) = mpsc::unbounded_channel();
        let portal = Portal::new(
            PortalConfig::default(),
            Arc::new(loader.clone()),
            Arc::new(prober.clone()),
            Box::new(MemoryPreferenceStore::new()),
            MemoryHost::new(PAGE),
            MemoryFrame::cross_origin(),
            tx.clone(),
        );
        let handle = PortalHandle::new(tx, portal.events());
        let events = handle.subscribe();
        (handle, events, tokio::spawn(run(portal, rx)))
    }

    async fn until(
        events: &mut broadcast::Receiver<PortalEvent>,
        wanted: impl Fn(&PortalEvent) -> bool,
    ) {
        loop {
            let event = events.recv().await.unwrap();
            if wanted(&event) {
                return;
            }
        }
    }

    fn entered(state: ConnectionState) -> impl Fn(&PortalEvent) -> bool {
        move |e: &PortalEvent| matches!(e, PortalEvent::StateChanged { to, .. } if *to == state)
    }

    fn drain(events: &mut broadcast::Receiver<PortalEvent>) -> Vec<PortalEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn banners(events: &[PortalEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, PortalEvent::RecoveryBanner(_)))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn outage_is_searched_once_per_interval_until_rotation() {
        let loader = ScriptedLoader::cloud(X);
        let prober = ScriptedProber::default();
        prober.up(X);
        let (handle, mut events, task) = spawn(&loader, &prober);
        assert!(handle.send(Command::FrameLoaded));
        until(&mut events, entered(ConnectionState::Connected)).await;

        // First health check lands 30s after the session loaded.
        prober.down(X);
        until(&mut events, entered(ConnectionState::Recovering { stage: 0 })).await;

        tokio::time::sleep(Duration::from_millis(5500)).await;
        drain(&mut events);
        let before = prober.probes();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(prober.probes() - before, 2);
        assert_eq!(banners(&drain(&mut events)), 20);

        loader.set(Ok(snapshot(&[("cloud", Y)])));
        prober.up(Y);
        until(&mut events, entered(ConnectionState::Connected)).await;
        assert!(handle.send(Command::FrameLoaded));

        tokio::time::sleep(Duration::from_millis(500)).await;
        drain(&mut events);
        let before = prober.probes();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(prober.probes() - before, 2);
        let quiet = drain(&mut events);
        assert_eq!(banners(&quiet), 0);
        assert!(!quiet
            .iter()
            .any(|e| matches!(e, PortalEvent::StateChanged { .. })));

        assert!(handle.send(Command::Shutdown));
        let portal = task.await.unwrap();
        assert_eq!(portal.state(), ConnectionState::Connected);
        assert_eq!(portal.active_address(), Some(Y));
        assert!(!portal.rediscovery_active());
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_first_load_waits_for_retry() {
        let loader = ScriptedLoader::cloud(X);
        loader.set(Err(FetchError::Status(503)));
        let prober = ScriptedProber::default();
        prober.up(X);
        let (handle, mut events, task) = spawn(&loader, &prober);
        until(&mut events, |e| matches!(e, PortalEvent::BlockingError { .. })).await;

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(prober.probes(), 0);
        assert!(drain(&mut events).is_empty());

        loader.set(Ok(snapshot(&[("cloud", X)])));
        assert!(handle.send(Command::RetryNow));
        until(&mut events, entered(ConnectionState::Connected)).await;

        assert!(handle.send(Command::Shutdown));
        let portal = task.await.unwrap();
        assert!(!portal.is_blocked());
        assert_eq!(portal.active_address(), Some(X));
        assert!(!handle.send(Command::RetryNow));
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_completion_reaches_the_loop() {
        let loader = ScriptedLoader::cloud(X);
        let prober = ScriptedProber::default();
        prober.up(X);
        let (handle, mut events, task) = spawn(&loader, &prober);
        assert!(handle.send(Command::FrameLoaded));
        until(&mut events, entered(ConnectionState::Connected)).await;

        loader.set(Ok(snapshot(&[("cloud", Y)])));
        prober.up(Y);
        until(&mut events, |e| {
            matches!(e, PortalEvent::CountdownStarted { seconds: 10, .. })
        })
        .await;
        until(&mut events, |e| matches!(e, PortalEvent::CountdownFinished)).await;

        assert!(handle.send(Command::Shutdown));
        let portal = task.await.unwrap();
        assert_eq!(portal.active_address(), Some(Y));
        assert_eq!(portal.pending_switch(), None);
    }
}
