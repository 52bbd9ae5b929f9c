//! Connection state machine.
//!
//! Owns the authoritative [`ConnectionState`] and the start of the current
//! outage. Every transition goes through one of three entry points:
//!
//! - [`ConnectionMachine::on_failure`]: Initializing/Connected → Recovering(0).
//!   While already failing it only records the cause; one outage, one timer.
//! - [`ConnectionMachine::tick`]: advances the stage from elapsed time. It
//!   never moves backwards.
//! - [`ConnectionMachine::promote`]: back to Connected. Idempotent.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::probe::ProbeOutcome;
use crate::stage::{stage, RecoveryView};

/// Coarse connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Initializing,
    Connected,
    Recovering { stage: usize },
    Offline,
}

impl ConnectionState {
    pub fn is_failing(&self) -> bool {
        matches!(self, Self::Recovering { .. } | Self::Offline)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Connected => "connected",
            Self::Recovering { .. } => "recovering",
            Self::Offline => "offline",
        }
    }
}

/// What started an outage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum FailureCause {
    Probe { address: String, outcome: ProbeOutcome },
    NetworkOffline,
}

impl FailureCause {
    /// Banner title for the first moments of the outage.
    pub fn title(&self) -> &'static str {
        match self {
            Self::Probe { .. } => "Platform Offline",
            Self::NetworkOffline => "Connection Lost",
        }
    }
}

/// A state change, reported so the caller can publish it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

#[derive(Debug)]
pub struct ConnectionMachine {
    state: ConnectionState,
    failing_since: Option<Instant>,
    cause: Option<FailureCause>,
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMachine {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Initializing,
            failing_since: None,
            cause: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_failing(&self) -> bool {
        self.state.is_failing()
    }

    /// Most recent failure cause of the current outage.
    pub fn cause(&self) -> Option<&FailureCause> {
        self.cause.as_ref()
    }

    /// Continuous failure time, if an outage is in progress.
    pub fn elapsed(&self, now: Instant) -> Option<Duration> {
        self.failing_since
            .map(|since| now.saturating_duration_since(since))
    }

    /// Record a failure. Starts the outage clock only if none is running.
    pub fn on_failure(&mut self, cause: FailureCause, now: Instant) -> Option<Transition> {
        self.cause = Some(cause);
        if self.is_failing() {
            return None;
        }
        self.failing_since = Some(now);
        self.set(ConnectionState::Recovering { stage: 0 })
    }

    /// Advance the stage for the time that has passed.
    pub fn tick(&mut self, now: Instant) -> Option<Transition> {
        let elapsed = self.elapsed(now)?;
        let current = stage(elapsed.as_secs());
        let next = if current.is_terminal() {
            ConnectionState::Offline
        } else {
            ConnectionState::Recovering {
                stage: current.index,
            }
        };
        let regresses = match (self.state, next) {
            (ConnectionState::Offline, _) => true,
            (
                ConnectionState::Recovering { stage: held },
                ConnectionState::Recovering { stage: wanted },
            ) => wanted <= held,
            _ => false,
        };
        if regresses {
            return None;
        }
        self.set(next)
    }

    /// Return to Connected and clear the outage. A no-op when already connected.
    pub fn promote(&mut self) -> Option<Transition> {
        self.failing_since = None;
        self.cause = None;
        self.set(ConnectionState::Connected)
    }

    /// Banner contents for the current outage.
    pub fn recovery_view(&self, now: Instant) -> Option<RecoveryView> {
        self.elapsed(now).map(|e| RecoveryView::at(e.as_secs()))
    }

    fn set(&mut self, to: ConnectionState) -> Option<Transition> {
        if self.state == to {
            return None;
        }
        let from = std::mem::replace(&mut self.state, to);
        Some(Transition { from, to })
    }
}
