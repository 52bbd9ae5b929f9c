//! Staged degradation table.
//!
//! [`stage`] is a pure function of continuous failure time. The scheduler in
//! [`crate::runtime`] ticks it; nothing here holds state.

use serde::Serialize;

/// Banner severity for a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Updating,
    Warning,
    Offline,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Updating => "updating",
            Self::Warning => "warning",
            Self::Offline => "offline",
        }
    }

    /// Banner subtitle.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Updating => "An update may be in progress. Checking for availability...",
            Self::Warning => "This is taking longer than expected.",
            Self::Offline => "The platform could not be reached.",
        }
    }
}

/// One row of the stage table.
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct Stage {
    pub index: usize,
    pub threshold_secs: u64,
    /// End of this stage's window; `None` marks the terminal offline stage.
    pub estimate_secs: Option<u64>,
    pub label: &'static str,
    pub severity: Severity,
}

pub static STAGES: [Stage; 6] = [
    Stage {
        index: 0,
        threshold_secs: 0,
        estimate_secs: Some(300),
        label: "Platform Updating",
        severity: Severity::Updating,
    },
    Stage {
        index: 1,
        threshold_secs: 300,
        estimate_secs: Some(600),
        label: "Platform Updating",
        severity: Severity::Updating,
    },
    Stage {
        index: 2,
        threshold_secs: 600,
        estimate_secs: Some(900),
        label: "Platform Updating",
        severity: Severity::Updating,
    },
    Stage {
        index: 3,
        threshold_secs: 900,
        estimate_secs: Some(1200),
        label: "Platform Updating",
        severity: Severity::Updating,
    },
    Stage {
        index: 4,
        threshold_secs: 1200,
        estimate_secs: Some(1800),
        label: "Possible Problem Detected",
        severity: Severity::Warning,
    },
    Stage {
        index: 5,
        threshold_secs: 1800,
        estimate_secs: None,
        label: "Platform Offline",
        severity: Severity::Offline,
    },
];

/// Stage for `elapsed_secs` of continuous failure.
pub fn stage(elapsed_secs: u64) -> &'static Stage {
    STAGES
        .iter()
        .rev()
        .find(|s| elapsed_secs >= s.threshold_secs)
        .unwrap_or(&STAGES[0])
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        self.estimate_secs.is_none()
    }

    /// Seconds until this stage's estimate, floored at zero.
    pub fn remaining(&self, elapsed_secs: u64) -> Option<u64> {
        self.estimate_secs
            .map(|estimate| estimate.saturating_sub(elapsed_secs))
    }

    /// Fraction of this stage's own window that has passed, in `0.0..=1.0`.
    /// The terminal stage is always full.
    pub fn progress(&self, elapsed_secs: u64) -> f64 {
        match self.estimate_secs {
            Some(estimate) => {
                let window = estimate.saturating_sub(self.threshold_secs).max(1);
                let into = elapsed_secs.saturating_sub(self.threshold_secs);
                (into as f64 / window as f64).min(1.0)
            }
            None => 1.0,
        }
    }
}

/// Format seconds as `M:SS`.
pub fn format_countdown(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

/// Everything the recovery banner shows for one tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryView {
    pub stage: usize,
    pub label: &'static str,
    pub severity: Severity,
    pub message: &'static str,
    pub elapsed_secs: u64,
    pub remaining_secs: Option<u64>,
    /// `M:SS`, or `--:--` once offline.
    pub countdown: String,
    pub progress: f64,
    /// Warning and offline stages show the availability notice.
    pub show_notice: bool,
}

impl RecoveryView {
    pub fn at(elapsed_secs: u64) -> Self {
        let current = stage(elapsed_secs);
        let remaining_secs = current.remaining(elapsed_secs);
        Self {
            stage: current.index,
            label: current.label,
            severity: current.severity,
            message: current.severity.message(),
            elapsed_secs,
            remaining_secs,
            countdown: remaining_secs.map_or_else(|| "--:--".to_string(), format_countdown),
            progress: current.progress(elapsed_secs),
            show_notice: current.severity != Severity::Updating,
        }
    }
}
