//! # Runs and their lifecycle.
//!
//! A [`Run`] is a snapshot: the spooler receives a fresh copy on every
//! lifecycle event and never mutates it.
//!
//! ```text
//! Pending ─► PlanQueued ─► Planning ─► Planned ─► ApplyQueued ─► Applying ─► Applied
//!               │                         └─► PlannedAndFinished
//!               └─ any non-terminal state ─► Canceled / ForceCanceled / Errored / Discarded
//! ```
//!
//! Only [`RunStatus::PlanQueued`] and [`RunStatus::ApplyQueued`] are dispatchable;
//! see [`Run::queued`].

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

/// Unique run identifier.
///
/// Cheap to clone (`Arc<str>` inside).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(Arc<str>);

impl RunId {
    /// Wraps an identifier.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RunId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Where a run is expected to execute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExecutionMode {
    /// Executed by the platform's own remote runners.
    Remote,
    /// Executed on the user's machine; never spooled.
    Local,
    /// Executed by a fleet-managed agent.
    Agent,
}

/// Run lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RunStatus {
    Pending,
    PlanQueued,
    Planning,
    Planned,
    PlannedAndFinished,
    ApplyQueued,
    Applying,
    Applied,
    Errored,
    Discarded,
    /// Canceled by the user; the worker should stop cooperatively.
    Canceled,
    /// Canceled forcefully; the worker should kill immediately.
    ForceCanceled,
}

impl RunStatus {
    /// Returns a short stable label (snake_case) for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::PlanQueued => "plan_queued",
            RunStatus::Planning => "planning",
            RunStatus::Planned => "planned",
            RunStatus::PlannedAndFinished => "planned_and_finished",
            RunStatus::ApplyQueued => "apply_queued",
            RunStatus::Applying => "applying",
            RunStatus::Applied => "applied",
            RunStatus::Errored => "errored",
            RunStatus::Discarded => "discarded",
            RunStatus::Canceled => "canceled",
            RunStatus::ForceCanceled => "force_canceled",
        }
    }

    /// The statuses a run can be dispatched from.
    pub const QUEUED: [RunStatus; 2] = [RunStatus::PlanQueued, RunStatus::ApplyQueued];

    /// Returns `true` for [`RunStatus::PlanQueued`] and [`RunStatus::ApplyQueued`].
    #[inline]
    pub fn is_queued(&self) -> bool {
        matches!(self, RunStatus::PlanQueued | RunStatus::ApplyQueued)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Snapshot of a run as delivered by the platform.
#[derive(Clone, Debug, PartialEq)]
pub struct Run {
    pub id: RunId,
    pub organization: Arc<str>,
    pub workspace: Arc<str>,
    pub execution_mode: ExecutionMode,
    pub status: RunStatus,
    /// Enqueue time; listings are ordered by it, newest first.
    pub created_at: SystemTime,
}

impl Run {
    /// Creates a pending run created "now".
    pub fn new(
        id: impl Into<RunId>,
        organization: impl Into<Arc<str>>,
        workspace: impl Into<Arc<str>>,
        execution_mode: ExecutionMode,
    ) -> Self {
        Self {
            id: id.into(),
            organization: organization.into(),
            workspace: workspace.into(),
            execution_mode,
            status: RunStatus::Pending,
            created_at: SystemTime::now(),
        }
    }

    /// Returns a copy with the given status.
    #[must_use]
    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = status;
        self
    }

    /// Returns a copy with the given creation time.
    #[must_use]
    pub fn with_created_at(mut self, at: SystemTime) -> Self {
        self.created_at = at;
        self
    }

    /// True iff the run waits in a queued sub-state (plan or apply).
    #[inline]
    pub fn queued(&self) -> bool {
        self.status.is_queued()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_only_for_queued_states() {
        let run = Run::new("run-1", "acme", "dev", ExecutionMode::Remote);
        for status in [
            RunStatus::Pending,
            RunStatus::Planning,
            RunStatus::Planned,
            RunStatus::PlannedAndFinished,
            RunStatus::Applying,
            RunStatus::Applied,
            RunStatus::Errored,
            RunStatus::Discarded,
            RunStatus::Canceled,
            RunStatus::ForceCanceled,
        ] {
            assert!(!run.clone().with_status(status).queued(), "{status}");
        }
        for status in RunStatus::QUEUED {
            assert!(run.clone().with_status(status).queued(), "{status}");
        }
    }

    #[test]
    fn run_id_display_and_eq() {
        let a = RunId::from("run-abc");
        let b = RunId::new(String::from("run-abc"));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "run-abc");
        assert_eq!(a.as_str(), "run-abc");
    }
}
