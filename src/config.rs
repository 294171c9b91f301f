//! # Runtime configuration.
//!
//! Provides [`SpoolerConfig`], [`WorkerConfig`] and their aggregate [`DaemonConfig`].
//!
//! ## Sentinel values
//! - `WorkerConfig::concurrency = 0` → unlimited (no semaphore created)
//! - `SpoolerConfig::capacity` is clamped to a minimum of 1

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::policies::BackoffPolicy;
use crate::runs::ExecutionMode;

/// Which fleet a spooler feeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpoolerMode {
    /// Dispatch runs with [`ExecutionMode::Agent`].
    Agent,
    /// Dispatch runs with [`ExecutionMode::Remote`].
    Server,
}

impl SpoolerMode {
    /// The execution mode this spooler dispatches.
    #[inline]
    pub fn affinity(&self) -> ExecutionMode {
        match self {
            SpoolerMode::Agent => ExecutionMode::Agent,
            SpoolerMode::Server => ExecutionMode::Remote,
        }
    }
}

/// Spooler configuration.
///
/// Fixed at construction; a spooler never changes organization or mode.
#[derive(Clone, Debug)]
pub struct SpoolerConfig {
    /// Organization whose runs are spooled.
    pub organization: Arc<str>,
    /// Agent or server mode.
    pub mode: SpoolerMode,
    /// Capacity of each output queue (runs, cancelations).
    pub capacity: usize,
    /// Delay policy between reconnects.
    pub backoff: BackoffPolicy,
}

impl SpoolerConfig {
    /// Default capacity of each output queue.
    pub const DEFAULT_CAPACITY: usize = 100;

    /// Configuration for an agent-mode spooler.
    pub fn agent(organization: impl Into<Arc<str>>) -> Self {
        Self::new(organization, SpoolerMode::Agent)
    }

    /// Configuration for a server-mode spooler.
    pub fn server(organization: impl Into<Arc<str>>) -> Self {
        Self::new(organization, SpoolerMode::Server)
    }

    fn new(organization: impl Into<Arc<str>>, mode: SpoolerMode) -> Self {
        Self {
            organization: organization.into(),
            mode,
            capacity: Self::DEFAULT_CAPACITY,
            backoff: BackoffPolicy::default(),
        }
    }

    /// True for agent mode.
    #[inline]
    pub fn is_agent(&self) -> bool {
        self.mode == SpoolerMode::Agent
    }

    /// Queue capacity clamped to a minimum of 1.
    #[inline]
    pub fn capacity_clamped(&self) -> usize {
        self.capacity.max(1)
    }
}

/// Worker configuration.
///
/// ## Field semantics
/// - `concurrency`: runs executed at once (`0` = unlimited)
/// - `workdir_root`: parent of the per-run working directories
/// - `grace`: how long shutdown waits for in-flight runs
/// - `hold_cancelations_for`: how long a cancelation for a run that has not
///   started yet is kept before being discarded
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub workdir_root: PathBuf,
    pub grace: Duration,
    pub hold_cancelations_for: Duration,
}

impl WorkerConfig {
    /// Concurrency limit as an `Option` (`None` = unlimited).
    #[inline]
    pub fn concurrency_limit(&self) -> Option<usize> {
        match self.concurrency {
            0 => None,
            n => Some(n),
        }
    }
}

impl Default for WorkerConfig {
    /// Default configuration:
    ///
    /// - `concurrency = 5`
    /// - `workdir_root = std::env::temp_dir()`
    /// - `grace = 10s`
    /// - `hold_cancelations_for = 5min`
    fn default() -> Self {
        Self {
            concurrency: 5,
            workdir_root: std::env::temp_dir(),
            grace: Duration::from_secs(10),
            hold_cancelations_for: Duration::from_secs(300),
        }
    }
}

/// Configuration of a [`Daemon`](crate::Daemon): one spooler feeding one worker.
#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub spooler: SpoolerConfig,
    pub worker: WorkerConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_maps_to_affinity() {
        assert_eq!(SpoolerMode::Agent.affinity(), ExecutionMode::Agent);
        assert_eq!(SpoolerMode::Server.affinity(), ExecutionMode::Remote);
        assert!(SpoolerConfig::agent("acme").is_agent());
        assert!(!SpoolerConfig::server("acme").is_agent());
    }

    #[test]
    fn sentinels() {
        let mut spooler = SpoolerConfig::server("acme");
        spooler.capacity = 0;
        assert_eq!(spooler.capacity_clamped(), 1);

        let mut worker = WorkerConfig::default();
        assert_eq!(worker.concurrency_limit(), Some(5));
        worker.concurrency = 0;
        assert_eq!(worker.concurrency_limit(), None);
    }
}
