//! Error types used by the spooler, the worker and execution environments.
//!
//! This module defines five error enums:
//!
//! - [`SourceError`]: failures reported by a [`RunSource`](crate::RunSource).
//! - [`SpoolerError`]: why a spooler session ended (mostly transient).
//! - [`EnvError`]: failures of commands and functions run inside an [`Environment`](crate::Environment).
//! - [`WorkerError`]: failures of the worker loop itself.
//! - [`DaemonError`]: why a [`Daemon`](crate::Daemon) stopped.
//!
//! All types provide `as_label` for logging.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::runs::RunId;

/// # Errors produced by a run source (event feed or listing API).
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum SourceError {
    /// The backing service could not be reached or rejected the request.
    #[error("source unavailable: {error}")]
    Unavailable {
        /// The underlying error message.
        error: String,
    },

    /// The source has been shut down.
    #[error("source closed")]
    Closed,
}

impl SourceError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            SourceError::Unavailable { .. } => "source_unavailable",
            SourceError::Closed => "source_closed",
        }
    }
}

/// # Errors that end a spooler session.
///
/// Everything except [`SpoolerError::Canceled`] and [`SpoolerError::AlreadyStarted`]
/// is transient: the spooler logs it, waits out a backoff delay and reconciles again.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SpoolerError {
    /// `start` was called a second time on the same spooler.
    #[error("spooler already started")]
    AlreadyStarted,

    /// Opening the subscription failed.
    #[error("subscribing to run events: {0}")]
    Watch(#[source] SourceError),

    /// Fetching a page of queued runs failed.
    #[error("retrieving queued runs: {0}")]
    Listing(#[source] SourceError),

    /// The subscription delivered an error payload.
    #[error("stream error: {error}")]
    Stream {
        /// The error carried by the payload.
        error: String,
    },

    /// The subscription closed without reporting an error.
    #[error("subscription terminated")]
    SubscriptionTerminated,

    /// The governing token was cancelled.
    #[error("spooler cancelled")]
    Canceled,
}

impl SpoolerError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use remoteops::SpoolerError;
    ///
    /// assert_eq!(SpoolerError::SubscriptionTerminated.as_label(), "spooler_subscription_terminated");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            SpoolerError::AlreadyStarted => "spooler_already_started",
            SpoolerError::Watch(_) => "spooler_watch",
            SpoolerError::Listing(_) => "spooler_listing",
            SpoolerError::Stream { .. } => "spooler_stream",
            SpoolerError::SubscriptionTerminated => "spooler_subscription_terminated",
            SpoolerError::Canceled => "spooler_canceled",
        }
    }

    /// Indicates whether the spooler reconnects after this error.
    pub fn is_transient(&self) -> bool {
        !matches!(self, SpoolerError::Canceled | SpoolerError::AlreadyStarted)
    }
}

/// # Errors produced inside an execution environment.
///
/// [`EnvError::Canceled`] is distinct from a command's own failure so a worker
/// can tell "the user canceled this" from "the command failed".
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum EnvError {
    /// The environment was canceled before or during the operation.
    #[error("environment canceled")]
    Canceled,

    /// The program could not be started.
    #[error("starting {program}: {error}")]
    Spawn {
        program: String,
        #[source]
        error: std::io::Error,
    },

    /// The program exited with a non-zero status.
    #[error("{program} exited with status {code}: {stderr}")]
    Exit {
        program: String,
        code: i32,
        /// Tail of the program's standard error.
        stderr: String,
    },

    /// The program was terminated by a signal.
    #[error("{program} terminated by signal {signal}")]
    Signal { program: String, signal: i32 },

    /// I/O failure while supervising the program.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// An in-process function failed.
    #[error("function failed: {error}")]
    Failed { error: String },
}

impl EnvError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            EnvError::Canceled => "env_canceled",
            EnvError::Spawn { .. } => "env_spawn",
            EnvError::Exit { .. } => "env_exit",
            EnvError::Signal { .. } => "env_signal",
            EnvError::Io(_) => "env_io",
            EnvError::Failed { .. } => "env_failed",
        }
    }

    /// Wraps an arbitrary message as a function failure.
    pub fn failed(error: impl Into<String>) -> Self {
        EnvError::Failed {
            error: error.into(),
        }
    }

    /// True when the operation stopped because the environment was canceled.
    pub fn is_canceled(&self) -> bool {
        matches!(self, EnvError::Canceled)
    }
}

/// # Errors produced by the worker loop.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum WorkerError {
    /// The working directory for a run could not be created.
    #[error("creating working directory for {run} under {root:?}: {error}")]
    Workdir {
        run: RunId,
        root: PathBuf,
        #[source]
        error: std::io::Error,
    },

    /// Shutdown grace period was exceeded; some runs were still executing.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Runs that did not finish in time.
        stuck: Vec<RunId>,
    },
}

impl WorkerError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerError::Workdir { .. } => "worker_workdir",
            WorkerError::GraceExceeded { .. } => "worker_grace_exceeded",
        }
    }
}

/// # Errors returned by [`Daemon::run`](crate::Daemon::run).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error(transparent)]
    Spooler(#[from] SpoolerError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// Shutdown signal handlers could not be installed.
    #[error("installing signal handlers: {0}")]
    Signal(#[source] std::io::Error),
}

impl DaemonError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            DaemonError::Spooler(e) => e.as_label(),
            DaemonError::Worker(e) => e.as_label(),
            DaemonError::Signal(_) => "daemon_signal",
        }
    }
}
