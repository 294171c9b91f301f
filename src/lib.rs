//! # remoteops
//!
//! **remoteops** is the control plane for remote execution of
//! infrastructure runs (plan, apply). It watches a platform for runs queued
//! for remote execution, hands them to workers, and gives each run an
//! isolated, cancellable [`Environment`] to execute commands in.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   platform services
//!  ┌──────────────────────────────────────────────┐
//!  │ RunSource                                    │
//!  │  - watch(org)      ─► Subscription (events)  │
//!  │  - list_runs(page) ─► Page<Run>              │
//!  └──────┬───────────────────────────────────────┘
//!         ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Spooler (one per organization)                              │
//! │  - subscribe, then list queued runs (oldest first)           │
//! │  - filter by execution mode (agent / remote)                 │
//! │  - reconnect with backoff on error or closed stream          │
//! └──────┬────────────────────────────────────┬──────────────────┘
//!        │ runs (bounded)                     │ cancelations (bounded)
//!        ▼                                    ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Worker                                                      │
//! │  - semaphore-bounded concurrency                             │
//! │  - Terminator: routes cancelations to in-flight runs         │
//! └──────┬──────────────────┬──────────────────┬─────────────────┘
//!        ▼                  ▼                  ▼
//!   ┌───────────┐      ┌───────────┐      ┌───────────┐
//!   │Environment│      │Environment│      │Environment│
//!   │ run_cli   │      │ run_func  │      │   ...     │
//!   │ cancel    │      │ services  │      │           │
//!   └───────────┘      └───────────┘      └───────────┘
//! ```
//!
//! ### Spooler lifecycle
//! ```text
//! Spooler::start(token)
//!
//! loop {
//!   ├─► watch(org)                       (subscribe first: no gap)
//!   ├─► list queued runs, all pages      (newest first from the source)
//!   ├─► replay oldest first as Listed events
//!   ├─► follow live events:
//!   │     ├─ run of the wrong mode/org   ─► skip
//!   │     ├─ queued status               ─► runs queue
//!   │     ├─ canceled / force canceled   ─► cancelations queue
//!   │     ├─ info payload                ─► log
//!   │     └─ error payload / closed      ─► session over
//!   ├─► backoff.next(attempt), cancellable sleep
//!   └─► exit when token cancelled
//! }
//! ```
//!
//! ## Features
//! | Area             | Description                                                      | Key types / traits                        |
//! |------------------|------------------------------------------------------------------|-------------------------------------------|
//! | **Spooling**     | Reconnecting, replaying event loop feeding bounded queues.       | [`Spooler`], [`SpoolReceiver`]            |
//! | **Execution**    | Concurrency-limited workers with per-run directories.            | [`Worker`], [`RunHandler`], [`HandlerFn`] |
//! | **Environments** | Sandboxed commands and functions with graceful/forceful cancel.  | [`Environment`]                           |
//! | **Sources**      | The seam to platform services, with an in-memory implementation. | [`RunSource`], [`MemorySource`]           |
//! | **Policies**     | Reconnect backoff with jitter.                                   | [`BackoffPolicy`], [`JitterPolicy`]       |
//! | **Errors**       | Typed errors with stable labels.                                 | [`SpoolerError`], [`EnvError`]            |
//! | **Configuration**| Agent or server spooler, worker limits, grace periods.           | [`DaemonConfig`]                          |
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use remoteops::{
//!     Daemon, DaemonConfig, EnvError, Environment, ExecutionMode, HandlerFn, MemorySource, Run,
//!     RunStatus, SpoolerConfig, WorkerConfig,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = Arc::new(MemorySource::new(64));
//!     source.upsert(
//!         Run::new("run-1", "acme", "networking", ExecutionMode::Remote)
//!             .with_status(RunStatus::PlanQueued),
//!     );
//!
//!     // What to do with each run: here, just report it
//!     let handler = HandlerFn::arc(|run: Run, env: Environment<()>| async move {
//!         println!("{} in {}", run.id, env.path().display());
//!         Ok::<(), EnvError>(())
//!     });
//!
//!     let cfg = DaemonConfig {
//!         spooler: SpoolerConfig::server("acme"),
//!         worker: WorkerConfig::default(),
//!     };
//!     let daemon = Daemon::new(source, Arc::new(()), handler, cfg);
//!
//!     // Stop after a moment; real deployments use `run_until_signal`
//!     let token = CancellationToken::new();
//!     let stop = token.clone();
//!     tokio::spawn(async move {
//!         tokio::time::sleep(Duration::from_millis(100)).await;
//!         stop.cancel();
//!     });
//!     daemon.run(token).await?;
//!     Ok(())
//! }
//! ```
mod config;
mod core;
mod environment;
mod error;
mod events;
mod policies;
mod runs;
mod source;

// ---- Public re-exports ----

pub use crate::core::{
    shutdown_signal, Attempt, CancelOutcome, Cancelable, Daemon, HandlerFn, RunHandler,
    SpoolReceiver, Spooler, Terminator, Worker,
};
pub use config::{DaemonConfig, SpoolerConfig, SpoolerMode, WorkerConfig};
pub use environment::Environment;
pub use error::{DaemonError, EnvError, SourceError, SpoolerError, WorkerError};
pub use events::{Broker, Event, EventType, Payload, Subscription};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use runs::{CancelationRequest, ExecutionMode, Run, RunId, RunStatus};
pub use source::{
    list_all, ListOptions, MemorySource, Page, PageOptions, Pagination, RunSource, WatchOptions,
};
