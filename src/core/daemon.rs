//! # Daemon: a spooler wired to a worker.
//!
//! ```text
//!              ┌──────────────┐  runs (bounded)   ┌──────────────┐
//! RunSource ──►│   Spooler    │──────────────────►│    Worker    │──► RunHandler
//!              │ (reconnects) │──────────────────►│ (N parallel) │
//!              └──────────────┘  cancelations     └──────────────┘
//!                     ▲                                  ▲
//!                     └────────── child token ───────────┘
//! ```
//!
//! Whichever half stops first cancels the other; [`Daemon::run`] returns
//! once both are done.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::DaemonConfig;
use crate::core::handler::RunHandler;
use crate::core::shutdown::shutdown_signal;
use crate::core::spooler::Spooler;
use crate::core::worker::Worker;
use crate::error::{DaemonError, SpoolerError};
use crate::source::RunSource;

/// One organization's spooler feeding one worker.
pub struct Daemon<Src, S: ?Sized, H> {
    spooler: Spooler<Src>,
    worker: Worker<S, H>,
}

impl<Src, S, H> Daemon<Src, S, H>
where
    Src: RunSource,
    S: ?Sized + Send + Sync + 'static,
    H: RunHandler<S>,
{
    /// Creates a daemon; nothing runs until [`run`](Self::run).
    pub fn new(source: Src, services: Arc<S>, handler: Arc<H>, cfg: DaemonConfig) -> Self {
        Self {
            spooler: Spooler::new(source, cfg.spooler),
            worker: Worker::new(cfg.worker, services, handler),
        }
    }

    /// The spooler feeding this daemon's worker.
    pub fn spooler(&self) -> &Spooler<Src> {
        &self.spooler
    }

    /// The worker executing this daemon's runs.
    pub fn worker(&self) -> &Worker<S, H> {
        &self.worker
    }

    /// Runs until `token` is cancelled or one half stops on its own.
    ///
    /// A spooler stopped by cancellation is not an error; a worker that
    /// could not drain within its grace period is.
    pub async fn run(&self, token: CancellationToken) -> Result<(), DaemonError> {
        let token = token.child_token();
        let runs = self.spooler.runs();
        let cancelations = self.spooler.cancelations();
        info!(organization = %self.spooler.config().organization, "daemon starting");

        let spooler = async {
            let res = self.spooler.start(token.clone()).await;
            token.cancel();
            res
        };
        let worker = async {
            let res = self.worker.run(runs, cancelations, token.clone()).await;
            token.cancel();
            res
        };
        let (spooled, worked) = tokio::join!(spooler, worker);

        match spooled {
            Ok(()) | Err(SpoolerError::Canceled) => {}
            Err(e) => return Err(e.into()),
        }
        worked?;
        info!(organization = %self.spooler.config().organization, "daemon stopped");
        Ok(())
    }

    /// Runs until the process receives a termination signal.
    pub async fn run_until_signal(&self) -> Result<(), DaemonError> {
        let token = CancellationToken::new();
        let run = self.run(token.clone());
        tokio::pin!(run);

        let signal = tokio::select! {
            res = &mut run => return res,
            signal = shutdown_signal() => signal,
        };
        token.cancel();

        match signal {
            Ok(name) => {
                info!(signal = name, "shutdown signal received");
                run.await
            }
            Err(e) => {
                warn!(error = %e, "signal handlers unavailable, stopping");
                let _ = run.await;
                Err(DaemonError::Signal(e))
            }
        }
    }
}
