//! # Worker: drains the spool queues and executes runs.
//!
//! The [`Worker`] takes runs from a [`SpoolReceiver`], gives each its own
//! working directory and [`Environment`], and hands both to a [`RunHandler`].
//! Cancelation requests are routed through a [`Terminator`].
//!
//! ## Architecture
//! ```text
//! Worker::run(runs, cancelations, token)
//!
//! loop (select, biased) {
//!   ├─► token cancelled            ─► shutdown
//!   ├─► cancelation request        ─► terminator.cancel(req)
//!   ├─► finished job               ─► reap
//!   ├─► no permit yet              ─► acquire semaphore permit
//!   └─► permit held ─► next run    ─► spawn job(run, permit, child token)
//! }
//!
//! job:
//!   ├─► tempdir under workdir_root
//!   ├─► Environment::new(dir, services, child token)
//!   ├─► terminator.check_in(run)   (applies any held cancelation)
//!   ├─► handler.handle(run, env)
//!   └─► terminator.check_out(attempt), remove dir, release permit
//!
//! runs queue closed:
//!   keep applying cancelations until every job is done ─► Ok
//!
//! shutdown:
//!   token cancelled ─► children cancelled (processes killed)
//!                   ─► wait up to `grace` ─► Ok / GraceExceeded { stuck }
//! ```
//!
//! ## Rules
//! - A permit is acquired **before** the next run is taken off the queue, so a
//!   saturated worker leaves runs in the spooler and backpressure reaches it.
//! - Cancelations are processed even while every slot is busy.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::WorkerConfig;
use crate::core::handler::RunHandler;
use crate::core::queue::SpoolReceiver;
use crate::core::terminator::Terminator;
use crate::environment::Environment;
use crate::error::WorkerError;
use crate::runs::{CancelationRequest, Run};

/// Executes spooled runs with bounded concurrency.
pub struct Worker<S: ?Sized, H> {
    cfg: WorkerConfig,
    services: Arc<S>,
    handler: Arc<H>,
    terminator: Arc<Terminator>,
}

impl<S, H> Worker<S, H>
where
    S: ?Sized + Send + Sync + 'static,
    H: RunHandler<S>,
{
    /// Creates a worker.
    pub fn new(cfg: WorkerConfig, services: Arc<S>, handler: Arc<H>) -> Self {
        let terminator = Arc::new(Terminator::new(cfg.hold_cancelations_for));
        Self {
            cfg,
            services,
            handler,
            terminator,
        }
    }

    /// The registry matching cancelations to in-flight runs.
    pub fn terminator(&self) -> &Arc<Terminator> {
        &self.terminator
    }

    /// Drains `runs` and `cancelations` until `token` is cancelled or the
    /// queues close.
    ///
    /// On cancellation, in-flight runs are canceled and given
    /// [`WorkerConfig::grace`] to finish.
    pub async fn run(
        &self,
        runs: SpoolReceiver<Run>,
        cancelations: SpoolReceiver<CancelationRequest>,
        token: CancellationToken,
    ) -> Result<(), WorkerError> {
        let semaphore = self.cfg.concurrency_limit().map(|n| Arc::new(Semaphore::new(n)));
        let mut set = JoinSet::new();
        let mut permit: Option<OwnedSemaphorePermit> = None;

        loop {
            let ready = semaphore.is_none() || permit.is_some();
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                Some(req) = cancelations.recv() => {
                    self.terminator.cancel(&req);
                }
                Some(res) = set.join_next(), if !set.is_empty() => {
                    if let Err(e) = res {
                        error!(error = %e, "run task aborted");
                    }
                }
                acquired = acquire(semaphore.as_ref()), if !ready => {
                    match acquired {
                        Some(p) => permit = Some(p),
                        None => break,
                    }
                }
                run = runs.recv(), if ready => {
                    let Some(run) = run else { break };
                    let job = self.job(run, permit.take(), token.child_token());
                    set.spawn(job);
                }
            }
        }

        // queue closed: in-flight runs finish on their own, cancelations still apply
        while !token.is_cancelled() {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                Some(req) = cancelations.recv() => {
                    self.terminator.cancel(&req);
                }
                res = set.join_next() => match res {
                    None => return Ok(()),
                    Some(Err(e)) => error!(error = %e, "run task aborted"),
                    Some(Ok(())) => {}
                },
            }
        }

        self.wait_all_with_grace(&mut set).await
    }

    fn job(
        &self,
        run: Run,
        permit: Option<OwnedSemaphorePermit>,
        token: CancellationToken,
    ) -> impl std::future::Future<Output = ()> + Send + 'static {
        let services = Arc::clone(&self.services);
        let handler = Arc::clone(&self.handler);
        let terminator = Arc::clone(&self.terminator);
        let root = self.cfg.workdir_root.clone();

        async move {
            let _permit = permit;
            let workdir = match workdir(&root, &run) {
                Ok(dir) => dir,
                Err(e) => {
                    error!(run = %run.id, error = %e, label = e.as_label(), "skipping run");
                    return;
                }
            };

            let env = Environment::new(workdir.path(), services, token);
            let attempt = terminator.check_in(run.id.clone(), Arc::new(env.clone()));
            info!(
                run = %run.id,
                workspace = %run.workspace,
                status = %run.status,
                path = %workdir.path().display(),
                "executing run"
            );

            let id = run.id.clone();
            let res = handler.handle(run, env).await;
            terminator.check_out(&attempt);

            match res {
                Ok(()) => info!(run = %id, "run finished"),
                Err(e) if e.is_canceled() => warn!(run = %id, "run canceled"),
                Err(e) => error!(run = %id, error = %e, label = e.as_label(), "run failed"),
            }
            if let Err(e) = workdir.close() {
                warn!(run = %id, error = %e, "removing working directory");
            }
        }
    }

    /// Waits for in-flight runs to finish within [`WorkerConfig::grace`].
    ///
    /// Runs still executing afterwards are aborted and reported as stuck.
    async fn wait_all_with_grace(&self, set: &mut JoinSet<()>) -> Result<(), WorkerError> {
        let grace = self.cfg.grace;
        let done = async { while set.join_next().await.is_some() {} };

        match tokio::time::timeout(grace, done).await {
            Ok(()) => Ok(()),
            Err(_) => {
                let stuck = self.terminator.in_flight();
                set.abort_all();
                Err(WorkerError::GraceExceeded { grace, stuck })
            }
        }
    }
}

async fn acquire(semaphore: Option<&Arc<Semaphore>>) -> Option<OwnedSemaphorePermit> {
    match semaphore {
        Some(sem) => Arc::clone(sem).acquire_owned().await.ok(),
        None => std::future::pending().await,
    }
}

/// Creates a fresh working directory for one execution attempt.
fn workdir(root: &Path, run: &Run) -> Result<TempDir, WorkerError> {
    let wrap = |error| WorkerError::Workdir {
        run: run.id.clone(),
        root: PathBuf::from(root),
        error,
    };
    std::fs::create_dir_all(root).map_err(wrap)?;
    tempfile::Builder::new()
        .prefix(&format!("{}-", run.id))
        .tempdir_in(root)
        .map_err(wrap)
}
