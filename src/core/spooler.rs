//! # Spooler: turns run events into dispatch queues.
//!
//! A [`Spooler`] subscribes to the run feed of one organization, reconciles a
//! listing of already-queued runs with the live stream, filters by execution
//! mode, and feeds two bounded queues: runs to execute and cancelation requests.
//!
//! ## Architecture
//! ```text
//! Spooler::start(token)
//!
//! loop {
//!   ├─► reinitialize()
//!   │     ├─► source.watch(org)                   (open subscription first)
//!   │     ├─► list_all(source.list_runs(org, queued))   (every page)
//!   │     ├─► replay listing oldest-first ──► handle_event()
//!   │     └─► for each live event ──────────► handle_event()
//!   │               ├─ Payload::Run   ─► affinity filter ─► runs / cancelations queue
//!   │               ├─ Payload::Info  ─► log
//!   │               └─ Payload::Error ─► session ends
//!   │           stream closed ─► SubscriptionTerminated
//!   │
//!   └─► on error:
//!        ├─ token cancelled ─► return Err(Canceled)
//!        ├─ delay = backoff.next(attempt)   (attempt resets after a healthy session)
//!        ├─ log error + delay
//!        └─ sleep(delay) (cancellable)
//! }
//! ```
//!
//! ## Rules
//! - One session at a time; events are handled **sequentially** in arrival order.
//! - Both queues are fed by that same loop: a full runs queue also delays
//!   cancelations for unrelated runs.
//! - Every reconnect re-lists all queued runs, so a run may be dispatched more
//!   than once across reconnects (at-least-once). Consumers must tolerate duplicates.
//! - Cancelations carry no ordering guarantee relative to the run they target.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::SpoolerConfig;
use crate::core::queue::{spool, SpoolReceiver};
use crate::error::SpoolerError;
use crate::events::{Event, EventType, Payload};
use crate::runs::{CancelationRequest, Run, RunStatus};
use crate::source::{list_all, ListOptions, RunSource, WatchOptions};

/// Event-driven distributor of queued runs and cancelation requests.
pub struct Spooler<S> {
    source: S,
    cfg: SpoolerConfig,
    runs_tx: mpsc::Sender<Run>,
    runs_rx: SpoolReceiver<Run>,
    cancel_tx: mpsc::Sender<CancelationRequest>,
    cancel_rx: SpoolReceiver<CancelationRequest>,
    started: AtomicBool,
}

impl<S: RunSource> Spooler<S> {
    /// Creates a spooler; nothing happens until [`start`](Self::start).
    pub fn new(source: S, cfg: SpoolerConfig) -> Self {
        let (runs_tx, runs_rx) = spool(cfg.capacity_clamped());
        let (cancel_tx, cancel_rx) = spool(cfg.capacity_clamped());
        Self {
            source,
            cfg,
            runs_tx,
            runs_rx,
            cancel_tx,
            cancel_rx,
            started: AtomicBool::new(false),
        }
    }

    /// Runs selected for execution, in dispatch order.
    pub fn runs(&self) -> SpoolReceiver<Run> {
        self.runs_rx.clone()
    }

    /// Cancelation requests for runs this spooler dispatches.
    pub fn cancelations(&self) -> SpoolReceiver<CancelationRequest> {
        self.cancel_rx.clone()
    }

    /// The configuration this spooler was built with.
    pub fn config(&self) -> &SpoolerConfig {
        &self.cfg
    }

    /// Runs the reconnect-and-reconcile loop until `token` is cancelled.
    ///
    /// Transient failures (subscription, listing, stream errors or closure) are
    /// logged and retried with exponential backoff, forever. Never returns `Ok`:
    /// the result is `Err(SpoolerError::Canceled)` once `token` is cancelled, or
    /// `Err(SpoolerError::AlreadyStarted)` if called twice.
    pub async fn start(&self, token: CancellationToken) -> Result<(), SpoolerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SpoolerError::AlreadyStarted);
        }
        let mut attempt: u32 = 0;

        loop {
            let mut healthy = false;
            let err = self.reinitialize(&token, &mut healthy).await;
            if token.is_cancelled() || !err.is_transient() {
                return Err(SpoolerError::Canceled);
            }
            if healthy {
                attempt = 0;
            }

            let delay = self.cfg.backoff.next(attempt);
            attempt = attempt.saturating_add(1);
            error!(
                error = %err,
                label = err.as_label(),
                organization = %self.cfg.organization,
                backoff = ?delay,
                "restarting spooler"
            );

            let sleep = time::sleep(delay);
            tokio::pin!(sleep);
            tokio::select! {
                _ = &mut sleep => {}
                _ = token.cancelled() => return Err(SpoolerError::Canceled),
            }
        }
    }

    /// One session: subscribe, list, replay, then follow the live stream.
    ///
    /// Always ends with an error; `healthy` is set once a live event was handled.
    async fn reinitialize(&self, token: &CancellationToken, healthy: &mut bool) -> SpoolerError {
        let organization = Some(Arc::clone(&self.cfg.organization));

        let watch = self.source.watch(WatchOptions {
            organization: organization.clone(),
        });
        let mut sub = match until_cancelled(token, watch).await {
            None => return SpoolerError::Canceled,
            Some(Err(e)) => return SpoolerError::Watch(e),
            Some(Ok(sub)) => sub,
        };

        let listing = list_all(|page| {
            self.source.list_runs(ListOptions {
                page,
                organization: organization.clone(),
                statuses: RunStatus::QUEUED.to_vec(),
            })
        });
        let existing = match until_cancelled(token, listing).await {
            None => return SpoolerError::Canceled,
            Some(Err(e)) => return SpoolerError::Listing(e),
            Some(Ok(runs)) => runs,
        };
        debug!(total = existing.len(), organization = %self.cfg.organization, "retrieved queued runs");

        // listing is newest first; replay oldest first
        for run in existing.into_iter().rev() {
            if let Err(e) = self.handle_event(Event::run(EventType::Listed, run), token).await {
                return e;
            }
        }

        loop {
            let ev = tokio::select! {
                _ = token.cancelled() => return SpoolerError::Canceled,
                ev = sub.recv() => ev,
            };
            let Some(ev) = ev else {
                return SpoolerError::SubscriptionTerminated;
            };
            if let Err(e) = self.handle_event(ev, token).await {
                return e;
            }
            *healthy = true;
        }
    }

    async fn handle_event(&self, ev: Event, token: &CancellationToken) -> Result<(), SpoolerError> {
        match ev.payload {
            Payload::Run(run) => self.handle_run(run, token).await,
            Payload::Info(message) => {
                info!(info = %message, "stream update");
                Ok(())
            }
            Payload::Error(e) => {
                error!(error = %e, "stream update");
                Err(SpoolerError::Stream {
                    error: e.to_string(),
                })
            }
        }
    }

    /// Routes a run: queued → runs, canceled/force-canceled → cancelations.
    ///
    /// Runs of the other fleet (or local runs) belong to another consumer and are skipped.
    async fn handle_run(&self, run: Run, token: &CancellationToken) -> Result<(), SpoolerError> {
        if run.execution_mode != self.cfg.mode.affinity() {
            return Ok(());
        }
        if run.queued() {
            return push(&self.runs_tx, run, token).await;
        }
        match CancelationRequest::from_run(run) {
            Some(req) => push(&self.cancel_tx, req, token).await,
            None => Ok(()),
        }
    }
}

/// Sends `item`, waiting for room; gives up only if `token` is cancelled.
async fn push<T>(
    tx: &mpsc::Sender<T>,
    item: T,
    token: &CancellationToken,
) -> Result<(), SpoolerError> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(SpoolerError::Canceled),
        // the spooler keeps a receiver alive, so send cannot fail
        _ = tx.send(item) => Ok(()),
    }
}

async fn until_cancelled<F: Future>(token: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        _ = token.cancelled() => None,
        out = fut => Some(out),
    }
}
