//! # Terminator: matches cancelation requests to in-flight runs.
//!
//! Cancelations travel on their own queue and carry no ordering guarantee
//! relative to the run they target, so a request may arrive:
//!
//! ```text
//! (a) while the run executes        ─► applied immediately
//! (b) before the run was picked up  ─► held, applied on check-in
//! (c) for a run that never arrives  ─► held, discarded after `hold_for`
//! ```
//!
//! A second request for a held run upgrades it to forceful if either was.
//!
//! The same run can be dispatched more than once (a reconnect re-lists
//! every queued run), so each [`check_in`](Terminator::check_in) registers
//! a separate [`Attempt`]. A cancelation reaches every live attempt of its
//! run, and [`check_out`](Terminator::check_out) only removes its own.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::environment::Environment;
use crate::runs::{CancelationRequest, RunId};

/// Something that can be canceled gracefully or forcefully.
pub trait Cancelable: Send + Sync + 'static {
    fn cancel(&self, force: bool);
}

impl<S: ?Sized + Send + Sync + 'static> Cancelable for Environment<S> {
    fn cancel(&self, force: bool) {
        Environment::cancel(self, force);
    }
}

/// What [`Terminator::cancel`] did with a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The run was executing and has been signalled.
    Applied,
    /// The run is not executing yet; the request is held.
    Held,
}

/// Registration handle for one execution attempt of a run.
#[derive(Debug)]
pub struct Attempt {
    run: RunId,
    seq: u64,
    held: Option<bool>,
}

impl Attempt {
    /// The run this attempt executes.
    pub fn run(&self) -> &RunId {
        &self.run
    }

    /// `Some(forceful)` if a held cancelation was applied at check-in.
    pub fn held(&self) -> Option<bool> {
        self.held
    }
}

enum Entry {
    Running(Vec<(u64, Arc<dyn Cancelable>)>),
    Held { forceful: bool, until: Instant },
}

/// Registry of in-flight runs and pending cancelations.
pub struct Terminator {
    entries: Mutex<HashMap<RunId, Entry>>,
    next_seq: AtomicU64,
    hold_for: Duration,
}

impl Terminator {
    /// Creates a terminator that holds early cancelations for `hold_for`.
    pub fn new(hold_for: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            hold_for,
        }
    }

    /// Registers an execution attempt of `run`.
    ///
    /// If a cancelation for the run is being held, it is applied right away
    /// and reported through [`Attempt::held`].
    pub fn check_in(&self, run: RunId, target: Arc<dyn Cancelable>) -> Attempt {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let held = {
            let mut entries = self.entries();
            prune(&mut entries);
            match entries.get_mut(&run) {
                Some(Entry::Running(attempts)) => {
                    debug!(run = %run, attempts = attempts.len() + 1, "run already executing");
                    attempts.push((seq, Arc::clone(&target)));
                    None
                }
                _ => {
                    let prev = entries.insert(
                        run.clone(),
                        Entry::Running(vec![(seq, Arc::clone(&target))]),
                    );
                    match prev {
                        Some(Entry::Held { forceful, .. }) => Some(forceful),
                        _ => None,
                    }
                }
            }
        };
        if let Some(forceful) = held {
            info!(run = %run, forceful, "applying held cancelation");
            target.cancel(forceful);
        }
        Attempt { run, seq, held }
    }

    /// Removes an attempt once it is over; other attempts of the run stay.
    pub fn check_out(&self, attempt: &Attempt) {
        let mut entries = self.entries();
        if let Some(Entry::Running(attempts)) = entries.get_mut(&attempt.run) {
            attempts.retain(|(seq, _)| *seq != attempt.seq);
            if attempts.is_empty() {
                entries.remove(&attempt.run);
            }
        }
    }

    /// Applies a cancelation to every live attempt of the run it targets,
    /// or holds it.
    pub fn cancel(&self, req: &CancelationRequest) -> CancelOutcome {
        let targets: Vec<Arc<dyn Cancelable>> = {
            let mut entries = self.entries();
            prune(&mut entries);
            match entries.get_mut(req.run_id()) {
                Some(Entry::Running(attempts)) => {
                    attempts.iter().map(|(_, t)| Arc::clone(t)).collect()
                }
                Some(Entry::Held { forceful, until }) => {
                    *forceful |= req.forceful;
                    *until = Instant::now() + self.hold_for;
                    Vec::new()
                }
                None => {
                    entries.insert(
                        req.run_id().clone(),
                        Entry::Held {
                            forceful: req.forceful,
                            until: Instant::now() + self.hold_for,
                        },
                    );
                    Vec::new()
                }
            }
        };

        if targets.is_empty() {
            debug!(run = %req.run_id(), forceful = req.forceful, "holding cancelation for run not yet started");
            return CancelOutcome::Held;
        }
        info!(run = %req.run_id(), forceful = req.forceful, attempts = targets.len(), "canceling run");
        for target in targets {
            target.cancel(req.forceful);
        }
        CancelOutcome::Applied
    }

    /// Runs with at least one attempt checked in.
    pub fn in_flight(&self) -> Vec<RunId> {
        let mut runs: Vec<RunId> = self
            .entries()
            .iter()
            .filter(|(_, e)| matches!(e, Entry::Running(_)))
            .map(|(id, _)| id.clone())
            .collect();
        runs.sort();
        runs
    }

    /// Number of cancelations currently held (expired ones excluded).
    pub fn held(&self) -> usize {
        let mut entries = self.entries();
        prune(&mut entries);
        entries
            .values()
            .filter(|e| matches!(e, Entry::Held { .. }))
            .count()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<RunId, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Drops held cancelations whose run never showed up.
fn prune(entries: &mut HashMap<RunId, Entry>) {
    let now = Instant::now();
    entries.retain(|run, e| match e {
        Entry::Held { until, .. } if *until <= now => {
            debug!(run = %run, "discarding expired cancelation");
            false
        }
        _ => true,
    });
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU8, Ordering};

    use super::*;
    use crate::runs::{ExecutionMode, Run, RunStatus};

    /// Records the strongest cancel seen: 0 = none, 1 = graceful, 2 = forceful.
    #[derive(Default)]
    struct Probe(AtomicU8);

    impl Cancelable for Probe {
        fn cancel(&self, force: bool) {
            self.0.fetch_max(if force { 2 } else { 1 }, Ordering::SeqCst);
        }
    }

    impl Probe {
        fn seen(&self) -> u8 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn request(id: &str, forceful: bool) -> CancelationRequest {
        let status = if forceful {
            RunStatus::ForceCanceled
        } else {
            RunStatus::Canceled
        };
        CancelationRequest::from_run(
            Run::new(id, "acme", "dev", ExecutionMode::Agent).with_status(status),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn applies_to_running_run() {
        let t = Terminator::new(Duration::from_secs(60));
        let probe = Arc::new(Probe::default());
        let attempt = t.check_in("run-1".into(), probe.clone());
        assert_eq!(attempt.held(), None);

        assert_eq!(t.cancel(&request("run-1", false)), CancelOutcome::Applied);
        assert_eq!(probe.seen(), 1);
        assert_eq!(t.in_flight(), vec![RunId::from("run-1")]);

        t.check_out(&attempt);
        assert!(t.in_flight().is_empty());
    }

    #[tokio::test]
    async fn holds_early_cancel_until_check_in() {
        let t = Terminator::new(Duration::from_secs(60));
        assert_eq!(t.cancel(&request("run-1", false)), CancelOutcome::Held);
        assert_eq!(t.cancel(&request("run-1", true)), CancelOutcome::Held);
        assert_eq!(t.held(), 1);

        let probe = Arc::new(Probe::default());
        assert_eq!(t.check_in("run-1".into(), probe.clone()).held(), Some(true));
        assert_eq!(probe.seen(), 2);
        assert_eq!(t.held(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_holds_are_discarded() {
        let t = Terminator::new(Duration::from_secs(60));
        t.cancel(&request("ghost", true));
        assert_eq!(t.held(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(t.held(), 0);

        let probe = Arc::new(Probe::default());
        assert_eq!(t.check_in("ghost".into(), probe.clone()).held(), None);
        assert_eq!(probe.seen(), 0);
    }

    #[tokio::test]
    async fn check_out_keeps_later_holds() {
        let t = Terminator::new(Duration::from_secs(60));
        let attempt = t.check_in("run-1".into(), Arc::new(Probe::default()));
        t.check_out(&attempt);
        t.cancel(&request("run-1", false));
        t.check_out(&attempt);
        assert_eq!(t.held(), 1);
    }

    #[tokio::test]
    async fn duplicate_attempts_are_tracked_separately() {
        let t = Terminator::new(Duration::from_secs(60));
        let first = Arc::new(Probe::default());
        let second = Arc::new(Probe::default());
        let a = t.check_in("run-1".into(), first.clone());
        let b = t.check_in("run-1".into(), second.clone());

        // the first attempt finishing must not unregister the second
        t.check_out(&a);
        assert_eq!(t.in_flight(), vec![RunId::from("run-1")]);
        assert_eq!(t.cancel(&request("run-1", true)), CancelOutcome::Applied);
        assert_eq!(first.seen(), 0);
        assert_eq!(second.seen(), 2);

        t.check_out(&b);
        assert!(t.in_flight().is_empty());
        assert_eq!(t.held(), 0);
    }

    #[tokio::test]
    async fn cancel_reaches_every_live_attempt() {
        let t = Terminator::new(Duration::from_secs(60));
        let first = Arc::new(Probe::default());
        let second = Arc::new(Probe::default());
        let _a = t.check_in("run-1".into(), first.clone());
        let _b = t.check_in("run-1".into(), second.clone());

        assert_eq!(t.cancel(&request("run-1", false)), CancelOutcome::Applied);
        assert_eq!(first.seen(), 1);
        assert_eq!(second.seen(), 1);
    }
}
