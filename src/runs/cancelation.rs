//! # Cancelation requests.
//!
//! Produced by the spooler for runs in [`RunStatus::Canceled`](crate::RunStatus::Canceled)
//! (graceful) and [`RunStatus::ForceCanceled`](crate::RunStatus::ForceCanceled) (forceful).

use crate::runs::{Run, RunId, RunStatus};

/// Instruction to stop an in-flight or about-to-start run.
///
/// - `forceful = false`: cooperative stop (interrupt the current process).
/// - `forceful = true`: immediate kill.
#[derive(Clone, Debug, PartialEq)]
pub struct CancelationRequest {
    pub run: Run,
    pub forceful: bool,
}

impl CancelationRequest {
    /// Derives a request from the run's status.
    ///
    /// Returns `None` unless the run is `Canceled` or `ForceCanceled`.
    pub fn from_run(run: Run) -> Option<Self> {
        let forceful = match run.status {
            RunStatus::Canceled => false,
            RunStatus::ForceCanceled => true,
            _ => return None,
        };
        Some(Self { run, forceful })
    }

    /// Identifier of the targeted run.
    #[inline]
    pub fn run_id(&self) -> &RunId {
        &self.run.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runs::ExecutionMode;

    fn run(status: RunStatus) -> Run {
        Run::new("run-1", "acme", "dev", ExecutionMode::Agent).with_status(status)
    }

    #[test]
    fn canceled_is_graceful() {
        let req = CancelationRequest::from_run(run(RunStatus::Canceled)).unwrap();
        assert!(!req.forceful);
        assert_eq!(req.run_id().as_str(), "run-1");
    }

    #[test]
    fn force_canceled_is_forceful() {
        let req = CancelationRequest::from_run(run(RunStatus::ForceCanceled)).unwrap();
        assert!(req.forceful);
    }

    #[test]
    fn other_statuses_produce_nothing() {
        assert!(CancelationRequest::from_run(run(RunStatus::PlanQueued)).is_none());
        assert!(CancelationRequest::from_run(run(RunStatus::Applied)).is_none());
    }
}
