//! Run data model.
//!
//! ## Contents
//! - [`Run`] one schedulable unit of remote execution work
//! - [`RunStatus`] lifecycle state; only the two queued states are dispatchable
//! - [`ExecutionMode`] which fleet a run belongs to (agent vs remote)
//! - [`CancelationRequest`] graceful or forceful stop instruction for a run

mod cancelation;
mod run;

pub use cancelation::CancelationRequest;
pub use run::{ExecutionMode, Run, RunId, RunStatus};
