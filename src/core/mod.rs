//! Runtime core: spooling, dispatch and lifecycle.
//!
//! Internal modules:
//! - [`spooler`]: reconnecting event loop feeding the run and cancelation queues;
//! - [`queue`]: bounded spool queues shared between consumers;
//! - [`worker`]: drains the queues and executes runs with bounded concurrency;
//! - [`terminator`]: matches cancelation requests to in-flight runs;
//! - [`handler`]: what a worker does with a run;
//! - [`daemon`]: a spooler wired to a worker;
//! - [`shutdown`]: cross-platform shutdown signal handling.

mod daemon;
mod handler;
mod queue;
mod shutdown;
mod spooler;
mod terminator;
mod worker;

pub use daemon::Daemon;
pub use handler::{HandlerFn, RunHandler};
pub use queue::SpoolReceiver;
pub use shutdown::shutdown_signal;
pub use spooler::Spooler;
pub use terminator::{Attempt, CancelOutcome, Cancelable, Terminator};
pub use worker::Worker;
