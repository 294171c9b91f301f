//! Execution environments.
//!
//! An [`Environment`] is the sandbox one run-execution attempt works in: a
//! working directory, access to platform services, and the ability to run
//! external commands and in-process functions that are all canceled together.
//!
//! ## Cancellation
//! ```text
//!                governing token (one per attempt)
//!                        │ cancel()
//!      ┌─────────────────┼──────────────────────┐
//!      ▼                 ▼                      ▼
//! in-flight run_cli   in-flight run_func     later calls
//! (process group      (observes the token    (fail with
//!  killed + reaped)    it was handed)         EnvError::Canceled)
//! ```
//!
//! [`Environment::cancel`] with `force = false` interrupts in-flight commands
//! (SIGINT) instead of killing them, and still makes later calls fail.

mod env;
mod process;

pub use env::Environment;
