//! Reconnect delay policies.
//!
//! ## Contents
//! - [`BackoffPolicy`] how reconnect delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization so that many spoolers do not reconnect in lockstep
//!
//! ## Wiring
//! ```text
//! SpoolerConfig { backoff: BackoffPolicy, .. }
//!      └─► Spooler::start():
//!           - session fails ─► delay = backoff.next(attempt) ─► log ─► sleep (cancellable)
//!           - healthy session ─► attempt resets to 0
//! ```
//!
//! ## Defaults
//! - `BackoffPolicy::default()` → first=500ms, factor=1.5, max=60s, jitter=Equal.

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
