//! # Events delivered to subscribers.
//!
//! An [`Event`] is an envelope: an [`EventType`] plus a [`Payload`]. The payload
//! is a closed sum type so consumers handle every case:
//!
//! | Payload            | Meaning                                    | Spooler reaction            |
//! |--------------------|--------------------------------------------|-----------------------------|
//! | `Payload::Run`     | snapshot of a run after a lifecycle change | filter + dispatch           |
//! | `Payload::Info`    | informational message from the feed        | logged                      |
//! | `Payload::Error`   | the feed failed; subscription is done      | session ends, reconnect     |
//!
//! ## Example
//! ```rust
//! use remoteops::{Event, EventType, ExecutionMode, Payload, Run};
//!
//! let run = Run::new("run-1", "acme", "dev", ExecutionMode::Remote);
//! let ev = Event::run(EventType::Updated, run);
//! assert!(matches!(ev.payload, Payload::Run(_)));
//! ```

use tokio::sync::mpsc;

use crate::error::SourceError;
use crate::runs::Run;

/// Receiving end of a subscription.
///
/// The channel closing without an [`Payload::Error`] means the feed went away.
pub type Subscription = mpsc::Receiver<Event>;

/// Kind of change that produced the event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    Created,
    Updated,
    Deleted,
    /// Synthesized by the spooler when replaying a listing.
    Listed,
}

/// Event payload.
#[derive(Clone, Debug)]
pub enum Payload {
    Run(Run),
    Info(String),
    Error(SourceError),
}

/// Event envelope.
#[derive(Clone, Debug)]
pub struct Event {
    pub kind: EventType,
    pub payload: Payload,
}

impl Event {
    /// Creates a run event.
    pub fn run(kind: EventType, run: Run) -> Self {
        Self {
            kind,
            payload: Payload::Run(run),
        }
    }

    /// Creates an informational event.
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: EventType::Updated,
            payload: Payload::Info(message.into()),
        }
    }

    /// Creates a terminal error event.
    pub fn error(error: SourceError) -> Self {
        Self {
            kind: EventType::Updated,
            payload: Payload::Error(error),
        }
    }

    /// Organization of the run payload, if any.
    pub fn organization(&self) -> Option<&str> {
        match &self.payload {
            Payload::Run(run) => Some(&run.organization),
            Payload::Info(_) | Payload::Error(_) => None,
        }
    }
}
