//! # Broker: broadcast fan-out of run events to subscriptions.
//!
//! [`Broker`] wraps [`tokio::sync::broadcast`] and turns each subscriber into
//! an independent bounded [`Subscription`], optionally scoped to one organization.
//!
//! ## Architecture
//! ```text
//! Publishers (many):              Subscriptions (many, independent):
//!   upsert run ──┐                  ┌──► forwarder ──► mpsc (org = acme)
//!   info msg   ──┼──► broadcast ────┼──► forwarder ──► mpsc (org = globex)
//!   fail feed  ──┘                  └──► forwarder ──► mpsc (any org)
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never waits for subscribers.
//! - **Lag is fatal**: a forwarder that falls more than `capacity` events behind
//!   delivers a [`Payload::Error`](super::Payload::Error) and closes its subscription,
//!   so the consumer reconciles instead of silently missing runs.
//! - **No persistence**: events published while nobody subscribes are lost.
//! - A forwarder exits as soon as its subscription is dropped.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use super::event::{Event, Subscription};
use crate::error::SourceError;

/// Broadcast channel for run events.
///
/// Cheap to clone (internally holds an `Arc`-backed sender).
#[derive(Clone, Debug)]
pub struct Broker {
    tx: broadcast::Sender<Event>,
    capacity: usize,
}

impl Broker {
    /// Creates a broker; capacity is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel::<Event>(capacity);
        Self { tx, capacity }
    }

    /// Publishes an event to all current subscriptions.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Opens a subscription receiving events published from now on.
    ///
    /// With `organization = Some(org)`, run events of other organizations are
    /// skipped; informational and error events are always delivered.
    ///
    /// Must be called within a tokio runtime (spawns the forwarder).
    pub fn subscribe(&self, organization: Option<Arc<str>>) -> Subscription {
        let mut rx = self.tx.subscribe();
        let (out, sub) = mpsc::channel(self.capacity);

        tokio::spawn(async move {
            loop {
                let ev = tokio::select! {
                    _ = out.closed() => return,
                    res = rx.recv() => res,
                };
                match ev {
                    Ok(ev) => {
                        let wanted = match (&organization, ev.organization()) {
                            (Some(want), Some(got)) => **want == *got,
                            _ => true,
                        };
                        if wanted && out.send(ev).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        let err = SourceError::Unavailable {
                            error: format!("subscription lagged behind by {n} events"),
                        };
                        let _ = out.send(Event::error(err)).await;
                        return;
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });
        sub
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventType, Payload};
    use crate::runs::{ExecutionMode, Run};

    fn run(id: &str, org: &str) -> Event {
        Event::run(
            EventType::Created,
            Run::new(id, org, "dev", ExecutionMode::Remote),
        )
    }

    #[tokio::test]
    async fn filters_by_organization() {
        let broker = Broker::new(16);
        let mut sub = broker.subscribe(Some("acme".into()));

        broker.publish(run("run-1", "globex"));
        broker.publish(run("run-2", "acme"));
        broker.publish(Event::info("hello"));

        let first = sub.recv().await.unwrap();
        assert_eq!(first.organization(), Some("acme"));
        let second = sub.recv().await.unwrap();
        assert!(matches!(second.payload, Payload::Info(ref m) if m == "hello"));
    }

    #[tokio::test]
    async fn closes_when_broker_dropped() {
        let broker = Broker::new(4);
        let mut sub = broker.subscribe(None);
        drop(broker);
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn lagging_subscription_gets_error_then_closes() {
        let broker = Broker::new(2);
        let mut sub = broker.subscribe(None);
        // Nobody reads: the forwarder blocks on the full mpsc, the ring buffer overflows.
        for i in 0..16 {
            broker.publish(run(&format!("run-{i}"), "acme"));
            tokio::task::yield_now().await;
        }

        let mut saw_error = false;
        while let Some(ev) = sub.recv().await {
            if matches!(ev.payload, Payload::Error(_)) {
                saw_error = true;
            }
        }
        assert!(saw_error);
    }
}
