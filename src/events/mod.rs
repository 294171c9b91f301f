//! Run-lifecycle events: types and the in-process broker.
//!
//! ## Contents
//! - [`Event`], [`EventType`], [`Payload`] envelope delivered by a subscription
//! - [`Subscription`] bounded receiving end handed out by [`RunSource::watch`](crate::RunSource::watch)
//! - [`Broker`] thin wrapper over `tokio::sync::broadcast` fanning events out to subscriptions
//!
//! ## Quick reference
//! - **Publishers**: whatever mutates runs (the platform, or [`MemorySource`](crate::MemorySource)).
//! - **Consumers**: one [`Spooler`](crate::Spooler) session per subscription.

mod bus;
mod event;

pub use bus::Broker;
pub use event::{Event, EventType, Payload, Subscription};
