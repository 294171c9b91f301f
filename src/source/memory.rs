//! # In-memory run source.
//!
//! [`MemorySource`] keeps a run table behind a mutex and publishes every change
//! through a [`Broker`]. It backs the test-suite and single-process setups
//! where the platform and the worker share an address space.
//!
//! Fault injection hooks (`fail_next_watch`, `fail_next_list`,
//! `fail_subscriptions`, `close_subscriptions`) simulate feed outages.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::page::Page;
use super::{ListOptions, RunSource, WatchOptions};
use crate::error::SourceError;
use crate::events::{Broker, Event, EventType, Subscription};
use crate::runs::{Run, RunId};

/// In-memory [`RunSource`].
#[derive(Debug)]
pub struct MemorySource {
    runs: Mutex<HashMap<RunId, Run>>,
    broker: Mutex<Broker>,
    capacity: usize,
    watch_failures: AtomicU32,
    list_failures: AtomicU32,
    watch_calls: AtomicUsize,
    list_calls: AtomicUsize,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl MemorySource {
    /// Creates an empty source whose subscriptions buffer up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            runs: Mutex::new(HashMap::new()),
            broker: Mutex::new(Broker::new(capacity)),
            capacity,
            watch_failures: AtomicU32::new(0),
            list_failures: AtomicU32::new(0),
            watch_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
        }
    }

    /// Inserts or replaces a run and publishes `Created`/`Updated`.
    pub fn upsert(&self, run: Run) {
        let kind = match self.table().insert(run.id.clone(), run.clone()) {
            Some(_) => EventType::Updated,
            None => EventType::Created,
        };
        self.broker().publish(Event::run(kind, run));
    }

    /// Inserts a run without publishing anything (pre-existing state).
    pub fn seed(&self, run: Run) {
        self.table().insert(run.id.clone(), run);
    }

    /// Removes a run and publishes `Deleted`.
    pub fn remove(&self, id: &RunId) -> Option<Run> {
        let run = self.table().remove(id)?;
        self.broker()
            .publish(Event::run(EventType::Deleted, run.clone()));
        Some(run)
    }

    /// Returns a run by id.
    pub fn get(&self, id: &RunId) -> Option<Run> {
        self.table().get(id).cloned()
    }

    /// Publishes an informational message to all subscriptions.
    pub fn announce(&self, message: impl Into<String>) {
        self.broker().publish(Event::info(message));
    }

    /// Delivers an error payload to every current subscription.
    pub fn fail_subscriptions(&self, error: impl Into<String>) {
        self.broker().publish(Event::error(SourceError::Unavailable {
            error: error.into(),
        }));
    }

    /// Closes every current subscription without an error payload.
    ///
    /// Later `watch` calls get a fresh broker.
    pub fn close_subscriptions(&self) {
        *self.broker() = Broker::new(self.capacity);
    }

    /// Makes the next `n` calls to `watch` fail.
    pub fn fail_next_watch(&self, n: u32) {
        self.watch_failures.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` calls to `list_runs` fail.
    pub fn fail_next_list(&self, n: u32) {
        self.list_failures.store(n, Ordering::SeqCst);
    }

    /// Number of `watch` calls so far (including failed ones).
    pub fn watch_calls(&self) -> usize {
        self.watch_calls.load(Ordering::SeqCst)
    }

    /// Number of `list_runs` calls so far (including failed ones).
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.broker().subscriber_count()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<RunId, Run>> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn broker(&self) -> MutexGuard<'_, Broker> {
        self.broker.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Consumes one pending injected failure, if any.
fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl RunSource for MemorySource {
    async fn watch(&self, opts: WatchOptions) -> Result<Subscription, SourceError> {
        self.watch_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.watch_failures) {
            return Err(SourceError::Unavailable {
                error: "injected watch failure".into(),
            });
        }
        Ok(self.broker().subscribe(opts.organization))
    }

    async fn list_runs(&self, opts: ListOptions) -> Result<Page<Run>, SourceError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.list_failures) {
            return Err(SourceError::Unavailable {
                error: "injected listing failure".into(),
            });
        }

        let mut runs: Vec<Run> = self
            .table()
            .values()
            .filter(|r| match &opts.organization {
                Some(org) => r.organization == *org,
                None => true,
            })
            .filter(|r| opts.statuses.is_empty() || opts.statuses.contains(&r.status))
            .cloned()
            .collect();
        // newest first; id breaks ties so the order is stable
        runs.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(Page::from_items(runs, opts.page))
    }
}
