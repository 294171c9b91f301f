//! Run sources: the event feed and the listing API the spooler consumes.
//!
//! The spooler never talks to platform services directly; it is handed a
//! [`RunSource`], a narrow seam exposing only [`watch`](RunSource::watch) and
//! [`list_runs`](RunSource::list_runs). Production deployments adapt the real
//! platform service to it; tests and embedded setups use [`MemorySource`].
//!
//! ## Contents
//! - [`RunSource`], [`WatchOptions`], [`ListOptions`]
//! - [`PageOptions`], [`Page`], [`Pagination`], [`list_all`] pagination helpers
//! - [`MemorySource`] in-memory implementation

mod memory;
mod page;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::events::Subscription;
use crate::runs::{Run, RunStatus};

pub use memory::MemorySource;
pub use page::{list_all, Page, PageOptions, Pagination};

/// Filter for [`RunSource::watch`].
#[derive(Clone, Debug, Default)]
pub struct WatchOptions {
    /// Only deliver run events of this organization (`None` = all).
    pub organization: Option<Arc<str>>,
}

/// Filter and page selector for [`RunSource::list_runs`].
#[derive(Clone, Debug, Default)]
pub struct ListOptions {
    pub page: PageOptions,
    /// Only list runs of this organization (`None` = all).
    pub organization: Option<Arc<str>>,
    /// Only list runs in one of these statuses (empty = any).
    pub statuses: Vec<RunStatus>,
}

/// Source of run events and run listings.
///
/// Implementations must support any number of independent, concurrent
/// subscriptions. Dropping a [`Subscription`] unsubscribes.
#[async_trait]
pub trait RunSource: Send + Sync + 'static {
    /// Opens a subscription to run-lifecycle events.
    ///
    /// On unrecoverable failure the subscription delivers a
    /// [`Payload::Error`](crate::Payload::Error) or simply closes.
    async fn watch(&self, opts: WatchOptions) -> Result<Subscription, SourceError>;

    /// Returns one page of runs, newest first.
    async fn list_runs(&self, opts: ListOptions) -> Result<Page<Run>, SourceError>;
}

#[async_trait]
impl<T: RunSource + ?Sized> RunSource for Arc<T> {
    async fn watch(&self, opts: WatchOptions) -> Result<Subscription, SourceError> {
        (**self).watch(opts).await
    }

    async fn list_runs(&self, opts: ListOptions) -> Result<Page<Run>, SourceError> {
        (**self).list_runs(opts).await
    }
}
