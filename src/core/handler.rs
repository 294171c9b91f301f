//! # Run handlers.
//!
//! A [`RunHandler`] is what a worker does with a dispatched run: typically a
//! sequence of `run_cli` calls (`terraform init`, `plan`, `apply`) inside the
//! [`Environment`] it is given. [`HandlerFn`] wraps a closure, producing a
//! fresh future per run.
//!
//! ## Example
//! ```rust
//! use remoteops::{EnvError, Environment, HandlerFn, Run};
//!
//! struct Services;
//!
//! let handler = HandlerFn::arc(|run: Run, env: Environment<Services>| async move {
//!     env.run_cli("terraform", ["plan", "-input=false"]).await?;
//!     let _ = run;
//!     Ok::<(), EnvError>(())
//! });
//! # let _ = handler;
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::environment::Environment;
use crate::error::EnvError;
use crate::runs::Run;

/// Executes one run inside its environment.
///
/// Implementations should return [`EnvError::Canceled`] (usually just by
/// propagating it from `run_cli`) when the environment is canceled.
#[async_trait]
pub trait RunHandler<S: ?Sized + Send + Sync + 'static>: Send + Sync + 'static {
    async fn handle(&self, run: Run, env: Environment<S>) -> Result<(), EnvError>;
}

/// Function-backed handler.
#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

impl<F> HandlerFn<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Creates the handler behind an `Arc`.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<S, F, Fut> RunHandler<S> for HandlerFn<F>
where
    S: ?Sized + Send + Sync + 'static,
    F: Fn(Run, Environment<S>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), EnvError>> + Send + 'static,
{
    async fn handle(&self, run: Run, env: Environment<S>) -> Result<(), EnvError> {
        (self.f)(run, env).await
    }
}
