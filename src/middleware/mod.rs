//! Concurrent pre-dispatch middleware gate.
//!
//! Processors do not form a chain: when a request arrives, **all** registered
//! processors are started at once and dispatch waits behind a single barrier
//! until every one of them has completed. A processor that fails takes the
//! whole request down to a 500 envelope and the handler never runs;
//! mutations other processors already made in place are kept, since no
//! rollback exists for in-place state.
//!
//! Because completion order is unspecified, processors must not rely on each
//! other's side effects. Each processor receives the request behind a
//! per-request async mutex ([`SharedRequest`]); the configuration it might
//! read (routes, roots, properties) is immutable after startup, so no other
//! locking exists anywhere in the pipeline.
//!
//! There is no timeout: a processor that never completes parks its own
//! request forever without affecting any other connection.

use std::pin::Pin;
use std::sync::Arc;

use futures::future::try_join_all;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

use crate::http::Request;

/// The request record as seen by concurrent processors.
///
/// The mutex is strictly per-request; it serializes access between the
/// processors of one request and is gone by dispatch time.
pub type SharedRequest = Arc<Mutex<Request>>;

/// A type-erased pre-dispatch processor.
///
/// Built from plain async closures with [`from_fn`], or taken off the shelf
/// (see [`body::decoder`](crate::body::decoder)).
pub type Processor = Arc<
    dyn Fn(SharedRequest) -> Pin<Box<dyn Future<Output = Result<(), MiddlewareError>> + Send>>
        + Send
        + Sync
        + 'static,
>;

/// A processor failure. The detail string ends up in the `message` field of
/// the 500 envelope sent to the client.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct MiddlewareError(String);

impl MiddlewareError {
    /// Creates a failure with the given client-visible detail.
    pub fn new(detail: impl Into<String>) -> Self {
        Self(detail.into())
    }
}

/// Wraps an async closure as a [`Processor`].
///
/// # Examples
///
/// ```
/// use strada::middleware::{from_fn, MiddlewareError};
///
/// let auth = from_fn(|request| async move {
///     let request = request.lock().await;
///     match request.header("Authorization") {
///         Some(_) => Ok(()),
///         None => Err(MiddlewareError::new("missing Authorization header")),
///     }
/// });
/// ```
pub fn from_fn<F, Fut>(f: F) -> Processor
where
    F: Fn(SharedRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), MiddlewareError>> + Send + 'static,
{
    Arc::new(move |request| Box::pin(f(request)))
}

/// The barrier that gates dispatch on joint middleware completion.
#[derive(Default)]
pub struct Gate {
    processors: Vec<Processor>,
}

impl Gate {
    /// Creates a gate over an ordered set of processors. Order only affects
    /// registration bookkeeping — execution is concurrent.
    pub fn new(processors: Vec<Processor>) -> Self {
        Self { processors }
    }

    /// Returns the number of registered processors.
    pub fn len(&self) -> usize {
        self.processors.len()
    }

    /// Returns `true` when no processors are registered.
    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Fans out every processor concurrently and waits for all of them.
    ///
    /// # Errors
    ///
    /// The first [`MiddlewareError`] observed. Dispatch must not proceed when
    /// this returns `Err`.
    pub async fn run(&self, request: &SharedRequest) -> Result<(), MiddlewareError> {
        let results = self
            .processors
            .iter()
            .map(|processor| processor(Arc::clone(request)));
        try_join_all(results).await.map(|_| ()).inspect_err(|e| {
            warn!(error = %e, "middleware gate failed");
        })
    }
}
