//! Request routing — regex path patterns mapped to handler functions.
//!
//! Patterns are full regular expressions and may embed named capture groups,
//! e.g. `/api/users/(?<username>\w+)`. Captures extracted from the matched
//! path are merged into the request's query mapping before the handler runs.
//!
//! Two rules govern matching:
//!
//! - Routes are tried in registration order; the first pattern that matches
//!   wins, even if a later pattern would also match.
//! - The root pattern `/` is special-cased to the anchored form `^(/)$` so it
//!   matches exactly `/` and nothing else. All other patterns are compiled
//!   verbatim — authors anchor them themselves when they want exact matches.
//!
//! Paths ending in a static-asset extension never reach the router; the
//! dispatch pipeline short-circuits them to the asset resolver first.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use regex::Regex;
use thiserror::Error;

use crate::context::Context;
use crate::http::Response;

/// Type-erased, heap-allocated async handler that processes a [`Context`] and
/// returns a [`Response`].
///
/// Handlers are stored behind `Arc<dyn Fn(…)>` so they can be cloned and
/// shared across tasks without copying the underlying closure. In practice
/// you never construct this type directly — pass a closure to
/// [`ServerBuilder::route`](crate::server::ServerBuilder::route) instead.
pub type Handler =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Context) -> impl Future<Output = Response> + Send` that is also
/// `Send + Sync + 'static` implements this trait automatically via the
/// blanket impl below, so route registration accepts plain async closures.
pub trait IntoHandler: Send + Sync + 'static {
    /// Call the handler with the given context, boxing the returned future.
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(ctx))
    }
}

/// Errors raised while building the route table.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("invalid route pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: Box<regex::Error>,
    },
}

// A single registered route binding a compiled pattern to a handler.
struct Route {
    pattern: Regex,
    handler: Handler,
}

/// Ordered route table with first-match-wins lookup.
///
/// The table is immutable once the server starts; it is shared read-only by
/// every in-flight request.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Creates a new, empty `Router` with no registered routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under a path pattern.
    ///
    /// The root pattern `/` is rewritten to `^(/)$`; every other pattern is
    /// compiled as-is, so named capture groups written by the caller survive
    /// into [`matched`](Self::matched).
    ///
    /// # Errors
    ///
    /// [`RouterError::Pattern`] when the pattern is not a valid regular
    /// expression.
    pub fn register(&mut self, pattern: &str, handler: impl IntoHandler) -> Result<(), RouterError> {
        self.register_boxed(pattern, Box::new(handler))
    }

    /// Registers an already type-erased handler. The server builder stores
    /// handlers boxed until build time, when patterns are compiled.
    pub fn register_boxed(
        &mut self,
        pattern: &str,
        handler: Box<dyn IntoHandler>,
    ) -> Result<(), RouterError> {
        let source = if pattern == "/" { "^(/)$" } else { pattern };
        let compiled = Regex::new(source).map_err(|e| RouterError::Pattern {
            pattern: pattern.to_owned(),
            source: Box::new(e),
        })?;
        self.routes.push(Route {
            pattern: compiled,
            handler: Arc::new(move |ctx| handler.call(ctx)),
        });
        Ok(())
    }

    /// Returns the number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if no routes have been registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Finds the first registered route whose pattern matches `path`.
    ///
    /// Returns the handler and the named-capture mapping (empty when the
    /// pattern has no named groups). `None` means no route matched and the
    /// dispatch pipeline falls through to its 404 responder.
    pub fn matched(&self, path: &str) -> Option<(Handler, HashMap<String, String>)> {
        for route in &self.routes {
            if let Some(caps) = route.pattern.captures(path) {
                let captures = route
                    .pattern
                    .capture_names()
                    .flatten()
                    .filter_map(|name| {
                        caps.name(name)
                            .map(|m| (name.to_owned(), m.as_str().to_owned()))
                    })
                    .collect();
                return Some((Arc::clone(&route.handler), captures));
            }
        }
        None
    }
}
