//! Per-request handler context.
//!
//! A [`Context`] is what a route handler receives: exclusive ownership of the
//! request record (middleware has already run, route captures are merged into
//! the query mapping) plus the [`Responder`] capability for producing
//! enveloped, rendered, or 404 output.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::http::{Request, Response, StatusCode};
use crate::respond::Responder;

/// The value handed to route handlers.
pub struct Context {
    request: Request,
    responder: Responder,
}

impl Context {
    /// Creates a context from a dispatched request and the server's
    /// responder.
    pub fn new(request: Request, responder: Responder) -> Self {
        Self { request, responder }
    }

    /// Returns the request record.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Returns the response-writer capability.
    pub fn responder(&self) -> &Responder {
        &self.responder
    }

    /// Shorthand for `self.responder().respond(...)`.
    pub fn respond(&self, status: StatusCode, payload: impl Into<Value>) -> Response {
        self.responder.respond(status, payload)
    }

    /// Shorthand for `self.responder().render(...)`.
    pub async fn render(&self, path: impl AsRef<std::path::Path>, data: &Value) -> Response {
        self.responder.render(path, data).await
    }

    /// Deserializes the raw request body as JSON into `T`.
    ///
    /// Unlike the body-decoder middleware this works on the raw bytes and
    /// does not apply fallback decoding, so handlers get serde's error when
    /// the body is not the expected shape.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(self.request.body())
    }
}
