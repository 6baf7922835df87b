//! Response wrapping: the JSON envelope, the per-request responder
//! capability, and the standard header set.
//!
//! Every non-template response is wrapped in a uniform envelope: the payload
//! sits under `"data"` for statuses in `200..400` and under `"message"`
//! otherwise. Handlers reach these helpers through the [`Responder`] carried
//! by their [`Context`](crate::context::Context) — an explicit per-request
//! capability set up at the start of the lifecycle rather than bolted onto
//! the response on the way out.

use std::path::Path;

use serde_json::Value;
use tracing::warn;

use crate::http::{Response, StatusCode};
use crate::template::{self, TemplateError};

/// Server identification string sent on every response.
pub const SERVER_IDENT: &str = concat!("strada HTTP API v", env!("CARGO_PKG_VERSION"));

/// Methods advertised in `Access-Control-Allow-Methods`.
const ALLOW_METHODS: &str = "GET, OPTIONS, PUT, POST";

/// How unmatched routes and handler output are presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    /// Enveloped JSON responses; 404s are enveloped too.
    #[default]
    Json,
    /// Template-oriented responses; 404s are a minimal HTML page.
    Html,
}

/// Builds an enveloped JSON response.
///
/// The payload lands under `"data"` for `200 <= status < 400` and under
/// `"message"` for everything else.
///
/// # Examples
///
/// ```
/// use strada::http::StatusCode;
/// use strada::respond::envelope;
///
/// let ok = envelope(StatusCode::Ok, serde_json::json!({"id": 7}));
/// assert_eq!(
///     std::str::from_utf8(ok.body_as_bytes()).unwrap(),
///     r#"{"data":{"id":7}}"#
/// );
/// ```
pub fn envelope(status: StatusCode, payload: Value) -> Response {
    let key = if (200..400).contains(&status.as_u16()) {
        "data"
    } else {
        "message"
    };
    let mut body = serde_json::Map::new();
    body.insert(key.to_owned(), payload);

    Response::new(status)
        .header("Content-Type", "application/json; charset=utf-8")
        .body(Value::Object(body).to_string())
}

/// Installs the standard header set on an outgoing response: CORS
/// allow-origin `*`, the allowed methods, the server identity, and — when the
/// configured list is non-empty — the allow-headers list.
pub fn apply_standard_headers(response: &mut Response, allow_headers: &[String]) {
    response.add_header("Access-Control-Allow-Origin", "*");
    response.add_header("Access-Control-Allow-Methods", ALLOW_METHODS);
    response.add_header("Server", SERVER_IDENT);
    if !allow_headers.is_empty() {
        response.add_header("Access-Control-Allow-Headers", allow_headers.join(","));
    }
}

/// The per-request response-writer capability.
///
/// Carries the server's response mode and exposes the three ways a handler
/// produces output: the JSON envelope, a rendered template, and the
/// mode-dependent 404.
#[derive(Debug, Clone, Copy)]
pub struct Responder {
    mode: ResponseMode,
}

impl Responder {
    /// Creates a responder for the given response mode.
    pub fn new(mode: ResponseMode) -> Self {
        Self { mode }
    }

    /// Returns the configured response mode.
    pub fn mode(&self) -> ResponseMode {
        self.mode
    }

    /// Writes `payload` as an enveloped JSON response with the given status.
    pub fn respond(&self, status: StatusCode, payload: impl Into<Value>) -> Response {
        envelope(status, payload.into())
    }

    /// Renders the template at `path` with `data` into a `text/html`
    /// response.
    ///
    /// An unreadable template file produces a 500 carrying an inline
    /// diagnostic that names the attempted path; broken includes inside a
    /// readable template degrade the page instead (see
    /// [`template`](crate::template)).
    pub async fn render(&self, path: impl AsRef<Path>, data: &Value) -> Response {
        match template::render(path.as_ref(), data).await {
            Ok(page) => Response::new(StatusCode::Ok)
                .header("Content-Type", "text/html; charset=utf-8")
                .body(page),
            Err(err @ TemplateError::Read { .. }) => {
                warn!(error = %err, "template render failed");
                Response::new(StatusCode::InternalServerError)
                    .header("Content-Type", "text/html; charset=utf-8")
                    .body(format!("Server error: <br>\n{err}"))
            }
        }
    }

    /// The default responder for unmatched routes.
    ///
    /// Html mode writes a minimal page naming the requested path; json mode
    /// uses the envelope.
    pub fn not_found(&self, path: &str) -> Response {
        match self.mode {
            ResponseMode::Html => Response::new(StatusCode::NotFound)
                .header("Content-Type", "text/html")
                .body(format!("Route {path} not found")),
            ResponseMode::Json => self.respond(StatusCode::NotFound, "Route not found"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body_str(response: &Response) -> &str {
        std::str::from_utf8(response.body_as_bytes()).unwrap()
    }

    #[test]
    fn success_payload_under_data() {
        let r = envelope(StatusCode::Ok, json!({"id": 1}));
        assert_eq!(body_str(&r), r#"{"data":{"id":1}}"#);
    }

    #[test]
    fn redirect_payload_under_data() {
        // 3xx still counts as the data side of the envelope.
        let r = envelope(StatusCode::Found, json!("moved"));
        assert_eq!(body_str(&r), r#"{"data":"moved"}"#);
    }

    #[test]
    fn error_payload_under_message() {
        let r = envelope(StatusCode::InternalServerError, json!("boom"));
        assert_eq!(body_str(&r), r#"{"message":"boom"}"#);
        let r = envelope(StatusCode::NotFound, json!("Route not found"));
        assert_eq!(body_str(&r), r#"{"message":"Route not found"}"#);
    }

    #[test]
    fn standard_headers_applied() {
        let mut r = Response::new(StatusCode::Ok);
        apply_standard_headers(&mut r, &[]);
        assert_eq!(r.headers().get("access-control-allow-origin"), Some("*"));
        assert_eq!(
            r.headers().get("access-control-allow-methods"),
            Some("GET, OPTIONS, PUT, POST")
        );
        assert_eq!(r.headers().get("server"), Some(SERVER_IDENT));
        assert!(!r.headers().contains("access-control-allow-headers"));
    }

    #[test]
    fn allow_headers_joined_when_configured() {
        let mut r = Response::new(StatusCode::Ok);
        apply_standard_headers(
            &mut r,
            &["Content-Type".to_owned(), "X-Token".to_owned()],
        );
        assert_eq!(
            r.headers().get("access-control-allow-headers"),
            Some("Content-Type,X-Token")
        );
    }

    #[test]
    fn not_found_json_mode() {
        let responder = Responder::new(ResponseMode::Json);
        let r = responder.not_found("/missing");
        assert_eq!(r.status(), StatusCode::NotFound);
        assert_eq!(body_str(&r), r#"{"message":"Route not found"}"#);
    }

    #[test]
    fn not_found_html_mode_names_path() {
        let responder = Responder::new(ResponseMode::Html);
        let r = responder.not_found("/missing");
        assert_eq!(r.status(), StatusCode::NotFound);
        assert_eq!(r.headers().get("content-type"), Some("text/html"));
        assert_eq!(body_str(&r), "Route /missing not found");
    }

    #[tokio::test]
    async fn render_failure_names_attempted_path() {
        let responder = Responder::new(ResponseMode::Html);
        let r = responder.render("/definitely/not/here.html", &json!({})).await;
        assert_eq!(r.status(), StatusCode::InternalServerError);
        assert!(body_str(&r).contains("/definitely/not/here.html"));
    }
}
