//! Server builder and async TCP accept loop.
//!
//! [`ServerBuilder`] collects routes, static roots, middleware, and response
//! configuration; [`ServerBuilder::build`] freezes everything into an
//! immutable, shared [`Server`] and `start` binds and serves. One Tokio task
//! per connection, HTTP/1.1 keep-alive supported out of the box.
//!
//! The per-request pipeline:
//!
//! 1. parse and normalize the request (headers, cookies, query);
//! 2. `OPTIONS` short-circuits with 204 before anything else runs;
//! 3. server properties are copied onto the request;
//! 4. all middleware processors run concurrently; any failure is a 500
//!    envelope and dispatch never happens;
//! 5. static-extension paths go to the asset resolver, bypassing the router;
//! 6. otherwise the first matching route wins, its captures are merged into
//!    the query mapping, and the handler runs;
//! 7. no match falls through to the mode-dependent 404.
//!
//! The standard header set is installed on every response on the way out.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::BytesMut;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::assets::{self, StaticResolver};
use crate::context::Context;
use crate::http::{
    Method, Response, StatusCode,
    request::{Request, RequestError},
};
use crate::middleware::{Gate, Processor};
use crate::respond::{Responder, ResponseMode, apply_standard_headers, envelope};
use crate::router::{IntoHandler, Router, RouterError};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Router(#[from] RouterError),
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

// Everything the dispatch pipeline reads. Frozen at build time and shared
// read-only across all connection tasks — per-request state lives entirely in
// the request record.
struct ServerConfig {
    router: Router,
    resolver: StaticResolver,
    gate: Gate,
    mode: ResponseMode,
    cors_headers: Vec<String>,
    properties: HashMap<String, Value>,
}

/// Collects server configuration before startup.
///
/// # Examples
///
/// ```no_run
/// use strada::{Server, StatusCode};
///
/// # async fn demo() -> Result<(), strada::ServerError> {
/// let server = Server::builder()
///     .route("/", |ctx: strada::Context| async move {
///         ctx.respond(StatusCode::Ok, "hello")
///     })
///     .static_root("public")
///     .middleware(strada::body::decoder())
///     .build()?;
/// server.start("127.0.0.1:5000").await
/// # }
/// ```
#[derive(Default)]
pub struct ServerBuilder {
    routes: Vec<(String, Box<dyn IntoHandler>)>,
    static_roots: Vec<PathBuf>,
    cors_headers: Vec<String>,
    mode: ResponseMode,
    properties: HashMap<String, Value>,
    processors: Vec<Processor>,
    content_types: HashMap<String, String>,
}

impl ServerBuilder {
    /// Registers a handler under a path pattern.
    ///
    /// Patterns are regular expressions and may carry named capture groups;
    /// `/` is special-cased to an exact root match. Registration order
    /// determines match priority. Invalid patterns are reported by
    /// [`build`](Self::build).
    #[must_use]
    pub fn route(mut self, pattern: impl Into<String>, handler: impl IntoHandler) -> Self {
        self.routes.push((pattern.into(), Box::new(handler)));
        self
    }

    /// Appends a static root directory. Roots are probed in the order they
    /// were added.
    #[must_use]
    pub fn static_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.static_roots.push(path.into());
        self
    }

    /// Extends the `Access-Control-Allow-Headers` list.
    #[must_use]
    pub fn cors_headers(mut self, headers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.cors_headers.extend(headers.into_iter().map(Into::into));
        self
    }

    /// Sets the response mode (json envelopes vs html templates).
    #[must_use]
    pub fn response_type(mut self, mode: ResponseMode) -> Self {
        self.mode = mode;
        self
    }

    /// Injects a property copied onto every request before dispatch.
    #[must_use]
    pub fn property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Appends a pre-dispatch processor to the middleware gate.
    #[must_use]
    pub fn middleware(mut self, processor: Processor) -> Self {
        self.processors.push(processor);
        self
    }

    /// Registers or overrides a content type for a static-asset extension.
    #[must_use]
    pub fn content_type(mut self, extension: impl Into<String>, mime: impl Into<String>) -> Self {
        self.content_types.insert(extension.into(), mime.into());
        self
    }

    /// Freezes the configuration into a [`Server`].
    ///
    /// # Errors
    ///
    /// [`ServerError::Router`] when a route pattern fails to compile.
    pub fn build(self) -> Result<Server, ServerError> {
        let mut router = Router::new();
        for (pattern, handler) in self.routes {
            router.register_boxed(&pattern, handler)?;
        }

        let mut content_types = assets::default_content_types();
        content_types.extend(self.content_types);

        Ok(Server {
            config: Arc::new(ServerConfig {
                router,
                resolver: StaticResolver::new(self.static_roots, content_types),
                gate: Gate::new(self.processors),
                mode: self.mode,
                cors_headers: self.cors_headers,
                properties: self.properties,
            }),
        })
    }
}

/// The strada HTTP server: immutable configuration plus the accept loop.
pub struct Server {
    config: Arc<ServerConfig>,
}

impl Server {
    /// Starts building a server.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// Binds to `addr` and serves until the process terminates or the
    /// listener fails.
    ///
    /// # Errors
    ///
    /// [`ServerError::Bind`] if the address cannot be bound;
    /// [`ServerError::Io`] if the listener itself fails afterwards.
    pub async fn start(self, addr: impl AsRef<str>) -> Result<(), ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "strada listening");

        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let config = Arc::clone(&self.config);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, config).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Handles a single TCP connection over its lifetime.
///
/// HTTP/1.1 connections are persistent by default: we loop, reading one
/// request per iteration, until the peer closes the connection or signals
/// `Connection: close`.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<ServerConfig>,
) -> Result<(), std::io::Error> {
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        let bytes_read = stream.read_buf(&mut buf).await?;

        if bytes_read == 0 {
            debug!(peer = %peer_addr, "connection closed by peer");
            break;
        }

        // Guard against excessively large requests.
        if buf.len() > MAX_REQUEST_SIZE {
            warn!(peer = %peer_addr, "request too large — sending 413");
            let response = Response::new(StatusCode::PayloadTooLarge)
                .body("Request entity too large")
                .keep_alive(false);
            stream.write_all(&response.into_bytes()).await?;
            break;
        }

        // Attempt to parse the buffered data as an HTTP request.
        let (request, body_offset) = match Request::parse(&buf) {
            Ok(pair) => pair,
            Err(RequestError::Incomplete) => {
                // Headers not yet fully received — read more data.
                continue;
            }
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request — sending 400");
                let response = Response::new(StatusCode::BadRequest)
                    .body(format!("Bad Request: {e}"))
                    .keep_alive(false);
                stream.write_all(&response.into_bytes()).await?;
                break;
            }
        };

        // Wait for the full body to arrive if Content-Length is set.
        let content_length = request.content_length().unwrap_or(0);
        let total_needed = body_offset + content_length;
        if buf.len() < total_needed {
            continue;
        }

        let keep_alive = request.is_keep_alive();

        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        let response = dispatch(&config, request).await.keep_alive(keep_alive);
        stream.write_all(&response.into_bytes()).await?;
        stream.flush().await?;

        // Drop the consumed request bytes from the buffer.
        let _ = buf.split_to(total_needed);

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close — shutting down");
            break;
        }
    }

    Ok(())
}

// Runs one request through the full pipeline and decorates the outcome with
// the standard header set.
async fn dispatch(config: &ServerConfig, request: Request) -> Response {
    let mut response = dispatch_inner(config, request).await;
    apply_standard_headers(&mut response, &config.cors_headers);
    response
}

async fn dispatch_inner(config: &ServerConfig, mut request: Request) -> Response {
    // Preflight answers immediately after header installation.
    if request.method() == &Method::Options {
        return Response::new(StatusCode::NoContent);
    }

    request.inject_properties(&config.properties);
    let responder = Responder::new(config.mode);

    // Middleware gate: all processors complete before dispatch proceeds.
    let shared = Arc::new(Mutex::new(request));
    if let Err(err) = config.gate.run(&shared).await {
        return envelope(StatusCode::InternalServerError, Value::from(err.to_string()));
    }
    let mut request = match Arc::try_unwrap(shared) {
        Ok(mutex) => mutex.into_inner(),
        Err(_) => {
            // A processor stashed its handle instead of letting go.
            error!("request still shared after middleware gate");
            return envelope(
                StatusCode::InternalServerError,
                Value::from("request retained by middleware"),
            );
        }
    };

    // Static extensions bypass the router entirely.
    let path = request.path().to_owned();
    if assets::is_static_path(&path) {
        return match config.resolver.serve(&path).await {
            Ok(response) => response,
            Err(err) => {
                debug!(path, error = %err, "static asset not found");
                Response::new(StatusCode::NotFound)
            }
        };
    }

    match config.router.matched(&path) {
        Some((handler, captures)) => {
            request.merge_captures(captures);
            handler(Context::new(request, responder)).await
        }
        None => responder.not_found(&path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{MiddlewareError, from_fn};
    use std::fs;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    fn request(raw: &[u8]) -> Request {
        let (req, _) = Request::parse(raw).unwrap();
        req
    }

    fn get(path: &str) -> Request {
        request(format!("GET {path} HTTP/1.1\r\nHost: l\r\n\r\n").as_bytes())
    }

    fn body_str(response: &Response) -> &str {
        std::str::from_utf8(response.body_as_bytes()).unwrap()
    }

    fn config(builder: ServerBuilder) -> Arc<ServerConfig> {
        builder.build().unwrap().config
    }

    #[tokio::test]
    async fn options_short_circuits_with_cors_headers() {
        let cfg = config(Server::builder().route("/", |ctx: Context| async move {
            ctx.respond(StatusCode::Ok, "never")
        }));
        let req = request(b"OPTIONS /anything HTTP/1.1\r\nHost: l\r\n\r\n");
        let response = dispatch(&cfg, req).await;
        assert_eq!(response.status(), StatusCode::NoContent);
        assert!(response.body_as_bytes().is_empty());
        assert_eq!(
            response.headers().get("access-control-allow-origin"),
            Some("*")
        );
        assert!(response.headers().contains("server"));
    }

    #[tokio::test]
    async fn matched_route_receives_captures_in_query() {
        let cfg = config(Server::builder().route(
            r"/api/users/(?<username>\w+)/?",
            |ctx: Context| async move {
                let name = ctx.request().query("username").unwrap_or("").to_owned();
                ctx.respond(StatusCode::Ok, name)
            },
        ));
        let response = dispatch(&cfg, get("/api/users/ada")).await;
        assert_eq!(body_str(&response), r#"{"data":"ada"}"#);
    }

    #[tokio::test]
    async fn earlier_route_wins() {
        let cfg = config(
            Server::builder()
                .route(r"/dup", |ctx: Context| async move {
                    ctx.respond(StatusCode::Ok, "first")
                })
                .route(r"/dup", |ctx: Context| async move {
                    ctx.respond(StatusCode::Ok, "second")
                }),
        );
        let response = dispatch(&cfg, get("/dup")).await;
        assert_eq!(body_str(&response), r#"{"data":"first"}"#);
    }

    #[tokio::test]
    async fn unmatched_route_404_json_envelope() {
        let cfg = config(Server::builder());
        let response = dispatch(&cfg, get("/nope")).await;
        assert_eq!(response.status(), StatusCode::NotFound);
        assert_eq!(body_str(&response), r#"{"message":"Route not found"}"#);
    }

    #[tokio::test]
    async fn unmatched_route_404_html_mode_names_path() {
        let cfg = config(Server::builder().response_type(ResponseMode::Html));
        let response = dispatch(&cfg, get("/nope")).await;
        assert_eq!(response.status(), StatusCode::NotFound);
        assert!(body_str(&response).contains("/nope"));
    }

    #[tokio::test]
    async fn middleware_failure_is_500_and_handler_never_runs() {
        let invoked = Arc::new(AtomicBool::new(false));
        let invoked_probe = Arc::clone(&invoked);
        let cfg = config(
            Server::builder()
                .middleware(from_fn(|_req| async { Ok(()) }))
                .middleware(from_fn(|_req| async {
                    Err(MiddlewareError::new("auth exploded"))
                }))
                .route("/", move |ctx: Context| {
                    let invoked = Arc::clone(&invoked_probe);
                    async move {
                        invoked.store(true, Ordering::SeqCst);
                        ctx.respond(StatusCode::Ok, "unreachable")
                    }
                }),
        );
        let response = dispatch(&cfg, get("/")).await;
        assert_eq!(response.status(), StatusCode::InternalServerError);
        assert_eq!(body_str(&response), r#"{"message":"auth exploded"}"#);
        assert!(!invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn body_decoder_feeds_handler() {
        let cfg = config(
            Server::builder()
                .middleware(crate::body::decoder())
                .route("/submit", |ctx: Context| async move {
                    let data = ctx.request().data().cloned().unwrap_or(Value::Null);
                    ctx.respond(StatusCode::Ok, data)
                }),
        );
        let req = request(b"POST /submit HTTP/1.1\r\nHost: l\r\nContent-Length: 7\r\n\r\na=1&b=2");
        let response = dispatch(&cfg, req).await;
        assert_eq!(body_str(&response), r#"{"data":{"a":1,"b":2}}"#);
    }

    #[tokio::test]
    async fn properties_visible_to_handler() {
        let cfg = config(
            Server::builder()
                .property("env", "test")
                .route("/", |ctx: Context| async move {
                    let env = ctx.request().property("env").cloned().unwrap_or(Value::Null);
                    ctx.respond(StatusCode::Ok, env)
                }),
        );
        let response = dispatch(&cfg, get("/")).await;
        assert_eq!(body_str(&response), r#"{"data":"test"}"#);
    }

    #[tokio::test]
    async fn static_path_bypasses_router() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("app.css"), "body{}").unwrap();
        let cfg = config(
            Server::builder()
                // A route that would match anything — must not be consulted.
                .route(".*", |ctx: Context| async move {
                    ctx.respond(StatusCode::Ok, "routed")
                })
                .static_root(root.path()),
        );
        let response = dispatch(&cfg, get("/css/app.css")).await;
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(response.body_as_bytes(), b"body{}");
        assert_eq!(response.headers().get("content-type"), Some("text/css"));
    }

    #[tokio::test]
    async fn missing_static_asset_is_empty_404() {
        let root = TempDir::new().unwrap();
        let cfg = config(Server::builder().static_root(root.path()));
        let response = dispatch(&cfg, get("/js/ghost.js")).await;
        assert_eq!(response.status(), StatusCode::NotFound);
        assert!(response.body_as_bytes().is_empty());
    }

    #[tokio::test]
    async fn invalid_route_pattern_fails_build() {
        let result = Server::builder()
            .route("(oops", |ctx: Context| async move {
                ctx.respond(StatusCode::Ok, "")
            })
            .build();
        assert!(matches!(result, Err(ServerError::Router(_))));
    }

    #[tokio::test]
    async fn standard_headers_on_handler_responses() {
        let cfg = config(
            Server::builder()
                .cors_headers(["X-Token"])
                .route("/", |ctx: Context| async move {
                    ctx.respond(StatusCode::Ok, "hi")
                }),
        );
        let response = dispatch(&cfg, get("/")).await;
        assert_eq!(
            response.headers().get("access-control-allow-headers"),
            Some("X-Token")
        );
        assert_eq!(response.headers().get("access-control-allow-origin"), Some("*"));
    }
}
