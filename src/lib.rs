//! # strada
//!
//! A minimal async HTTP request-dispatch framework: regex route patterns
//! with named captures, a concurrent pre-dispatch middleware gate,
//! multi-root static asset serving, and file-based templates with recursive
//! includes and placeholder substitution.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use strada::{Context, Server, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), strada::ServerError> {
//!     Server::builder()
//!         .route("/", |ctx: Context| async move {
//!             ctx.respond(StatusCode::Ok, "hello")
//!         })
//!         .route(r"/api/users/(?<username>\w+)/?", |ctx: Context| async move {
//!             let user = ctx.request().query("username").unwrap_or("").to_owned();
//!             ctx.respond(StatusCode::Ok, user)
//!         })
//!         .static_root("public")
//!         .middleware(strada::body::decoder())
//!         .build()?
//!         .start("127.0.0.1:5000")
//!         .await
//! }
//! ```

pub mod assets;
pub mod body;
pub mod context;
pub mod http;
pub mod middleware;
pub mod respond;
pub mod router;
pub mod server;
pub mod template;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use context::Context;
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use respond::{Responder, ResponseMode};
pub use router::Router;
pub use server::{Server, ServerBuilder, ServerError};
