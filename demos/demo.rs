//! Runnable demo: an html-mode server with a templated root page, a
//! capture-extracting API route, and the stock body decoder.
//!
//! ```sh
//! cargo run --example demo
//! curl http://127.0.0.1:3000/api/users/ada
//! ```

use strada::{Context, ResponseMode, Server, StatusCode};

#[tokio::main]
async fn main() -> Result<(), strada::ServerError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "strada=debug".into()),
        )
        .init();

    Server::builder()
        .route("/", |ctx: Context| async move {
            ctx.render(
                "templates/index.html",
                &serde_json::json!({ "title": "strada demo" }),
            )
            .await
        })
        .route(r"/api/users/(?<username>\w+)/?", |ctx: Context| async move {
            let query = ctx.request().query_params().clone();
            ctx.respond(StatusCode::Ok, serde_json::json!(query))
        })
        .response_type(ResponseMode::Html)
        .static_root("public")
        .cors_headers(["Content-Type"])
        .property("version", env!("CARGO_PKG_VERSION"))
        .middleware(strada::body::decoder())
        .build()?
        .start("127.0.0.1:3000")
        .await
}
