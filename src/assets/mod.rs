//! Static asset resolution across an ordered list of root directories.
//!
//! A request path is classified as static purely by its extension; static
//! paths short-circuit the dispatch pipeline before the router is consulted.
//! Resolution strips a known asset prefix (`/js/`, `/css/`, `/assets/`) when
//! present — otherwise just the leading slash — and probes each configured
//! root in order. Because some deployments keep the prefix directory on disk
//! (`{root}/css/app.css`) while others flatten it (`{root}/app.css`), each
//! root is probed with the stripped path first and the full path second; the
//! first existing file wins.
//!
//! The content type comes from a lookup table keyed on the final extension,
//! extensible through
//! [`ServerBuilder::content_type`](crate::server::ServerBuilder::content_type),
//! with a plain-text default for unknown extensions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tracing::debug;

use crate::http::{Response, StatusCode};

/// Extensions treated as static assets. Paths ending in one of these never
/// reach the router.
const STATIC_EXTENSIONS: &[&str] = &[
    "js", "css", "svg", "woff", "woff2", "ttf", "png", "jpg", "jpeg", "gif", "ico",
];

/// Asset prefixes stripped before probing the roots.
const KNOWN_PREFIXES: &[&str] = &["/js/", "/css/", "/assets/"];

/// Raised when no configured root contains the requested file. Surfaces to
/// the client as a 404 with an empty body.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("no static root contains {path:?}")]
    Missing { path: String },
}

/// Returns `true` if the path ends in a static-asset extension.
///
/// # Examples
///
/// ```
/// use strada::assets::is_static_path;
///
/// assert!(is_static_path("/css/app.css"));
/// assert!(is_static_path("/favicon.ico"));
/// assert!(!is_static_path("/api/users"));
/// ```
pub fn is_static_path(path: &str) -> bool {
    path.rsplit_once('.')
        .is_some_and(|(_, ext)| STATIC_EXTENSIONS.contains(&ext))
}

/// The built-in extension-to-content-type table.
///
/// Unlisted extensions fall back to `text/plain`.
pub fn default_content_types() -> HashMap<String, String> {
    [
        ("js", "application/javascript"),
        ("css", "text/css"),
        ("svg", "image/svg+xml"),
        ("woff", "font/woff"),
        ("woff2", "font/woff2"),
        ("ttf", "font/ttf"),
        ("png", "image/png"),
        ("jpg", "image/jpeg"),
        ("jpeg", "image/jpeg"),
        ("gif", "image/gif"),
        ("ico", "image/x-icon"),
    ]
    .into_iter()
    .map(|(ext, mime)| (ext.to_owned(), mime.to_owned()))
    .collect()
}

// Strip a known asset prefix, or failing that the leading slash.
fn strip_asset_prefix(path: &str) -> &str {
    for prefix in KNOWN_PREFIXES {
        if let Some(rest) = path.strip_prefix(prefix) {
            return rest;
        }
    }
    path.trim_start_matches('/')
}

/// Resolves static request paths to files under the configured roots.
///
/// Built once at server startup and shared read-only by all connections.
pub struct StaticResolver {
    roots: Vec<PathBuf>,
    content_types: HashMap<String, String>,
}

impl StaticResolver {
    /// Creates a resolver over `roots`, probed in order, with the given
    /// content-type table.
    pub fn new(roots: Vec<PathBuf>, content_types: HashMap<String, String>) -> Self {
        Self {
            roots,
            content_types,
        }
    }

    /// Returns the content type for a file extension, defaulting to
    /// `text/plain`.
    pub fn content_type(&self, extension: &str) -> &str {
        self.content_types
            .get(extension)
            .map(String::as_str)
            .unwrap_or("text/plain")
    }

    /// Resolves `path` against the roots and builds the 200 file response.
    ///
    /// Roots are normalized to absolute form before each resolution. File
    /// reads suspend at the I/O boundary, so a slow disk stalls only this
    /// request's continuation.
    ///
    /// # Errors
    ///
    /// [`AssetError::Missing`] when no root contains the file (or the file
    /// vanished between the existence probe and the read).
    pub async fn serve(&self, path: &str) -> Result<Response, AssetError> {
        let stripped = strip_asset_prefix(path);
        let full = path.trim_start_matches('/');

        for root in &self.roots {
            let root = std::path::absolute(root).unwrap_or_else(|_| root.clone());
            for relative in [stripped, full] {
                let candidate = root.join(relative);
                if !fs::try_exists(&candidate).await.unwrap_or(false) {
                    continue;
                }
                match fs::read(&candidate).await {
                    Ok(content) => {
                        debug!(path, file = %candidate.display(), "static asset hit");
                        let content_type = self.content_type(file_extension(&candidate));
                        return Ok(Response::new(StatusCode::Ok)
                            .header("Content-Type", content_type)
                            .body_bytes(content));
                    }
                    Err(err) => {
                        debug!(path, error = %err, "static asset read failed");
                        return Err(AssetError::Missing {
                            path: path.to_owned(),
                        });
                    }
                }
            }
        }

        debug!(path, "static asset missing in all roots");
        Err(AssetError::Missing {
            path: path.to_owned(),
        })
    }
}

fn file_extension(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("")
}
