//! File-based template rendering: include expansion and placeholder
//! substitution.
//!
//! Rendering is two terminating rewrite passes over an owned text buffer:
//!
//! 1. **Include expansion.** `{% include <relative-path> %}` directives are
//!    replaced with the included file's content. Relative paths resolve
//!    against the directory of the file the directive appears in, so nested
//!    includes compose naturally. A directive whose file cannot be read is
//!    kept in the output with an inline diagnostic appended — one broken
//!    include degrades the page, it does not fail the render. Expansion
//!    depth is bounded by [`MAX_INCLUDE_DEPTH`] so a self-including template
//!    terminates with a diagnostic instead of looping.
//! 2. **Placeholder substitution.** For each key of the data mapping, every
//!    `{{ key }}` occurrence (whitespace-tolerant, case-insensitive,
//!    multiline) is replaced with the key's value, repeating until the
//!    pattern no longer matches so overlap-created residues are caught. Keys
//!    are processed in the data mapping's iteration order; placeholders with
//!    no matching key stay literal, keys with no placeholder are no-ops.
//!
//! Only the top-level file read is fatal ([`TemplateError::Read`], a 500 at
//! the HTTP layer).

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tokio::fs;
use tracing::warn;

/// Include nesting bound. Hitting it leaves the directive in place with a
/// diagnostic, which also breaks include cycles.
pub const MAX_INCLUDE_DEPTH: usize = 16;

// Passes per key in phase 2. Replacement values that reproduce their own
// placeholder would otherwise never converge.
const MAX_SUBSTITUTION_PASSES: usize = 8;

static INCLUDE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{%\s*include\s+([^%\s]+)\s*%\}").unwrap());

/// Errors fatal to a render.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to read template {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Renders the template at `path` with the given data mapping.
///
/// `data` is expected to be a JSON object; any other value skips
/// substitution and the template renders with includes expanded only.
///
/// # Errors
///
/// [`TemplateError::Read`] when the top-level template file cannot be read.
/// Unreadable *included* files are not errors — they surface as inline
/// diagnostics in the output.
///
/// # Examples
///
/// ```no_run
/// use serde_json::json;
///
/// # async fn demo() -> Result<(), strada::template::TemplateError> {
/// let page = strada::template::render(
///     "templates/index.html",
///     &json!({ "name": "Ada" }),
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn render(path: impl AsRef<Path>, data: &Value) -> Result<String, TemplateError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .await
        .map_err(|source| TemplateError::Read {
            path: path.to_owned(),
            source,
        })?;

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let expanded = expand_includes(content, base, 0).await;
    Ok(substitute_placeholders(expanded, data))
}

// Phase 1. Scans with a cursor so that a directive kept in place after a
// failed read is not rescanned forever. Nested directives inside included
// files are handled by the recursive call, which resolves them against the
// included file's own directory.
fn expand_includes(
    content: String,
    base: &Path,
    depth: usize,
) -> std::pin::Pin<Box<dyn Future<Output = String> + Send + '_>> {
    Box::pin(async move {
        let mut page = content;
        let mut cursor = 0;

        while let Some(caps) = INCLUDE_RE.captures_at(&page, cursor) {
            let directive = caps.get(0).unwrap(); // group 0 is the whole match
            let range = directive.range();
            let relative = &caps[1];
            let target = base.join(relative);

            let replacement = if depth >= MAX_INCLUDE_DEPTH {
                warn!(target = %target.display(), depth, "include depth limit reached");
                format!(
                    "{}<!-- include depth limit reached: {} -->",
                    directive.as_str(),
                    target.display()
                )
            } else {
                match fs::read_to_string(&target).await {
                    Ok(included) => {
                        let dir = target.parent().unwrap_or(base).to_owned();
                        expand_includes(included, &dir, depth + 1).await
                    }
                    Err(err) => {
                        warn!(target = %target.display(), error = %err, "include failed");
                        format!(
                            "{}<!-- include error: {}: {} -->",
                            directive.as_str(),
                            target.display(),
                            err
                        )
                    }
                }
            };

            cursor = range.start + replacement.len();
            page.replace_range(range, &replacement);
        }

        page
    })
}

// Phase 2. One whitespace-tolerant, case-insensitive, multiline pattern per
// key, replacing all occurrences until none remain.
fn substitute_placeholders(page: String, data: &Value) -> String {
    let Some(map) = data.as_object() else {
        return page;
    };

    let mut page = page;
    for (key, value) in map {
        let Ok(matcher) = Regex::new(&format!(
            r"(?im)\{{\{{\s*{}\s*\}}\}}",
            regex::escape(key)
        )) else {
            continue;
        };
        let replacement = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        for _ in 0..MAX_SUBSTITUTION_PASSES {
            if !matcher.is_match(&page) {
                break;
            }
            page = matcher
                .replace_all(&page, regex::NoExpand(&replacement))
                .into_owned();
        }
    }
    page
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs as std_fs;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, relative: &str, content: &str) -> PathBuf {
        let path = dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std_fs::create_dir_all(parent).unwrap();
        }
        std_fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn placeholder_substitution() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "hello.html", "Hello {{name}}!");
        let page = render(&path, &json!({"name": "Ada"})).await.unwrap();
        assert_eq!(page, "Hello Ada!");
    }

    #[tokio::test]
    async fn placeholder_whitespace_and_case_tolerant() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "t.html", "{{ NAME }} and {{name  }}");
        let page = render(&path, &json!({"name": "Ada"})).await.unwrap();
        assert_eq!(page, "Ada and Ada");
    }

    #[tokio::test]
    async fn unknown_placeholder_left_literal() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "t.html", "Hello {{unknown}}!");
        let page = render(&path, &json!({"name": "Ada"})).await.unwrap();
        assert_eq!(page, "Hello {{unknown}}!");
    }

    #[tokio::test]
    async fn key_without_placeholder_is_noop() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "t.html", "static text");
        let page = render(&path, &json!({"name": "Ada"})).await.unwrap();
        assert_eq!(page, "static text");
    }

    #[tokio::test]
    async fn non_string_values_serialized() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "t.html", "count: {{n}}, on: {{flag}}");
        let page = render(&path, &json!({"n": 3, "flag": true})).await.unwrap();
        assert_eq!(page, "count: 3, on: true");
    }

    #[tokio::test]
    async fn include_free_template_passes_through() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "t.html", "<p>nothing to expand</p>");
        let page = render(&path, &json!({})).await.unwrap();
        assert_eq!(page, "<p>nothing to expand</p>");
    }

    #[tokio::test]
    async fn include_expanded_with_relative_path() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "partials/header.html", "<h1>{{title}}</h1>");
        let path = write_file(
            &dir,
            "index.html",
            "{% include partials/header.html %}\n<main/>",
        );
        let page = render(&path, &json!({"title": "Home"})).await.unwrap();
        assert_eq!(page, "<h1>Home</h1>\n<main/>");
    }

    #[tokio::test]
    async fn nested_include_resolves_against_including_file() {
        let dir = TempDir::new().unwrap();
        // partials/outer.html includes inner.html relative to partials/.
        write_file(&dir, "partials/inner.html", "deep");
        write_file(&dir, "partials/outer.html", "[{% include inner.html %}]");
        let path = write_file(&dir, "index.html", "{% include partials/outer.html %}");
        let page = render(&path, &json!({})).await.unwrap();
        assert_eq!(page, "[deep]");
    }

    #[tokio::test]
    async fn missing_include_degrades_with_diagnostic() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "index.html", "a {% include missing.html %} b");
        let page = render(&path, &json!({})).await.unwrap();
        // The directive text survives, followed by an inline diagnostic.
        assert!(page.contains("{% include missing.html %}"));
        assert!(page.contains("include error"));
        assert!(page.contains("missing.html"));
        assert!(page.starts_with("a "));
        assert!(page.ends_with(" b"));
    }

    #[tokio::test]
    async fn self_including_template_terminates() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "loop.html", "x{% include loop.html %}");
        let page = render(&path, &json!({})).await.unwrap();
        assert!(page.contains("include depth limit reached"));
    }

    #[tokio::test]
    async fn unreadable_top_level_template_is_fatal() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.html");
        let err = render(&missing, &json!({})).await.unwrap_err();
        let TemplateError::Read { path, .. } = err;
        assert_eq!(path, missing);
    }

    #[tokio::test]
    async fn later_key_wins_on_overlapping_substitution() {
        // Keys are processed in the data mapping's order (preserve_order),
        // so a value introducing another key's placeholder gets rewritten by
        // the later key.
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "t.html", "{{a}}");
        let page = render(&path, &json!({"a": "{{b}}", "b": "done"}))
            .await
            .unwrap();
        assert_eq!(page, "done");
    }
}
