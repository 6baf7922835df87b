//! Request body decoding with a cascading fallback policy.
//!
//! The decoder never fails; every decoding error cascades to the next
//! strategy and the worst case is an absent body mapping:
//!
//! 1. The whole body is tried as JSON.
//! 2. On failure, a query-string-style decode: split on `&`, each segment on
//!    `=`; segments that do not split into exactly two parts are discarded.
//!    Zero surviving pairs means no body mapping at all.
//! 3. Every string field of the result gets a secondary JSON decode so that
//!    numbers, booleans, and objects smuggled as strings come back typed;
//!    failures keep the raw string.
//!
//! The secondary re-decode is an intentional, documented policy: a handler
//! receiving `a=1` sees the number `1`, not the string `"1"`. Handlers that
//! need the literal text should read [`Request::body`](crate::Request::body).
//!
//! [`decoder`] packages this as the stock middleware that stores the result
//! in the request's body mapping.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::middleware::Processor;

/// Decodes a request body into a structured mapping.
///
/// Returns `None` when neither strategy yields anything — callers treat that
/// as "no decodable body", never as an error.
///
/// # Examples
///
/// ```
/// use strada::body::decode;
///
/// let decoded = decode(b"a=1&b=2").unwrap();
/// assert_eq!(decoded["a"], serde_json::json!(1));
/// assert_eq!(decoded["b"], serde_json::json!(2));
///
/// assert!(decode(b"no pairs here").is_none());
/// ```
pub fn decode(body: &[u8]) -> Option<Value> {
    let text = String::from_utf8_lossy(body);

    if let Ok(value) = serde_json::from_str::<Value>(&text) {
        return Some(reinterpret_fields(value));
    }

    let mut map = serde_json::Map::new();
    for segment in text.split('&') {
        let parts: Vec<&str> = segment.split('=').collect();
        if parts.len() != 2 {
            continue;
        }
        map.insert(parts[0].to_owned(), Value::String(parts[1].to_owned()));
    }

    if map.is_empty() {
        None
    } else {
        Some(reinterpret_fields(Value::Object(map)))
    }
}

// Secondary per-field decode: top-level string fields that parse as JSON are
// replaced with their typed form.
fn reinterpret_fields(value: Value) -> Value {
    let Value::Object(map) = value else {
        return value;
    };
    let map = map
        .into_iter()
        .map(|(key, val)| match val {
            Value::String(text) => {
                let typed = serde_json::from_str::<Value>(&text)
                    .unwrap_or(Value::String(text));
                (key, typed)
            }
            other => (key, other),
        })
        .collect();
    Value::Object(map)
}

/// The stock body-decoder middleware.
///
/// Runs [`decode`] over the accumulated body bytes and stores the result in
/// the request's body mapping. Always completes successfully; an undecodable
/// body leaves the mapping absent.
///
/// # Examples
///
/// ```no_run
/// use strada::Server;
///
/// let builder = Server::builder().middleware(strada::body::decoder());
/// ```
pub fn decoder() -> Processor {
    Arc::new(|request| {
        Box::pin(async move {
            let mut request = request.lock().await;
            let body = request.body().clone();
            let decoded = decode(&body);
            debug!(decoded = decoded.is_some(), "body decoder finished");
            request.set_data(decoded);
            Ok(())
        })
    })
}
