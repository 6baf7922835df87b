//! HTTP/1.1 request parsing and inbound normalization.
//!
//! Parsing is done with the [`httparse`] crate; on top of the raw wire data
//! the request carries the normalized views the dispatch pipeline works with:
//!
//! - a keyed header mapping built from the raw header list (exact-key,
//!   last-write-wins — header names are *not* case-normalized),
//! - a cookie mapping with best-effort structured decoding of each value,
//! - query parameters, later merged with named route captures,
//! - the decoded body mapping filled in by the body-decoder middleware,
//! - server-injected properties copied onto every request before dispatch.

use std::collections::HashMap;

use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

use super::Method;

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete — more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
}

/// A fully parsed and normalized HTTP/1.1 request.
///
/// Created by [`Request::parse`] from a raw byte buffer. Each request record
/// is exclusively owned by the connection task handling it; during the
/// middleware gate it is shared behind a per-request async mutex and handed
/// back to the dispatcher once every processor has completed.
///
/// # Examples
///
/// ```
/// use strada::http::Request;
///
/// let raw = b"GET /hello?name=world HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.query("name"), Some("world"));
/// assert_eq!(request.header("Host"), Some("localhost"));
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    raw_headers: Vec<(String, String)>,
    headers: HashMap<String, String>,
    cookies: HashMap<String, Value>,
    query: HashMap<String, String>,
    data: Option<Value>,
    properties: HashMap<String, Value>,
    body: Bytes,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Parse a raw HTTP/1.1 request from a byte slice.
    ///
    /// Returns the parsed `Request` and the byte offset at which the body
    /// begins in `buf` (immediately after the `\r\n\r\n` header terminator).
    /// The header mapping and cookie mapping are normalized as part of
    /// parsing; the body mapping stays `None` until the body-decoder
    /// middleware runs.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`] — more data is needed to complete the request headers.
    /// - [`RequestError::Parse`] — the data is malformed and cannot be parsed.
    /// - [`RequestError::MissingField`] — a required field (method, path, version) is absent.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method: Method = raw_req
            .method
            .ok_or(RequestError::MissingField { field: "method" })?
            .parse()
            .unwrap(); // Infallible

        let raw_path = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;

        let (path, query_string) = match raw_path.find('?') {
            Some(pos) => (raw_path[..pos].to_owned(), Some(&raw_path[pos + 1..])),
            None => (raw_path.to_owned(), None),
        };

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut raw_headers = Vec::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                raw_headers.push((header.name.to_owned(), value.to_owned()));
            }
        }

        let headers = header_map(&raw_headers);
        let cookies = raw_headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("cookie"))
            .map(|(_, value)| parse_cookies(value))
            .unwrap_or_default();

        let query = query_string.map(parse_query_string).unwrap_or_default();
        let body = Bytes::copy_from_slice(&buf[body_offset..]);

        Ok((
            Self {
                method,
                path,
                version,
                raw_headers,
                headers,
                cookies,
                query,
                data: None,
                properties: HashMap::new(),
                body,
            },
            body_offset,
        ))
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Returns the raw header pairs in wire order.
    pub fn raw_headers(&self) -> &[(String, String)] {
        &self.raw_headers
    }

    /// Returns the normalized header mapping.
    ///
    /// Keys are the exact header names from the wire; a later header wins on
    /// a duplicate key.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Returns a header value by its exact key string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Returns the cookie mapping.
    ///
    /// Values are speculatively decoded as structured data; a value that is
    /// not valid JSON stays a plain string.
    pub fn cookies(&self) -> &HashMap<String, Value> {
        &self.cookies
    }

    /// Returns a single cookie value by name.
    pub fn cookie(&self, name: &str) -> Option<&Value> {
        self.cookies.get(name)
    }

    /// Returns the query/capture mapping.
    ///
    /// Starts out as the parsed query string; named captures from the matched
    /// route are merged in before the handler runs.
    pub fn query_params(&self) -> &HashMap<String, String> {
        &self.query
    }

    /// Returns a single query or capture value by key.
    pub fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    /// Merges named route captures into the query mapping. Captures override
    /// query-string keys of the same name.
    pub fn merge_captures(&mut self, captures: HashMap<String, String>) {
        self.query.extend(captures);
    }

    /// Returns the decoded body mapping, if the body decoder has run and
    /// produced one.
    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// Stores the decoded body mapping. Called by the body-decoder middleware.
    pub fn set_data(&mut self, data: Option<Value>) {
        self.data = data;
    }

    /// Returns the server-injected properties.
    pub fn properties(&self) -> &HashMap<String, Value> {
        &self.properties
    }

    /// Returns a single server-injected property by name.
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Copies the server's configured properties onto this request. Runs once
    /// per request, before the middleware gate.
    pub fn inject_properties(&mut self, properties: &HashMap<String, Value>) {
        for (name, value) in properties {
            self.properties.insert(name.clone(), value.clone());
        }
    }

    /// Returns the raw request body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        match self
            .raw_headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("connection"))
        {
            Some((_, conn)) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.raw_headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))?
            .1
            .parse()
            .ok()
    }
}

/// Turns the raw alternating header list into a keyed mapping.
///
/// Later headers win on a duplicate key. Keys are compared by exact string —
/// `Host` and `host` produce two distinct entries.
fn header_map(raw: &[(String, String)]) -> HashMap<String, String> {
    let mut map = HashMap::with_capacity(raw.len());
    for (name, value) in raw {
        map.insert(name.clone(), value.clone());
    }
    map
}

/// Parses a `Cookie` header into a keyed mapping.
///
/// Pairs are split on `"; "`; segments that do not split into exactly one
/// `name=value` pair are silently dropped. Each value is speculatively
/// decoded as JSON (numbers, booleans, nested objects); on failure the raw
/// string is kept.
fn parse_cookies(header: &str) -> HashMap<String, Value> {
    let mut cookies = HashMap::new();
    for segment in header.split("; ") {
        let parts: Vec<&str> = segment.split('=').collect();
        if parts.len() != 2 {
            continue;
        }
        let value = serde_json::from_str::<Value>(parts[1])
            .unwrap_or_else(|_| Value::String(parts[1].to_owned()));
        cookies.insert(parts[0].to_owned(), value);
    }
    cookies
}

/// Parses a URL query string (`key=value&key2=value2`) into a `HashMap`.
///
/// Keys and values have `+` decoded as a space.
fn parse_query_string(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?.replace('+', " ");
            let value = parts.next().unwrap_or("").replace('+', " ");
            Some((key, value))
        })
        .collect()
}
