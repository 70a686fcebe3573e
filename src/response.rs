//! Outgoing HTTP response type and the [`IntoResponse`] conversion trait.
//!
//! A [`Response`] travels by `&mut` through every interceptor of an exchange.
//! Headers may be edited freely until they are committed, either explicitly
//! with [`Response::write_head`] or implicitly by the first
//! [`Response::write`]. After that, header and status edits fail with
//! [`Error::HeadersCommitted`].

use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use http_body_util::Full;

use crate::error::Error;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for use with [`ResponseBuilder::bytes`].
pub enum ContentType {
    Css,          // text/css; charset=utf-8
    Csv,          // text/csv
    Html,         // text/html; charset=utf-8
    Javascript,   // application/javascript
    Json,         // application/json
    OctetStream,  // application/octet-stream
    Text,         // text/plain; charset=utf-8
    Xml,          // application/xml; charset=utf-8
}

impl ContentType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Css         => "text/css; charset=utf-8",
            Self::Csv         => "text/csv",
            Self::Html        => "text/html; charset=utf-8",
            Self::Javascript  => "application/javascript",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Xml         => "application/xml; charset=utf-8",
        }
    }
}

// ── Body ──────────────────────────────────────────────────────────────────────

/// Response payload: nothing, one buffer, or chunks in write order.
#[derive(Debug, Default, Clone)]
pub enum Body {
    #[default]
    Empty,
    Full(Bytes),
    Chunks(Vec<Bytes>),
}

impl Body {
    pub fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Full(b) => b.len(),
            Self::Chunks(chunks) => chunks.iter().map(Bytes::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Concatenates the payload into one buffer.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Self::Empty => Bytes::new(),
            Self::Full(b) => b.clone(),
            Self::Chunks(chunks) => {
                let mut buf = BytesMut::with_capacity(self.len());
                for chunk in chunks {
                    buf.extend_from_slice(chunk);
                }
                buf.freeze()
            }
        }
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response. Starts as `200 OK` with no headers and no body.
///
/// # Shortcuts
///
/// ```rust
/// use strata::Response;
/// use http::StatusCode;
///
/// Response::json(br#"{"id":1}"#.to_vec());
/// Response::text("hello");
/// Response::status(StatusCode::NO_CONTENT);
/// ```
///
/// # Streaming-style writes
///
/// ```rust
/// use strata::Response;
/// use http::{StatusCode, header::CONTENT_TYPE, HeaderValue};
///
/// let mut res = Response::default();
/// res.write_head(StatusCode::OK, [(CONTENT_TYPE, HeaderValue::from_static("text/plain"))]).unwrap();
/// res.write("hello, ").unwrap();
/// res.write("world").unwrap();
/// assert!(res.set_status(StatusCode::NOT_FOUND).is_err());
/// ```
#[derive(Debug)]
pub struct Response {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Body,
    pub(crate) committed: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Body::Empty,
            committed: false,
        }
    }
}

impl Response {
    /// `200 OK`, `application/json`.
    pub fn json(body: Vec<u8>) -> Self {
        Self::bytes_raw("application/json", body)
    }

    /// `200 OK`, `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::bytes_raw("text/plain; charset=utf-8", body.into().into_bytes())
    }

    /// Response with no body.
    pub fn status(code: StatusCode) -> Self {
        Self { status: code, ..Self::default() }
    }

    /// Builder for responses that need a custom status or extra headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: HeaderMap::new(), status: StatusCode::OK }
    }

    fn bytes_raw(content_type: &'static str, body: Vec<u8>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        Self { headers, body: Body::Full(body.into()), ..Self::default() }
    }

    // ── Accessors ─────────────────────────────────────────────────────────

    pub fn status_code(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &Body { &self.body }
    pub fn is_committed(&self) -> bool { self.committed }

    /// Header value as text. `None` if absent or not visible ASCII.
    pub fn header(&self, name: impl http::header::AsHeaderName) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    // ── Mutation before commit ────────────────────────────────────────────

    pub fn set_status(&mut self, status: StatusCode) -> Result<(), Error> {
        self.ensure_open()?;
        self.status = status;
        Ok(())
    }

    /// Sets a header, replacing any previous value under the same name.
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), Error> {
        self.ensure_open()?;
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn remove_header(&mut self, name: &HeaderName) -> Result<(), Error> {
        self.ensure_open()?;
        self.headers.remove(name);
        Ok(())
    }

    /// Replaces the whole body. Allowed until the first [`Response::write`].
    pub fn set_body(&mut self, body: impl Into<Bytes>) -> Result<(), Error> {
        self.ensure_open()?;
        let body = body.into();
        self.body = if body.is_empty() { Body::Empty } else { Body::Full(body) };
        Ok(())
    }

    /// Takes over status, headers and body of `other`. Headers already set on
    /// `self` survive unless `other` sets the same name; every value of a
    /// multi-valued header in `other` is kept.
    pub fn merge(&mut self, other: Response) -> Result<(), Error> {
        self.ensure_open()?;
        self.status = other.status;
        for name in other.headers.keys() {
            self.headers.remove(name);
        }
        // `into_iter` yields the name only for the first value of each header.
        let mut current: Option<HeaderName> = None;
        for (name, value) in other.headers {
            if name.is_some() {
                current = name;
            }
            if let Some(name) = &current {
                self.headers.append(name.clone(), value);
            }
        }
        self.body = other.body;
        self.committed = other.committed;
        Ok(())
    }

    /// Throws away everything written so far, committed or not.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    // ── Commit + write ────────────────────────────────────────────────────

    /// Finalizes status and headers. Fails if they were already committed.
    pub fn write_head<I>(&mut self, status: StatusCode, headers: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = (HeaderName, HeaderValue)>,
    {
        self.ensure_open()?;
        self.status = status;
        for (name, value) in headers {
            self.headers.insert(name, value);
        }
        self.committed = true;
        Ok(())
    }

    /// Appends a body chunk, committing the headers first if needed.
    pub fn write(&mut self, chunk: impl Into<Bytes>) -> Result<(), Error> {
        self.committed = true;
        let chunk = chunk.into();
        if chunk.is_empty() {
            return Ok(());
        }
        match &mut self.body {
            Body::Chunks(chunks) => chunks.push(chunk),
            Body::Empty => self.body = Body::Chunks(vec![chunk]),
            Body::Full(existing) => {
                let first = std::mem::take(existing);
                self.body = Body::Chunks(vec![first, chunk]);
            }
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.committed { Err(Error::HeadersCommitted) } else { Ok(()) }
    }

    /// Converts into the hyper representation, filling in `content-length`
    /// when no handler set one.
    pub(crate) fn into_inner(self) -> http::Response<Full<Bytes>> {
        let Self { status, mut headers, body, .. } = self;
        if !headers.contains_key(CONTENT_LENGTH) {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        }
        let mut res = http::Response::new(Full::new(body.to_bytes()));
        *res.status_mut() = status;
        *res.headers_mut() = headers;
        res
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to `200 OK`.
/// Terminated by a typed body method.
pub struct ResponseBuilder {
    headers: HeaderMap,
    status: StatusCode,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    /// Adds a header value; repeating a name keeps every value. Invalid
    /// names or values are ignored.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) =
            (HeaderName::try_from(name), HeaderValue::try_from(value))
        {
            self.headers.append(name, value);
        }
        self
    }

    /// Terminate with a JSON body (`application/json`).
    pub fn json(self, body: Vec<u8>) -> Response {
        self.finish("application/json", body)
    }

    /// Terminate with a plain-text body (`text/plain; charset=utf-8`).
    pub fn text(self, body: impl Into<String>) -> Response {
        self.finish("text/plain; charset=utf-8", body.into().into_bytes())
    }

    /// Terminate with a typed body. Use this for HTML, XML, binary, etc.
    pub fn bytes(self, content_type: ContentType, body: Vec<u8>) -> Response {
        self.finish(content_type.as_str(), body)
    }

    /// Terminate with no body.
    pub fn no_body(self) -> Response {
        Response { status: self.status, headers: self.headers, ..Response::default() }
    }

    fn finish(mut self, content_type: &'static str, body: Vec<u8>) -> Response {
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        let body = if body.is_empty() { Body::Empty } else { Body::Full(body.into()) };
        Response { status: self.status, headers: self.headers, body, committed: false }
    }
}

// ── IntoResponse ──────────────────────────────────────────────────────────────

/// Conversion into an HTTP [`Response`].
///
/// Implement on your own types to return them directly from handlers.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

/// Return a status directly from a handler: `Ok(StatusCode::NO_CONTENT)`
impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::status(self) }
}

impl<R: IntoResponse> IntoResponse for (StatusCode, R) {
    fn into_response(self) -> Response {
        let mut res = self.1.into_response();
        res.status = self.0;
        res
    }
}

#[cfg(test)]
mod tests {
    use http::header::{SET_COOKIE, VARY};

    use super::*;

    #[test]
    fn headers_lock_after_write_head() {
        let mut res = Response::default();
        res.set_header(VARY, HeaderValue::from_static("Accept-Encoding")).unwrap();
        res.write_head(StatusCode::NOT_FOUND, []).unwrap();

        assert!(matches!(res.write_head(StatusCode::OK, []), Err(Error::HeadersCommitted)));
        assert!(res.set_header(CONTENT_TYPE, HeaderValue::from_static("text/html")).is_err());
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(res.header(VARY), Some("Accept-Encoding"));
    }

    #[test]
    fn write_commits_and_appends_chunks() {
        let mut res = Response::default();
        res.write("a").unwrap();
        res.write("bc").unwrap();
        assert!(res.is_committed());
        assert!(matches!(res.body(), Body::Chunks(c) if c.len() == 2));
        assert_eq!(res.body().to_bytes(), Bytes::from_static(b"abc"));
    }

    #[test]
    fn merge_keeps_earlier_headers() {
        let mut res = Response::default();
        res.set_header(VARY, HeaderValue::from_static("Accept-Encoding")).unwrap();
        res.merge(Response::builder().status(StatusCode::CREATED).text("made")).unwrap();

        assert_eq!(res.status_code(), StatusCode::CREATED);
        assert_eq!(res.header(VARY), Some("Accept-Encoding"));
        assert_eq!(res.header(CONTENT_TYPE), Some("text/plain; charset=utf-8"));
    }

    #[test]
    fn merge_keeps_every_value_of_repeated_headers() {
        let mut res = Response::default();
        res.set_header(SET_COOKIE, HeaderValue::from_static("stale=1")).unwrap();
        res.merge(
            Response::builder()
                .header("set-cookie", "a=1")
                .header("set-cookie", "b=2")
                .text("ok"),
        )
        .unwrap();

        let cookies: Vec<_> = res.headers().get_all(SET_COOKIE).iter().collect();
        assert_eq!(cookies, ["a=1", "b=2"]);
    }

    #[test]
    fn into_inner_fills_content_length() {
        let inner = Response::text("hello").into_inner();
        assert_eq!(inner.headers()[CONTENT_LENGTH], "5");
    }

    #[test]
    fn reset_reopens_a_committed_response() {
        let mut res = Response::default();
        res.write("partial").unwrap();
        res.reset();
        assert!(!res.is_committed());
        assert!(res.body().is_empty());
        assert_eq!(res.status_code(), StatusCode::OK);
    }
}
