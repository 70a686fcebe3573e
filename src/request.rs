//! Incoming HTTP request type.
//!
//! Besides the wire data, a [`Request`] carries an [`Env`]: string-keyed,
//! typed metadata that interceptors use to signal each other within one
//! exchange (the parsed body, the request logger, the exception being
//! rendered, ...). The well-known keys live in [`keys`].

use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use http::header::{ACCEPT, ACCEPT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method};

use crate::mime::{self, Format};

/// Metadata keys shared between the built-in interceptors.
pub mod keys {
    /// `Arc<ExceptionWrapper>` for the failure being rendered.
    pub const EXCEPTION: &str = "strata.exception";
    /// `String`: path-info before it was rewritten to `/<status>`.
    pub const ORIGINAL_PATH: &str = "strata.original_path";
    /// `bool`: `false` makes `ShowExceptions` re-raise instead of rendering.
    pub const SHOW_EXCEPTIONS: &str = "strata.show_exceptions";
    /// `Params`: decoded request body.
    pub const REQUEST_PARAMETERS: &str = "strata.request.request_parameters";
    /// `TaggedLogger` assigned to this exchange.
    pub const LOGGER: &str = "strata.logger";
    /// `Arc<dyn BacktraceCleaner>`.
    pub const BACKTRACE_CLEANER: &str = "strata.backtrace_cleaner";
    /// `String`: locale used to pick public error pages.
    pub const LOCALE: &str = "strata.locale";
}

static NEXT_EXCHANGE: AtomicU64 = AtomicU64::new(1);

// ── Env ───────────────────────────────────────────────────────────────────────

/// Per-exchange metadata: string keys, values of any `Send + Sync` type.
#[derive(Default)]
pub struct Env {
    entries: HashMap<Cow<'static, str>, Box<dyn Any + Send + Sync>>,
}

impl Env {
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<Cow<'static, str>>, value: T) {
        self.entries.insert(key.into(), Box::new(value));
    }

    /// Typed lookup. `None` if the key is absent or holds another type.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.entries.get(key)?.downcast_ref()
    }

    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.entries.get_mut(key)?.downcast_mut()
    }

    pub fn remove<T: Any>(&mut self, key: &str) -> Option<T> {
        let value = self.entries.remove(key)?;
        value.downcast().ok().map(|boxed| *boxed)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

// ── Request ───────────────────────────────────────────────────────────────────

/// An incoming HTTP request.
///
/// `method` and `path` are fixed at construction. `path_info` is the routable
/// part of the path and may be rewritten while the request travels the
/// pipeline; use [`Request::scoped_path_info`] when the rewrite must not
/// outlive a call.
pub struct Request {
    pub(crate) id: u64,
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) path_info: String,
    pub(crate) query: Option<String>,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) remote_addr: Option<SocketAddr>,
    pub(crate) params: HashMap<String, String>,
    pub(crate) env: Env,
}

impl Request {
    /// Starts building a request by hand, e.g. in tests.
    pub fn builder(method: Method, uri: &str) -> RequestBuilder {
        RequestBuilder {
            method,
            uri: uri.to_owned(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            remote_addr: None,
        }
    }

    pub(crate) fn from_parts(
        parts: http::request::Parts,
        body: Bytes,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        let path = parts.uri.path().to_owned();
        Self {
            id: NEXT_EXCHANGE.fetch_add(1, Ordering::Relaxed),
            method: parts.method,
            path_info: path.clone(),
            path,
            query: parts.uri.query().map(str::to_owned),
            headers: parts.headers,
            body,
            remote_addr,
            params: HashMap::new(),
            env: Env::default(),
        }
    }

    /// Process-unique identity of this exchange.
    pub fn id(&self) -> u64 { self.id }
    pub fn method(&self) -> &Method { &self.method }
    pub fn path(&self) -> &str { &self.path }
    pub fn path_info(&self) -> &str { &self.path_info }
    pub fn query(&self) -> Option<&str> { self.query.as_deref() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &Bytes { &self.body }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }
    pub fn env(&self) -> &Env { &self.env }
    pub fn env_mut(&mut self) -> &mut Env { &mut self.env }

    pub fn set_path_info(&mut self, path_info: impl Into<String>) {
        self.path_info = path_info.into();
    }

    /// Rewrites path-info until the returned guard is dropped.
    ///
    /// The previous value comes back on every exit path: normal return, `?`,
    /// a dropped future, or unwinding.
    pub fn scoped_path_info(&mut self, path_info: impl Into<String>) -> PathInfoGuard<'_> {
        let saved = std::mem::replace(&mut self.path_info, path_info.into());
        PathInfoGuard { req: self, saved: Some(saved) }
    }

    /// Header value as text. `None` if absent or not visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// Named path parameter captured by the router.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn is_get(&self) -> bool { self.method == Method::GET }
    pub fn is_head(&self) -> bool { self.method == Method::HEAD }

    /// Declared body length, falling back to the buffered body size.
    pub fn content_length(&self) -> usize {
        self.header(CONTENT_LENGTH.as_str())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(self.body.len())
    }

    /// Media type of the body, lowercased, parameters stripped.
    pub fn content_mime_type(&self) -> Option<String> {
        let raw = self.header(CONTENT_TYPE.as_str())?;
        let mime = raw.split(';').next()?.trim();
        (!mime.is_empty()).then(|| mime.to_ascii_lowercase())
    }

    pub fn accept_encoding(&self) -> Option<&str> {
        self.header(ACCEPT_ENCODING.as_str())
    }

    /// Formats the client accepts, most preferred first.
    pub fn formats(&self) -> Vec<Format> {
        mime::negotiate(self.header(ACCEPT.as_str()))
    }

    /// Client address as text, or `"-"` when unknown.
    pub fn ip(&self) -> String {
        self.remote_addr.map_or_else(|| "-".to_owned(), |a| a.ip().to_string())
    }
}

// ── PathInfoGuard ─────────────────────────────────────────────────────────────

/// Restores a request's path-info when dropped. See [`Request::scoped_path_info`].
pub struct PathInfoGuard<'a> {
    req: &'a mut Request,
    saved: Option<String>,
}

impl Deref for PathInfoGuard<'_> {
    type Target = Request;
    fn deref(&self) -> &Request { self.req }
}

impl DerefMut for PathInfoGuard<'_> {
    fn deref_mut(&mut self) -> &mut Request { self.req }
}

impl Drop for PathInfoGuard<'_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            self.req.path_info = saved;
        }
    }
}

// ── RequestBuilder ────────────────────────────────────────────────────────────

/// Hand-built [`Request`]. Obtain via [`Request::builder`].
pub struct RequestBuilder {
    method: Method,
    uri: String,
    headers: HeaderMap,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
}

impl RequestBuilder {
    /// Adds a header. Invalid names or values are ignored.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) =
            (HeaderName::try_from(name), HeaderValue::try_from(value))
        {
            self.headers.append(name, value);
        }
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn build(self) -> Request {
        let (path, query) = match self.uri.split_once('?') {
            Some((p, q)) => (p.to_owned(), Some(q.to_owned())),
            None => (self.uri, None),
        };
        Request {
            id: NEXT_EXCHANGE.fetch_add(1, Ordering::Relaxed),
            method: self.method,
            path_info: path.clone(),
            path,
            query,
            headers: self.headers,
            body: self.body,
            remote_addr: self.remote_addr,
            params: HashMap::new(),
            env: Env::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    #[test]
    fn env_is_typed() {
        let mut req = Request::builder(Method::GET, "/").build();
        req.env_mut().insert(keys::ORIGINAL_PATH, "/a".to_owned());
        assert_eq!(req.env().get::<String>(keys::ORIGINAL_PATH).map(String::as_str), Some("/a"));
        assert!(req.env().get::<bool>(keys::ORIGINAL_PATH).is_none());
        assert_eq!(req.env_mut().remove::<String>(keys::ORIGINAL_PATH).as_deref(), Some("/a"));
        assert!(!req.env().contains(keys::ORIGINAL_PATH));
    }

    #[test]
    fn scoped_path_info_restores_on_drop() {
        let mut req = Request::builder(Method::GET, "/assets/app.js").build();
        {
            let guard = req.scoped_path_info("/assets/app.js.gz");
            assert_eq!(guard.path_info(), "/assets/app.js.gz");
        }
        assert_eq!(req.path_info(), "/assets/app.js");
        assert_eq!(req.path(), "/assets/app.js");
    }

    #[test]
    fn scoped_path_info_restores_on_panic() {
        let mut req = Request::builder(Method::GET, "/orig").build();
        let result = catch_unwind(AssertUnwindSafe(|| {
            let _guard = req.scoped_path_info("/500");
            panic!("renderer blew up");
        }));
        assert!(result.is_err());
        assert_eq!(req.path_info(), "/orig");
    }

    #[test]
    fn builder_splits_query_and_reads_headers() {
        let req = Request::builder(Method::POST, "/users?page=2")
            .header("Content-Type", "Application/JSON; charset=utf-8")
            .body(&b"{}"[..])
            .build();
        assert_eq!(req.path(), "/users");
        assert_eq!(req.query(), Some("page=2"));
        assert_eq!(req.content_mime_type().as_deref(), Some("application/json"));
        assert_eq!(req.content_length(), 2);
    }

    #[test]
    fn exchange_ids_are_unique() {
        let a = Request::builder(Method::GET, "/").build();
        let b = Request::builder(Method::GET, "/").build();
        assert_ne!(a.id(), b.id());
    }
}
