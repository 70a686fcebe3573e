//! Per-request tagged logging.
//!
//! [`RequestLogger`] computes a list of tags for each request, wraps them in
//! a [`TaggedLogger`] and stores it under [`keys::LOGGER`] so later layers log
//! through the same tagged handle instead of a global.

use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::Instant;

use http::HeaderName;
use tracing::{Level, Span, debug, enabled, info, info_span};

use crate::error::Error;
use crate::request::{Request, keys};
use crate::response::Response;
use crate::stack::Interceptor;

const STARTED_AT: &str = "strata.request_logger.started_at";

// ── Taggers ───────────────────────────────────────────────────────────────────

/// Source of one log tag.
#[derive(Clone)]
pub enum Tagger {
    Method,
    Path,
    /// Client IP, `-` when unknown.
    Ip,
    /// Value of a request header, empty when absent.
    Header(HeaderName),
    /// The exchange id, see [`Request::id`].
    ExchangeId,
    Literal(String),
    Fn(Arc<dyn Fn(&Request) -> String + Send + Sync>),
}

impl Tagger {
    pub fn func(f: impl Fn(&Request) -> String + Send + Sync + 'static) -> Self {
        Self::Fn(Arc::new(f))
    }

    fn tag(&self, req: &Request) -> String {
        match self {
            Self::Method => req.method().to_string(),
            Self::Path => req.path().to_owned(),
            Self::Ip => req.ip(),
            Self::Header(name) => req.header(name.as_str()).unwrap_or_default().to_owned(),
            Self::ExchangeId => req.id().to_string(),
            Self::Literal(text) => text.clone(),
            Self::Fn(f) => f(req),
        }
    }
}

impl fmt::Debug for Tagger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Method => f.write_str("Method"),
            Self::Path => f.write_str("Path"),
            Self::Ip => f.write_str("Ip"),
            Self::Header(name) => f.debug_tuple("Header").field(name).finish(),
            Self::ExchangeId => f.write_str("ExchangeId"),
            Self::Literal(text) => f.debug_tuple("Literal").field(text).finish(),
            Self::Fn(_) => f.write_str("Fn(..)"),
        }
    }
}

impl From<&str> for Tagger {
    fn from(text: &str) -> Self {
        Self::Literal(text.to_owned())
    }
}

/// Tags for `req`, in tagger order.
pub fn compute_tags(taggers: &[Tagger], req: &Request) -> Vec<String> {
    taggers.iter().map(|t| t.tag(req)).collect()
}

// ── TaggedLogger ──────────────────────────────────────────────────────────────

/// A logging handle whose records carry a fixed set of tags.
///
/// Records are emitted inside a `request` span with a `tags` field, so any
/// `tracing` subscriber shows them.
#[derive(Clone, Debug)]
pub struct TaggedLogger {
    span: Span,
    tags: Arc<[String]>,
}

impl TaggedLogger {
    pub fn new(tags: Vec<String>) -> Self {
        let rendered = tags.iter().map(|t| format!("[{t}]")).collect::<Vec<_>>().join(" ");
        let span = info_span!("request", tags = %rendered);
        Self { span, tags: tags.into() }
    }

    /// The logger assigned to `req`, or an untagged one.
    pub fn for_request(req: &Request) -> Self {
        req.env()
            .get::<TaggedLogger>(keys::LOGGER)
            .cloned()
            .unwrap_or_else(|| Self::new(Vec::new()))
    }

    pub fn tags(&self) -> &[String] { &self.tags }
    pub fn span(&self) -> &Span { &self.span }

    /// Runs `f` with this logger's tags applied to everything it logs.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        self.span.in_scope(f)
    }

    pub fn info(&self, message: impl Display) {
        self.in_scope(|| info!("{message}"));
    }

    pub fn debug(&self, message: impl Display) {
        self.in_scope(|| debug!("{message}"));
    }

    /// Like [`info`](Self::info), building the message only if it will be
    /// recorded.
    pub fn info_lazy<M: Display>(&self, message: impl FnOnce() -> M) {
        if enabled!(Level::INFO) {
            self.info(message());
        }
    }

    pub fn debug_lazy<M: Display>(&self, message: impl FnOnce() -> M) {
        if enabled!(Level::DEBUG) {
            self.debug(message());
        }
    }
}

// ── RequestLogger ─────────────────────────────────────────────────────────────

/// Assigns a [`TaggedLogger`] to every exchange and logs its start and end.
///
/// ```text
/// Started GET "/users/7" for 10.0.0.3
/// Completed 200 OK in 3ms
/// ```
#[derive(Debug, Default)]
pub struct RequestLogger {
    taggers: Vec<Tagger>,
}

impl RequestLogger {
    pub fn new(taggers: Vec<Tagger>) -> Self {
        Self { taggers }
    }

    pub fn tag(mut self, tagger: impl Into<Tagger>) -> Self {
        self.taggers.push(tagger.into());
        self
    }
}

impl Interceptor for RequestLogger {
    fn on_start(&self, req: &mut Request, _res: &mut Response) -> Result<(), Error> {
        let logger = TaggedLogger::new(compute_tags(&self.taggers, req));
        logger.info_lazy(|| format!("Started {} \"{}\" for {}", req.method(), req.path(), req.ip()));

        req.env_mut().insert(keys::LOGGER, logger);
        req.env_mut().insert(STARTED_AT, Instant::now());
        Ok(())
    }

    fn on_finish(&self, req: &mut Request, res: &mut Response) -> Result<(), Error> {
        let elapsed = req.env().get::<Instant>(STARTED_AT).map(Instant::elapsed).unwrap_or_default();
        TaggedLogger::for_request(req)
            .info_lazy(|| format!("Completed {} in {}ms", res.status_code(), elapsed.as_millis()));
        Ok(())
    }
}
