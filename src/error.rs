//! Unified error type.

use std::any::Any;
use std::backtrace::Backtrace;
use std::sync::Arc;

use http::{Method, StatusCode};
use thiserror::Error;

/// Type-erased error carried by application failures and parser errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type flowing through the pipeline.
///
/// Handlers and interceptors return `Result<_, Error>`. Expected failures
/// (a missing route, a malformed body, an application error with a known
/// kind) stay plain data all the way up to
/// [`ShowExceptions`](crate::middleware::ShowExceptions), which maps
/// [`Error::kind`] to an HTTP status. Panics are caught at the pipeline
/// boundaries and turned into [`Error::Panic`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("no route matches {method} {path:?}")]
    Routing { method: Method, path: String },

    #[error("{method} is not allowed for {path:?}")]
    MethodNotAllowed { method: Method, path: String },

    /// A failure that already knows its HTTP status.
    #[error("{status}: {message}")]
    Status { status: StatusCode, message: String },

    #[error("response headers were already written")]
    HeadersCommitted,

    #[error("handler panicked: {message}")]
    Panic { message: String, trace: Arc<Backtrace> },

    /// An application error tagged with a kind name, e.g. `"record_not_found"`.
    #[error("{kind}: {source}")]
    App {
        kind: &'static str,
        #[source]
        source: BoxError,
        trace: Arc<Backtrace>,
    },
}

impl Error {
    /// Wraps an application error under `kind`. The kind is looked up in
    /// [`Rescues`](crate::middleware::Rescues) to pick a status code.
    pub fn app(kind: &'static str, source: impl Into<BoxError>) -> Self {
        Self::App {
            kind,
            source: source.into(),
            trace: Arc::new(Backtrace::capture()),
        }
    }

    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Status { status, message: message.into() }
    }

    /// Converts a payload caught by `catch_unwind` into an error.
    ///
    /// The backtrace is captured here, where the unwind was caught, not at
    /// the `panic!` site: it shows the catching layer's frames. Install a
    /// panic hook (`std::panic::set_hook`) to record the panic site itself.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_owned()
        };
        Self::Panic { message, trace: Arc::new(Backtrace::capture()) }
    }

    /// Stable name of this failure's kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_)                  => "io",
            Self::Parse(_)               => "parse",
            Self::Routing { .. }         => "routing",
            Self::MethodNotAllowed { .. } => "method_not_allowed",
            Self::Status { .. }          => "status",
            Self::HeadersCommitted       => "headers_committed",
            Self::Panic { .. }           => "panic",
            Self::App { kind, .. }       => *kind,
        }
    }

    /// The backtrace captured when the error was built, if any.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            Self::Panic { trace, .. } | Self::App { trace, .. } => Some(trace),
            _ => None,
        }
    }
}

/// Raised by [`ParamsParser`](crate::middleware::ParamsParser) when a request
/// body cannot be decoded.
///
/// Carries the decoder's message and the original error, never the payload.
#[derive(Debug, Error)]
#[error("error occurred while parsing request parameters: {message}")]
pub struct ParseError {
    message: String,
    #[source]
    source: BoxError,
}

impl ParseError {
    pub fn new(source: impl Into<BoxError>) -> Self {
        let source = source.into();
        Self { message: source.to_string(), source }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The decoder error this parse failure wraps.
    pub fn original(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.source.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        let routing = Error::Routing { method: Method::GET, path: "/x".into() };
        assert_eq!(routing.kind(), "routing");
        assert_eq!(Error::app("record_not_found", "missing").kind(), "record_not_found");
        assert_eq!(Error::HeadersCommitted.kind(), "headers_committed");
    }

    #[test]
    fn panic_payloads_become_messages() {
        let err = Error::from_panic(Box::new("boom"));
        assert_eq!(err.to_string(), "handler panicked: boom");

        let err = Error::from_panic(Box::new(String::from("owned boom")));
        assert!(err.to_string().contains("owned boom"));

        let err = Error::from_panic(Box::new(42_u8));
        assert!(err.to_string().contains("non-string"));
    }

    #[test]
    fn panics_carry_a_backtrace_handle() {
        let err = Error::from_panic(Box::new("boom"));
        assert!(err.backtrace().is_some());
        assert_eq!(err.kind(), "panic");
    }

    #[test]
    fn parse_error_keeps_source() {
        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: Error = ParseError::new(json).into();
        assert_eq!(err.kind(), "parse");
        assert!(std::error::Error::source(&err).is_some());
    }
}
