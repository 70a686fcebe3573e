//! Classifying failures into HTTP statuses.

use std::backtrace::BacktraceStatus;
use std::collections::HashMap;
use std::sync::Arc;

use http::StatusCode;

use crate::error::Error;
use crate::request::{Request, keys};

/// Filters backtrace frames before they are attached to an
/// [`ExceptionWrapper`], e.g. to drop runtime and framework frames.
///
/// Install one per exchange under [`keys::BACKTRACE_CLEANER`] as an
/// `Arc<dyn BacktraceCleaner>`; [`Server::backtrace_cleaner`](crate::Server::backtrace_cleaner)
/// does this for every request.
pub trait BacktraceCleaner: Send + Sync + 'static {
    fn clean(&self, frames: Vec<String>) -> Vec<String>;
}

impl<F> BacktraceCleaner for F
where
    F: Fn(Vec<String>) -> Vec<String> + Send + Sync + 'static,
{
    fn clean(&self, frames: Vec<String>) -> Vec<String> {
        self(frames)
    }
}

// ── Rescues ───────────────────────────────────────────────────────────────────

/// Maps [`Error::kind`] names to response statuses.
///
/// Kinds without an entry map to `500 Internal Server Error`.
/// [`Error::Status`] always uses the status it carries.
#[derive(Clone, Debug)]
pub struct Rescues {
    statuses: HashMap<&'static str, StatusCode>,
}

impl Default for Rescues {
    fn default() -> Self {
        let statuses = HashMap::from([
            ("bad_request",                StatusCode::BAD_REQUEST),
            ("invalid_authenticity_token", StatusCode::UNPROCESSABLE_ENTITY),
            ("method_not_allowed",         StatusCode::METHOD_NOT_ALLOWED),
            ("not_implemented",            StatusCode::NOT_IMPLEMENTED),
            ("parse",                      StatusCode::BAD_REQUEST),
            ("record_not_found",           StatusCode::NOT_FOUND),
            ("routing",                    StatusCode::NOT_FOUND),
            ("stale_object",               StatusCode::CONFLICT),
            ("unknown_format",             StatusCode::NOT_ACCEPTABLE),
        ]);
        Self { statuses }
    }
}

impl Rescues {
    /// Adds or replaces the status for `kind`.
    pub fn insert(&mut self, kind: &'static str, status: StatusCode) {
        self.statuses.insert(kind, status);
    }

    pub fn status_for(&self, error: &Error) -> StatusCode {
        if let Error::Status { status, .. } = error {
            return *status;
        }
        self.statuses
            .get(error.kind())
            .copied()
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

// ── ExceptionWrapper ──────────────────────────────────────────────────────────

/// A caught failure together with its response status and cleaned backtrace.
///
/// Lives for one failed exchange; [`ShowExceptions`](super::ShowExceptions)
/// stores it under [`keys::EXCEPTION`] so the error page can inspect it.
#[derive(Debug)]
pub struct ExceptionWrapper {
    error: Error,
    status: StatusCode,
    backtrace: Vec<String>,
}

impl ExceptionWrapper {
    pub fn new(rescues: &Rescues, req: &Request, error: Error) -> Self {
        let status = rescues.status_for(&error);
        let frames = error
            .backtrace()
            .filter(|bt| bt.status() == BacktraceStatus::Captured)
            .map(|bt| {
                bt.to_string()
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        let backtrace = match req.env().get::<Arc<dyn BacktraceCleaner>>(keys::BACKTRACE_CLEANER) {
            Some(cleaner) => cleaner.clean(frames),
            None => frames,
        };

        Self { error, status, backtrace }
    }

    pub fn error(&self) -> &Error { &self.error }
    pub fn status_code(&self) -> StatusCode { self.status }
    pub fn backtrace(&self) -> &[String] { &self.backtrace }

    pub fn into_error(self) -> Error { self.error }
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::*;

    fn request() -> Request {
        Request::builder(Method::GET, "/").build()
    }

    #[test]
    fn known_kinds_map_to_their_status() {
        let rescues = Rescues::default();
        let routing = Error::Routing { method: Method::GET, path: "/x".into() };
        assert_eq!(rescues.status_for(&routing), StatusCode::NOT_FOUND);
        assert_eq!(rescues.status_for(&Error::app("stale_object", "v2")), StatusCode::CONFLICT);
    }

    #[test]
    fn unknown_kinds_are_internal_errors() {
        let rescues = Rescues::default();
        let err = Error::app("cosmic_ray", "bit flip");
        assert_eq!(rescues.status_for(&err), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn explicit_status_wins_and_table_is_extensible() {
        let mut rescues = Rescues::default();
        let err = Error::status(StatusCode::IM_A_TEAPOT, "short and stout");
        assert_eq!(rescues.status_for(&err), StatusCode::IM_A_TEAPOT);

        rescues.insert("payment_required", StatusCode::PAYMENT_REQUIRED);
        let err = Error::app("payment_required", "card declined");
        assert_eq!(rescues.status_for(&err), StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn backtrace_goes_through_the_cleaner() {
        let mut req = request();
        let cleaner: Arc<dyn BacktraceCleaner> =
            Arc::new(|_frames: Vec<String>| vec!["app/models/user.rs:12".to_owned()]);
        req.env_mut().insert(keys::BACKTRACE_CLEANER, cleaner);

        let wrapper = ExceptionWrapper::new(&Rescues::default(), &req, Error::app("boom", "x"));

        assert_eq!(wrapper.backtrace(), ["app/models/user.rs:12"]);
        assert_eq!(wrapper.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn errors_without_backtrace_have_no_frames() {
        let wrapper = ExceptionWrapper::new(
            &Rescues::default(),
            &request(),
            Error::status(StatusCode::NOT_FOUND, "gone"),
        );
        assert!(wrapper.backtrace().is_empty());
        assert_eq!(wrapper.error().kind(), "status");
    }
}
