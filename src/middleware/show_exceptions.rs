//! Rendering failures as responses.
//!
//! [`ShowExceptions`] catches every failure from the layers inside it, be it
//! an `Err` or a panic, and asks an exceptions app (usually
//! [`PublicExceptions`](super::PublicExceptions)) to render a page for it.
//!
//! For a failure classified as status `S` it:
//!
//! 1. stores the [`ExceptionWrapper`] under [`keys::EXCEPTION`] and the
//!    current path-info under [`keys::ORIGINAL_PATH`],
//! 2. discards whatever the failed layers wrote to the response,
//! 3. calls the exceptions app with path-info rewritten to `/S`.
//!
//! An exceptions app answering with `X-Cascade: pass` gets an empty `S`
//! response instead. If the exceptions app itself fails, the response
//! becomes the fixed [`FAILSAFE_BODY`] 500.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use tracing::{error, info};

use super::exception_wrapper::{ExceptionWrapper, Rescues};
use crate::error::Error;
use crate::handler::{BoxFuture, BoxedEndpoint, Endpoint};
use crate::request::{Request, keys};
use crate::response::{Body, Response};

/// `X-Cascade`: a layer with nothing to say for this request.
pub const X_CASCADE: HeaderName = HeaderName::from_static("x-cascade");

/// Body of the last-resort response.
pub const FAILSAFE_BODY: &str = "500 Internal Server Error\n\
    If you are the administrator of this website, then please read this web \
    application's log file and/or the web server's log file to find out what \
    went wrong.";

/// The last-resort response: `500`, `text/plain`, [`FAILSAFE_BODY`].
///
/// Built from static data only. It is returned committed so no outer layer
/// can alter it.
pub fn failsafe_response() -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    Response {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        headers,
        body: Body::Full(Bytes::from_static(FAILSAFE_BODY.as_bytes())),
        committed: true,
    }
}

pub(crate) fn is_pass(res: &Response) -> bool {
    res.header(X_CASCADE).is_some_and(|v| v.eq_ignore_ascii_case("pass"))
}

/// Wraps an endpoint and renders its failures through `exceptions_app`.
///
/// When the request's [`keys::SHOW_EXCEPTIONS`] entry is `false`, failures
/// are returned unrendered so an outer layer can handle them.
pub struct ShowExceptions {
    app: BoxedEndpoint,
    exceptions_app: BoxedEndpoint,
    rescues: Rescues,
}

impl ShowExceptions {
    pub fn new(app: impl Endpoint, exceptions_app: impl Endpoint) -> Self {
        Self {
            app: Arc::new(app),
            exceptions_app: Arc::new(exceptions_app),
            rescues: Rescues::default(),
        }
    }

    /// Maps failures of `kind` to `status`.
    pub fn rescue(mut self, kind: &'static str, status: StatusCode) -> Self {
        self.rescues.insert(kind, status);
        self
    }

    async fn handle(&self, req: &mut Request, res: &mut Response) -> Result<(), Error> {
        let error = match AssertUnwindSafe(self.app.call(req, res)).catch_unwind().await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e,
            Err(payload) => Error::from_panic(payload),
        };

        if req.env().get::<bool>(keys::SHOW_EXCEPTIONS) == Some(&false) {
            return Err(error);
        }

        self.render_exception(req, res, error).await;
        Ok(())
    }

    async fn render_exception(&self, req: &mut Request, res: &mut Response, error: Error) {
        let wrapper = ExceptionWrapper::new(&self.rescues, req, error);
        let status = wrapper.status_code();
        info!(
            status = status.as_u16(),
            kind = wrapper.error().kind(),
            error = %wrapper.error(),
            "rendering exception",
        );

        let original_path = req.path_info().to_owned();
        req.env_mut().insert(keys::EXCEPTION, Arc::new(wrapper));
        req.env_mut().insert(keys::ORIGINAL_PATH, original_path);
        res.reset();

        let rendered = {
            let mut scoped = req.scoped_path_info(format!("/{}", status.as_u16()));
            AssertUnwindSafe(self.exceptions_app.call(&mut scoped, res))
                .catch_unwind()
                .await
        };

        match rendered {
            Ok(Ok(())) if is_pass(res) => *res = pass_response(status),
            Ok(Ok(())) => {}
            Ok(Err(e)) => failsafe(res, &e),
            Err(payload) => failsafe(res, &Error::from_panic(payload)),
        }
    }
}

impl Endpoint for ShowExceptions {
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a mut Response,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(self.handle(req, res))
    }
}

fn pass_response(status: StatusCode) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
    Response { status, headers, body: Body::Empty, committed: false }
}

fn failsafe(res: &mut Response, failure: &Error) {
    error!(error = %failure, kind = failure.kind(), "error during failsafe response");
    *res = failsafe_response();
}
