//! Static error pages.
//!
//! [`PublicExceptions`] renders the error page for the status found in the
//! request's path-info (`/404` → 404). HTML clients get
//! `<public>/<status>.<locale>.html`, falling back to `<public>/<status>.html`.
//! Clients preferring JSON or XML get a generated `{status, error}` document.
//! When no page exists the answer is `404` + `X-Cascade: pass`.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderName, HeaderValue, StatusCode};
use serde::Serialize;

use super::show_exceptions::X_CASCADE;
use crate::error::Error;
use crate::handler::{BoxFuture, Endpoint};
use crate::mime::Format;
use crate::request::{Request, keys};
use crate::response::Response;

/// A rendered page: status, headers, body.
#[derive(Debug)]
pub struct Rendered {
    pub status: StatusCode,
    pub headers: Vec<(HeaderName, HeaderValue)>,
    pub body: Bytes,
}

/// The generic error document offered to non-HTML clients.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: u16,
    pub error: &'static str,
}

impl ErrorBody {
    /// Builds the document for `status`. Statuses without a reason phrase
    /// borrow the 500 one.
    pub fn new(status: StatusCode) -> Self {
        let error = status
            .canonical_reason()
            .or(StatusCode::INTERNAL_SERVER_ERROR.canonical_reason())
            .unwrap_or_default();
        Self { status: status.as_u16(), error }
    }

    /// This document in `format`, if it has a representation for it.
    pub fn to_format(&self, format: &Format) -> Option<String> {
        match format {
            Format::Json => serde_json::to_string(self).ok(),
            Format::Xml => Some(self.to_xml()),
            _ => None,
        }
    }

    fn to_xml(&self) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <hash>\n  <status type=\"integer\">{}</status>\n  <error>{}</error>\n</hash>\n",
            self.status,
            escape_xml(self.error),
        )
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\'', "&apos;")
}

/// Renders error pages from a public directory.
#[derive(Clone, Debug)]
pub struct PublicExceptions {
    public_path: PathBuf,
    locale: Option<String>,
}

impl PublicExceptions {
    pub fn new(public_path: impl Into<PathBuf>) -> Self {
        Self { public_path: public_path.into(), locale: None }
    }

    /// Default locale for `<status>.<locale>.html` lookups. A request's
    /// [`keys::LOCALE`] entry takes precedence.
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn public_path(&self) -> &Path {
        &self.public_path
    }

    /// Produces the page for `status` as negotiated by `format`.
    pub async fn render(
        &self,
        status: StatusCode,
        format: Option<&Format>,
        locale: Option<&str>,
    ) -> Result<Rendered, Error> {
        if let Some(format) = format.filter(|f| **f != Format::Html) {
            if let Some(body) = ErrorBody::new(status).to_format(format) {
                return Ok(render_format(status, format.mime(), body.into()));
            }
        }
        self.render_html(status, locale).await
    }

    async fn render_html(&self, status: StatusCode, locale: Option<&str>) -> Result<Rendered, Error> {
        let code = status.as_u16();
        let mut candidates = Vec::with_capacity(2);
        if let Some(locale) = locale.or(self.locale.as_deref()) {
            candidates.push(self.public_path.join(format!("{code}.{locale}.html")));
        }
        candidates.push(self.public_path.join(format!("{code}.html")));

        for path in candidates {
            if is_file(&path).await {
                let page = tokio::fs::read(&path).await?;
                return Ok(render_format(status, "text/html", page.into()));
            }
        }

        Ok(Rendered {
            status: StatusCode::NOT_FOUND,
            headers: vec![(X_CASCADE, HeaderValue::from_static("pass"))],
            body: Bytes::new(),
        })
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok_and(|m| m.is_file())
}

fn render_format(status: StatusCode, mime: &str, body: Bytes) -> Rendered {
    let mut headers = Vec::with_capacity(2);
    if let Ok(content_type) = HeaderValue::try_from(format!("{mime}; charset=utf-8")) {
        headers.push((CONTENT_TYPE, content_type));
    }
    headers.push((CONTENT_LENGTH, HeaderValue::from(body.len())));
    Rendered { status, headers, body }
}

/// Status encoded in path-info as `/<code>`; anything else is a 500.
fn status_from_path(path_info: &str) -> StatusCode {
    path_info
        .strip_prefix('/')
        .and_then(|code| code.parse::<u16>().ok())
        .filter(|code| (100..=599).contains(code))
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

impl Endpoint for PublicExceptions {
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a mut Response,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            let status = status_from_path(req.path_info());
            let format = req.formats().into_iter().next();
            let locale = req.env().get::<String>(keys::LOCALE).map(String::as_str);

            let page = self.render(status, format.as_ref(), locale).await?;
            res.write_head(page.status, page.headers)?;
            res.write(page.body)
        })
    }
}
