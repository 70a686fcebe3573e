//! Serving files from a public directory.
//!
//! [`Static`] answers `GET`/`HEAD` requests whose path names a readable
//! regular file under its root, and hands everything else to the endpoint it
//! wraps. The lookup lives in [`FileHandler`], which can also be used on its
//! own.
//!
//! Paths are decoded and normalized before they touch the filesystem. A
//! `..` segment that would climb above the root rejects the path outright,
//! whatever exists on disk.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use http::header::{
    CACHE_CONTROL, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE,
    IF_NONE_MATCH, LAST_MODIFIED, VARY,
};
use http::{HeaderValue, StatusCode};
use httpdate::HttpDate;
use tracing::debug;

use super::show_exceptions::X_CASCADE;
use crate::error::Error;
use crate::handler::{BoxFuture, BoxedEndpoint, Endpoint};
use crate::mime::{self, DEFAULT_MIME};
use crate::request::Request;
use crate::response::Response;

// ── Path helpers ──────────────────────────────────────────────────────────────

/// Percent-decodes a URL path. `None` if the result is not UTF-8.
pub fn unescape_path(path: &str) -> Option<String> {
    urlencoding::decode(path).ok().map(|p| p.into_owned())
}

/// Percent-encodes each segment of a path, keeping the separators.
pub fn escape_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment))
        .collect::<Vec<_>>()
        .join("/")
}

/// Collapses empty, `.` and `..` segments.
///
/// Returns `None` when a `..` would leave the root, or when the path
/// contains a NUL byte or a backslash.
pub fn clean_path_info(path: &str) -> Option<String> {
    if path.contains(['\0', '\\']) {
        return None;
    }

    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            segment => parts.push(segment),
        }
    }

    let clean = parts.join("/");
    Some(if path.starts_with('/') { format!("/{clean}") } else { clean })
}

fn content_type(path: &str) -> &'static str {
    mime::mime_type(path, DEFAULT_MIME)
}

fn gzip_encoding_accepted(req: &Request) -> bool {
    req.accept_encoding().is_some_and(|header| {
        header.split(',').any(|entry| {
            let mut parts = entry.split(';');
            let coding = parts.next().unwrap_or_default().trim();
            let refused = parts.any(|p| {
                p.trim()
                    .strip_prefix("q=")
                    .and_then(|q| q.trim().parse::<f32>().ok())
                    .is_some_and(|q| q == 0.0)
            });
            coding.eq_ignore_ascii_case("gzip") && !refused
        })
    })
}

// ── FileHandler ───────────────────────────────────────────────────────────────

/// Resolves request paths to files under a root directory and serves them.
#[derive(Clone, Debug)]
pub struct FileHandler {
    root: PathBuf,
    cache_control: Option<HeaderValue>,
    index: String,
    extension: String,
}

impl FileHandler {
    /// Serves files under `root`, with `index` as directory index and
    /// `.html` as the default extension.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache_control: None,
            index: "index".to_owned(),
            extension: ".html".to_owned(),
        }
    }

    /// `Cache-Control` value sent with every served file. Invalid header
    /// values are ignored.
    pub fn cache_control(mut self, value: &str) -> Self {
        self.cache_control = HeaderValue::try_from(value).ok();
        self
    }

    /// Name of the directory index file, without extension.
    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.index = index.into();
        self
    }

    /// Extension tried when the exact path does not exist, e.g. `".html"`.
    pub fn default_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Looks up `path` (URL-escaped) under the root.
    ///
    /// Tries the path itself, then with the default extension, then its
    /// directory index. Returns the URL-escaped path of the first readable
    /// regular file. Filesystem errors count as "not found".
    pub async fn matches(&self, path: &str) -> Option<String> {
        let path = clean_path_info(&unescape_path(path)?)?;
        let ext = &self.extension;
        let candidates = [
            path.clone(),
            format!("{path}{ext}"),
            format!("{path}/{}{ext}", self.index),
        ];

        for candidate in candidates {
            if self.is_servable(&candidate).await {
                return Some(escape_path(&candidate));
            }
        }
        None
    }

    /// Serves the file named by the request's path-info, preferring a
    /// precompressed `.gz` sibling when the client accepts gzip.
    ///
    /// Path-info is the same on return as on entry.
    pub async fn serve(&self, req: &mut Request, res: &mut Response) -> Result<(), Error> {
        let path = req.path_info().to_owned();
        let gzip_path = self.gzip_file_path(&path).await;

        if gzip_path.is_some() {
            res.set_header(VARY, HeaderValue::from_static("Accept-Encoding"))?;
        }

        match gzip_path {
            Some(gzip_path) if gzip_encoding_accepted(req) => {
                let scoped = req.scoped_path_info(gzip_path);
                self.send_file(&scoped, res).await?;
                label_gzip(&path, res)?;
            }
            _ => self.send_file(req, res).await?,
        }
        Ok(())
    }

    /// Root-relative filesystem path for an escaped request path.
    fn resolve(&self, escaped: &str) -> Option<PathBuf> {
        let clean = clean_path_info(&unescape_path(escaped)?)?;
        Some(self.root.join(clean.trim_start_matches('/')))
    }

    async fn is_servable(&self, clean: &str) -> bool {
        let full = self.root.join(clean.trim_start_matches('/'));
        match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_file() => tokio::fs::File::open(&full).await.is_ok(),
            _ => false,
        }
    }

    async fn gzip_file_path(&self, path: &str) -> Option<String> {
        if !mime::is_compressible(content_type(path)) {
            return None;
        }
        let gzip_path = format!("{path}.gz");
        let full = self.resolve(&gzip_path)?;
        tokio::fs::metadata(&full)
            .await
            .is_ok_and(|m| m.is_file())
            .then_some(gzip_path)
    }

    /// Writes the file at the request's path-info into `res`, honouring
    /// `If-None-Match`, `If-Modified-Since` and `HEAD`.
    async fn send_file(&self, req: &Request, res: &mut Response) -> Result<(), Error> {
        let Some(full) = self.resolve(req.path_info()) else {
            return not_found(req, res);
        };
        let meta = match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_file() => meta,
            _ => return not_found(req, res),
        };

        // Pre-epoch timestamps are treated as unknown.
        let modified = meta.modified().ok().filter(|t| t.duration_since(UNIX_EPOCH).is_ok());
        let mtime = modified
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs());
        let etag = format!("W/\"{:x}-{:x}\"", meta.len(), mtime);
        let etag = HeaderValue::try_from(etag).map_err(|e| Error::app("static", e))?;
        let last_modified = modified.map(HttpDate::from);

        if let Some(cache_control) = &self.cache_control {
            res.set_header(CACHE_CONTROL, cache_control.clone())?;
        }
        res.set_header(ETAG, etag.clone())?;
        if let Some(date) = last_modified {
            let value = HeaderValue::try_from(date.to_string()).map_err(|e| Error::app("static", e))?;
            res.set_header(LAST_MODIFIED, value)?;
        }

        if not_modified(req, &etag, last_modified) {
            return res.set_status(StatusCode::NOT_MODIFIED);
        }

        res.set_status(StatusCode::OK)?;
        res.set_header(CONTENT_TYPE, HeaderValue::from_static(content_type(req.path_info())))?;
        res.set_header(CONTENT_LENGTH, HeaderValue::from(meta.len()))?;

        if !req.is_head() {
            match tokio::fs::read(&full).await {
                Ok(data) => res.set_body(data)?,
                Err(e) => {
                    debug!(path = %full.display(), error = %e, "file vanished before read");
                    res.remove_header(&ETAG)?;
                    res.remove_header(&LAST_MODIFIED)?;
                    res.remove_header(&CONTENT_LENGTH)?;
                    return not_found(req, res);
                }
            }
        }
        Ok(())
    }
}

/// `If-None-Match` decides when present; `If-Modified-Since` is only
/// consulted without it.
fn not_modified(req: &Request, etag: &HeaderValue, last_modified: Option<HttpDate>) -> bool {
    if req.header(IF_NONE_MATCH.as_str()).is_some() {
        return etag_matches(req, etag);
    }
    let since = req
        .header(IF_MODIFIED_SINCE.as_str())
        .and_then(|value| value.trim().parse::<HttpDate>().ok());
    match (last_modified, since) {
        (Some(modified), Some(since)) => modified <= since,
        _ => false,
    }
}

fn etag_matches(req: &Request, etag: &HeaderValue) -> bool {
    let Some(candidates) = req.header(IF_NONE_MATCH.as_str()) else {
        return false;
    };
    let weak = |tag: &str| tag.trim_start_matches("W/").to_owned();
    let etag = weak(etag.to_str().unwrap_or_default());
    candidates
        .split(',')
        .map(str::trim)
        .any(|c| c == "*" || weak(c) == etag)
}

/// Marks a served `.gz` sibling as the gzip encoding of `original`.
/// Anything but a 200 (a 304, or a 404 for a sibling that vanished) is left
/// as it is.
fn label_gzip(original: &str, res: &mut Response) -> Result<(), Error> {
    if res.status_code() != StatusCode::OK {
        return Ok(());
    }
    res.set_header(CONTENT_ENCODING, HeaderValue::from_static("gzip"))?;
    res.set_header(CONTENT_TYPE, HeaderValue::from_static(content_type(original)))
}

fn not_found(req: &Request, res: &mut Response) -> Result<(), Error> {
    let body = format!("File not found: {}\n", req.path_info());
    res.set_status(StatusCode::NOT_FOUND)?;
    res.set_header(CONTENT_TYPE, HeaderValue::from_static("text/plain"))?;
    res.set_header(X_CASCADE, HeaderValue::from_static("pass"))?;
    res.set_header(CONTENT_LENGTH, HeaderValue::from(body.len()))?;
    res.set_body(body)
}

// ── Static ────────────────────────────────────────────────────────────────────

/// Serves files from a directory, falling back to the wrapped endpoint.
///
/// Only `GET` and `HEAD` are considered. A single trailing slash is ignored,
/// so `/docs/` finds `docs/index.html`. Requests that match no file reach
/// the wrapped endpoint untouched.
pub struct Static {
    app: BoxedEndpoint,
    file_handler: FileHandler,
}

impl Static {
    pub fn new(app: impl Endpoint, root: impl Into<PathBuf>) -> Self {
        Self { app: std::sync::Arc::new(app), file_handler: FileHandler::new(root) }
    }

    pub fn cache_control(mut self, value: &str) -> Self {
        self.file_handler = self.file_handler.cache_control(value);
        self
    }

    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.file_handler = self.file_handler.index(index);
        self
    }

    pub fn file_handler(&self) -> &FileHandler {
        &self.file_handler
    }

    async fn handle(&self, req: &mut Request, res: &mut Response) -> Result<(), Error> {
        if req.is_get() || req.is_head() {
            let path = req.path_info();
            let matched = self.file_handler.matches(path.strip_suffix('/').unwrap_or(path)).await;
            if let Some(matched) = matched {
                let mut scoped = req.scoped_path_info(matched);
                return self.file_handler.serve(&mut scoped, res).await;
            }
        }
        self.app.call(req, res).await
    }
}

impl Endpoint for Static {
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a mut Response,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(self.handle(req, res))
    }
}
