//! HTTP server and graceful shutdown.
//!
//! The server turns each hyper request into a [`Request`] / [`Response`]
//! pair, seeds the request's [`Env`](crate::Env) from its configuration and
//! runs the application endpoint. Whatever happens inside, the client gets a
//! well-formed answer: a failure or panic that escapes the pipeline becomes
//! the fixed [`failsafe_response`].
//!
//! # Graceful shutdown
//!
//! On SIGTERM or Ctrl-C the server stops accepting connections, lets every
//! in-flight connection finish, then returns from [`Server::serve`].

use std::convert::Infallible;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt;
use http::StatusCode;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Incoming};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::handler::{BoxedEndpoint, Endpoint};
use crate::middleware::{BacktraceCleaner, failsafe_response};
use crate::request::{Request, keys};
use crate::response::Response;

/// Largest request body read by default: 8 MiB.
pub const DEFAULT_MAX_BODY_SIZE: usize = 8 * 1024 * 1024;

/// Per-request settings the server copies into every request's env, and
/// the request body limit.
#[derive(Clone)]
pub struct ServerConfig {
    show_exceptions: bool,
    backtrace_cleaner: Option<Arc<dyn BacktraceCleaner>>,
    locale: Option<String>,
    max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            show_exceptions: true,
            backtrace_cleaner: None,
            locale: None,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    fn seed(&self, req: &mut Request) {
        let env = req.env_mut();
        env.insert(keys::SHOW_EXCEPTIONS, self.show_exceptions);
        if let Some(cleaner) = &self.backtrace_cleaner {
            env.insert(keys::BACKTRACE_CLEANER, Arc::clone(cleaner));
        }
        if let Some(locale) = &self.locale {
            env.insert(keys::LOCALE, locale.clone());
        }
    }
}

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
    config: ServerConfig,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not a valid `host:port` string.
    ///
    /// ```rust,no_run
    /// use strata::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: &str) -> Self {
        let addr: SocketAddr = addr.parse().expect("invalid socket address");
        Self { addr, config: ServerConfig::default() }
    }

    /// Whether [`ShowExceptions`](crate::middleware::ShowExceptions) renders
    /// failures (`true`, the default) or lets them escape to the server.
    pub fn show_exceptions(mut self, show: bool) -> Self {
        self.config.show_exceptions = show;
        self
    }

    /// Filter applied to backtraces of rendered failures.
    pub fn backtrace_cleaner(mut self, cleaner: impl BacktraceCleaner) -> Self {
        self.config.backtrace_cleaner = Some(Arc::new(cleaner));
        self
    }

    /// Locale used to pick localized error pages.
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.config.locale = Some(locale.into());
        self
    }

    /// Request bodies longer than `limit` bytes are answered with
    /// `413 Payload Too Large` before the pipeline runs.
    pub fn max_body_size(mut self, limit: usize) -> Self {
        self.config.max_body_size = limit;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Starts accepting connections and dispatching them through `app`.
    ///
    /// Returns only after a full graceful shutdown (SIGTERM or Ctrl-C,
    /// followed by all in-flight requests completing).
    pub async fn serve(self, app: impl Endpoint) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        let app: BoxedEndpoint = Arc::new(app);
        let config = Arc::new(self.config);

        info!(addr = %self.addr, "strata listening");

        let mut tasks = tokio::task::JoinSet::new();

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Shutdown is checked first so queued connections are not
                // accepted after a signal.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                accepted = listener.accept() => {
                    let (stream, remote_addr) = match accepted {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let app = Arc::clone(&app);
                    let config = Arc::clone(&config);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on the connection.
                        let svc = service_fn(move |req| {
                            let app = Arc::clone(&app);
                            let config = Arc::clone(&config);
                            async move { dispatch(app, config, req, remote_addr).await }
                        });

                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("strata stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Buffers the body, builds the exchange and runs it.
///
/// Never fails: hyper only ever sees a response.
async fn dispatch(
    app: BoxedEndpoint,
    config: Arc<ServerConfig>,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match read_body(body, config.max_body_size).await {
        Ok(body) => body,
        Err(status) => {
            warn!(peer = %remote_addr, status = status.as_u16(), "request body rejected");
            return Ok(Response::status(status).into_inner());
        }
    };

    let mut req = Request::from_parts(parts, body, Some(remote_addr));
    config.seed(&mut req);

    Ok(respond(&app, &mut req).await.into_inner())
}

/// Reads at most `limit` bytes of `body`. A longer body is a 413, a
/// transport failure a 400.
async fn read_body<B>(body: B, limit: usize) -> Result<Bytes, StatusCode>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(StatusCode::PAYLOAD_TOO_LARGE)
        }
        Err(e) => {
            debug!("failed to read request body: {e}");
            Err(StatusCode::BAD_REQUEST)
        }
    }
}

/// Runs `app` for one exchange. Failures and panics that reach this point
/// produce the failsafe response.
pub(crate) async fn respond(app: &BoxedEndpoint, req: &mut Request) -> Response {
    let mut res = Response::default();
    let outcome = match AssertUnwindSafe(app.call(req, &mut res)).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(Error::from_panic(payload)),
    };

    match outcome {
        Ok(()) => res,
        Err(e) => {
            error!(
                method = %req.method(),
                path = req.path(),
                kind = e.kind(),
                error = %e,
                "unhandled failure, sending failsafe response",
            );
            failsafe_response()
        }
    }
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on SIGTERM or SIGINT (Ctrl-C). Only Ctrl-C on non-Unix targets.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::*;
    use crate::handler::endpoint_fn;
    use crate::middleware::FAILSAFE_BODY;

    fn app() -> BoxedEndpoint {
        Arc::new(endpoint_fn(|req, res| Box::pin(async move {
            match req.path_info() {
                "/ok" => res.merge(Response::text("fine")),
                "/err" => Err(Error::app("boom", "escaped")),
                _ => panic!("escaped panic"),
            }
        })))
    }

    #[tokio::test]
    async fn successful_exchange_keeps_response() {
        let mut req = Request::builder(Method::GET, "/ok").build();
        let res = respond(&app(), &mut req).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.body().to_bytes(), "fine");
    }

    #[tokio::test]
    async fn escaped_failures_become_failsafe() {
        for path in ["/err", "/panic"] {
            let mut req = Request::builder(Method::GET, path).build();
            let res = respond(&app(), &mut req).await;
            assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(res.body().to_bytes(), FAILSAFE_BODY);
        }
    }

    #[tokio::test]
    async fn bodies_over_the_limit_are_refused() {
        let body = || Full::new(Bytes::from_static(b"0123456789"));

        assert_eq!(read_body(body(), 16).await.as_deref(), Ok(&b"0123456789"[..]));
        assert_eq!(read_body(body(), 10).await.as_deref(), Ok(&b"0123456789"[..]));
        assert_eq!(read_body(body(), 4).await, Err(StatusCode::PAYLOAD_TOO_LARGE));
    }

    #[test]
    fn body_limit_is_configurable() {
        assert_eq!(Server::bind("127.0.0.1:0").config().max_body_size(), DEFAULT_MAX_BODY_SIZE);
        assert_eq!(Server::bind("127.0.0.1:0").max_body_size(1024).config().max_body_size(), 1024);
    }

    #[test]
    fn config_is_seeded_into_env() {
        let server = Server::bind("127.0.0.1:0")
            .show_exceptions(false)
            .locale("de")
            .backtrace_cleaner(|frames: Vec<String>| frames);
        let mut req = Request::builder(Method::GET, "/").build();

        server.config().seed(&mut req);

        assert_eq!(req.env().get::<bool>(keys::SHOW_EXCEPTIONS), Some(&false));
        assert_eq!(req.env().get::<String>(keys::LOCALE).map(String::as_str), Some("de"));
        assert!(req.env().contains(keys::BACKTRACE_CLEANER));
        assert!(req.env().get::<Arc<dyn BacktraceCleaner>>(keys::BACKTRACE_CLEANER).is_some());
    }
}
