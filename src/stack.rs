//! Pipeline runner.
//!
//! Two shapes of middleware compose here:
//!
//! - an [`Interceptor`] exposes `on_start` / `on_finish` hooks and never sees
//!   the layer it wraps. Consecutive interceptors are run by one [`Stack`].
//! - a wrapping endpoint (e.g. [`ShowExceptions`](crate::middleware::ShowExceptions),
//!   [`Static`](crate::middleware::Static)) owns the endpoint inside it and
//!   decides whether and how to call it.
//!
//! [`Builder`] takes both in registration order, first registered outermost:
//!
//! ```text
//! Builder::new()
//!     .wrap(|app| ShowExceptions::new(app, pages))   ─┐ outermost
//!     .intercept(RequestLogger::default())            │ ┐ one Stack
//!     .intercept(ParamsParser::default())             │ ┘
//!     .wrap(|app| Static::new(app, "public"))         │
//!     .run(router)                                   ─┘ terminal endpoint
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::warn;

use crate::error::Error;
use crate::handler::{BoxFuture, BoxedEndpoint, Endpoint};
use crate::request::Request;
use crate::response::Response;

// ── Interceptor ───────────────────────────────────────────────────────────────

/// A two-phase pipeline participant.
///
/// `on_start` runs before the inner layers, `on_finish` after them. Both
/// hooks default to doing nothing. Instances are shared by every exchange;
/// per-exchange state belongs in the request's [`Env`](crate::Env) or in a
/// registry keyed by [`Request::id`].
pub trait Interceptor: Send + Sync + 'static {
    fn on_start(&self, _req: &mut Request, _res: &mut Response) -> Result<(), Error> {
        Ok(())
    }

    fn on_finish(&self, _req: &mut Request, _res: &mut Response) -> Result<(), Error> {
        Ok(())
    }
}

impl<I: Interceptor + ?Sized> Interceptor for Arc<I> {
    fn on_start(&self, req: &mut Request, res: &mut Response) -> Result<(), Error> {
        (**self).on_start(req, res)
    }

    fn on_finish(&self, req: &mut Request, res: &mut Response) -> Result<(), Error> {
        (**self).on_finish(req, res)
    }
}

// ── Stack ─────────────────────────────────────────────────────────────────────

/// Runs a list of interceptors around an endpoint.
///
/// For `[a, b, c]` around `app` the order is:
///
/// ```text
/// a.on_start  b.on_start  c.on_start  app  c.on_finish  b.on_finish  a.on_finish
/// ```
///
/// Every interceptor whose `on_start` succeeded gets its `on_finish`, also
/// when an inner layer fails or panics. A failing `on_start` stops the
/// descent: layers below it are never entered and never finished. The first
/// failure is what the stack returns; later `on_finish` failures are logged.
/// A panic in `app` or in a hook is reported as [`Error::Panic`] and
/// treated like any other failure of that layer.
pub struct Stack {
    interceptors: Vec<Arc<dyn Interceptor>>,
    app: BoxedEndpoint,
}

impl Stack {
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>, app: impl Endpoint) -> Self {
        Self { interceptors, app: Arc::new(app) }
    }

    async fn run(&self, req: &mut Request, res: &mut Response) -> Result<(), Error> {
        let mut entered = 0;
        let mut outcome = Ok(());

        for layer in &self.interceptors {
            if let Err(e) = guarded(|| layer.on_start(req, res)) {
                outcome = Err(e);
                break;
            }
            entered += 1;
        }

        if outcome.is_ok() {
            outcome = match AssertUnwindSafe(self.app.call(req, res)).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(Error::from_panic(payload)),
            };
        }

        for layer in self.interceptors[..entered].iter().rev() {
            if let Err(e) = guarded(|| layer.on_finish(req, res)) {
                if outcome.is_ok() {
                    outcome = Err(e);
                } else {
                    warn!(error = %e, "on_finish failed while unwinding");
                }
            }
        }

        outcome
    }
}

/// Runs a hook, turning a panic into [`Error::Panic`].
fn guarded(hook: impl FnOnce() -> Result<(), Error>) -> Result<(), Error> {
    std::panic::catch_unwind(AssertUnwindSafe(hook))
        .unwrap_or_else(|payload| Err(Error::from_panic(payload)))
}

impl Endpoint for Stack {
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a mut Response,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(self.run(req, res))
    }
}

// ── Builder ───────────────────────────────────────────────────────────────────

type WrapFn = Box<dyn FnOnce(BoxedEndpoint) -> BoxedEndpoint + Send>;

enum Layer {
    Intercept(Arc<dyn Interceptor>),
    Wrap(WrapFn),
}

/// Ordered registration of pipeline layers. First registered is outermost.
#[derive(Default)]
pub struct Builder {
    layers: Vec<Layer>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a two-phase interceptor.
    pub fn intercept(mut self, interceptor: impl Interceptor) -> Self {
        self.layers.push(Layer::Intercept(Arc::new(interceptor)));
        self
    }

    /// Appends a wrapping layer. `wrap` receives everything registered after
    /// it (down to the terminal endpoint) and returns the endpoint to use in
    /// its place.
    pub fn wrap<F, E>(mut self, wrap: F) -> Self
    where
        F: FnOnce(BoxedEndpoint) -> E + Send + 'static,
        E: Endpoint,
    {
        self.layers.push(Layer::Wrap(Box::new(move |inner| Arc::new(wrap(inner)))));
        self
    }

    /// Number of registered layers.
    pub fn len(&self) -> usize { self.layers.len() }
    pub fn is_empty(&self) -> bool { self.layers.is_empty() }

    /// Composes every layer around `app`.
    pub fn run(self, app: impl Endpoint) -> BoxedEndpoint {
        let mut app: BoxedEndpoint = Arc::new(app);
        // Interceptors met while walking inside-out, innermost first.
        let mut pending: Vec<Arc<dyn Interceptor>> = Vec::new();

        for layer in self.layers.into_iter().rev() {
            match layer {
                Layer::Intercept(interceptor) => pending.push(interceptor),
                Layer::Wrap(wrap) => {
                    app = wrap(stack(&mut pending, app));
                }
            }
        }
        stack(&mut pending, app)
    }
}

fn stack(pending: &mut Vec<Arc<dyn Interceptor>>, app: BoxedEndpoint) -> BoxedEndpoint {
    if pending.is_empty() {
        return app;
    }
    let mut interceptors = std::mem::take(pending);
    interceptors.reverse();
    Arc::new(Stack { interceptors, app })
}
