//! Endpoints, route handlers, and type erasure.
//!
//! # Two kinds of callables
//!
//! An [`Endpoint`] is anything that can process one exchange given the
//! request and response by `&mut`: the router, a [`Stack`](crate::Stack), a
//! wrapping middleware such as [`Static`](crate::middleware::Static). The
//! pipeline is built out of endpoints nested inside each other.
//!
//! A route [`Handler`] is what application code writes:
//!
//! ```text
//! async fn show(req: &Request) -> Result<impl IntoResponse, impl Into<Error>>
//! ```
//!
//! The router erases each handler behind `Arc<dyn ErasedHandler>` and merges
//! the returned [`Response`] into the exchange's response.
//!
//! ```text
//! async fn show(req: &Request) -> …        ← user writes this
//!        ↓ router.get("/", show)
//! show.into_boxed_handler()                ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(show))                ← stored as BoxedHandler
//!        ↓
//! handler.call(&req) at request time       ← one vtable dispatch
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Error;
use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// A heap-allocated, type-erased future borrowing from the exchange.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ── Endpoint ──────────────────────────────────────────────────────────────────

/// One layer of the pipeline, or its terminal handler.
///
/// `Ok(())` means the response is ready. `Err` hands the failure to the
/// enclosing layer; [`ShowExceptions`](crate::middleware::ShowExceptions)
/// turns it into an error page.
pub trait Endpoint: Send + Sync + 'static {
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a mut Response,
    ) -> BoxFuture<'a, Result<(), Error>>;
}

/// A type-erased endpoint shared across concurrent exchanges.
pub type BoxedEndpoint = Arc<dyn Endpoint>;

impl<E: Endpoint + ?Sized> Endpoint for Arc<E> {
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a mut Response,
    ) -> BoxFuture<'a, Result<(), Error>> {
        (**self).call(req, res)
    }
}

/// Adapts a closure into an [`Endpoint`].
///
/// ```rust
/// use strata::{endpoint_fn, Response};
///
/// let app = endpoint_fn(|_req, res| Box::pin(async move {
///     res.merge(Response::text("hello"))
/// }));
/// ```
pub fn endpoint_fn<F>(f: F) -> FnEndpoint<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response) -> BoxFuture<'a, Result<(), Error>>
        + Send
        + Sync
        + 'static,
{
    FnEndpoint(f)
}

/// Endpoint returned by [`endpoint_fn`].
pub struct FnEndpoint<F>(F);

impl<F> Endpoint for FnEndpoint<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response) -> BoxFuture<'a, Result<(), Error>>
        + Send
        + Sync
        + 'static,
{
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a mut Response,
    ) -> BoxFuture<'a, Result<(), Error>> {
        (self.0)(req, res)
    }
}

// ── Route handlers ────────────────────────────────────────────────────────────

/// Internal dispatch interface for route handlers.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call<'a>(&'a self, req: &'a Request) -> BoxFuture<'a, Result<Response, Error>>;
}

#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

/// Ties an async function's future to the lifetime of the borrowed request.
///
/// Blanket-implemented for every `async fn(&Request) -> Result<R, E>`;
/// [`Handler`] requires it for all lifetimes at once.
#[doc(hidden)]
pub trait HandlerFn<'a>: Send + Sync + 'static {
    type Output: IntoResponse;
    type Failure: Into<Error>;
    type Future: Future<Output = Result<Self::Output, Self::Failure>> + Send + 'a;

    fn invoke(&self, req: &'a Request) -> Self::Future;
}

impl<'a, F, Fut, R, E> HandlerFn<'a> for F
where
    F: Fn(&'a Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'a,
    R: IntoResponse,
    E: Into<Error>,
{
    type Output = R;
    type Failure = E;
    type Future = Fut;

    fn invoke(&self, req: &'a Request) -> Fut {
        self(req)
    }
}

/// Implemented for every valid route handler.
///
/// You never implement this yourself; it is satisfied by any
///
/// ```text
/// async fn name(req: &Request) -> Result<impl IntoResponse, impl Into<Error>>
/// ```
///
/// The trait is **sealed** so only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F> private::Sealed for F where F: for<'a> HandlerFn<'a> {}

impl<F> Handler for F
where
    F: for<'a> HandlerFn<'a>,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Newtype bridging a concrete handler `F` to the trait-object world.
struct FnHandler<F>(F);

impl<F> ErasedHandler for FnHandler<F>
where
    F: for<'a> HandlerFn<'a>,
{
    fn call<'a>(&'a self, req: &'a Request) -> BoxFuture<'a, Result<Response, Error>> {
        let fut = self.0.invoke(req);
        Box::pin(async move {
            fut.await
                .map(IntoResponse::into_response)
                .map_err(Into::into)
        })
    }
}
