//! Radix-tree request router.
//!
//! One tree per HTTP method. O(path-length) lookup against the request's
//! path-info, so rewrites made by outer layers are honoured. The router is
//! the usual terminal endpoint of a pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use matchit::Router as MatchitRouter;

use crate::error::Error;
use crate::handler::{BoxFuture, BoxedHandler, Endpoint, Handler};
use crate::request::Request;
use crate::response::Response;

/// The application router.
///
/// Build it once at startup and hand it to
/// [`Builder::run`](crate::Builder::run) or [`Server::serve`](crate::Server::serve).
/// Unmatched paths fail with [`Error::Routing`]; a path registered only under
/// other methods fails with [`Error::MethodNotAllowed`].
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new() }
    }

    /// Register a handler for a method + path pair. Returns `self` for chaining.
    ///
    /// Path parameters use `{name}` syntax; `req.param("name")` retrieves them:
    ///
    /// ```rust,no_run
    /// # use strata::{Error, Request, Response, Router};
    /// # use http::Method;
    /// # async fn get_user(_: &Request) -> Result<Response, Error> { Ok(Response::text("")) }
    /// # async fn create_user(_: &Request) -> Result<Response, Error> { Ok(Response::text("")) }
    /// Router::new()
    ///     .on(Method::GET,  "/users/{id}", get_user)
    ///     .on(Method::POST, "/users",      create_user);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route pattern or conflicts with one
    /// already registered for `method`.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler.into_boxed_handler())
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::GET, path, handler)
    }

    pub fn post(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::POST, path, handler)
    }

    pub fn delete(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::DELETE, path, handler)
    }

    pub(crate) fn lookup(
        &self,
        method: &Method,
        path: &str,
    ) -> Option<(BoxedHandler, HashMap<String, String>)> {
        let tree = self.routes.get(method)?;
        let matched = tree.at(path).ok()?;
        let handler = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((handler, params))
    }

    fn route_failure(&self, method: &Method, path: &str) -> Error {
        let elsewhere = self.routes.iter()
            .any(|(m, tree)| m != method && tree.at(path).is_ok());
        let (method, path) = (method.clone(), path.to_owned());
        if elsewhere {
            Error::MethodNotAllowed { method, path }
        } else {
            Error::Routing { method, path }
        }
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

impl Endpoint for Router {
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a mut Response,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            // HEAD falls back to the GET route when none is registered.
            let found = self.lookup(req.method(), req.path_info()).or_else(|| {
                if req.is_head() { self.lookup(&Method::GET, req.path_info()) } else { None }
            });
            let Some((handler, params)) = found else {
                return Err(self.route_failure(req.method(), req.path_info()));
            };
            req.params = params;

            let response = handler.call(req).await?;
            res.merge(response)
        })
    }
}
