//! # strata
//!
//! A request/response pipeline for hyper services, built from small layers.
//!
//! Each exchange flows through an ordered list of layers around a terminal
//! endpoint (usually a [`Router`]):
//!
//! - **Interceptors** implement [`Interceptor`]: `on_start` on the way in,
//!   `on_finish` on the way out, in reverse order. A [`Stack`] guarantees
//!   every started interceptor is finished, even when an inner layer fails
//!   or panics.
//! - **Wrapping endpoints** own the layer inside them and decide whether to
//!   call it: [`ShowExceptions`](middleware::ShowExceptions) renders failures
//!   as error pages, [`Static`](middleware::Static) answers with files from
//!   disk and falls through otherwise.
//!
//! Layers talk to each other through the request's typed [`Env`], under the
//! names in [`keys`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use strata::middleware::{ParamsParser, PublicExceptions, RequestLogger, ShowExceptions, Static};
//! use strata::{Builder, Error, Request, Response, Router, Server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let router = Router::new()
//!         .get("/users/{id}", get_user)
//!         .post("/users",     create_user);
//!
//!     let app = Builder::new()
//!         .wrap(|app| ShowExceptions::new(app, PublicExceptions::new("public")))
//!         .intercept(RequestLogger::default())
//!         .intercept(ParamsParser::default())
//!         .wrap(|app| Static::new(app, "public"))
//!         .run(router);
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await.unwrap();
//! }
//!
//! async fn get_user(req: &Request) -> Result<Response, Error> {
//!     let id = req.param("id").unwrap_or("unknown");
//!     Ok(Response::json(format!(r#"{{"id":"{id}"}}"#).into_bytes()))
//! }
//!
//! async fn create_user(req: &Request) -> Result<Response, Error> {
//!     if req.body().is_empty() {
//!         return Err(Error::app("bad_request", "empty body"));
//!     }
//!     Ok(Response::builder()
//!         .status(http::StatusCode::CREATED)
//!         .header("location", "/users/99")
//!         .no_body())
//! }
//! ```

mod error;
mod handler;
mod request;
mod response;
mod router;
mod server;
mod stack;

pub mod middleware;
pub mod mime;

pub use error::{BoxError, Error, ParseError};
pub use handler::{BoxFuture, BoxedEndpoint, Endpoint, FnEndpoint, Handler, endpoint_fn};
pub use request::{Env, PathInfoGuard, Request, RequestBuilder, keys};
pub use response::{Body, ContentType, IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use server::{DEFAULT_MAX_BODY_SIZE, Server, ServerConfig};
pub use stack::{Builder, Interceptor, Stack};
