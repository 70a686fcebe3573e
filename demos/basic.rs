//! Minimal strata app: JSON endpoints behind the full middleware stack.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/users/42
//!   curl -X POST http://localhost:3000/users \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"alice"}'
//!   curl -X POST http://localhost:3000/users \
//!        -H 'content-type: application/json' -d '{"name":'   # 400 page
//!   curl -H 'accept: application/json' http://localhost:3000/nope
//!   curl http://localhost:3000/                               # public/index.html

use std::sync::Arc;

use http::StatusCode;
use serde_json::json;
use strata::middleware::{
    Interlock, LoadInterlock, ParamsParser, PublicExceptions, RequestLogger, ShowExceptions,
    Static, Tagger, request_parameters,
};
use strata::{Builder, Error, Request, Response, Router, Server};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let router = Router::new()
        .get("/users/{id}",    get_user)
        .post("/users",        create_user)
        .delete("/users/{id}", delete_user);

    let interlock = Arc::new(Interlock::new());

    let app = Builder::new()
        .wrap(|app| ShowExceptions::new(app, PublicExceptions::new("public")))
        .intercept(RequestLogger::default().tag(Tagger::ExchangeId).tag(Tagger::Ip))
        .intercept(LoadInterlock::new(Arc::clone(&interlock)))
        .intercept(ParamsParser::default())
        .wrap(|app| Static::new(app, "public").cache_control("public, max-age=3600"))
        .run(router);

    Server::bind("0.0.0.0:3000")
        .serve(app)
        .await
        .expect("server error");
}

// GET /users/{id}
async fn get_user(req: &Request) -> Result<Response, Error> {
    let id = req.param("id").unwrap_or("unknown");
    if id == "0" {
        return Err(Error::app("record_not_found", format!("no user {id}")));
    }
    Ok(Response::json(json!({ "id": id, "name": "alice" }).to_string().into_bytes()))
}

// POST /users
//
// The body was already decoded by ParamsParser; a malformed one never gets
// here, it is rendered as a 400 page.
async fn create_user(req: &Request) -> Result<Response, Error> {
    let name = request_parameters(req)
        .and_then(|params| params.get("name"))
        .and_then(|name| name.as_str())
        .ok_or_else(|| Error::status(StatusCode::UNPROCESSABLE_ENTITY, "name is required"))?;

    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header("location", "/users/99")
        .json(json!({ "id": "99", "name": name }).to_string().into_bytes()))
}

// DELETE /users/{id} → 204 No Content
async fn delete_user(_req: &Request) -> Result<StatusCode, Error> {
    Ok(StatusCode::NO_CONTENT)
}
