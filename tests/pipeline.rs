use std::fs;
use std::sync::{Arc, Mutex};

use http::header::{CONTENT_TYPE, HeaderValue};
use http::{Method, StatusCode};
use strata::middleware::{
    FAILSAFE_BODY, LocalCache, LocalCacheRegistry, ParamsParser, PublicExceptions, RequestLogger,
    ShowExceptions, Static, request_parameters,
};
use strata::{
    BoxedEndpoint, Builder, Endpoint, Error, Interceptor, Request, Response, Router, endpoint_fn,
};
use tempfile::TempDir;

type Log = Arc<Mutex<Vec<String>>>;

/// Records its hooks and stamps a header on the way out.
struct Trace {
    name: &'static str,
    log: Log,
}

impl Interceptor for Trace {
    fn on_start(&self, _req: &mut Request, _res: &mut Response) -> Result<(), Error> {
        self.log.lock().unwrap().push(format!("{} start", self.name));
        Ok(())
    }

    fn on_finish(&self, _req: &mut Request, res: &mut Response) -> Result<(), Error> {
        self.log.lock().unwrap().push(format!("{} finish", self.name));
        if !res.is_committed() {
            res.set_header(
                http::HeaderName::from_static("x-trace"),
                HeaderValue::from_static(self.name),
            )?;
        }
        Ok(())
    }
}

async fn echo_name(req: &Request) -> Result<String, Error> {
    let name = request_parameters(req)
        .and_then(|p| p.get("name"))
        .and_then(|n| n.as_str())
        .unwrap_or("anonymous");
    Ok(format!("hello {name}"))
}

async fn conflict(_req: &Request) -> Result<Response, Error> {
    Err(Error::app("stale_object", "version 3 is outdated"))
}

async fn explode(_req: &Request) -> Result<Response, Error> {
    panic!("handler exploded")
}

fn public_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("500.html"), "<h1>Something went wrong</h1>").unwrap();
    fs::write(dir.path().join("409.html"), "<h1>Conflict</h1>").unwrap();
    fs::write(dir.path().join("hello.txt"), "static hello").unwrap();
    dir
}

fn build(public: &TempDir, log: &Log, cache: &LocalCacheRegistry) -> BoxedEndpoint {
    let router = Router::new()
        .post("/echo", echo_name)
        .get("/conflict", conflict)
        .get("/explode", explode);

    let pages = PublicExceptions::new(public.path());
    let root = public.path().to_owned();

    Builder::new()
        .wrap(move |app| ShowExceptions::new(app, pages))
        .intercept(RequestLogger::default())
        .intercept(Trace { name: "outer", log: Arc::clone(log) })
        .intercept(LocalCache::new(cache.clone(), "fragments"))
        .intercept(ParamsParser::default())
        .intercept(Trace { name: "inner", log: Arc::clone(log) })
        .wrap(move |app| Static::new(app, root))
        .run(router)
}

async fn exchange(app: &BoxedEndpoint, mut req: Request) -> Response {
    let mut res = Response::default();
    app.call(&mut req, &mut res).await.unwrap();
    res
}

#[tokio::test]
async fn full_stack_success() {
    let public = public_dir();
    let log = Log::default();
    let cache = LocalCacheRegistry::new();
    let app = build(&public, &log, &cache);

    let req = Request::builder(Method::POST, "/echo")
        .header("content-type", "application/json")
        .body(r#"{"name":"ada"}"#)
        .build();
    let res = exchange(&app, req).await;

    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(res.body().to_bytes(), "hello ada");
    assert_eq!(res.header("x-trace"), Some("outer"));
    assert_eq!(*log.lock().unwrap(), ["outer start", "inner start", "inner finish", "outer finish"]);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn static_files_are_served_inside_the_stack() {
    let public = public_dir();
    let app = build(&public, &Log::default(), &LocalCacheRegistry::new());

    let res = exchange(&app, Request::builder(Method::GET, "/hello.txt").build()).await;

    assert_eq!(res.body().to_bytes(), "static hello");
    assert_eq!(res.header(CONTENT_TYPE), Some("text/plain"));
}

#[tokio::test]
async fn application_failures_render_public_pages() {
    let public = public_dir();
    let log = Log::default();
    let app = build(&public, &log, &LocalCacheRegistry::new());

    let res = exchange(&app, Request::builder(Method::GET, "/conflict").build()).await;

    assert_eq!(res.status_code(), StatusCode::CONFLICT);
    assert_eq!(res.body().to_bytes(), "<h1>Conflict</h1>");
    assert_eq!(*log.lock().unwrap(), ["outer start", "inner start", "inner finish", "outer finish"]);
}

#[tokio::test]
async fn panics_and_parse_errors_render_too() {
    let public = public_dir();
    let app = build(&public, &Log::default(), &LocalCacheRegistry::new());

    let res = exchange(&app, Request::builder(Method::GET, "/explode").build()).await;
    assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.body().to_bytes(), "<h1>Something went wrong</h1>");

    let req = Request::builder(Method::POST, "/echo")
        .header("content-type", "application/json")
        .header("accept", "application/json")
        .body("{oops")
        .build();
    let res = exchange(&app, req).await;
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(res.body().to_bytes(), r#"{"status":400,"error":"Bad Request"}"#);
}

#[tokio::test]
async fn unknown_routes_without_page_are_empty_404() {
    let public = public_dir();
    let app = build(&public, &Log::default(), &LocalCacheRegistry::new());

    let res = exchange(&app, Request::builder(Method::GET, "/nowhere").build()).await;

    assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
    assert!(res.body().is_empty());
    assert_eq!(res.header("x-cascade"), None);
}

#[tokio::test]
async fn broken_renderer_always_yields_failsafe() {
    let renderer = endpoint_fn(|req, res| Box::pin(async move {
        res.write_head(StatusCode::OK, [])?;
        match req.path_info() {
            "/404" => Err::<(), _>(Error::app("template_missing", "404.html")),
            _ => panic!("renderer crashed"),
        }
    }));
    let router = Router::new().get("/conflict", conflict).get("/explode", explode);
    let app = Builder::new()
        .wrap(move |app| ShowExceptions::new(app, renderer))
        .intercept(ParamsParser::default())
        .run(router);

    for path in ["/conflict", "/explode", "/missing"] {
        let res = exchange(&app, Request::builder(Method::GET, path).build()).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR, "{path}");
        assert_eq!(res.header(CONTENT_TYPE), Some("text/plain"));
        assert_eq!(res.body().to_bytes(), FAILSAFE_BODY);
    }
}

#[tokio::test]
async fn panicking_parser_still_releases_outer_layers() {
    let public = public_dir();
    let cache = LocalCacheRegistry::new();
    let parser = ParamsParser::default().parser("application/x-crash", |_raw: &[u8]| {
        panic!("parser crashed")
    });
    let router = Router::new().post("/echo", echo_name);
    let pages = PublicExceptions::new(public.path());
    let app = Builder::new()
        .wrap(move |app| ShowExceptions::new(app, pages))
        .intercept(LocalCache::new(cache.clone(), "fragments"))
        .intercept(parser)
        .run(router);

    let req = Request::builder(Method::POST, "/echo")
        .header("content-type", "application/x-crash")
        .body("anything")
        .build();
    let res = exchange(&app, req).await;

    assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.body().to_bytes(), "<h1>Something went wrong</h1>");
    assert!(cache.is_empty());
}

#[tokio::test]
async fn status_is_always_valid() {
    let public = public_dir();
    let app = build(&public, &Log::default(), &LocalCacheRegistry::new());

    for path in ["/conflict", "/explode", "/nowhere", "/hello.txt"] {
        let res = exchange(&app, Request::builder(Method::GET, path).build()).await;
        assert!((100..=599).contains(&res.status_code().as_u16()), "{path}");
    }
}
