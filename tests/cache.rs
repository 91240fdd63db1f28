mod common;

use std::sync::Arc;

use common::*;
use http::{Method, StatusCode};
use serde_json::json;
use signpost::{
    RouterError,
    cache::{FileRouteCache, RouteCache},
    compiler::{CompiledRoutes, HandlerKind, RouteCompiler},
    config::RouterConfig,
    container::{Container, ServiceContainer},
    fields::FieldSelection,
    handler::{FnHandler, ParamSpec, handler_fn},
    router::{Group, RouteMatch, Router},
};

fn temp_cache() -> FileRouteCache {
    let path = std::env::temp_dir()
        .join("signpost-tests")
        .join(format!("{}.json", uuid::Uuid::new_v4()));
    FileRouteCache::new(path)
}

fn echo_fn() -> FnHandler {
    FnHandler::named("echo_term", |_req, args| async move {
        Ok(json!({ "term": args.str("term")? }))
    })
    .with_params([ParamSpec::str("term")])
}

fn container_with_echo(log: &Log) -> Arc<dyn Container> {
    let container: Arc<ServiceContainer> = container(log);
    container.bind_function(echo_fn());
    container
}

fn build(container: Arc<dyn Container>) -> Router {
    let mut router = Router::new().with_container(container);
    router.get("/health", "Dashboard").unwrap();
    router
        .get("/users/me", ("UserController", "me"))
        .unwrap()
        .name("users.me")
        .unwrap();
    router
        .get("/users/{id}", ("UserController", "show"))
        .unwrap()
        .constrain("id", r"\d+")
        .unwrap()
        .name("users.show")
        .unwrap();
    router
        .group(Group::new().prefix("/admin").middleware(["a"]), |r| {
            r.get("/{section}/items-{page}.html", "UserController::me")?
                .middleware(["role:admin"])
                .constrain("page", "[0-9]{1,3}")?;
            r.get("/search/{term}", echo_fn())?;
            Ok(())
        })
        .unwrap();
    router
        .get("/list", ("UserController", "index"))
        .unwrap()
        .fields(FieldSelection {
            allowed: vec!["id".into()],
            ..Default::default()
        });
    router
}

fn selected(router: &Router, method: Method, path: &str) -> Option<(String, Vec<(String, String)>)> {
    match router.find(&method, path)? {
        RouteMatch::Found { route, params } => {
            let mut params: Vec<_> = params.into_iter().collect();
            params.sort();
            Some((route.path.clone(), params))
        }
        RouteMatch::MethodNotAllowed { .. } => None,
    }
}

const PROBES: &[&str] = &[
    "/health",
    "/users/me",
    "/users/42",
    "/users/abc",
    "/admin/docs/items-12.html",
    "/admin/docs/items-1234.html",
    "/admin/search/rust",
    "/list",
    "/nowhere",
];

#[tokio::test]
async fn file_cache_round_trip_preserves_matching() {
    let log = Log::default();
    let container = container_with_echo(&log);
    let original = build(container.clone());

    let cache = temp_cache();
    assert!(cache.load().unwrap().is_none());
    assert!(cache.save(&original).unwrap());

    let compiled = cache.load().unwrap().unwrap();
    assert_eq!(compiled, RouteCompiler::compile(&original));
    let restored = Router::from_compiled(&compiled, RouterConfig::default(), container).unwrap();

    for path in PROBES {
        assert_eq!(
            selected(&original, Method::GET, path),
            selected(&restored, Method::GET, path),
            "{path}"
        );
    }
    assert_eq!(original.routes(), restored.routes());
    assert_eq!(
        restored.url("users.show", [("id", 7)], Vec::<(&str, &str)>::new()).unwrap(),
        "/users/7"
    );

    let res = restored
        .dispatch(request(Method::GET, "/admin/search/rust"))
        .await
        .unwrap();
    assert_eq!(body_json(res).await, json!({ "term": "rust" }));

    let res = restored.dispatch(request(Method::GET, "/list?fields=id")).await.unwrap();
    assert_eq!(body_json(res).await["users"], json!([{ "id": 1 }, { "id": 2 }]));

    log.lock().clear();
    let res = restored
        .dispatch(request(Method::GET, "/admin/docs/items-3.html"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(*log.lock(), ["a:in", "role(admin):in", "role:out", "a:out"]);

    cache.clear().unwrap();
    assert!(cache.load().unwrap().is_none());
}

#[tokio::test]
async fn closures_are_refused_by_the_cache_and_fail_when_restored() {
    let mut router = Router::new();
    router
        .get("/closure/{id}", handler_fn(|_req, _args| async { Ok("live") }))
        .unwrap();

    let cache = temp_cache();
    assert!(!cache.save(&router).unwrap());
    assert!(!cache.path().exists());

    let compiled = RouteCompiler::compile(&router);
    assert_eq!(compiled.dynamic["GET"][0].handler.kind, HandlerKind::Closure);

    let restored = Router::from_compiled(
        &compiled,
        RouterConfig::default(),
        Arc::new(ServiceContainer::new()),
    )
    .unwrap();
    assert!(matches!(
        restored.find(&Method::GET, "/closure/1"),
        Some(RouteMatch::Found { .. })
    ));
    let err = restored
        .dispatch(request(Method::GET, "/closure/1"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("cannot be reconstructed"));
}

#[tokio::test]
async fn inline_middleware_is_restored_as_a_failing_step() {
    let mut router = Router::new().with_container(container(&Log::default()));
    router.get("/d", "Dashboard").unwrap().middleware([
        signpost::middleware::MiddlewareRef::inline(|req, next: signpost::middleware::Next| async move {
            next.run(req).await
        }),
    ]);

    let report = RouteCompiler::validate_handlers(&router);
    assert_eq!(report.uncacheable.len(), 1);

    let compiled = RouteCompiler::compile(&router);
    assert_eq!(compiled.static_routes["GET:/d"].middleware, ["<inline>"]);
    let restored = Router::from_compiled(
        &compiled,
        RouterConfig::default(),
        router.container().clone(),
    )
    .unwrap();
    assert!(restored.dispatch(request(Method::GET, "/d")).await.is_err());
}

#[test]
fn missing_controllers_fail_the_load() {
    let log = Log::default();
    let container = container_with_echo(&log);
    let compiled = RouteCompiler::compile(&build(container));

    let err = Router::from_compiled(
        &compiled,
        RouterConfig::default(),
        Arc::new(ServiceContainer::new()),
    )
    .unwrap_err();
    assert!(matches!(err, RouterError::Reconstruct { .. }));

    let mut tampered: CompiledRoutes = compiled.clone();
    let entry = &mut tampered.dynamic.get_mut("GET").unwrap()[0];
    entry.pattern = Some(r"^/users/(?P<id>\d+)/(?P<extra>x)$".to_string());
    let err = Router::from_compiled(&tampered, RouterConfig::default(), container_with_echo(&log))
        .unwrap_err();
    assert!(matches!(err, RouterError::Reconstruct { .. }));
}

#[test]
fn compiled_json_uses_static_and_dynamic_sections() {
    let log = Log::default();
    let compiled = RouteCompiler::compile(&build(container_with_echo(&log)));
    let value = serde_json::to_value(&compiled).unwrap();

    assert!(value["static"]["GET:/health"].is_object());
    assert_eq!(value["static"]["GET:/health"]["handler"]["type"], "invokable_class");
    assert_eq!(value["static"]["GET:/users/me"]["handler"]["target"], json!(["UserController", "me"]));
    assert_eq!(value["dynamic"]["GET"][0]["params"], json!(["id"]));
    assert_eq!(value["dynamic"]["GET"][2]["handler"]["type"], "callable");

    let back: CompiledRoutes = serde_json::from_value(value).unwrap();
    assert_eq!(back, compiled);
}
