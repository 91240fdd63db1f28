//! Serializable form of a route table.
//!
//! [`RouteCompiler::compile`] turns every route into a [`CachedRoute`] whose
//! handler is normalized into a `{type, target, metadata}` triple:
//!
//! | handler                        | `type`            | `target`              |
//! |--------------------------------|-------------------|-----------------------|
//! | `Handler::BoundMethod`         | `array_callable`  | `["Class", "method"]` |
//! | anonymous `FnHandler`          | `closure`         | `null`                |
//! | `Handler::StaticMethod`        | `static_method`   | `"Class::method"`     |
//! | `Handler::Invokable`           | `invokable_class` | `"Class"`             |
//! | named `FnHandler`              | `callable`        | `"name"`              |
//! | malformed static reference     | `unknown`         | `null`                |
//!
//! The inverse operation lives on the router, see
//! [`crate::router::Router::load_compiled`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    fields::FieldSelection,
    handler::{Handler, ParamSpec},
    route::Route,
    router::Router,
};

/// Compiled route table: two sections, `static` and `dynamic`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompiledRoutes {
    /// Static routes keyed by `METHOD:PATH`.
    #[serde(rename = "static")]
    pub static_routes: BTreeMap<String, CachedRoute>,
    /// Dynamic routes per method, in registration order.
    pub dynamic: BTreeMap<String, Vec<CachedRoute>>,
}

impl CompiledRoutes {
    pub fn len(&self) -> usize {
        self.static_routes.len() + self.dynamic.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRoute {
    pub method: String,
    pub path: String,
    /// Anchored pattern source; `None` for static routes.
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub constraints: BTreeMap<String, String>,
    pub handler: CachedHandler,
    #[serde(default)]
    pub middleware: Vec<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub fields: Option<FieldSelection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    ArrayCallable,
    Closure,
    StaticMethod,
    InvokableClass,
    Callable,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedHandler {
    #[serde(rename = "type")]
    pub kind: HandlerKind,
    pub target: Value,
    #[serde(default)]
    pub metadata: HandlerMetadata,
}

/// Diagnostic information only; never read back when restoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerMetadata {
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Vec<ParamSpec>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Outcome of [`RouteCompiler::validate_handlers`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Handlers that cannot be resolved at all.
    pub errors: Vec<String>,
    /// Routes that can be serialized but not faithfully restored.
    pub uncacheable: Vec<String>,
}

impl ValidationReport {
    pub fn is_cacheable(&self) -> bool {
        self.errors.is_empty() && self.uncacheable.is_empty()
    }
}

pub struct RouteCompiler;

impl RouteCompiler {
    pub fn compile(router: &Router) -> CompiledRoutes {
        let static_routes = router
            .static_table()
            .into_iter()
            .map(|route| (route.key(), cache_route(router, route)))
            .collect();

        let dynamic = router
            .dynamic_table()
            .into_iter()
            .map(|(method, routes)| {
                (
                    method.to_string(),
                    routes.iter().map(|r| cache_route(router, r)).collect(),
                )
            })
            .collect();

        CompiledRoutes {
            static_routes,
            dynamic,
        }
    }

    /// Pre-flight check to run before persisting a compiled table.
    pub fn validate_handlers(router: &Router) -> ValidationReport {
        let mut report = ValidationReport::default();

        for route in router.all_routes() {
            let label = format!("{} {}", route.method, route.path);

            match &route.handler {
                Handler::Function(f) => match f.name() {
                    None => report
                        .uncacheable
                        .push(format!("{label}: closure handlers cannot be restored")),
                    Some(name) if !router.container().has(name) => report
                        .errors
                        .push(format!("{label}: function '{name}' is not registered in the container")),
                    Some(_) => {}
                },
                handler => match handler.target() {
                    None => report
                        .errors
                        .push(format!("{label}: malformed handler '{}'", handler.describe())),
                    Some((class, method)) if router.controller_signature(class, method).is_none() => {
                        report
                            .errors
                            .push(format!("{label}: {class} has no method {method}"))
                    }
                    Some(_) => {}
                },
            }

            if route.middlewares().iter().any(|m| m.is_inline()) {
                report
                    .uncacheable
                    .push(format!("{label}: inline middleware cannot be restored"));
            }
        }

        report
    }
}

fn cache_route(router: &Router, route: &Route) -> CachedRoute {
    CachedRoute {
        method: route.method.to_string(),
        path: route.path.clone(),
        pattern: route.pattern().map(|p| p.source().to_string()),
        params: route.param_names().to_vec(),
        constraints: route.constraints(),
        handler: cache_handler(router, &route.handler),
        middleware: route.middlewares().iter().map(ToString::to_string).collect(),
        name: route.name(),
        fields: route.fields(),
    }
}

fn cache_handler(router: &Router, handler: &Handler) -> CachedHandler {
    let description = handler.describe();
    let controller_params = || {
        handler
            .target()
            .and_then(|(class, method)| router.controller_signature(class, method))
    };

    let (kind, target, params, warning) = match handler {
        Handler::BoundMethod { class, method } => (
            HandlerKind::ArrayCallable,
            json!([class, method]),
            controller_params(),
            None,
        ),
        Handler::Function(f) => match f.name() {
            Some(name) => (
                HandlerKind::Callable,
                json!(name),
                Some(f.signature().to_vec()),
                None,
            ),
            None => {
                tracing::warn!(handler = %description, "closure handler compiled, it cannot be restored");
                (
                    HandlerKind::Closure,
                    Value::Null,
                    Some(f.signature().to_vec()),
                    Some("closures cannot be reconstructed from a route cache".to_string()),
                )
            }
        },
        Handler::StaticMethod(s) if handler.target().is_some() => (
            HandlerKind::StaticMethod,
            json!(s),
            controller_params(),
            None,
        ),
        Handler::StaticMethod(_) => (
            HandlerKind::Unknown,
            Value::Null,
            None,
            Some("malformed 'Class::method' reference".to_string()),
        ),
        Handler::Invokable(class) => (
            HandlerKind::InvokableClass,
            json!(class),
            controller_params(),
            None,
        ),
    };

    CachedHandler {
        kind,
        target,
        metadata: HandlerMetadata {
            description,
            params,
            warning,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;

    #[test]
    fn normalizes_handler_shapes() {
        let mut router = Router::new();
        router.get("/a", ("Users", "index")).unwrap();
        router.get("/b", "Users::list").unwrap();
        router.get("/c", "Dashboard").unwrap();
        router.get("/d", handler_fn(|_req, _args| async { Ok("d") })).unwrap();
        router.get("/e", "Users::").unwrap();

        let compiled = RouteCompiler::compile(&router);
        let kind = |key: &str| compiled.static_routes[key].handler.kind;

        assert_eq!(kind("GET:/a"), HandlerKind::ArrayCallable);
        assert_eq!(compiled.static_routes["GET:/a"].handler.target, json!(["Users", "index"]));
        assert_eq!(kind("GET:/b"), HandlerKind::StaticMethod);
        assert_eq!(kind("GET:/c"), HandlerKind::InvokableClass);
        assert_eq!(kind("GET:/d"), HandlerKind::Closure);
        assert!(compiled.static_routes["GET:/d"].handler.metadata.warning.is_some());
        assert_eq!(kind("GET:/e"), HandlerKind::Unknown);
    }

    #[test]
    fn dynamic_routes_keep_pattern_and_order() {
        let mut router = Router::new();
        router.get("/users/me", "Me").unwrap();
        router.get("/users/{id}", "Show").unwrap().constrain("id", r"\d+").unwrap();
        router.get("/{lang}/docs", "Docs").unwrap();

        let compiled = RouteCompiler::compile(&router);
        let get = &compiled.dynamic["GET"];
        assert_eq!(get.len(), 2);
        assert_eq!(get[0].path, "/users/{id}");
        assert_eq!(get[0].pattern.as_deref(), Some(r"^/users/(?P<id>(?:\d+))$"));
        assert_eq!(get[0].params, ["id"]);
        assert_eq!(compiled.len(), 3);
    }

    #[test]
    fn validation_flags_closures_and_missing_controllers() {
        let mut router = Router::new();
        router.get("/x", handler_fn(|_req, _args| async { Ok("x") })).unwrap();
        router.get("/y", ("Missing", "show")).unwrap();

        let report = RouteCompiler::validate_handlers(&router);
        assert!(!report.is_cacheable());
        assert_eq!(report.uncacheable.len(), 1);
        assert_eq!(report.errors, ["GET /y: Missing has no method show"]);
    }
}
