//! Request routing, middleware pipelines and handler invocation.
//!
//! The [`Router`] owns three route indexes:
//!
//! - a static table keyed by `METHOD:PATH`, for templates without placeholders;
//! - a dynamic table holding, per method, the placeholder routes in registration order;
//! - buckets over the dynamic table, keyed by method and literal first path segment,
//!   with a wildcard bucket for templates whose first segment is itself a parameter.
//!
//! Matching tries the static table first, then the literal bucket of the request's
//! first segment, then the wildcard bucket. The first route whose pattern matches
//! wins; routes are never re-sorted, so within a bucket the more specific template
//! has to be registered first.
//!
//! # Examples
//!
//! ```rust
//! use signpost::{handler::handler_fn, router::Router};
//! use serde_json::json;
//!
//! # fn main() -> Result<(), signpost::error::RouterError> {
//! let mut router = Router::new();
//! router.get("/ping", handler_fn(|_req, _args| async { Ok(json!({ "ok": true })) }))?;
//! router
//!     .get("/users/{id}", ("UserController", "show"))?
//!     .constrain("id", r"\d+")?
//!     .name("users.show")?;
//!
//! assert_eq!(router.url("users.show", [("id", 42)], Vec::<(&str, &str)>::new())?, "/users/42");
//! # Ok(())
//! # }
//! ```

use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    ops::{Deref, DerefMut},
    sync::Arc,
};

use http::{
    Method, StatusCode,
    header::{ALLOW, ORIGIN},
};
use scc::HashMap as SccHashMap;
use serde::Serialize;
use serde_json::json;

use crate::{
    body::Body,
    compiler::{CachedHandler, CachedRoute, CompiledRoutes, HandlerKind},
    config::{RouterConfig, VersionStrategy},
    container::{Container, Instance, ServiceContainer},
    cors::{CorsPolicy, joined},
    error::RouterError,
    fields::{FieldSelection, FieldSelector},
    handler::{Argument, Arguments, FnHandler, Handler, INVOKE, ParamSpec, ParamType},
    middleware::{
        self, BoxMiddleware, Endpoint, INLINE_MARKER, MiddlewareAdapter, MiddlewareRef, Next,
        ProcessBridge, ProcessMiddleware,
    },
    responder::{Reply, Responder, json},
    route::{
        Params, Route, first_segment, has_placeholders, normalize_method, normalize_path,
        route_key, template_from_pattern,
    },
    types::{Request, Response},
    versioning::negotiation_middleware,
};

/// Bucket for dynamic routes whose first segment is a placeholder. `{*}` can never
/// be a literal segment since it is rejected as a placeholder name.
const WILDCARD_BUCKET: &str = "{*}";

/// Name under which `api_version` groups store their negotiation middleware.
pub const API_VERSION_MIDDLEWARE: &str = "api.version";

/// Path parameters of the matched route, stored in the request extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(pub Params);

/// Outcome of a successful lookup.
#[derive(Debug, Clone)]
pub enum RouteMatch {
    Found { route: Arc<Route>, params: Params },
    /// The path exists, but not for the requested method.
    MethodNotAllowed { allowed: Vec<Method> },
}

/// Attributes of a route group.
#[derive(Debug, Clone, Default)]
pub struct Group {
    prefix: String,
    middleware: Vec<MiddlewareRef>,
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn middleware<I, M>(mut self, refs: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<MiddlewareRef>,
    {
        self.middleware.extend(refs.into_iter().map(Into::into));
        self
    }
}

#[derive(Debug)]
struct GroupFrame {
    prefix: String,
    middleware: Vec<MiddlewareRef>,
    version: Option<String>,
}

/// Keeps a group frame on the stack for the lifetime of the scope. The frame is
/// popped on drop, so a failing or panicking callback leaves the stack balanced.
struct GroupScope<'r> {
    router: &'r mut Router,
}

impl<'r> GroupScope<'r> {
    fn enter(router: &'r mut Router, frame: GroupFrame) -> Self {
        tracing::debug!(prefix = %frame.prefix, depth = router.groups.len() + 1, "enter route group");
        router.groups.push(frame);
        Self { router }
    }
}

impl Drop for GroupScope<'_> {
    fn drop(&mut self) {
        self.router.groups.pop();
    }
}

impl Deref for GroupScope<'_> {
    type Target = Router;

    fn deref(&self) -> &Router {
        self.router
    }
}

impl DerefMut for GroupScope<'_> {
    fn deref_mut(&mut self) -> &mut Router {
        self.router
    }
}

/// Read-only projection of a registered route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteInfo {
    pub method: String,
    pub path: String,
    pub handler: String,
    pub middleware: Vec<String>,
    pub name: Option<String>,
}

/// Fluent configuration of a freshly registered route.
pub struct RouteBuilder<'r> {
    router: &'r mut Router,
    route: Arc<Route>,
}

impl RouteBuilder<'_> {
    /// Appends route-level middleware after the inherited group middleware.
    pub fn middleware<I, M>(self, refs: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<MiddlewareRef>,
    {
        self.route.middleware(refs);
        self.router.pipelines.remove_sync(&self.route.id());
        self
    }

    pub fn constrain(self, param: &str, pattern: &str) -> Result<Self, RouterError> {
        self.route.constrain(param, pattern)?;
        Ok(self)
    }

    pub fn constrain_all<I, K, V>(self, constraints: I) -> Result<Self, RouterError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.route.constrain_all(constraints)?;
        Ok(self)
    }

    /// Names the route and registers the name with the router.
    pub fn name(self, name: &str) -> Result<Self, RouterError> {
        self.router.register_name(name, &self.route)?;
        Ok(self)
    }

    pub fn fields(self, selection: FieldSelection) -> Self {
        self.route.set_fields(selection);
        self
    }

    pub fn route(&self) -> &Arc<Route> {
        &self.route
    }

    pub fn into_route(self) -> Arc<Route> {
        self.route
    }
}

/// The routing engine.
pub struct Router {
    static_routes: HashMap<String, Arc<Route>>,
    dynamic_routes: HashMap<Method, Vec<Arc<Route>>>,
    buckets: HashMap<Method, HashMap<String, Vec<Arc<Route>>>>,
    named: HashMap<String, Arc<Route>>,
    groups: Vec<GroupFrame>,
    container: Arc<dyn Container>,
    adapter: Option<Arc<dyn MiddlewareAdapter>>,
    config: RouterConfig,
    cors: CorsPolicy,
    pipelines: SccHashMap<u64, Arc<[MiddlewareRef]>>,
    signatures: Arc<SccHashMap<String, Arc<[ParamSpec]>>>,
}

impl Default for Router {
    fn default() -> Self {
        Self {
            static_routes: HashMap::new(),
            dynamic_routes: HashMap::new(),
            buckets: HashMap::new(),
            named: HashMap::new(),
            groups: Vec::new(),
            container: Arc::new(ServiceContainer::new()),
            adapter: Some(Arc::new(ProcessBridge)),
            config: RouterConfig::default(),
            cors: CorsPolicy::default(),
            pipelines: SccHashMap::default(),
            signatures: Arc::new(SccHashMap::default()),
        }
    }
}

impl Router {
    /// Creates a router with default configuration and an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a router with the given configuration; CORS origin patterns are
    /// compiled here.
    pub fn with_config(config: RouterConfig) -> Result<Self, RouterError> {
        let cors = CorsPolicy::new(&config.cors)?;
        Ok(Self {
            config,
            cors,
            ..Self::default()
        })
    }

    pub fn with_container(mut self, container: Arc<dyn Container>) -> Self {
        self.container = container;
        self.signatures = Arc::new(SccHashMap::default());
        self
    }

    /// Replaces the adapter used for `process()` middleware; `None` disables bridging.
    pub fn with_adapter(mut self, adapter: Option<Arc<dyn MiddlewareAdapter>>) -> Self {
        self.adapter = adapter;
        self
    }

    pub fn container(&self) -> &Arc<dyn Container> {
        &self.container
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    // Registration

    pub fn get(&mut self, path: &str, handler: impl Into<Handler>) -> Result<RouteBuilder<'_>, RouterError> {
        self.route(Method::GET, path, handler)
    }

    pub fn post(&mut self, path: &str, handler: impl Into<Handler>) -> Result<RouteBuilder<'_>, RouterError> {
        self.route(Method::POST, path, handler)
    }

    pub fn put(&mut self, path: &str, handler: impl Into<Handler>) -> Result<RouteBuilder<'_>, RouterError> {
        self.route(Method::PUT, path, handler)
    }

    pub fn patch(&mut self, path: &str, handler: impl Into<Handler>) -> Result<RouteBuilder<'_>, RouterError> {
        self.route(Method::PATCH, path, handler)
    }

    pub fn delete(&mut self, path: &str, handler: impl Into<Handler>) -> Result<RouteBuilder<'_>, RouterError> {
        self.route(Method::DELETE, path, handler)
    }

    pub fn head(&mut self, path: &str, handler: impl Into<Handler>) -> Result<RouteBuilder<'_>, RouterError> {
        self.route(Method::HEAD, path, handler)
    }

    pub fn options(&mut self, path: &str, handler: impl Into<Handler>) -> Result<RouteBuilder<'_>, RouterError> {
        self.route(Method::OPTIONS, path, handler)
    }

    /// Registers a route for a method given by name, case-insensitively.
    pub fn add(&mut self, method: &str, path: &str, handler: impl Into<Handler>) -> Result<RouteBuilder<'_>, RouterError> {
        let method = Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes()).map_err(|_| {
            RouterError::InvalidMethod {
                method: method.to_string(),
            }
        })?;
        self.route(method, path, handler)
    }

    /// Registers a route under the active group prefixes and middleware.
    pub fn route(&mut self, method: Method, path: &str, handler: impl Into<Handler>) -> Result<RouteBuilder<'_>, RouterError> {
        let full = self.prefixed(path);
        let route = Arc::new(Route::new(method, &full, handler.into())?);
        route.middleware(self.groups.iter().flat_map(|g| g.middleware.iter().cloned()));

        self.insert(route.clone())?;
        tracing::debug!(method = %route.method, path = %route.path, handler = %route.handler.describe(), "route registered");

        Ok(RouteBuilder {
            router: self,
            route,
        })
    }

    /// Registers `name` for `route`. Names are unique and immutable.
    pub fn register_name(&mut self, name: &str, route: &Arc<Route>) -> Result<(), RouterError> {
        if let Some(existing) = self.named.get(name) {
            if !Arc::ptr_eq(existing, route) {
                return Err(RouterError::DuplicateName {
                    name: name.to_string(),
                });
            }
        }
        route.set_name(name)?;
        self.named.insert(name.to_string(), route.clone());
        Ok(())
    }

    /// Runs `routes` with `group`'s prefix and middleware active.
    ///
    /// Nested groups concatenate prefixes and middleware outer to inner.
    pub fn group<F>(&mut self, group: Group, routes: F) -> Result<(), RouterError>
    where
        F: FnOnce(&mut Router) -> Result<(), RouterError>,
    {
        let frame = GroupFrame {
            prefix: group.prefix,
            middleware: group.middleware,
            version: None,
        };
        let mut scope = GroupScope::enter(self, frame);
        routes(&mut *scope)
    }

    /// Group helper for versioned APIs.
    ///
    /// A leading `v` is stripped from `version`. With the URL strategy the prefix
    /// becomes `<api_prefix>/v<version><group prefix>`; other strategies keep the
    /// prefix. A version-negotiation middleware always runs first in the group.
    pub fn api_version<F>(&mut self, version: &str, group: Group, routes: F) -> Result<(), RouterError>
    where
        F: FnOnce(&mut Router) -> Result<(), RouterError>,
    {
        let version = version
            .strip_prefix(['v', 'V'])
            .unwrap_or(version)
            .to_string();
        let versioning = &self.config.versioning;

        let prefix = match versioning.strategy {
            VersionStrategy::UrlPrefix => format!(
                "{}/v{}/{}",
                versioning.api_prefix.trim_end_matches('/'),
                version,
                group.prefix.trim_start_matches('/')
            ),
            _ => group.prefix,
        };

        let mut middleware = vec![MiddlewareRef::Named {
            name: API_VERSION_MIDDLEWARE.to_string(),
            args: std::iter::once(version.clone()).collect(),
        }];
        middleware.extend(group.middleware);

        let frame = GroupFrame {
            prefix,
            middleware,
            version: Some(version),
        };
        let mut scope = GroupScope::enter(self, frame);
        routes(&mut *scope)
    }

    /// Version of the innermost active `api_version` group.
    pub fn current_api_version(&self) -> Option<&str> {
        self.groups.iter().rev().find_map(|g| g.version.as_deref())
    }

    fn prefixed(&self, path: &str) -> String {
        let mut full = String::new();
        for group in &self.groups {
            full.push_str(group.prefix.trim_end_matches('/'));
            full.push('/');
        }
        full.push_str(path);
        normalize_path(&full)
    }

    fn insert(&mut self, route: Arc<Route>) -> Result<(), RouterError> {
        if route.is_static() {
            let key = route.key();
            if self.static_routes.contains_key(&key) {
                return Err(RouterError::DuplicateRoute { key });
            }
            self.static_routes.insert(key, route);
        } else {
            self.dynamic_routes
                .entry(route.method.clone())
                .or_default()
                .push(route.clone());
            self.bucket(route);
        }
        Ok(())
    }

    fn bucket(&mut self, route: Arc<Route>) {
        let segment = first_segment(&route.path);
        let key = if has_placeholders(segment) {
            WILDCARD_BUCKET.to_string()
        } else {
            segment.to_string()
        };
        self.buckets
            .entry(route.method.clone())
            .or_default()
            .entry(key)
            .or_default()
            .push(route);
    }

    fn rebuild_buckets(&mut self) {
        self.buckets.clear();
        let routes: Vec<Arc<Route>> = self.dynamic_routes.values().flatten().cloned().collect();
        for route in routes {
            self.bucket(route);
        }
    }

    // Lookup

    /// Looks up a route for a method and a raw (still encoded) request path.
    pub fn find(&self, method: &Method, raw_path: &str) -> Option<RouteMatch> {
        self.lookup(&normalize_method(method.clone()), &decode_path(raw_path))
    }

    fn lookup(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        if let Some(route) = self.static_routes.get(&route_key(method, path)) {
            tracing::trace!(%method, %path, "static route hit");
            return Some(RouteMatch::Found {
                route: route.clone(),
                params: Params::new(),
            });
        }

        if let Some(buckets) = self.buckets.get(method) {
            let literal = buckets.get(first_segment(path)).into_iter().flatten();
            let wildcard = buckets.get(WILDCARD_BUCKET).into_iter().flatten();
            for route in literal.chain(wildcard) {
                if let Some(params) = route.match_path(path) {
                    tracing::trace!(%method, %path, template = %route.path, "dynamic route hit");
                    return Some(RouteMatch::Found {
                        route: route.clone(),
                        params,
                    });
                }
            }
        }

        let allowed = self.allowed_methods_for(path);
        (!allowed.is_empty()).then_some(RouteMatch::MethodNotAllowed { allowed })
    }

    /// Looks up the route for a request.
    pub fn match_request(&self, req: &Request) -> Option<RouteMatch> {
        self.find(req.method(), req.uri().path())
    }

    /// Methods registered for a raw request path; `GET` implies `HEAD`.
    pub fn allowed_methods(&self, raw_path: &str) -> Vec<Method> {
        self.allowed_methods_for(&decode_path(raw_path))
    }

    fn allowed_methods_for(&self, path: &str) -> Vec<Method> {
        let mut methods: BTreeSet<String> = self
            .static_routes
            .values()
            .filter(|r| r.path == path)
            .map(|r| r.method.to_string())
            .collect();

        for (method, routes) in &self.dynamic_routes {
            if routes.iter().any(|r| r.match_path(path).is_some()) {
                methods.insert(method.to_string());
            }
        }
        if methods.contains("GET") {
            methods.insert("HEAD".to_string());
        }

        methods
            .into_iter()
            .filter_map(|m| Method::from_bytes(m.as_bytes()).ok())
            .collect()
    }

    // Dispatch

    /// Handles a request end to end.
    ///
    /// Missing routes and method mismatches are answered with JSON errors; errors
    /// raised while resolving middleware, handlers or parameters are returned.
    pub async fn dispatch(&self, mut req: Request) -> anyhow::Result<Response> {
        let method = normalize_method(req.method().clone());
        let path = decode_path(req.uri().path());
        let head = method == Method::HEAD;

        let mut matched = self.lookup(&method, &path);

        if method == Method::OPTIONS && !matches!(matched, Some(RouteMatch::Found { .. })) {
            return Ok(self.preflight(&req, &path));
        }

        if head && !matches!(matched, Some(RouteMatch::Found { .. })) {
            *req.method_mut() = Method::GET;
            matched = self.lookup(&Method::GET, &path);
        }

        let (route, params) = match matched {
            Some(RouteMatch::Found { route, params }) => (route, params),
            Some(RouteMatch::MethodNotAllowed { allowed }) => {
                tracing::debug!(%method, %path, "method not allowed");
                return Ok(method_not_allowed(&allowed));
            }
            None => {
                tracing::debug!(%method, %path, "no route");
                return Ok(not_found(&path));
            }
        };

        if let Some(selection) = route.fields() {
            let selector = selection.select(req.uri().query());
            req.extensions_mut().insert(selector);
        }
        req.extensions_mut().insert(PathParams(params));

        let res = self.run(&route, req).await?;
        Ok(if head { without_body(res) } else { res })
    }

    async fn run(&self, route: &Arc<Route>, req: Request) -> anyhow::Result<Response> {
        let middlewares = self
            .pipeline(route)
            .iter()
            .map(|m| self.resolve_middleware(m))
            .collect::<Result<Vec<_>, _>>()?;

        let invoker = Invoker {
            container: self.container.clone(),
            signatures: self.signatures.clone(),
        };
        let handler = route.handler.clone();
        let endpoint: Endpoint = Arc::new(move |req| {
            let invoker = invoker.clone();
            let handler = handler.clone();
            Box::pin(async move { invoker.invoke(&handler, req).await.map(Responder::into_response) })
        });

        Next::new(Arc::from(middlewares), endpoint).run(req).await
    }

    /// Middleware references of a route, memoized per route.
    fn pipeline(&self, route: &Route) -> Arc<[MiddlewareRef]> {
        self.pipelines
            .entry_sync(route.id())
            .or_insert_with(|| Arc::from(route.middlewares()))
            .get()
            .clone()
    }

    fn resolve_middleware(&self, mw: &MiddlewareRef) -> Result<BoxMiddleware, RouterError> {
        let (name, args) = match mw {
            MiddlewareRef::Inline(f) => return Ok(f.clone()),
            MiddlewareRef::Named { name, args } => (name.as_str(), args.as_slice()),
        };

        if name == API_VERSION_MIDDLEWARE {
            let version = args
                .first()
                .cloned()
                .or_else(|| self.config.versioning.default_version.clone())
                .unwrap_or_default();
            return Ok(negotiation_middleware(version, &self.config.versioning));
        }

        let unknown = |reason: String| RouterError::UnknownMiddleware {
            name: name.to_string(),
            reason,
        };
        match self.container.get(name) {
            Some(Instance::Middleware(m)) => Ok(middleware::from_native(m, args)),
            Some(Instance::Process(p)) => self.bridge(name, p),
            Some(other) => Err(unknown(format!("resolved to a {}", other.kind()))),
            None => Err(unknown("not registered in the container".to_string())),
        }
    }

    fn bridge(&self, name: &str, process: Arc<dyn ProcessMiddleware>) -> Result<BoxMiddleware, RouterError> {
        let cfg = &self.config.bridge;
        let adapted = match &self.adapter {
            Some(adapter) if cfg.enabled && cfg.auto_detect => adapter.adapt(name, process),
            _ => None,
        };

        match adapted {
            Some(mw) => Ok(mw),
            None if cfg.throw_on_missing_bridge => Err(RouterError::MissingBridge {
                name: name.to_string(),
            }),
            None => {
                tracing::warn!(middleware = name, "no bridge for process() middleware, skipping it");
                Ok(middleware::pass_through())
            }
        }
    }

    fn preflight(&self, req: &Request, path: &str) -> Response {
        let allowed = self.allowed_methods_for(path);
        if allowed.is_empty() {
            return not_found(path);
        }

        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::NO_CONTENT;
        if let Some(allow) = joined(allowed.iter().map(Method::as_str)) {
            res.headers_mut().insert(ALLOW, allow);
        }
        self.cors
            .apply(res.headers_mut(), req.headers().get(ORIGIN), &allowed);
        res
    }

    // Reverse routing and listing

    /// Builds the URL of a named route.
    pub fn url<P, Q, K, V, QK, QV>(&self, name: &str, params: P, query: Q) -> Result<String, RouterError>
    where
        P: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
        Q: IntoIterator<Item = (QK, QV)>,
        QK: Into<String>,
        QV: ToString,
    {
        self.named
            .get(name)
            .ok_or_else(|| RouterError::UnknownRoute {
                name: name.to_string(),
            })?
            .generate_url(params, query)
    }

    pub fn named_route(&self, name: &str) -> Option<&Arc<Route>> {
        self.named.get(name)
    }

    /// Static routes ordered by key.
    pub(crate) fn static_table(&self) -> Vec<&Arc<Route>> {
        let mut routes: Vec<_> = self.static_routes.values().collect();
        routes.sort_by(|a, b| a.key().cmp(&b.key()));
        routes
    }

    /// Dynamic routes per method, methods ordered by name.
    pub(crate) fn dynamic_table(&self) -> Vec<(&Method, &[Arc<Route>])> {
        let mut table: Vec<_> = self
            .dynamic_routes
            .iter()
            .map(|(m, routes)| (m, routes.as_slice()))
            .collect();
        table.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        table
    }

    pub(crate) fn all_routes(&self) -> impl Iterator<Item = &Arc<Route>> {
        self.static_table()
            .into_iter()
            .chain(self.dynamic_table().into_iter().flat_map(|(_, r)| r.iter()))
    }

    /// Every route, static first, as method, path, handler, middleware and name.
    pub fn routes(&self) -> Vec<RouteInfo> {
        self.all_routes()
            .map(|r| RouteInfo {
                method: r.method.to_string(),
                path: r.path.clone(),
                handler: r.handler.describe(),
                middleware: r.middlewares().iter().map(ToString::to_string).collect(),
                name: r.name(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.static_routes.len() + self.dynamic_routes.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Declared parameters of a controller method, `None` when the controller or
    /// the method cannot be resolved.
    pub(crate) fn controller_signature(&self, class: &str, method: &str) -> Option<Vec<ParamSpec>> {
        match self.container.get(class)? {
            Instance::Controller(c) => c.signature(method),
            _ => None,
        }
    }

    // Cache reconstruction

    /// Builds a router from a compiled route table.
    pub fn from_compiled(
        compiled: &CompiledRoutes,
        config: RouterConfig,
        container: Arc<dyn Container>,
    ) -> Result<Self, RouterError> {
        let mut router = Self::with_config(config)?.with_container(container);
        router.load_compiled(compiled)?;
        Ok(router)
    }

    /// Adds the routes of a compiled table to this router.
    ///
    /// Handlers that point at missing controllers, methods or named functions fail
    /// the whole load. Closure handlers and inline middleware are restored as
    /// placeholders that fail when invoked.
    pub fn load_compiled(&mut self, compiled: &CompiledRoutes) -> Result<(), RouterError> {
        for (key, entry) in &compiled.static_routes {
            let route = self.restore(entry)?;
            if &route.key() != key {
                return Err(RouterError::reconstruct(
                    key.as_str(),
                    format!("entry rebuilds as '{}'", route.key()),
                ));
            }
            self.insert_restored(route, entry)?;
        }

        for (method, entries) in &compiled.dynamic {
            for entry in entries {
                let route = self.restore(entry)?;
                if route.method.as_str() != method {
                    return Err(RouterError::reconstruct(
                        route.path.as_str(),
                        format!("listed under {method} but declared for {}", route.method),
                    ));
                }
                self.insert_restored(route, entry)?;
            }
        }

        self.rebuild_buckets();
        tracing::debug!(routes = self.len(), "route table restored from cache");
        Ok(())
    }

    fn insert_restored(&mut self, route: Arc<Route>, entry: &CachedRoute) -> Result<(), RouterError> {
        self.insert(route.clone())?;
        if let Some(name) = &entry.name {
            self.register_name(name, &route)?;
        }
        Ok(())
    }

    fn restore(&self, entry: &CachedRoute) -> Result<Arc<Route>, RouterError> {
        let label = format!("{} {}", entry.method, entry.path);
        let method = Method::from_bytes(entry.method.as_bytes()).map_err(|_| RouterError::InvalidMethod {
            method: entry.method.clone(),
        })?;

        let template = match &entry.pattern {
            Some(pattern) => template_from_pattern(pattern, &entry.params)?,
            None => entry.path.clone(),
        };

        let handler = self.restore_handler(&entry.handler, &label)?;
        let route = Arc::new(Route::new(method, &template, handler)?);
        route.constrain_all(entry.constraints.iter().map(|(k, v)| (k.clone(), v.clone())))?;

        if let Some(pattern) = &entry.pattern {
            let rebuilt = route.pattern().map(|p| p.source().to_string());
            if rebuilt.as_deref() != Some(pattern.as_str()) {
                return Err(RouterError::reconstruct(label, "pattern does not rebuild identically"));
            }
        }

        route.middleware(entry.middleware.iter().map(|m| {
            if m == INLINE_MARKER {
                MiddlewareRef::Inline(middleware::failing(format!(
                    "inline middleware of route {label} cannot be restored from a route cache"
                )))
            } else {
                MiddlewareRef::parse(m)
            }
        }));
        if let Some(fields) = &entry.fields {
            route.set_fields(fields.clone());
        }
        Ok(route)
    }

    fn restore_handler(&self, cached: &CachedHandler, label: &str) -> Result<Handler, RouterError> {
        let fail = |reason: String| RouterError::reconstruct(label, reason);
        let target_str = || {
            cached
                .target
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| fail(format!("{:?} target is not a string", cached.kind)))
        };

        let handler = match cached.kind {
            HandlerKind::ArrayCallable => {
                let pair: Vec<String> = serde_json::from_value(cached.target.clone())
                    .map_err(|e| fail(format!("bad array_callable target: {e}")))?;
                match pair.as_slice() {
                    [class, method] => Handler::method(class.as_str(), method.as_str()),
                    _ => return Err(fail("array_callable target must be [class, method]".to_string())),
                }
            }
            HandlerKind::StaticMethod => Handler::static_method(target_str()?),
            HandlerKind::InvokableClass => Handler::invokable(target_str()?),
            HandlerKind::Callable => {
                let name = target_str()?;
                match self.container.get(&name) {
                    Some(Instance::Function(f)) => Handler::Function(f),
                    _ => return Err(fail(format!("function '{name}' is not registered in the container"))),
                }
            }
            HandlerKind::Closure => {
                tracing::warn!(route = label, "closure handler restored as a failing placeholder");
                return Ok(Handler::Function(FnHandler::failing(format!(
                    "route {label} was restored from a route cache and its closure handler cannot be reconstructed"
                ))));
            }
            HandlerKind::Unknown => return Err(fail("handler type is unknown".to_string())),
        };

        if let Some((class, method)) = handler.target() {
            if self.controller_signature(class, method).is_none() {
                return Err(fail(format!("{class} has no method {method}")));
            }
        } else if !matches!(handler, Handler::Function(_)) {
            return Err(fail(format!("malformed handler {}", handler.describe())));
        }
        Ok(handler)
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("static_routes", &self.static_routes.len())
            .field("dynamic_routes", &self.dynamic_routes.values().map(Vec::len).sum::<usize>())
            .field("named", &self.named.len())
            .field("config", &self.config)
            .finish()
    }
}

/// Handler invocation with parameter binding, detached from the router so it can
/// live inside the pipeline endpoint.
#[derive(Clone)]
struct Invoker {
    container: Arc<dyn Container>,
    signatures: Arc<SccHashMap<String, Arc<[ParamSpec]>>>,
}

impl Invoker {
    async fn invoke(&self, handler: &Handler, req: Request) -> anyhow::Result<Reply> {
        if let Handler::Function(f) = handler {
            let args = self.bind(handler, f.signature(), &req)?;
            return f.call(req, args).await;
        }

        let (class, method) = handler.target().ok_or_else(|| RouterError::InvalidHandler {
            handler: handler.describe(),
            found: "a malformed 'Class::method' reference".to_string(),
        })?;
        let controller = match self.container.get(class) {
            Some(Instance::Controller(c)) => c,
            Some(other) => {
                return Err(RouterError::InvalidHandler {
                    handler: handler.describe(),
                    found: other.kind().to_string(),
                }
                .into());
            }
            None => {
                return Err(RouterError::MissingService {
                    id: class.to_string(),
                }
                .into());
            }
        };

        let key = handler.identity();
        let signature = match self.signatures.read_sync(&key, |_, sig| sig.clone()) {
            Some(sig) => sig,
            None => {
                let sig: Arc<[ParamSpec]> = controller
                    .signature(method)
                    .ok_or_else(|| RouterError::InvalidHandler {
                        handler: handler.describe(),
                        found: if method == INVOKE {
                            "a controller that is not invokable".to_string()
                        } else {
                            format!("a controller without method '{method}'")
                        },
                    })?
                    .into();
                let _ = self.signatures.insert_sync(key, sig.clone());
                sig
            }
        };

        let args = self.bind(handler, &signature, &req)?;
        controller.call(method, req, args).await
    }

    /// Binds declared parameters: request and framework values first, then the
    /// container, then route parameters cast to the declared scalar, then defaults.
    fn bind(&self, handler: &Handler, signature: &[ParamSpec], req: &Request) -> Result<Arguments, RouterError> {
        let route_params = req.extensions().get::<PathParams>();
        let mut args = Arguments::new();

        for spec in signature {
            let bound = match &spec.ty {
                ParamType::Request => Some(Argument::Request),
                ParamType::Fields => Some(Argument::Fields(
                    req.extensions()
                        .get::<FieldSelector>()
                        .cloned()
                        .unwrap_or_default(),
                )),
                ParamType::Service(id) => self.container.get(id).map(Argument::Service),
                scalar => match route_params.and_then(|p| p.0.get(&spec.name)) {
                    Some(raw) => Some(cast(&spec.name, scalar, raw)?),
                    None => None,
                },
            };

            let arg = match (bound, &spec.default) {
                (Some(arg), _) => arg,
                (None, Some(default)) => Argument::Default(default.clone()),
                (None, None) => {
                    return Err(RouterError::UnresolvableParameter {
                        param: spec.name.clone(),
                        handler: handler.describe(),
                    });
                }
            };
            args.push(spec.name.clone(), arg);
        }
        Ok(args)
    }
}

fn cast(param: &str, ty: &ParamType, raw: &str) -> Result<Argument, RouterError> {
    let fail = || RouterError::ParameterCast {
        param: param.to_string(),
        value: raw.to_string(),
        target: ty.as_str(),
    };

    Ok(match ty {
        ParamType::Int => Argument::Int(raw.parse().map_err(|_| fail())?),
        ParamType::Float => Argument::Float(raw.parse().map_err(|_| fail())?),
        ParamType::Bool => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "on" | "yes" => Argument::Bool(true),
            "0" | "false" | "off" | "no" | "" => Argument::Bool(false),
            _ => return Err(fail()),
        },
        _ => Argument::Str(raw.to_string()),
    })
}

/// Percent-decodes and normalizes a request path. Undecodable input is matched as is.
fn decode_path(raw: &str) -> String {
    match urlencoding::decode(raw) {
        Ok(decoded) => normalize_path(&decoded),
        Err(_) => normalize_path(raw),
    }
}

fn not_found(path: &str) -> Response {
    json(
        StatusCode::NOT_FOUND,
        &json!({
            "error": "Not Found",
            "message": format!("no route matches '{path}'"),
            "status": 404,
        }),
    )
}

fn method_not_allowed(allowed: &[Method]) -> Response {
    let names: Vec<&str> = allowed.iter().map(Method::as_str).collect();
    let mut res = json(
        StatusCode::METHOD_NOT_ALLOWED,
        &json!({
            "error": "Method Not Allowed",
            "allowed": names,
            "status": 405,
        }),
    );
    if let Some(allow) = joined(&names) {
        res.headers_mut().insert(ALLOW, allow);
    }
    res
}

fn without_body(res: Response) -> Response {
    let (parts, _) = res.into_parts();
    Response::from_parts(parts, Body::empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;

    fn ok() -> FnHandler {
        handler_fn(|_req, _args| async { Ok("ok") })
    }

    fn found(router: &Router, method: Method, path: &str) -> Option<(String, Params)> {
        match router.find(&method, path)? {
            RouteMatch::Found { route, params } => Some((route.path.clone(), params)),
            RouteMatch::MethodNotAllowed { .. } => None,
        }
    }

    #[test]
    fn static_and_dynamic_storage() {
        let mut router = Router::new();
        router.get("/health", ok()).unwrap();
        router.get("/users/{id}", ok()).unwrap();
        router.get("/{lang}/about", ok()).unwrap();

        assert_eq!(router.static_routes.len(), 1);
        let get = &router.buckets[&Method::GET];
        assert_eq!(get["users"].len(), 1);
        assert_eq!(get[WILDCARD_BUCKET].len(), 1);

        assert_eq!(found(&router, Method::GET, "/health/").unwrap().1, Params::new());
        assert_eq!(found(&router, Method::GET, "/fr/about").unwrap().1["lang"], "fr");
    }

    #[test]
    fn duplicate_static_route_is_rejected() {
        let mut router = Router::new();
        router.get("/a", ok()).unwrap();
        let err = router.get("/a/", ok()).err().unwrap();
        assert_eq!(err, RouterError::DuplicateRoute { key: "GET:/a".into() });
    }

    #[test]
    fn literal_bucket_precedes_wildcard() {
        let mut router = Router::new();
        router.get("/{page}/me", ok()).unwrap();
        router.get("/users/{id}", ok()).unwrap();
        assert_eq!(found(&router, Method::GET, "/users/me").unwrap().0, "/users/{id}");
    }

    #[test]
    fn groups_nest_and_stay_balanced() {
        let mut router = Router::new();
        router
            .group(Group::new().prefix("/api/").middleware(["a"]), |r| {
                r.group(Group::new().prefix("admin").middleware(["b"]), |r| {
                    r.get("/users", ok())?.middleware(["c"]);
                    Ok(())
                })
            })
            .unwrap();

        let failed = router.group(Group::new().prefix("/broken"), |r| {
            r.get("/x/{1}", ok())?;
            Ok(())
        });
        assert!(failed.is_err());
        assert!(router.groups.is_empty());

        router.get("/outside", ok()).unwrap();
        let info = router.routes();
        let users = info.iter().find(|i| i.path == "/api/admin/users").unwrap();
        assert_eq!(users.middleware, ["a", "b", "c"]);
        let outside = info.iter().find(|i| i.path == "/outside").unwrap();
        assert!(outside.middleware.is_empty());
    }

    #[test]
    fn api_version_prefixes_and_records_version() {
        let mut router = Router::new();
        let mut seen = None;
        router
            .api_version("v2", Group::new().prefix("/users"), |r| {
                seen = r.current_api_version().map(str::to_string);
                r.get("/{id}", ok())?;
                Ok(())
            })
            .unwrap();

        assert_eq!(seen.as_deref(), Some("2"));
        assert_eq!(router.current_api_version(), None);
        let info = &router.routes()[0];
        assert_eq!(info.path, "/api/v2/users/{id}");
        assert_eq!(info.middleware, ["api.version:2"]);
    }

    #[test]
    fn names_are_unique() {
        let mut router = Router::new();
        router.get("/a", ok()).unwrap().name("a").unwrap();
        let err = router.get("/b", ok()).unwrap().name("a").err().unwrap();
        assert_eq!(err, RouterError::DuplicateName { name: "a".into() });
        assert_eq!(router.named_route("a").unwrap().path, "/a");
    }

    #[test]
    fn method_mismatch_reports_allowed_methods() {
        let mut router = Router::new();
        router.post("/submit", ok()).unwrap();
        router.get("/items/{id}", ok()).unwrap();

        match router.find(&Method::GET, "/submit") {
            Some(RouteMatch::MethodNotAllowed { allowed }) => assert_eq!(allowed, [Method::POST]),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(router.allowed_methods("/items/3"), [Method::GET, Method::HEAD]);
        assert!(router.find(&Method::GET, "/nothing").is_none());
    }

    #[test]
    fn request_paths_are_decoded() {
        let mut router = Router::new();
        router.get("/tags/{tag}", ok()).unwrap();
        assert_eq!(found(&router, Method::GET, "/tags/caf%C3%A9").unwrap().1["tag"], "café");
    }

    #[test]
    fn casts_route_parameters() {
        assert!(matches!(cast("id", &ParamType::Int, "42"), Ok(Argument::Int(42))));
        assert!(matches!(cast("on", &ParamType::Bool, "Yes"), Ok(Argument::Bool(true))));
        assert!(matches!(cast("r", &ParamType::Float, "1.5"), Ok(Argument::Float(v)) if v == 1.5));
        assert!(matches!(
            cast("id", &ParamType::Int, "abc"),
            Err(RouterError::ParameterCast { target: "int", .. })
        ));
    }
}
