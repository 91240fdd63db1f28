//! HTTP route definition and path matching functionality.
//!
//! A [`Route`] couples a method and a path template with a [`Handler`], an ordered
//! middleware list and optional per-parameter constraints. Templates contain
//! `{name}` placeholders; a template without placeholders is *static* and never
//! compiles a pattern, it is matched by plain string equality.
//!
//! # Examples
//!
//! ```rust
//! use http::Method;
//! use signpost::route::Route;
//! use signpost::handler::Handler;
//!
//! let route = Route::new(Method::GET, "/users/{id}/", Handler::method("UserController", "show")).unwrap();
//! route.constrain("id", r"\d+").unwrap();
//!
//! assert_eq!(route.path, "/users/{id}");
//! assert_eq!(route.match_path("/users/42").unwrap()["id"], "42");
//! assert!(route.match_path("/users/abc").is_none());
//! ```

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use http::Method;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;

use crate::{error::RouterError, fields::FieldSelection, handler::Handler, middleware::MiddlewareRef};

/// Constraint used for placeholders without an explicit `where` clause.
pub const DEFAULT_CONSTRAINT: &str = "[^/]+";

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([^{}/]*)\}").expect("placeholder regex"));
static IDENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex"));

static NEXT_ROUTE_ID: AtomicU64 = AtomicU64::new(1);

/// Path parameters extracted by a successful match.
pub type Params = HashMap<String, String>;

/// Pattern compiled for a dynamic route.
#[derive(Debug)]
pub struct CompiledPattern {
    regex: Regex,
}

impl CompiledPattern {
    /// Regex source, anchored at both ends.
    pub fn source(&self) -> &str {
        self.regex.as_str()
    }
}

/// HTTP route with path pattern matching and middleware support.
///
/// Configuration calls (`middleware`, `constrain`, `set_fields`) are meant for the
/// registration phase. After that the route is only read; the compiled pattern is
/// rebuilt from the template and constraints whenever a constraint changes.
pub struct Route {
    id: u64,
    /// Uppercase HTTP method.
    pub method: Method,
    /// Normalized template, e.g. `/users/{id}`.
    pub path: String,
    pub handler: Handler,
    param_names: Vec<String>,
    middlewares: RwLock<Vec<MiddlewareRef>>,
    constraints: RwLock<BTreeMap<String, String>>,
    name: RwLock<Option<String>>,
    fields: RwLock<Option<FieldSelection>>,
    compiled: RwLock<Option<Arc<CompiledPattern>>>,
}

impl Route {
    /// Creates a route, normalizing the template and compiling a pattern when it
    /// contains placeholders.
    pub fn new(method: Method, path: &str, handler: Handler) -> Result<Self, RouterError> {
        let path = normalize_path(path);
        let param_names = parse_param_names(&path)?;

        let route = Self {
            id: NEXT_ROUTE_ID.fetch_add(1, Ordering::Relaxed),
            method: normalize_method(method),
            path,
            handler,
            param_names,
            middlewares: RwLock::new(Vec::new()),
            constraints: RwLock::new(BTreeMap::new()),
            name: RwLock::new(None),
            fields: RwLock::new(None),
            compiled: RwLock::new(None),
        };
        route.recompile()?;
        Ok(route)
    }

    /// Process-unique identity, used to key per-route caches.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// `true` when the template contains no placeholders.
    pub fn is_static(&self) -> bool {
        self.param_names.is_empty()
    }

    /// Placeholder names in template order.
    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    /// `METHOD:PATH` key under which static routes are stored.
    pub fn key(&self) -> String {
        route_key(&self.method, &self.path)
    }

    /// Appends middleware; order of calls is execution order.
    pub fn middleware<I, M>(&self, refs: I) -> &Self
    where
        I: IntoIterator<Item = M>,
        M: Into<MiddlewareRef>,
    {
        self.middlewares
            .write()
            .extend(refs.into_iter().map(Into::into));
        self
    }

    /// Snapshot of the middleware list.
    pub fn middlewares(&self) -> Vec<MiddlewareRef> {
        self.middlewares.read().clone()
    }

    /// Sets the constraint of a single parameter and recompiles the pattern.
    ///
    /// The pattern is validated here, so an invalid constraint fails at
    /// registration rather than on the first request.
    pub fn constrain(&self, param: &str, pattern: &str) -> Result<&Self, RouterError> {
        self.constrain_all([(param, pattern)])
    }

    /// Merges several constraints and recompiles once.
    pub fn constrain_all<I, K, V>(&self, constraints: I) -> Result<&Self, RouterError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut staged = self.constraints.read().clone();
        for (param, pattern) in constraints {
            let (param, pattern) = (param.into(), pattern.into());
            if !self.param_names.contains(&param) {
                return Err(RouterError::InvalidConstraint {
                    reason: format!("route {} declares no parameter '{param}'", self.path),
                    param,
                    pattern,
                });
            }
            validate_constraint(&param, &pattern)?;
            staged.insert(param, pattern);
        }

        let previous = std::mem::replace(&mut *self.constraints.write(), staged);
        if let Err(err) = self.recompile() {
            *self.constraints.write() = previous;
            return Err(err);
        }
        Ok(self)
    }

    pub fn constraints(&self) -> BTreeMap<String, String> {
        self.constraints.read().clone()
    }

    pub fn name(&self) -> Option<String> {
        self.name.read().clone()
    }

    /// Records the route name. Uniqueness is enforced by the owning router,
    /// see [`crate::router::Router::register_name`].
    pub(crate) fn set_name(&self, name: &str) -> Result<(), RouterError> {
        let mut slot = self.name.write();
        if let Some(existing) = slot.as_deref() {
            if existing != name {
                return Err(RouterError::DuplicateName {
                    name: existing.to_string(),
                });
            }
        }
        *slot = Some(name.to_string());
        Ok(())
    }

    pub fn set_fields(&self, selection: FieldSelection) -> &Self {
        *self.fields.write() = Some(selection);
        self
    }

    pub fn fields(&self) -> Option<FieldSelection> {
        self.fields.read().clone()
    }

    /// Compiled pattern, `None` for static routes.
    pub fn pattern(&self) -> Option<Arc<CompiledPattern>> {
        self.compiled.read().clone()
    }

    /// Matches an already normalized path.
    ///
    /// Static routes return an empty map on exact equality. Dynamic routes run the
    /// anchored pattern and return the captured parameters.
    pub fn match_path(&self, path: &str) -> Option<Params> {
        let Some(compiled) = self.pattern() else {
            return (path == self.path).then(Params::new);
        };

        let caps = compiled.regex.captures(path)?;
        Some(
            self.param_names
                .iter()
                .filter_map(|name| caps.name(name).map(|m| (name.clone(), m.as_str().to_string())))
                .collect(),
        )
    }

    /// Builds a URL by substituting every placeholder.
    ///
    /// Values are checked against their constraint and percent-encoded; query pairs,
    /// if any, are appended as an `application/x-www-form-urlencoded` string.
    pub fn generate_url<P, Q, K, V, QK, QV>(&self, params: P, query: Q) -> Result<String, RouterError>
    where
        P: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
        Q: IntoIterator<Item = (QK, QV)>,
        QK: Into<String>,
        QV: ToString,
    {
        let params: HashMap<String, String> = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.to_string()))
            .collect();
        let constraints = self.constraints.read();

        let mut url = String::with_capacity(self.path.len());
        let mut last = 0;
        for caps in PLACEHOLDER.captures_iter(&self.path) {
            let whole = caps.get(0).expect("group 0 always present");
            let name = &caps[1];
            let value = params
                .get(name)
                .ok_or_else(|| RouterError::MissingParameter {
                    param: name.to_string(),
                    path: self.path.clone(),
                })?;

            if let Some(pattern) = constraints.get(name) {
                let anchored = anchored(pattern).map_err(|e| RouterError::InvalidConstraint {
                    param: name.to_string(),
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })?;
                if !anchored.is_match(value) {
                    return Err(RouterError::ConstraintViolation {
                        param: name.to_string(),
                        value: value.clone(),
                        pattern: pattern.clone(),
                    });
                }
            }

            url.push_str(&self.path[last..whole.start()]);
            url.push_str(&urlencoding::encode(value));
            last = whole.end();
        }
        url.push_str(&self.path[last..]);

        let query: Vec<(String, String)> = query
            .into_iter()
            .map(|(k, v)| (k.into(), v.to_string()))
            .collect();
        if !query.is_empty() {
            url.push('?');
            url.push_str(
                &url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(&query)
                    .finish(),
            );
        }

        Ok(url)
    }

    fn recompile(&self) -> Result<(), RouterError> {
        if self.param_names.is_empty() {
            return Ok(());
        }

        let constraints = self.constraints.read();
        let mut source = String::from("^");
        let mut last = 0;
        for caps in PLACEHOLDER.captures_iter(&self.path) {
            let whole = caps.get(0).expect("group 0 always present");
            let name = &caps[1];
            let constraint = constraints
                .get(name)
                .map(String::as_str)
                .unwrap_or(DEFAULT_CONSTRAINT);

            source.push_str(&regex::escape(&self.path[last..whole.start()]));
            source.push_str(&format!("(?P<{name}>(?:{constraint}))"));
            last = whole.end();
        }
        source.push_str(&regex::escape(&self.path[last..]));
        source.push('$');

        let regex = Regex::new(&source).map_err(|e| RouterError::InvalidConstraint {
            param: self.param_names.join(","),
            pattern: source.clone(),
            reason: e.to_string(),
        })?;
        *self.compiled.write() = Some(Arc::new(CompiledPattern { regex }));
        Ok(())
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("handler", &self.handler.describe())
            .field("name", &self.name())
            .finish()
    }
}

/// Collapses a path to `/` followed by its non-empty segments.
///
/// ```rust
/// use signpost::route::normalize_path;
///
/// assert_eq!(normalize_path("users//42/"), "/users/42");
/// assert_eq!(normalize_path(""), "/");
/// ```
pub fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Uppercases extension methods; standard methods are already canonical.
pub fn normalize_method(method: Method) -> Method {
    let upper = method.as_str().to_ascii_uppercase();
    if upper == method.as_str() {
        return method;
    }
    Method::from_bytes(upper.as_bytes()).unwrap_or(method)
}

pub(crate) fn route_key(method: &Method, path: &str) -> String {
    format!("{}:{}", method.as_str(), path)
}

/// `true` when the template declares at least one placeholder.
pub fn has_placeholders(path: &str) -> bool {
    PLACEHOLDER.is_match(path)
}

/// First path segment, used for bucketing dynamic routes.
pub(crate) fn first_segment(path: &str) -> &str {
    path.trim_start_matches('/').split('/').next().unwrap_or_default()
}

fn parse_param_names(path: &str) -> Result<Vec<String>, RouterError> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(path) {
        let name = &caps[1];
        if !IDENT.is_match(name) || names.iter().any(|n| n == name) {
            return Err(RouterError::InvalidParameterName {
                name: name.to_string(),
                path: path.to_string(),
            });
        }
        names.push(name.to_string());
    }
    Ok(names)
}

fn anchored(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})$"))
}

fn validate_constraint(param: &str, pattern: &str) -> Result<(), RouterError> {
    let invalid = |reason: String| RouterError::InvalidConstraint {
        param: param.to_string(),
        pattern: pattern.to_string(),
        reason,
    };

    if pattern.is_empty() {
        return Err(invalid("empty pattern".to_string()));
    }
    // Named groups would collide with the groups generated for placeholders.
    if pattern.contains("(?P<") || pattern.contains("(?<") {
        return Err(invalid("named groups are not allowed".to_string()));
    }
    // Compiled alone so unbalanced groups cannot close the placeholder group.
    Regex::new(pattern).map_err(|e| invalid(e.to_string()))?;
    Ok(())
}

/// Rebuilds a path template from a compiled pattern source.
///
/// Every top-level group of `source` is replaced, in order, by `{name}` taken from
/// `names`; escaped literals are unescaped. Used when restoring cached routes.
pub fn template_from_pattern(source: &str, names: &[String]) -> Result<String, RouterError> {
    let fail = |reason: &str| RouterError::reconstruct(source, reason);

    let body = source
        .strip_prefix('^')
        .and_then(|s| s.strip_suffix('$'))
        .ok_or_else(|| fail("pattern is not anchored"))?;

    let mut template = String::with_capacity(body.len());
    let mut names = names.iter();
    let mut chars = body.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => template.push(chars.next().ok_or_else(|| fail("dangling escape"))?),
            '(' => {
                skip_group(&mut chars).ok_or_else(|| fail("unbalanced group"))?;
                let name = names
                    .next()
                    .ok_or_else(|| fail("more groups than parameter names"))?;
                template.push('{');
                template.push_str(name);
                template.push('}');
            }
            _ => template.push(c),
        }
    }

    if names.next().is_some() {
        return Err(fail("fewer groups than parameter names"));
    }
    Ok(template)
}

/// Consumes characters up to the `)` closing an already opened group.
fn skip_group(chars: &mut std::str::Chars<'_>) -> Option<()> {
    let mut depth = 1usize;
    let mut in_class = false;
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next()?;
            }
            '[' if !in_class => in_class = true,
            ']' if in_class => in_class = false,
            '(' if !in_class => depth += 1,
            ')' if !in_class => {
                depth -= 1;
                if depth == 0 {
                    return Some(());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(path: &str) -> Route {
        Route::new(Method::GET, path, Handler::invokable("Probe")).unwrap()
    }

    #[test]
    fn normalizes_paths() {
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("///"), "/");
        assert_eq!(normalize_path("a/b/"), "/a/b");
        assert_eq!(normalize_path("/a//b"), "/a/b");
    }

    #[test]
    fn static_routes_do_not_compile() {
        let r = route("/health/");
        assert!(r.is_static());
        assert!(r.pattern().is_none());
        assert_eq!(r.match_path("/health"), Some(Params::new()));
        assert_eq!(r.match_path("/health/x"), None);
    }

    #[test]
    fn default_constraint_stops_at_slash() {
        let r = route("/users/{id}/posts/{post_id}");
        let params = r.match_path("/users/7/posts/9").unwrap();
        assert_eq!(params["id"], "7");
        assert_eq!(params["post_id"], "9");
        assert!(r.match_path("/users/7/8/posts/9").is_none());
        assert!(r.match_path("/users/7/posts/9/extra").is_none());
    }

    #[test]
    fn unicode_segments_match() {
        let r = route("/tags/{tag}");
        assert_eq!(r.match_path("/tags/café").unwrap()["tag"], "café");
    }

    #[test]
    fn constraints_recompile() {
        let r = route("/items/{id}");
        r.constrain("id", r"\d+").unwrap();
        assert!(r.match_path("/items/abc").is_none());
        assert_eq!(r.match_path("/items/123").unwrap()["id"], "123");
    }

    #[test]
    fn alternation_stays_inside_the_group() {
        let r = route("/files/{kind}/raw");
        r.constrain("kind", "a|b").unwrap();
        assert!(r.match_path("/files/a/raw").is_some());
        assert!(r.match_path("/files/a").is_none());
        assert!(r.match_path("/files/b/raw").is_some());
    }

    #[test]
    fn unbalanced_constraints_cannot_escape_their_group() {
        let r = route("/items/{id}");
        let err = r.constrain("id", "a)|(b").unwrap_err();
        assert!(matches!(err, RouterError::InvalidConstraint { .. }));
        assert!(r.match_path("/totally/other/b").is_none());
        assert_eq!(r.pattern().unwrap().source(), "^/items/(?P<id>(?:[^/]+))$");
    }

    #[test]
    fn constraints_on_undeclared_parameters_are_rejected() {
        let r = route("/items/{id}");
        let err = r.constrain("idd", r"\d+").unwrap_err();
        assert!(matches!(err, RouterError::InvalidConstraint { ref param, .. } if param == "idd"));
        assert!(r.constraints().is_empty());

        let err = route("/static").constrain("id", r"\d+").unwrap_err();
        assert!(matches!(err, RouterError::InvalidConstraint { .. }));
    }

    #[test]
    fn invalid_constraint_fails_at_registration() {
        let r = route("/items/{id}");
        let err = r.constrain("id", "(unclosed").unwrap_err();
        assert!(matches!(err, RouterError::InvalidConstraint { .. }));
        // The previous pattern is kept.
        assert!(r.match_path("/items/abc").is_some());

        let err = r.constrain("id", "(?P<x>a)").unwrap_err();
        assert!(matches!(err, RouterError::InvalidConstraint { .. }));
    }

    #[test]
    fn rejects_bad_placeholder_names() {
        let err = Route::new(Method::GET, "/a/{1x}", Handler::invokable("P")).unwrap_err();
        assert!(matches!(err, RouterError::InvalidParameterName { .. }));
        let err = Route::new(Method::GET, "/a/{id}/{id}", Handler::invokable("P")).unwrap_err();
        assert!(matches!(err, RouterError::InvalidParameterName { .. }));
    }

    #[test]
    fn literal_regex_characters_are_escaped() {
        let r = route("/v1.0/{name}.json");
        assert_eq!(r.match_path("/v1.0/report.json").unwrap()["name"], "report");
        assert!(r.match_path("/v1x0/report.json").is_none());
    }

    #[test]
    fn generates_urls() {
        let r = route("/users/{id}/files/{file}");
        r.constrain("id", r"\d+").unwrap();

        let url = r
            .generate_url([("id", "42"), ("file", "a b")], [("page", "2")])
            .unwrap();
        assert_eq!(url, "/users/42/files/a%20b?page=2");

        let err = r
            .generate_url([("id", "42")], Vec::<(&str, &str)>::new())
            .unwrap_err();
        assert!(matches!(err, RouterError::MissingParameter { .. }));

        let err = r
            .generate_url([("id", "x"), ("file", "f")], Vec::<(&str, &str)>::new())
            .unwrap_err();
        assert!(matches!(err, RouterError::ConstraintViolation { .. }));
    }

    #[test]
    fn template_round_trips_through_pattern() {
        let r = route("/shop/{category}/item-{id}.html");
        r.constrain("id", r"[0-9]{1,6}(?:-[a-z]+)?").unwrap();
        let source = r.pattern().unwrap().source().to_string();

        let template = template_from_pattern(&source, r.param_names()).unwrap();
        assert_eq!(template, "/shop/{category}/item-{id}.html");

        let err = template_from_pattern(&source, &["only".to_string()]).unwrap_err();
        assert!(matches!(err, RouterError::Reconstruct { .. }));
    }
}
