//! Handler shapes and parameter binding.
//!
//! A route points at one of four handler shapes, modelled by [`Handler`]:
//!
//! - `BoundMethod`: a controller identifier plus a method name, resolved through the
//!   container at dispatch;
//! - `Function`: a closure or named function wrapped in an [`FnHandler`];
//! - `StaticMethod`: a `"Controller::method"` string;
//! - `Invokable`: a controller identifier invoked through [`INVOKE`].
//!
//! Every shape declares its parameters as a list of [`ParamSpec`]. At dispatch each
//! parameter is bound, in order of preference, from the request itself, from the
//! container, from a route parameter of the same name (cast to the declared scalar
//! type) or from the declared default; the bound values reach the handler as
//! [`Arguments`].

use std::{
    any::Any,
    fmt,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;

use crate::{
    container::Instance,
    fields::FieldSelector,
    responder::Reply,
    types::{BoxFuture, Request},
};

/// Method name used for invokable controllers.
pub const INVOKE: &str = "__invoke";

static NEXT_FN_ID: AtomicU64 = AtomicU64::new(1);

/// Declared type of a handler parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum ParamType {
    /// The request being dispatched.
    Request,
    /// The [`FieldSelector`] resolved for the route.
    Fields,
    /// A container service with the given identifier.
    Service(String),
    Int,
    Float,
    Bool,
    Str,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::Request => "request",
            ParamType::Fields => "fields",
            ParamType::Service(_) => "service",
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::Bool => "bool",
            ParamType::Str => "string",
        }
    }
}

/// One declared handler parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ParamType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty,
            default: None,
        }
    }

    pub fn request(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Request)
    }

    pub fn fields(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Fields)
    }

    pub fn service(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(name, ParamType::Service(id.into()))
    }

    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Int)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Float)
    }

    pub fn bool(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Bool)
    }

    pub fn str(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Str)
    }

    /// Value bound when nothing else resolves the parameter.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn is_optional(&self) -> bool {
        self.default.is_some()
    }
}

/// A bound parameter value.
#[derive(Clone)]
pub enum Argument {
    /// Marker for a `Request` parameter; the request itself is passed alongside.
    Request,
    Fields(FieldSelector),
    Service(Instance),
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    /// A declared default.
    Default(Value),
}

impl fmt::Debug for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Request => f.write_str("Request"),
            Argument::Fields(sel) => f.debug_tuple("Fields").field(sel).finish(),
            Argument::Service(inst) => f.debug_tuple("Service").field(&inst.kind()).finish(),
            Argument::Int(v) => f.debug_tuple("Int").field(v).finish(),
            Argument::Float(v) => f.debug_tuple("Float").field(v).finish(),
            Argument::Bool(v) => f.debug_tuple("Bool").field(v).finish(),
            Argument::Str(v) => f.debug_tuple("Str").field(v).finish(),
            Argument::Default(v) => f.debug_tuple("Default").field(v).finish(),
        }
    }
}

/// Arguments bound for one handler invocation, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    entries: SmallVec<[(String, Argument); 4]>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, name: impl Into<String>, arg: Argument) {
        self.entries.push((name.into(), arg));
    }

    pub fn get(&self, name: &str) -> Option<&Argument> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, a)| a)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn require(&self, name: &str) -> anyhow::Result<&Argument> {
        self.get(name)
            .ok_or_else(|| anyhow!("argument '{name}' was not bound"))
    }

    pub fn int(&self, name: &str) -> anyhow::Result<i64> {
        match self.require(name)? {
            Argument::Int(v) => Ok(*v),
            Argument::Default(v) => v
                .as_i64()
                .ok_or_else(|| anyhow!("argument '{name}' is not an int")),
            other => Err(anyhow!("argument '{name}' is {other:?}, not an int")),
        }
    }

    pub fn float(&self, name: &str) -> anyhow::Result<f64> {
        match self.require(name)? {
            Argument::Float(v) => Ok(*v),
            Argument::Int(v) => Ok(*v as f64),
            Argument::Default(v) => v
                .as_f64()
                .ok_or_else(|| anyhow!("argument '{name}' is not a float")),
            other => Err(anyhow!("argument '{name}' is {other:?}, not a float")),
        }
    }

    pub fn bool(&self, name: &str) -> anyhow::Result<bool> {
        match self.require(name)? {
            Argument::Bool(v) => Ok(*v),
            Argument::Default(v) => v
                .as_bool()
                .ok_or_else(|| anyhow!("argument '{name}' is not a bool")),
            other => Err(anyhow!("argument '{name}' is {other:?}, not a bool")),
        }
    }

    pub fn str(&self, name: &str) -> anyhow::Result<String> {
        match self.require(name)? {
            Argument::Str(v) => Ok(v.clone()),
            Argument::Default(Value::String(v)) => Ok(v.clone()),
            other => Err(anyhow!("argument '{name}' is {other:?}, not a string")),
        }
    }

    /// `None` when the argument resolved to a `null` default.
    pub fn opt_str(&self, name: &str) -> anyhow::Result<Option<String>> {
        match self.require(name)? {
            Argument::Default(Value::Null) => Ok(None),
            _ => self.str(name).map(Some),
        }
    }

    pub fn fields(&self, name: &str) -> anyhow::Result<&FieldSelector> {
        match self.require(name)? {
            Argument::Fields(sel) => Ok(sel),
            other => Err(anyhow!("argument '{name}' is {other:?}, not a field selector")),
        }
    }

    /// Downcasts an injected container value.
    pub fn service<T: Any + Send + Sync>(&self, name: &str) -> anyhow::Result<Arc<T>> {
        match self.require(name)? {
            Argument::Service(Instance::Value(v)) => v.clone().downcast::<T>().map_err(|_| {
                anyhow!(
                    "argument '{name}' is not a {}",
                    std::any::type_name::<T>()
                )
            }),
            other => Err(anyhow!("argument '{name}' is {other:?}, not a service value")),
        }
    }

    /// Raw injected instance (controllers, middleware, functions or values).
    pub fn instance(&self, name: &str) -> anyhow::Result<&Instance> {
        match self.require(name)? {
            Argument::Service(inst) => Ok(inst),
            other => Err(anyhow!("argument '{name}' is {other:?}, not a service")),
        }
    }
}

pub(crate) type HandlerFn =
    dyn Fn(Request, Arguments) -> BoxFuture<'static, anyhow::Result<Reply>> + Send + Sync;

/// Closure or named function used as a handler.
///
/// Each `FnHandler` gets a process-unique id at construction; clones share it. A
/// handler created with [`FnHandler::named`] can be restored from a route cache by
/// resolving its name through the container, anonymous ones cannot.
#[derive(Clone)]
pub struct FnHandler {
    id: u64,
    name: Option<String>,
    signature: Arc<[ParamSpec]>,
    f: Arc<HandlerFn>,
}

impl FnHandler {
    pub fn new<F, Fut, R>(f: F) -> Self
    where
        F: Fn(Request, Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Into<Reply>,
    {
        let f: Arc<HandlerFn> = Arc::new(move |req, args| {
            let fut = f(req, args);
            Box::pin(async move { fut.await.map(Into::into) })
        });

        Self {
            id: NEXT_FN_ID.fetch_add(1, Ordering::Relaxed),
            name: None,
            signature: Arc::from(Vec::new()),
            f,
        }
    }

    /// A function registered under a stable name.
    pub fn named<F, Fut, R>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Request, Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Into<Reply>,
    {
        let mut handler = Self::new(f);
        handler.name = Some(name.into());
        handler
    }

    /// A handler that fails every invocation with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        let message: Arc<str> = Arc::from(message.into());
        Self::new(move |_req, _args| {
            let message = message.clone();
            async move { Err::<Reply, _>(anyhow!("{message}")) }
        })
    }

    /// Declares the parameters the function expects.
    pub fn with_params(mut self, params: impl IntoIterator<Item = ParamSpec>) -> Self {
        self.signature = params.into_iter().collect::<Vec<_>>().into();
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn signature(&self) -> &[ParamSpec] {
        &self.signature
    }

    pub(crate) fn call(&self, req: Request, args: Arguments) -> BoxFuture<'static, anyhow::Result<Reply>> {
        (self.f)(req, args)
    }
}

impl fmt::Debug for FnHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

/// Shorthand for [`FnHandler::new`].
pub fn handler_fn<F, Fut, R>(f: F) -> FnHandler
where
    F: Fn(Request, Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    R: Into<Reply>,
{
    FnHandler::new(f)
}

/// A container-resolved object exposing handler methods.
#[async_trait::async_trait]
pub trait Controller: Send + Sync + 'static {
    /// Declared parameters of a public method, `None` when no such method exists.
    fn signature(&self, method: &str) -> Option<Vec<ParamSpec>>;

    async fn call(&self, method: &str, req: Request, args: Arguments) -> anyhow::Result<Reply>;
}

/// Reference to the code a route runs.
#[derive(Clone)]
pub enum Handler {
    BoundMethod { class: String, method: String },
    Function(FnHandler),
    StaticMethod(String),
    Invokable(String),
}

impl Handler {
    pub fn method(class: impl Into<String>, method: impl Into<String>) -> Self {
        Handler::BoundMethod {
            class: class.into(),
            method: method.into(),
        }
    }

    pub fn invokable(class: impl Into<String>) -> Self {
        Handler::Invokable(class.into())
    }

    pub fn static_method(target: impl Into<String>) -> Self {
        Handler::StaticMethod(target.into())
    }

    /// Controller identifier and method for container-backed shapes.
    ///
    /// `None` for functions and for malformed `"Class::method"` strings.
    pub fn target(&self) -> Option<(&str, &str)> {
        match self {
            Handler::BoundMethod { class, method } => Some((class.as_str(), method.as_str())),
            Handler::StaticMethod(s) => s
                .split_once("::")
                .filter(|(c, m)| !c.is_empty() && !m.is_empty()),
            Handler::Invokable(class) => Some((class.as_str(), INVOKE)),
            Handler::Function(_) => None,
        }
    }

    /// Stable key for per-handler caches.
    pub fn identity(&self) -> String {
        match self {
            Handler::Function(f) => format!("fn#{}", f.id()),
            Handler::StaticMethod(s) => format!("static:{s}"),
            other => match other.target() {
                Some((class, method)) => format!("{class}@{method}"),
                None => other.describe(),
            },
        }
    }

    /// Human-readable form used in listings and errors.
    pub fn describe(&self) -> String {
        match self {
            Handler::BoundMethod { class, method } => format!("{class}@{method}"),
            Handler::Function(f) => match f.name() {
                Some(name) => name.to_string(),
                None => "Closure".to_string(),
            },
            Handler::StaticMethod(s) => s.clone(),
            Handler::Invokable(class) => class.clone(),
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl From<FnHandler> for Handler {
    fn from(f: FnHandler) -> Self {
        Handler::Function(f)
    }
}

/// `(controller, method)` pairs become bound methods.
impl From<(&str, &str)> for Handler {
    fn from((class, method): (&str, &str)) -> Self {
        Handler::method(class, method)
    }
}

/// `"Controller::method"` becomes a static method, a bare identifier an invokable.
impl From<&str> for Handler {
    fn from(s: &str) -> Self {
        if s.contains("::") {
            Handler::StaticMethod(s.to_string())
        } else {
            Handler::Invokable(s.to_string())
        }
    }
}

impl From<String> for Handler {
    fn from(s: String) -> Self {
        Handler::from(s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_shapes() {
        assert!(matches!(Handler::from("Users::index"), Handler::StaticMethod(_)));
        assert!(matches!(Handler::from("Dashboard"), Handler::Invokable(_)));
        assert_eq!(Handler::from("Users::index").target(), Some(("Users", "index")));
        assert_eq!(Handler::from("Dashboard").target(), Some(("Dashboard", INVOKE)));
        assert_eq!(Handler::static_method("Users::").target(), None);
    }

    #[test]
    fn function_identity_is_stable_across_clones() {
        let f = handler_fn(|_req, _args| async { Ok("ok") });
        let g = f.clone();
        assert_eq!(Handler::from(f).identity(), Handler::from(g).identity());

        let h = handler_fn(|_req, _args| async { Ok("ok") });
        assert_ne!(
            Handler::from(h).identity(),
            Handler::from(handler_fn(|_req, _args| async { Ok("ok") })).identity()
        );
    }

    #[test]
    fn typed_accessors() {
        let mut args = Arguments::new();
        args.push("id", Argument::Int(42));
        args.push("page", Argument::Default(Value::from(1)));
        args.push("q", Argument::Default(Value::Null));

        assert_eq!(args.int("id").unwrap(), 42);
        assert_eq!(args.float("id").unwrap(), 42.0);
        assert_eq!(args.int("page").unwrap(), 1);
        assert_eq!(args.opt_str("q").unwrap(), None);
        assert!(args.str("id").is_err());
        assert!(args.int("missing").is_err());
    }
}
