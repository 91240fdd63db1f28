//! Middleware references, the native middleware contract and the `Next` chain.
//!
//! Routes store middleware as [`MiddlewareRef`]s: either an inline closure or a name
//! with optional arguments, written `name` or `name:arg1,arg2`. Names are parsed once,
//! when the reference is created, and resolved through the container when a route's
//! pipeline is built.
//!
//! The first middleware of a pipeline is the outermost one: it runs first on the way
//! in and last on the way out. A middleware continues the chain with
//! [`Next::run`] or short-circuits by returning a response of its own.
//!
//! # Examples
//!
//! ```rust
//! use signpost::middleware::{MiddlewareRef, Next};
//! use signpost::types::Request;
//!
//! let named = MiddlewareRef::from("throttle:60, 1");
//! assert_eq!(named.name(), Some("throttle"));
//! assert_eq!(named.args(), ["60", "1"]);
//!
//! let inline = MiddlewareRef::inline(|req: Request, next: Next| async move {
//!     next.run(req).await
//! });
//! assert_eq!(inline.to_string(), "<inline>");
//! ```

use std::{fmt, future::Future, sync::Arc};

use smallvec::SmallVec;

use crate::types::{BoxFuture, Request, Response};

/// Resolved middleware in the router's native calling convention.
pub type BoxMiddleware =
    Arc<dyn Fn(Request, Next) -> BoxFuture<'static, anyhow::Result<Response>> + Send + Sync>;

pub(crate) type Endpoint =
    Arc<dyn Fn(Request) -> BoxFuture<'static, anyhow::Result<Response>> + Send + Sync>;

/// Marker used for inline middleware in listings and route caches.
pub const INLINE_MARKER: &str = "<inline>";

/// A middleware as declared on a route.
#[derive(Clone)]
pub enum MiddlewareRef {
    Named {
        name: String,
        args: SmallVec<[String; 2]>,
    },
    Inline(BoxMiddleware),
}

impl MiddlewareRef {
    /// Parses `name` or `name:arg1,arg2`; arguments are trimmed.
    pub fn parse(spec: &str) -> Self {
        let (name, args) = match spec.split_once(':') {
            Some((name, raw)) => (
                name.trim(),
                raw.split(',')
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty())
                    .collect(),
            ),
            None => (spec.trim(), SmallVec::new()),
        };

        MiddlewareRef::Named {
            name: name.to_string(),
            args,
        }
    }

    /// Wraps a closure `(request, next) -> response`.
    pub fn inline<F, Fut>(f: F) -> Self
    where
        F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Response>> + Send + 'static,
    {
        MiddlewareRef::Inline(Arc::new(move |req, next| Box::pin(f(req, next))))
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            MiddlewareRef::Named { name, .. } => Some(name),
            MiddlewareRef::Inline(_) => None,
        }
    }

    pub fn args(&self) -> &[String] {
        match self {
            MiddlewareRef::Named { args, .. } => args,
            MiddlewareRef::Inline(_) => &[],
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, MiddlewareRef::Inline(_))
    }
}

impl fmt::Display for MiddlewareRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MiddlewareRef::Named { name, args } if args.is_empty() => f.write_str(name),
            MiddlewareRef::Named { name, args } => write!(f, "{name}:{}", args.join(",")),
            MiddlewareRef::Inline(_) => f.write_str(INLINE_MARKER),
        }
    }
}

impl fmt::Debug for MiddlewareRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MiddlewareRef({self})")
    }
}

impl From<&str> for MiddlewareRef {
    fn from(spec: &str) -> Self {
        MiddlewareRef::parse(spec)
    }
}

impl From<String> for MiddlewareRef {
    fn from(spec: String) -> Self {
        MiddlewareRef::parse(&spec)
    }
}

impl From<&String> for MiddlewareRef {
    fn from(spec: &String) -> Self {
        MiddlewareRef::parse(spec)
    }
}

/// Native middleware resolved from the container.
#[async_trait::async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// `params` are the arguments declared after the colon in the reference.
    async fn handle(&self, req: Request, next: Next, params: &[String]) -> anyhow::Result<Response>;
}

/// Remainder of a pipeline: the middleware not yet run plus the endpoint.
#[derive(Clone)]
pub struct Next {
    pub(crate) middlewares: Arc<[BoxMiddleware]>,
    pub(crate) idx: usize,
    pub(crate) endpoint: Endpoint,
}

impl Next {
    pub(crate) fn new(middlewares: Arc<[BoxMiddleware]>, endpoint: Endpoint) -> Self {
        Self {
            middlewares,
            idx: 0,
            endpoint,
        }
    }

    /// Runs the next middleware, or the endpoint once the chain is exhausted.
    pub async fn run(mut self, req: Request) -> anyhow::Result<Response> {
        match self.middlewares.get(self.idx).cloned() {
            Some(mw) => {
                self.idx += 1;
                mw(req, self).await
            }
            None => (self.endpoint)(req).await,
        }
    }
}

/// Handler side of the `process(request, handler)` protocol.
#[async_trait::async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, req: Request) -> anyhow::Result<Response>;
}

/// Middleware written against the `process(request, handler)` protocol.
#[async_trait::async_trait]
pub trait ProcessMiddleware: Send + Sync + 'static {
    async fn process(&self, req: Request, handler: &dyn RequestHandler) -> anyhow::Result<Response>;
}

/// Turns a `process()` middleware into the native calling convention.
///
/// Returning `None` means the middleware cannot be bridged; the router then applies
/// the configured strict or lenient policy.
pub trait MiddlewareAdapter: Send + Sync {
    fn adapt(&self, name: &str, middleware: Arc<dyn ProcessMiddleware>) -> Option<BoxMiddleware>;
}

/// Default adapter: hands the middleware a [`RequestHandler`] that continues the chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessBridge;

struct NextHandler(Next);

#[async_trait::async_trait]
impl RequestHandler for NextHandler {
    async fn handle(&self, req: Request) -> anyhow::Result<Response> {
        self.0.clone().run(req).await
    }
}

impl MiddlewareAdapter for ProcessBridge {
    fn adapt(&self, _name: &str, middleware: Arc<dyn ProcessMiddleware>) -> Option<BoxMiddleware> {
        Some(Arc::new(move |req, next| {
            let middleware = middleware.clone();
            Box::pin(async move {
                let handler = NextHandler(next);
                middleware.process(req, &handler).await
            })
        }))
    }
}

/// Middleware that only continues the chain.
pub(crate) fn pass_through() -> BoxMiddleware {
    Arc::new(|req, next: Next| Box::pin(next.run(req)))
}

/// Middleware that fails every request with `message`.
pub(crate) fn failing(message: String) -> BoxMiddleware {
    let message: Arc<str> = Arc::from(message);
    Arc::new(move |_req, _next| {
        let message = message.clone();
        Box::pin(async move { Err(anyhow::anyhow!("{message}")) })
    })
}

/// Adapts a native [`Middleware`] with its declared arguments.
pub(crate) fn from_native(middleware: Arc<dyn Middleware>, args: &[String]) -> BoxMiddleware {
    let args: Arc<[String]> = Arc::from(args.to_vec());
    Arc::new(move |req, next| {
        let middleware = middleware.clone();
        let args = args.clone();
        Box::pin(async move { middleware.handle(req, next, &args).await })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_and_arguments() {
        let m = MiddlewareRef::parse("auth");
        assert_eq!(m.name(), Some("auth"));
        assert!(m.args().is_empty());

        let m = MiddlewareRef::parse("role: admin , editor,");
        assert_eq!(m.name(), Some("role"));
        assert_eq!(m.args(), ["admin", "editor"]);
        assert_eq!(m.to_string(), "role:admin,editor");
    }

    #[test]
    fn inline_middleware_has_no_name() {
        let m = MiddlewareRef::inline(|req, next: Next| async move { next.run(req).await });
        assert!(m.is_inline());
        assert_eq!(m.name(), None);
        assert_eq!(m.to_string(), INLINE_MARKER);
    }
}
