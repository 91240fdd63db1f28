//! HTTP request routing engine.
//!
//! `signpost` maps requests to handlers through a static table and bucketed
//! dynamic routes, runs per-route middleware pipelines, binds handler parameters
//! from the request, a dependency-injection container and route parameters, and
//! can persist its route table for fast cold starts.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use signpost::{body::Body, handler::{ParamSpec, handler_fn}, router::Router};
//! use serde_json::json;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let mut router = Router::new();
//! router
//!     .get(
//!         "/users/{id}",
//!         handler_fn(|_req, args| async move { Ok(json!({ "id": args.int("id")? })) })
//!             .with_params([ParamSpec::int("id")]),
//!     )?
//!     .constrain("id", r"\d+")?;
//!
//! let req = http::Request::get("/users/42").body(Body::empty())?;
//! let res = router.dispatch(req).await?;
//! assert_eq!(res.status(), 200);
//! # Ok(())
//! # }
//! ```

pub mod body;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod container;
pub mod cors;
pub mod error;
pub mod fields;
pub mod handler;
pub mod loader;
pub mod middleware;
pub mod responder;
pub mod route;
pub mod router;
pub mod types;
pub mod versioning;

#[cfg(feature = "signpost-tracing")]
pub mod tracing;

pub use error::RouterError;
pub use router::Router;
