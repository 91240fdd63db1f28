//! Error taxonomy of the routing engine.
//!
//! Registration mistakes (duplicate keys, duplicate names, bad constraints) are raised
//! immediately while routes are being declared. Routing misses (404/405) never appear
//! here: they are answered with JSON responses by [`crate::router::Router::dispatch`].
//! Everything raised while resolving handler parameters, middleware or cached handlers
//! surfaces from `dispatch` as an `anyhow::Error` wrapping a [`RouterError`].

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("route '{key}' is already registered")]
    DuplicateRoute { key: String },

    #[error("route name '{name}' is already registered")]
    DuplicateName { name: String },

    #[error("invalid HTTP method '{method}'")]
    InvalidMethod { method: String },

    #[error("invalid constraint for parameter '{param}' ({pattern}): {reason}")]
    InvalidConstraint {
        param: String,
        pattern: String,
        reason: String,
    },

    #[error("invalid parameter name '{name}' in path '{path}'")]
    InvalidParameterName { name: String, path: String },

    #[error("missing required parameter '{param}' for route '{path}'")]
    MissingParameter { param: String, path: String },

    #[error("value '{value}' for parameter '{param}' does not satisfy constraint '{pattern}'")]
    ConstraintViolation {
        param: String,
        value: String,
        pattern: String,
    },

    #[error("no route named '{name}'")]
    UnknownRoute { name: String },

    #[error("cannot resolve parameter '{param}' of handler {handler}")]
    UnresolvableParameter { param: String, handler: String },

    #[error("cannot cast route parameter '{param}' value '{value}' to {target}")]
    ParameterCast {
        param: String,
        value: String,
        target: &'static str,
    },

    #[error("invalid handler {handler}: resolved to {found}")]
    InvalidHandler { handler: String, found: String },

    #[error("service '{id}' is not registered in the container")]
    MissingService { id: String },

    #[error("middleware '{name}' cannot be resolved: {reason}")]
    UnknownMiddleware { name: String, reason: String },

    #[error("middleware '{name}' uses the process() protocol and no bridge is available")]
    MissingBridge { name: String },

    #[error("cannot reconstruct cached route '{route}': {reason}")]
    Reconstruct { route: String, reason: String },

    #[error("route cache error: {0}")]
    Cache(String),

    #[error("route manifest error: {0}")]
    Manifest(String),
}

impl RouterError {
    pub(crate) fn reconstruct(route: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Reconstruct {
            route: route.into(),
            reason: reason.into(),
        }
    }
}
