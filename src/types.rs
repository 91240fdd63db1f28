//! Shared type aliases used across the routing engine.

use std::{future::Future, pin::Pin};

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;

use crate::body::Body;

pub type BoxBody = UnsyncBoxBody<Bytes, BoxError>;
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Request type seen by middleware and handlers.
pub type Request = http::Request<Body>;

/// Response type produced by every dispatch.
pub type Response = http::Response<Body>;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
