//! Response generation and normalization of handler return values.
//!
//! Handlers return a [`Reply`]; the router turns it into a [`Response`] with the
//! following rules:
//!
//! - a response already built by the handler passes through unchanged;
//! - a string becomes a `text/plain` response;
//! - a JSON array or object becomes an `application/json` response;
//! - anything else (numbers, booleans, null) is stringified into a plain response.
//!
//! # Examples
//!
//! ```rust
//! use signpost::responder::{Reply, Responder};
//! use serde_json::json;
//!
//! let text = Reply::from("pong").into_response();
//! let json = Reply::from(json!({ "ok": true })).into_response();
//! assert_eq!(json.headers()["content-type"], "application/json");
//! ```

use std::convert::Infallible;

use http::{HeaderValue, StatusCode, header::CONTENT_TYPE};
use serde::Serialize;
use serde_json::Value;

use crate::{body::Body, types::Response};

/// Trait for converting types into HTTP responses.
pub trait Responder {
    /// Converts the implementing type into an HTTP response.
    fn into_response(self) -> Response;
}

impl Responder for Response {
    fn into_response(self) -> Response {
        self
    }
}

impl Responder for Body {
    fn into_response(self) -> Response {
        Response::new(self)
    }
}

impl Responder for &'static str {
    fn into_response(self) -> Response {
        text(self.to_string())
    }
}

impl Responder for String {
    fn into_response(self) -> Response {
        text(self)
    }
}

impl Responder for () {
    fn into_response(self) -> Response {
        Response::new(Body::empty())
    }
}

impl Responder for Infallible {
    fn into_response(self) -> Response {
        match self {}
    }
}

impl<R> Responder for (StatusCode, R)
where
    R: Responder,
{
    fn into_response(self) -> Response {
        let (status, inner) = self;
        let mut res = inner.into_response();
        *res.status_mut() = status;
        res
    }
}

/// Value returned by a handler before normalization.
pub enum Reply {
    /// A fully built response: plain, JSON, streamed or file, it is sent as is.
    Response(Response),
    /// Structured data; see the module docs for how each shape is rendered.
    Value(Value),
}

impl Reply {
    /// Serializes any `Serialize` value into a structured reply.
    pub fn json<T: Serialize>(value: &T) -> anyhow::Result<Self> {
        Ok(Self::Value(serde_json::to_value(value)?))
    }
}

impl Responder for Reply {
    fn into_response(self) -> Response {
        match self {
            Reply::Response(res) => res,
            Reply::Value(Value::String(s)) => text(s),
            Reply::Value(v @ (Value::Array(_) | Value::Object(_))) => json(StatusCode::OK, &v),
            Reply::Value(Value::Null) => text(String::new()),
            Reply::Value(other) => text(other.to_string()),
        }
    }
}

impl From<Response> for Reply {
    fn from(res: Response) -> Self {
        Reply::Response(res)
    }
}

impl From<Value> for Reply {
    fn from(v: Value) -> Self {
        Reply::Value(v)
    }
}

impl From<&str> for Reply {
    fn from(s: &str) -> Self {
        Reply::Value(Value::String(s.to_string()))
    }
}

impl From<String> for Reply {
    fn from(s: String) -> Self {
        Reply::Value(Value::String(s))
    }
}

macro_rules! reply_from_scalar {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Reply {
                fn from(v: $ty) -> Self {
                    Reply::Value(Value::from(v))
                }
            }
        )*
    };
}

reply_from_scalar!(i64, u64, i32, u32, f64, bool);

pub(crate) fn text(body: String) -> Response {
    let mut res = Response::new(Body::from(body));
    res.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    res
}

/// Builds a JSON response with the given status.
pub fn json(status: StatusCode, value: &Value) -> Response {
    let mut res = Response::new(Body::from(value.to_string()));
    *res.status_mut() = status;
    res.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    res
}
