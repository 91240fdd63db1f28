/// This module provides the `Body` struct, a wrapper around a boxed HTTP body.
/// Every response leaving the router carries one, whatever produced it: plain text,
/// JSON, a stream or a file. The router never looks inside a body except to drop it
/// for `HEAD` requests.
use std::{
    fmt,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use http_body::{Frame, SizeHint};
use http_body_util::{BodyExt, Empty, Full};

use crate::types::{BoxBody, BoxError};

/// Boxed, type-erased HTTP body.
///
/// # Example
///
/// ```rust
/// use signpost::body::Body;
///
/// let empty = Body::empty();
/// let text = Body::from("Hello, world!".to_string());
/// ```
pub struct Body(BoxBody);

impl Body {
    /// Wraps any `http_body::Body` yielding `Bytes`.
    pub fn new<B>(body: B) -> Self
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self(body.map_err(|e| e.into()).boxed_unsync())
    }

    /// Creates an empty body.
    pub fn empty() -> Self {
        Self::new(Empty::new())
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hint = http_body::Body::size_hint(&self.0);
        f.debug_struct("Body")
            .field("exact_len", &hint.exact())
            .field("end_stream", &http_body::Body::is_end_stream(&self.0))
            .finish()
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<()> for Body {
    fn from(_: ()) -> Self {
        Self::empty()
    }
}

macro_rules! body_from_impl {
    ($ty:ty) => {
        impl From<$ty> for Body {
            fn from(buf: $ty) -> Self {
                Self::new(Full::from(buf))
            }
        }
    };
}

body_from_impl!(String);
body_from_impl!(&'static str);
body_from_impl!(Vec<u8>);
body_from_impl!(Bytes);

impl http_body::Body for Body {
    type Data = Bytes;
    type Error = BoxError;

    #[inline]
    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.0).poll_frame(cx)
    }

    #[inline]
    fn size_hint(&self) -> SizeHint {
        self.0.size_hint()
    }

    #[inline]
    fn is_end_stream(&self) -> bool {
        self.0.is_end_stream()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_reports_the_known_length() {
        assert_eq!(
            format!("{:?}", Body::from("hello")),
            "Body { exact_len: Some(5), end_stream: false }"
        );
        assert_eq!(
            format!("{:?}", Body::empty()),
            "Body { exact_len: Some(0), end_stream: true }"
        );
    }
}
