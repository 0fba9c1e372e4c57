//! Streaming body type shared by requests and responses.
//!
//! Inbound bodies, upstream bodies and locally built bodies all end up as the
//! same boxed stream of [`Bytes`] frames. Nothing here buffers: a proxied
//! download of any size flows frame by frame from upstream to client.

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Body as HttpBody;

/// Boxed error carried by body frames.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A boxed, streaming HTTP body.
pub type Body = UnsyncBoxBody<Bytes, BoxError>;

/// A body with no data.
pub fn empty() -> Body {
    boxed(Empty::<Bytes>::new())
}

/// A body holding a single in-memory chunk.
pub fn full(data: impl Into<Bytes>) -> Body {
    boxed(Full::new(data.into()))
}

/// Erases any `Bytes` body into [`Body`].
pub fn boxed<B>(body: B) -> Body
where
    B: HttpBody<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    body.map_err(Into::into).boxed_unsync()
}
