//! Incoming HTTP request type.

use std::net::SocketAddr;

use http::{Extensions, HeaderMap, Method, Uri, Version};
use hyper::body::Body as HttpBody;

use crate::body::{self, Body, BoxError};

/// Peer address of the connection a request arrived on. Inserted by the
/// server before the request reaches the middleware chain.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RemoteAddr(pub(crate) SocketAddr);

/// An incoming HTTP request, its body still unread.
///
/// Middleware may inspect and modify the head (headers, extensions) before
/// handing the request on; the proxy consumes the body as a stream.
pub struct Request {
    inner: http::Request<Body>,
}

impl Request {
    /// Wraps any `http::Request` whose body yields [`bytes::Bytes`].
    ///
    /// ```rust
    /// use interpose::{Request, body};
    ///
    /// let req = Request::from_http(
    ///     http::Request::get("/widgets?id=5").body(body::empty()).unwrap(),
    /// );
    /// assert_eq!(req.path(), "/widgets");
    /// assert_eq!(req.query(), Some("id=5"));
    /// ```
    pub fn from_http<B>(req: http::Request<B>) -> Self
    where
        B: HttpBody<Data = bytes::Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self { inner: req.map(body::boxed) }
    }

    pub fn method(&self) -> &Method { self.inner.method() }
    pub fn uri(&self) -> &Uri { self.inner.uri() }
    pub fn path(&self) -> &str { self.inner.uri().path() }
    pub fn query(&self) -> Option<&str> { self.inner.uri().query() }
    pub fn version(&self) -> Version { self.inner.version() }
    pub fn headers(&self) -> &HeaderMap { self.inner.headers() }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { self.inner.headers_mut() }
    pub fn extensions(&self) -> &Extensions { self.inner.extensions() }
    pub fn extensions_mut(&mut self) -> &mut Extensions { self.inner.extensions_mut() }

    /// Header lookup. Names are case-insensitive; values that are not
    /// visible ASCII are treated as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers().get(name).and_then(|v| v.to_str().ok())
    }

    /// Address of the client connection, when the request came off a socket.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.extensions().get::<RemoteAddr>().map(|a| a.0)
    }

    pub fn into_inner(self) -> http::Request<Body> {
        self.inner
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", self.method())
            .field("uri", self.uri())
            .field("version", &self.version())
            .field("headers", self.headers())
            .finish_non_exhaustive()
    }
}
