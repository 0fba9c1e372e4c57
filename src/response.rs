//! Outgoing HTTP response type and the [`IntoResponse`] conversion trait.
//!
//! Proxied responses wrap the upstream's streaming body untouched. Responses
//! built locally (a middleware rejecting a request, a `502` from the proxy)
//! use the shortcuts below.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use hyper::body::Body as HttpBody;
use tracing::error;

use crate::body::{self, Body, BoxError};

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// # Shortcuts
///
/// ```rust
/// use interpose::Response;
/// use http::StatusCode;
///
/// Response::text("hello");
/// Response::status(StatusCode::UNAUTHORIZED);
/// ```
///
/// # Builder (custom status or headers)
///
/// ```rust
/// use interpose::Response;
/// use http::StatusCode;
///
/// Response::builder()
///     .status(StatusCode::FORBIDDEN)
///     .header("www-authenticate", "Bearer")
///     .text("token expired");
/// ```
pub struct Response {
    inner: http::Response<Body>,
}

impl Response {
    /// `200 OK`, `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// Response with no body.
    pub fn status(code: StatusCode) -> Self {
        let mut inner = http::Response::new(body::empty());
        *inner.status_mut() = code;
        Self { inner }
    }

    /// Builder for responses that need a custom status or extra headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { inner: http::Response::builder() }
    }

    /// Wraps any `http::Response` whose body yields [`Bytes`]. The body is
    /// streamed, not collected.
    pub fn from_http<B>(res: http::Response<B>) -> Self
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self { inner: res.map(body::boxed) }
    }

    pub fn status_code(&self) -> StatusCode { self.inner.status() }
    pub fn headers(&self) -> &HeaderMap { self.inner.headers() }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { self.inner.headers_mut() }

    pub fn into_inner(self) -> http::Response<Body> {
        self.inner
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status_code())
            .field("headers", self.headers())
            .finish_non_exhaustive()
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to `200 OK`. An invalid header
/// name or value turns the finished response into a logged `500`.
pub struct ResponseBuilder {
    inner: http::response::Builder,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.inner = self.inner.status(code);
        self
    }

    pub fn header<K, V>(mut self, name: K, value: V) -> Self
    where
        K: TryInto<HeaderName>,
        <K as TryInto<HeaderName>>::Error: Into<http::Error>,
        V: TryInto<HeaderValue>,
        <V as TryInto<HeaderValue>>::Error: Into<http::Error>,
    {
        self.inner = self.inner.header(name, value);
        self
    }

    /// Terminate with a plain-text body (`text/plain; charset=utf-8`).
    pub fn text(self, body: impl Into<String>) -> Response {
        self.header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .bytes(body.into())
    }

    /// Terminate with a raw body. Set `content-type` yourself.
    pub fn bytes(self, body: impl Into<Bytes>) -> Response {
        self.finish(body::full(body))
    }

    /// Terminate with no body (e.g. `204`, `304`).
    pub fn no_body(self) -> Response {
        self.finish(body::empty())
    }

    fn finish(self, body: Body) -> Response {
        match self.inner.body(body) {
            Ok(inner) => Response { inner },
            Err(e) => {
                error!("invalid response head: {e}");
                Response::status(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

// ── IntoResponse ──────────────────────────────────────────────────────────────

/// Conversion into an HTTP [`Response`].
///
/// Handlers and `from_fn` middleware may return anything implementing this.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

/// Return a status directly: `return StatusCode::UNAUTHORIZED`
impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::status(self) }
}

impl IntoResponse for (StatusCode, &'static str) {
    fn into_response(self) -> Response {
        Response::builder().status(self.0).text(self.1)
    }
}

impl IntoResponse for http::Response<Body> {
    fn into_response(self) -> Response { Response { inner: self } }
}
