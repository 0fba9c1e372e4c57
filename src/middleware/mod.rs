//! Middleware layer.
//!
//! A middleware wraps a handler to produce a new handler. It is the place for
//! cross-cutting concerns in front of the proxy: request logging,
//! authentication-header checks, header rewriting, request rejection.
//!
//! A [`Chain`] holds middleware in the order they should run. For
//! `[m1, m2, m3]` and terminal handler `T`, [`Chain::then`] builds
//! `m1(m2(m3(T)))`: `m1` sees the request first, `T` last. Any middleware
//! may answer on its own and never call `next`; everything inside it is then
//! skipped for that request.
//!
//! ```rust,no_run
//! use interpose::{BoxedHandler, Chain, Request, Response, middleware};
//! use http::StatusCode;
//!
//! let chain = Chain::new()
//!     .with(middleware::trace())
//!     .with(middleware::from_fn(|req: Request, next: BoxedHandler| async move {
//!         if req.header("x-api-key").is_none() {
//!             return Response::status(StatusCode::UNAUTHORIZED);
//!         }
//!         next.call(req).await
//!     }));
//! ```

mod trace;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::handler::BoxedHandler;
use crate::request::Request;
use crate::response::IntoResponse;

pub use trace::{Trace, trace};

/// A function from handler to handler.
///
/// Implemented for every `Fn(BoxedHandler) -> BoxedHandler`, so a plain
/// closure is a middleware. For the usual "look at the request, maybe call
/// next" shape, [`from_fn`] is shorter.
pub trait Middleware: Send + Sync + 'static {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler;
}

impl<F> Middleware for F
where
    F: Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static,
{
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        self(next)
    }
}

// ── from_fn ───────────────────────────────────────────────────────────────────

/// Builds a middleware from an async function of the request and the next
/// handler. The function decides whether, and when, to call `next`.
pub fn from_fn<F, Fut, R>(f: F) -> FromFn<F>
where
    F: Fn(Request, BoxedHandler) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    FromFn { f: Arc::new(f) }
}

/// Middleware returned by [`from_fn`].
pub struct FromFn<F> {
    f: Arc<F>,
}

impl<F> Clone for FromFn<F> {
    fn clone(&self) -> Self {
        Self { f: Arc::clone(&self.f) }
    }
}

impl<F, Fut, R> Middleware for FromFn<F>
where
    F: Fn(Request, BoxedHandler) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        let f = Arc::clone(&self.f);
        BoxedHandler::new(move |req: Request| {
            let fut = f(req, next.clone());
            async move { fut.await.into_response() }
        })
    }
}

// ── Chain ─────────────────────────────────────────────────────────────────────

/// An ordered list of middleware.
///
/// Building is append-only; composing with [`then`](Chain::then) never
/// changes the chain, so one chain can wrap several handlers. The same
/// middleware may appear more than once.
#[derive(Clone, Default)]
pub struct Chain {
    layers: Vec<Arc<dyn Middleware>>,
}

impl Chain {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Appends `middleware` as the innermost layer so far.
    pub fn with(mut self, middleware: impl Middleware) -> Self {
        self.layers.push(Arc::new(middleware));
        self
    }

    /// Appends every layer of `other`, keeping its order.
    pub fn extend(mut self, other: &Chain) -> Self {
        self.layers.extend(other.layers.iter().cloned());
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Wraps `terminal` in every layer, first layer outermost. An empty chain
    /// returns `terminal` itself.
    pub fn then(&self, terminal: BoxedHandler) -> BoxedHandler {
        self.layers
            .iter()
            .rev()
            .fold(terminal, |next, layer| layer.wrap(next))
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain").field("len", &self.layers.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use http::StatusCode;

    use super::*;
    use crate::body;
    use crate::response::Response;

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn get(path: &str) -> Request {
        Request::from_http(http::Request::get(path).body(body::empty()).unwrap())
    }

    fn record(log: Log, name: &'static str) -> impl Middleware + Clone {
        from_fn(move |req: Request, next: BoxedHandler| {
            log.lock().unwrap().push(name);
            async move { next.call(req).await }
        })
    }

    fn counting_terminal(hits: &Arc<AtomicUsize>, log: &Log) -> BoxedHandler {
        let hits = Arc::clone(hits);
        let log = Arc::clone(log);
        BoxedHandler::new(move |_req: Request| {
            hits.fetch_add(1, Ordering::SeqCst);
            log.lock().unwrap().push("terminal");
            async { Response::text("upstream") }
        })
    }

    #[tokio::test]
    async fn empty_chain_is_the_terminal_handler() {
        let hits = Arc::new(AtomicUsize::new(0));
        let log = Log::default();
        let handler = Chain::new().then(counting_terminal(&hits, &log));

        let res = handler.call(get("/")).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn layers_run_in_insertion_order() {
        let hits = Arc::new(AtomicUsize::new(0));
        let log = Log::default();
        let chain = Chain::new().with(record(log.clone(), "m1")).with(record(log.clone(), "m2"));
        let handler = chain.then(counting_terminal(&hits, &log));

        handler.call(get("/")).await;

        assert_eq!(*log.lock().unwrap(), ["m1", "m2", "terminal"]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn short_circuit_skips_the_rest() {
        let hits = Arc::new(AtomicUsize::new(0));
        let log = Log::default();
        let reject = from_fn(|_req: Request, _next: BoxedHandler| async { StatusCode::FORBIDDEN });
        let chain = Chain::new().with(reject).with(record(log.clone(), "m2"));
        let handler = chain.then(counting_terminal(&hits, &log));

        for _ in 0..3 {
            let res = handler.call(get("/")).await;
            assert_eq!(res.status_code(), StatusCode::FORBIDDEN);
        }
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn closures_are_middleware() {
        let hits = Arc::new(AtomicUsize::new(0));
        let log = Log::default();
        let tag = |next: BoxedHandler| {
            BoxedHandler::new(move |req: Request| {
                let next = next.clone();
                async move {
                    let mut res = next.call(req).await;
                    res.headers_mut().insert("x-tagged", "1".parse().unwrap());
                    res
                }
            })
        };
        let handler = Chain::new().with(tag).then(counting_terminal(&hits, &log));

        let res = handler.call(get("/")).await;
        assert_eq!(res.headers()["x-tagged"], "1");
    }

    #[tokio::test]
    async fn same_middleware_may_repeat() {
        let hits = Arc::new(AtomicUsize::new(0));
        let log = Log::default();
        let twice = record(log.clone(), "again");
        let chain = Chain::new().with(twice.clone()).with(twice);
        assert_eq!(chain.len(), 2);

        chain.then(counting_terminal(&hits, &log)).call(get("/")).await;
        assert_eq!(*log.lock().unwrap(), ["again", "again", "terminal"]);
    }

    #[tokio::test]
    async fn then_leaves_the_chain_reusable() {
        let hits = Arc::new(AtomicUsize::new(0));
        let log = Log::default();
        let chain = Chain::new().with(record(log.clone(), "m1"));

        let a = chain.then(counting_terminal(&hits, &log));
        let b = chain.then(counting_terminal(&hits, &log));
        a.call(get("/")).await;
        b.call(get("/")).await;

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(*log.lock().unwrap(), ["m1", "terminal", "m1", "terminal"]);
    }
}
