//! Listener, connection tasks and per-request dispatch.
//!
//! # Lifecycle
//!
//! [`Server::bind`] owns the listening socket. [`Server::serve`] accepts until
//! the listener breaks; it has no shutdown path of its own.
//! [`Server::serve_with_shutdown`] adds one:
//! 1. When the signal future resolves, `listener.accept()` stops and the
//!    socket is dropped.
//! 2. Every open connection is asked to close: idle ones close at once, busy
//!    ones after answering the request in hand.
//! 3. Once all connection tasks are done the call returns `Ok(())`.
//!
//! # Isolation
//!
//! Each request runs in its own task. A middleware that panics takes down
//! only its own request, which is answered with `500`.

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::body::Body;
use crate::error::Error;
use crate::handler::BoxedHandler;
use crate::request::{RemoteAddr, Request};
use crate::response::Response;

const MIN_ACCEPT_BACKOFF: Duration = Duration::from_millis(5);
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// The HTTP server.
pub struct Server {
    listener: TcpListener,
    addr: SocketAddr,
}

impl Server {
    /// Binds `addr` (`host:port`; host names are resolved).
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # async fn f() -> Result<(), interpose::Error> {
    /// use interpose::Server;
    /// let server = Server::bind("127.0.0.1:0").await?;
    /// println!("listening on {}", server.local_addr());
    /// # Ok(()) }
    /// ```
    pub async fn bind(addr: &str) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr).await.map_err(|source| Error::Bind {
            addr: addr.to_owned(),
            source,
        })?;
        let addr = listener.local_addr().map_err(|source| Error::Bind {
            addr: addr.to_owned(),
            source,
        })?;
        Ok(Self { listener, addr })
    }

    /// The address actually bound; useful after binding port `0`.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serves `handler` until the listener fails. Never returns `Ok`.
    pub async fn serve(self, handler: BoxedHandler) -> Result<(), Error> {
        self.serve_with_shutdown(handler, std::future::pending()).await
    }

    /// Serves `handler` until `signal` resolves, then drains in-flight
    /// connections and returns.
    ///
    /// Open connections are told to close once their current request is
    /// answered; idle keep-alive connections close at once. Upgraded
    /// connections (WebSocket tunnels) are detached and not waited for.
    pub async fn serve_with_shutdown<S>(self, handler: BoxedHandler, signal: S) -> Result<(), Error>
    where
        S: Future<Output = ()>,
    {
        let Server { listener, addr } = self;
        info!(addr = %addr, "interpose listening");

        // HTTP/1.1 or HTTP/2, whatever the client speaks.
        let builder = ConnBuilder::new(TokioExecutor::new());
        let graceful = GracefulShutdown::new();
        // Tracks every spawned connection task so shutdown can wait for them.
        let mut tasks = tokio::task::JoinSet::new();
        let mut backoff = MIN_ACCEPT_BACKOFF;

        tokio::pin!(signal);

        loop {
            tokio::select! {
                // Check shutdown first so a signal stops accepting at once,
                // even with connections queued.
                biased;

                () = &mut signal => break,

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => {
                            backoff = MIN_ACCEPT_BACKOFF;
                            v
                        }
                        Err(e) if is_connection_error(&e) => {
                            debug!("accept error: {e}");
                            continue;
                        }
                        Err(e) if is_fatal_listener_error(&e) => {
                            error!(addr = %addr, "listener failed: {e}");
                            return Err(Error::Accept(e));
                        }
                        Err(e) => {
                            // Typically out of file descriptors: wait for
                            // connections to close before trying again, but
                            // not past a shutdown signal.
                            warn!(retry_in_ms = backoff.as_millis() as u64, "accept error: {e}");
                            if sleep_unless(backoff, signal.as_mut()).await {
                                break;
                            }
                            backoff = (backoff * 2).min(MAX_ACCEPT_BACKOFF);
                            continue;
                        }
                    };

                    let handler = handler.clone();
                    // Called once per request on the connection.
                    let svc = service_fn(move |req| dispatch(handler.clone(), req, remote_addr));
                    let conn = builder
                        .serve_connection_with_upgrades(TokioIo::new(stream), svc)
                        .into_owned();
                    let conn = graceful.watch(conn);

                    tasks.spawn(async move {
                        if let Err(e) = conn.await {
                            debug!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
        drop(listener);
        graceful.shutdown().await;
        while tasks.join_next().await.is_some() {}

        info!("interpose stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Runs one request through the composed handler.
///
/// Never errors towards hyper: failures, panics included, become responses.
async fn dispatch(
    handler: BoxedHandler,
    mut req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<Body>, Infallible> {
    req.extensions_mut().insert(RemoteAddr(remote_addr));
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    let mut task = tokio::spawn(handler.call(Request::from_http(req)));
    // hyper drops this future when the client goes away; take the request
    // task down with it.
    let _guard = AbortOnDrop(task.abort_handle());

    let response = match (&mut task).await {
        Ok(res) => res,
        Err(e) if e.is_panic() => {
            error!(%method, %path, peer = %remote_addr, "handler panicked");
            Response::status(http::StatusCode::INTERNAL_SERVER_ERROR)
        }
        Err(e) => {
            warn!(%method, %path, "request task cancelled: {e}");
            Response::status(http::StatusCode::INTERNAL_SERVER_ERROR)
        }
    };

    Ok(response.into_inner())
}

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Sleeps for `backoff` unless `signal` resolves first. Returns `true` if it
/// did.
async fn sleep_unless<S>(backoff: Duration, signal: Pin<&mut S>) -> bool
where
    S: Future<Output = ()>,
{
    tokio::select! {
        biased;
        () = signal => true,
        () = tokio::time::sleep(backoff) => false,
    }
}

/// Errors that concern one pending connection, not the listener.
fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
    )
}

/// Errors after which the listener cannot accept again.
fn is_fatal_listener_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::InvalidInput | io::ErrorKind::NotConnected | io::ErrorKind::Unsupported
    )
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** and **SIGINT** (Ctrl-C). On
/// Windows only Ctrl-C is available. Pass it to
/// [`Server::serve_with_shutdown`] or [`run_until`](crate::run_until).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    // `pending()` is a future that never resolves: on non-Unix platforms
    // the SIGTERM arm is effectively disabled.
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
