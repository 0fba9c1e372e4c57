//! # interpose
//!
//! A single-host reverse proxy you can put your own middleware in front of.
//! Nothing more. Nothing less.
//!
//! ## The contract
//!
//! Give it a listen address and an upstream (`scheme`, `host`, `base_path`).
//! Every request is forwarded to the upstream with the base path prepended,
//! and the upstream's answer is streamed back. Before that happens, the
//! request passes through your middleware, in the order you listed them:
//!
//! ```text
//! client → m1 → m2 → … → mn → proxy → upstream
//! ```
//!
//! Any middleware may answer instead of calling the next one (reject a
//! request, serve a canned response). The proxy then never sees it.
//!
//! What interpose does not do, on purpose:
//!
//! - **TLS termination**: put it behind something that does
//! - **Load balancing, retries, circuit breaking**: one upstream, one attempt
//! - **Metrics**: write a middleware
//!
//! An unreachable upstream is a `502` for that request, never a crash.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use interpose::{BoxedHandler, Chain, Config, Request, Response, middleware};
//! use http::StatusCode;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), interpose::Error> {
//!     let config = Config::new(":9090", "http", "backend.internal:80", "/api");
//!
//!     let chain = Chain::new()
//!         .with(middleware::trace())
//!         .with(middleware::from_fn(require_api_key));
//!
//!     // GET /widgets?id=5 → http://backend.internal:80/api/widgets?id=5
//!     interpose::run(config, chain).await
//! }
//!
//! async fn require_api_key(req: Request, next: BoxedHandler) -> Response {
//!     if req.header("x-api-key").is_none() {
//!         return Response::status(StatusCode::UNAUTHORIZED);
//!     }
//!     next.call(req).await
//! }
//! ```

mod config;
mod error;
mod handler;
mod proxy;
mod request;
mod response;
mod server;

pub mod body;
pub mod middleware;

use std::future::Future;

use tracing::info;

pub use config::Config;
pub use error::Error;
pub use handler::{BoxFuture, BoxedHandler, Handler};
pub use middleware::{Chain, Middleware};
pub use proxy::{Proxy, join_path};
pub use request::Request;
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use server::{Server, shutdown_signal};

/// Starts the proxy described by `config` behind `middleware`.
///
/// Binds `config.addr`, then serves until the listener fails; there is no
/// normal return. A bind failure is returned before anything is served.
pub async fn run(config: Config, middleware: Chain) -> Result<(), Error> {
    let (server, handler) = prepare(&config, &middleware).await?;
    server.serve(handler).await
}

/// Like [`run`], but stops accepting when `shutdown` resolves, waits for
/// in-flight connections and returns `Ok(())`.
///
/// ```rust,no_run
/// # async fn f() -> Result<(), interpose::Error> {
/// use interpose::{Chain, Config, shutdown_signal};
///
/// let config = Config::new(":8080", "https", "api.example.com", "/v1");
/// interpose::run_until(config, Chain::new(), shutdown_signal()).await
/// # }
/// ```
pub async fn run_until<S>(config: Config, middleware: Chain, shutdown: S) -> Result<(), Error>
where
    S: Future<Output = ()>,
{
    let (server, handler) = prepare(&config, &middleware).await?;
    server.serve_with_shutdown(handler, shutdown).await
}

async fn prepare(config: &Config, middleware: &Chain) -> Result<(Server, BoxedHandler), Error> {
    let handler = middleware.then(Proxy::new(config).into_handler());
    let server = Server::bind(&config.listen_addr()).await?;
    info!(
        target_url = %config.target(),
        middleware = middleware.len(),
        "proxy configured"
    );
    Ok((server, handler))
}
