//! A debugging proxy: logs every request, rejects those without an API key,
//! forwards the rest.
//!
//! Run with:
//!   RUST_LOG=info cargo run --features clap --example logging_proxy -- \
//!       --addr :9090 --scheme https --host httpbin.org --basepath /anything
//!
//! Try:
//!   curl -i http://localhost:9090/widgets?id=5                  # 401
//!   curl -i -H 'x-api-key: k' http://localhost:9090/widgets?id=5 # proxied

use clap::Parser;
use http::StatusCode;
use interpose::{BoxedHandler, Chain, Config, Request, Response, middleware, shutdown_signal};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Reverse proxy with request logging and an API-key gate")]
struct Args {
    #[command(flatten)]
    proxy: Config,

    /// Header every request must carry to be forwarded.
    #[arg(long, default_value = "x-api-key")]
    key_header: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let key_header = args.key_header;

    let chain = Chain::new()
        .with(middleware::trace())
        .with(middleware::from_fn(move |req: Request, next: BoxedHandler| {
            let allowed = req.header(&key_header).is_some();
            async move {
                if !allowed {
                    return Response::status(StatusCode::UNAUTHORIZED);
                }
                next.call(req).await
            }
        }));

    if let Err(e) = interpose::run_until(args.proxy, chain, shutdown_signal()).await {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}
