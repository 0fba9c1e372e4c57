//! Per-request tracing span.

use std::time::Instant;

use tracing::{Instrument, info, info_span};

use crate::handler::BoxedHandler;
use crate::middleware::Middleware;
use crate::request::Request;

/// Opens an `http.request` span (method, path) around everything inside it
/// and logs status and latency once the response head is ready.
///
/// Put it first in the chain so rejected requests are logged too.
pub fn trace() -> Trace {
    Trace
}

/// Middleware returned by [`trace`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Trace;

impl Middleware for Trace {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        BoxedHandler::new(move |req: Request| {
            let span = info_span!(
                "http.request",
                method = %req.method(),
                path = %req.path(),
            );
            let next = next.clone();
            async move {
                let start = Instant::now();
                let res = next.call(req).await;
                info!(
                    status = res.status_code().as_u16(),
                    latency_us = start.elapsed().as_micros() as u64,
                    "request completed"
                );
                res
            }
            .instrument(span)
        })
    }
}
