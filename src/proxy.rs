//! Single-host reverse proxy.
//!
//! Every request is rewritten onto one upstream (`scheme://host` + base path),
//! sent once, and the upstream's response is streamed back as-is. There is no
//! routing, no retry and no load balancing: the upstream either answers or the
//! caller gets a `502`.
//!
//! ```text
//! inbound   GET /widgets?id=5            Host: proxy.example
//!              ↓  base path "/api"
//! upstream  GET http://backend.internal:80/api/widgets?id=5
//!                                        Host: proxy.example
//!                                        X-Forwarded-For: <client ip>
//! ```
//!
//! `Host` is passed through as the client sent it unless `rewrite_host` is
//! set in the [`Config`], in which case the upstream authority is
//! sent instead.
//!
//! # Upgrades
//!
//! A request carrying `Connection: upgrade` keeps its `Upgrade` header on the
//! way upstream. If the upstream answers `101 Switching Protocols` for the
//! same protocol, both connections are taken over and bytes are copied in
//! each direction until either side closes. Anything else is relayed as a
//! normal response.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::uri::{PathAndQuery, Uri};
use http::{StatusCode, Version};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper::body::Incoming;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tracing::{debug, error, warn};

use crate::body::{self, Body};
use crate::config::Config;
use crate::handler::BoxedHandler;
use crate::request::Request;
use crate::response::Response;

/// Headers that describe one hop, never forwarded in either direction.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("proxy-connection"),
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
];

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

type HttpClient = Client<HttpsConnector<HttpConnector>, Body>;

/// A reverse proxy bound to one upstream.
///
/// Build it once, turn it into a handler with [`Proxy::into_handler`], and put
/// it at the bottom of a [`Chain`](crate::middleware::Chain). The pooled client
/// inside is shared by every request.
pub struct Proxy {
    scheme: String,
    host: String,
    base_path: String,
    timeout: Option<Duration>,
    rewrite_host: bool,
    client: HttpClient,
}

impl Proxy {
    /// Creates a proxy for `config`'s upstream. Never fails: bad `scheme` or
    /// `host` values surface as `502` on each request.
    pub fn new(config: &Config) -> Self {
        let mut http = HttpConnector::new();
        // TLS is layered on top by the https connector.
        http.enforce_http(false);
        let connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            scheme: config.scheme.clone(),
            host: config.host.clone(),
            base_path: config.base_path.clone(),
            timeout: config.upstream_timeout,
            rewrite_host: config.rewrite_host,
            client,
        }
    }

    /// Erases the proxy into the innermost handler of a chain.
    pub fn into_handler(self) -> BoxedHandler {
        let proxy = Arc::new(self);
        BoxedHandler::new(move |req: Request| {
            let proxy = Arc::clone(&proxy);
            async move { proxy.forward(req).await }
        })
    }

    /// Where `original` is sent upstream.
    pub fn target_uri(&self, original: &Uri) -> Result<Uri, http::Error> {
        let path = join_path(&self.base_path, original.path());
        let path_and_query = match original.query() {
            Some(q) => format!("{path}?{q}"),
            None => path,
        };
        Ok(Uri::builder()
            .scheme(self.scheme.as_str())
            .authority(self.host.as_str())
            .path_and_query(PathAndQuery::try_from(path_and_query)?)
            .build()?)
    }

    async fn forward(&self, req: Request) -> Response {
        let peer = req.remote_addr();
        let mut inbound = req.into_inner();
        let protocol = upgrade_protocol(inbound.headers());
        let client_upgrade = protocol.as_ref().map(|_| hyper::upgrade::on(&mut inbound));
        let (mut parts, body) = inbound.into_parts();

        let uri = match self.target_uri(&parts.uri) {
            Ok(uri) if matches!(uri.scheme_str(), Some("http" | "https")) => uri,
            Ok(uri) => {
                warn!(scheme = %self.scheme, "unsupported upstream scheme in {uri}");
                return Response::status(StatusCode::BAD_GATEWAY);
            }
            Err(e) => {
                warn!(scheme = %self.scheme, host = %self.host, "cannot build upstream uri: {e}");
                return Response::status(StatusCode::BAD_GATEWAY);
            }
        };
        debug!(from = %parts.uri, to = %uri, "forwarding");

        // HTTP/2 clients carry the host in the URI, not in a header.
        let client_host = parts.headers.get(header::HOST).cloned().or_else(|| {
            parts
                .uri
                .authority()
                .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
        });

        parts.uri = uri;
        // The pooled client speaks HTTP/1.1 upstream whatever the client spoke to us.
        parts.version = Version::HTTP_11;
        strip_hop_by_hop(&mut parts.headers);
        if let Some(protocol) = &protocol {
            ask_upgrade(&mut parts.headers, protocol.clone());
        }
        // Without a Host header the client derives it from the upstream authority.
        parts.headers.remove(header::HOST);
        if !self.rewrite_host {
            if let Some(host) = client_host {
                parts.headers.insert(header::HOST, host);
            }
        }
        if let Some(peer) = peer {
            append_forwarded_for(&mut parts.headers, peer.ip());
        }

        let upstream = self.client.request(http::Request::from_parts(parts, body));
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, upstream).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(host = %self.host, timeout_ms = limit.as_millis() as u64, "upstream timed out");
                    return Response::status(StatusCode::GATEWAY_TIMEOUT);
                }
            },
            None => upstream.await,
        };

        match result {
            Ok(res) if res.status() == StatusCode::SWITCHING_PROTOCOLS => {
                switch_protocols(res, protocol, client_upgrade)
            }
            Ok(res) => {
                let (mut parts, body) = res.into_parts();
                strip_hop_by_hop(&mut parts.headers);
                Response::from_http(http::Response::from_parts(parts, body))
            }
            Err(e) => {
                error!(host = %self.host, "upstream error: {e}");
                Response::status(StatusCode::BAD_GATEWAY)
            }
        }
    }
}

/// Answers the client's upgrade with the upstream's `101` and joins the two
/// upgraded connections in a background task.
fn switch_protocols(
    mut res: http::Response<Incoming>,
    requested: Option<HeaderValue>,
    client_upgrade: Option<OnUpgrade>,
) -> Response {
    let (Some(requested), Some(client_upgrade)) = (requested, client_upgrade) else {
        warn!("upstream switched protocols without being asked to");
        return Response::status(StatusCode::BAD_GATEWAY);
    };
    let offered = upgrade_protocol(res.headers());
    if !offered.as_ref().is_some_and(|o| o.as_bytes().eq_ignore_ascii_case(requested.as_bytes())) {
        warn!(?requested, ?offered, "upstream switched to a different protocol");
        return Response::status(StatusCode::BAD_GATEWAY);
    }

    let upstream_upgrade = hyper::upgrade::on(&mut res);
    let (mut parts, _) = res.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    ask_upgrade(&mut parts.headers, requested.clone());

    tokio::spawn(async move {
        let (client, upstream) = match tokio::try_join!(client_upgrade, upstream_upgrade) {
            Ok(pair) => pair,
            Err(e) => {
                warn!(protocol = ?requested, "upgrade failed: {e}");
                return;
            }
        };
        let mut client = TokioIo::new(client);
        let mut upstream = TokioIo::new(upstream);
        match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
            Ok((sent, received)) => {
                debug!(protocol = ?requested, sent, received, "tunnel closed");
            }
            Err(e) => debug!(protocol = ?requested, "tunnel error: {e}"),
        }
    });

    Response::from_http(http::Response::from_parts(parts, body::empty()))
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("base_path", &self.base_path)
            .field("timeout", &self.timeout)
            .field("rewrite_host", &self.rewrite_host)
            .finish_non_exhaustive()
    }
}

/// Joins a base path and a request path with exactly one slash between them.
pub fn join_path(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{base}{}", &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

/// Removes hop-by-hop headers, including any the `Connection` header names.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
    headers.remove(header::UPGRADE);
}

/// The protocol named in `Upgrade`, if `Connection` asks for an upgrade.
fn upgrade_protocol(headers: &HeaderMap) -> Option<HeaderValue> {
    let asks = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    if asks { headers.get(header::UPGRADE).cloned() } else { None }
}

fn ask_upgrade(headers: &mut HeaderMap, protocol: HeaderValue) {
    headers.insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
    headers.insert(header::UPGRADE, protocol);
}

/// Appends `ip` to any `X-Forwarded-For` chain the request already carries.
fn append_forwarded_for(headers: &mut HeaderMap, ip: IpAddr) {
    let prior: Vec<&str> = headers
        .get_all(&X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    let chain = if prior.is_empty() {
        ip.to_string()
    } else {
        format!("{}, {ip}", prior.join(", "))
    };

    if let Ok(value) = HeaderValue::from_str(&chain) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}
