//! Shared fixtures: a recording upstream, a running proxy, a plain client.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONNECTION, UPGRADE};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Channel, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use interpose::{Chain, Config, Proxy, Server};

/// What the upstream saw of one request.
#[derive(Clone, Debug)]
#[allow(dead_code)]
pub struct Seen {
    pub method: String,
    pub uri: String,
    pub host: Option<String>,
    pub forwarded_for: Option<String>,
    pub upgrade: Option<String>,
    pub has_connection_header: bool,
    pub body: Bytes,
}

/// A running upstream and the requests it has answered.
#[allow(dead_code)]
pub struct Upstream {
    pub addr: SocketAddr,
    pub seen: Arc<Mutex<Vec<Seen>>>,
    /// Every request body chunk, as soon as the upstream reads it.
    pub chunks: mpsc::UnboundedReceiver<Bytes>,
}

#[allow(dead_code)]
impl Upstream {
    pub fn hits(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn last(&self) -> Seen {
        self.seen.lock().unwrap().last().cloned().expect("upstream saw no request")
    }
}

/// Size of the body served under any path ending in `/big`.
#[allow(dead_code)]
pub const BIG_BODY_LEN: usize = 4 * 1024 * 1024;

#[derive(Clone)]
struct Recorder {
    seen: Arc<Mutex<Vec<Seen>>>,
    chunks: mpsc::UnboundedSender<Bytes>,
}

type UpstreamBody = BoxBody<Bytes, Infallible>;

/// Starts an upstream that records every request and answers
/// `200 upstream saw <uri>` with an `x-upstream: yes` header.
///
/// By path suffix:
/// - `/slow` answers after two seconds;
/// - `/big` answers with [`BIG_BODY_LEN`] bytes;
/// - `/stream` sends `first`, then holds the body open for ten seconds;
/// - `/ws` switches to whatever `Upgrade` asks for and echoes bytes back.
pub async fn start_upstream() -> Upstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (chunks_tx, chunks) = mpsc::unbounded_channel();

    let recorder = Recorder { seen: Arc::clone(&seen), chunks: chunks_tx };
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { break };
            let recorder = recorder.clone();
            tokio::spawn(async move {
                let svc = service_fn(move |req| answer(recorder.clone(), req));
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), svc)
                    .with_upgrades()
                    .await;
            });
        }
    });

    Upstream { addr, seen, chunks }
}

async fn answer(
    recorder: Recorder,
    mut req: hyper::Request<Incoming>,
) -> Result<hyper::Response<UpstreamBody>, Infallible> {
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    };
    let method = req.method().to_string();
    let uri = req.uri().to_string();
    let host = header("host");
    let forwarded_for = header("x-forwarded-for");
    let upgrade = header("upgrade");
    let has_connection_header = req.headers().contains_key("connection");

    let switch = match &upgrade {
        Some(protocol) if uri.ends_with("/ws") => Some((protocol.clone(), hyper::upgrade::on(&mut req))),
        _ => None,
    };

    let mut incoming = req.into_body();
    let mut body = Vec::new();
    while let Some(Ok(frame)) = incoming.frame().await {
        if let Ok(data) = frame.into_data() {
            let _ = recorder.chunks.send(data.clone());
            body.extend_from_slice(&data);
        }
    }

    recorder.seen.lock().unwrap().push(Seen {
        method,
        uri: uri.clone(),
        host,
        forwarded_for,
        upgrade,
        has_connection_header,
        body: Bytes::from(body),
    });

    if let Some((protocol, on_upgrade)) = switch {
        tokio::spawn(async move {
            if let Ok(upgraded) = on_upgrade.await {
                let (mut reader, mut writer) = tokio::io::split(TokioIo::new(upgraded));
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            }
        });
        return Ok(hyper::Response::builder()
            .status(101)
            .header(CONNECTION, "upgrade")
            .header(UPGRADE, protocol)
            .body(Full::default().boxed())
            .unwrap());
    }

    if uri.ends_with("/slow") {
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
    let body = if uri.ends_with("/stream") {
        let (mut tx, body) = Channel::<Bytes, Infallible>::new(1);
        tokio::spawn(async move {
            let _ = tx.send_data(Bytes::from_static(b"first")).await;
            tokio::time::sleep(Duration::from_secs(10)).await;
            let _ = tx.send_data(Bytes::from_static(b"last")).await;
        });
        body.boxed()
    } else if uri.ends_with("/big") {
        Full::new(Bytes::from(vec![b'x'; BIG_BODY_LEN])).boxed()
    } else {
        Full::new(Bytes::from(format!("upstream saw {uri}"))).boxed()
    };

    Ok(hyper::Response::builder()
        .status(200)
        .header("x-upstream", "yes")
        .body(body)
        .unwrap())
}

/// Serves `chain` in front of a proxy for `config` on an ephemeral port.
pub async fn start_proxy(config: &Config, chain: Chain) -> SocketAddr {
    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr();
    let handler = chain.then(Proxy::new(config).into_handler());
    tokio::spawn(server.serve(handler));
    addr
}

/// An address nothing listens on.
#[allow(dead_code)]
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub type TestClient = Client<HttpConnector, Full<Bytes>>;

pub fn client() -> TestClient {
    Client::builder(TokioExecutor::new()).build_http()
}

/// Sends `GET http://{addr}{path_and_query}` with `headers`; returns status,
/// response headers and the collected body.
pub async fn get(
    client: &TestClient,
    addr: SocketAddr,
    path_and_query: &str,
    headers: &[(&str, &str)],
) -> (http::StatusCode, http::HeaderMap, Bytes) {
    let mut req = hyper::Request::get(format!("http://{addr}{path_and_query}"));
    for (name, value) in headers {
        req = req.header(*name, *value);
    }
    let res = client.request(req.body(Full::default()).unwrap()).await.unwrap();
    let (parts, body) = res.into_parts();
    let body = body.collect().await.unwrap().to_bytes();
    (parts.status, parts.headers, body)
}
