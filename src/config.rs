//! Proxy configuration.

use std::time::Duration;

/// Everything needed to run the proxy: where to listen and where to forward.
///
/// Values are taken as given. A malformed `scheme` or `host` is not rejected
/// here; every proxied request then fails with `502 Bad Gateway`.
///
/// With the `clap` feature enabled, `Config` derives [`clap::Args`] so a host
/// program can `#[command(flatten)]` it into its own command line:
/// `--addr`, `--scheme`, `--host`, `--basepath`, `--rewrite-host`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::Args))]
pub struct Config {
    /// The address on which to serve the proxy, e.g. `:8080`.
    #[cfg_attr(feature = "clap", arg(long, default_value = ":8080"))]
    pub addr: String,
    /// The scheme for the remote server: `http` or `https`.
    #[cfg_attr(feature = "clap", arg(long, default_value = "http"))]
    pub scheme: String,
    /// The authority of the remote server, `host[:port]`.
    #[cfg_attr(feature = "clap", arg(long))]
    pub host: String,
    /// The base path of the remote server, prepended to every request path.
    #[cfg_attr(feature = "clap", arg(long = "basepath", default_value = ""))]
    pub base_path: String,
    /// Deadline for the upstream to answer with a response head. `None`
    /// waits forever.
    #[cfg_attr(feature = "clap", arg(skip))]
    pub upstream_timeout: Option<Duration>,
    /// Send the upstream's own authority as `Host` instead of the one the
    /// client sent. Needed for virtual-hosted upstreams.
    #[cfg_attr(feature = "clap", arg(long))]
    pub rewrite_host: bool,
}

impl Config {
    /// A config with no upstream timeout that forwards the client's `Host`.
    pub fn new(
        addr: impl Into<String>,
        scheme: impl Into<String>,
        host: impl Into<String>,
        base_path: impl Into<String>,
    ) -> Self {
        Self {
            addr: addr.into(),
            scheme: scheme.into(),
            host: host.into(),
            base_path: base_path.into(),
            upstream_timeout: None,
            rewrite_host: false,
        }
    }

    /// Answers `504` when the upstream takes longer than `timeout` to respond.
    pub fn upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = Some(timeout);
        self
    }

    /// Replaces the client's `Host` with the upstream authority when `rewrite`.
    pub fn rewrite_host(mut self, rewrite: bool) -> Self {
        self.rewrite_host = rewrite;
        self
    }

    /// The address handed to the socket resolver.
    ///
    /// A missing host (`:8080`) means every interface; an empty address means
    /// every interface on port 80. Anything else, including host names such as
    /// `localhost:8080`, passes through untouched.
    pub fn listen_addr(&self) -> String {
        if self.addr.is_empty() {
            "0.0.0.0:80".to_owned()
        } else if self.addr.starts_with(':') {
            format!("0.0.0.0{}", self.addr)
        } else {
            self.addr.clone()
        }
    }

    /// The upstream target, `scheme://host/base`, for logs.
    pub fn target(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host, self.base_path)
    }
}
