//! Unified error type.

use std::fmt;
use std::io;

/// The error type returned by interpose's fallible operations.
///
/// Upstream failures are expressed as HTTP responses (`502`, `504`), not as
/// `Error`s. This type surfaces the fatal conditions that stop the proxy from
/// serving at all: binding the listen address and a broken listener.
#[derive(Debug)]
pub enum Error {
    /// The listen address could not be bound (in use, permission denied,
    /// unresolvable host).
    Bind { addr: String, source: io::Error },
    /// The listener itself failed and cannot accept further connections.
    Accept(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind { addr, source } => write!(f, "bind {addr}: {source}"),
            Self::Accept(e) => write!(f, "accept: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bind { source, .. } => Some(source),
            Self::Accept(e) => Some(e),
        }
    }
}
