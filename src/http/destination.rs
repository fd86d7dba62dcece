//! Destination extraction from the `Host` header.

use std::fmt;
use thiserror::Error;

use crate::http::request::Request;

/// Port used when the `Host` header does not name one.
pub const DEFAULT_PORT: &str = "80";

/// Errors raised while working out where a request should go.
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// The request carries no `Host` header.
    #[error("request has no Host header")]
    MissingHost,

    /// The port part of the `Host` header is not a valid TCP port.
    #[error("invalid port: {0}")]
    InvalidPort(String),

    /// Name resolution failed.
    #[error("lookup of {host} failed: {source}")]
    Lookup {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// Resolution succeeded but produced no IPv4 or IPv6 address.
    #[error("{0} has no IPv4/IPv6 addresses")]
    NoAddresses(String),
}

/// Upstream host and port named by a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub host: String,
    pub port: String,
}

impl Destination {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
    }

    pub fn port_number(&self) -> Result<u16, ResolutionError> {
        self.port
            .parse()
            .map_err(|_| ResolutionError::InvalidPort(self.port.clone()))
    }

    pub fn as_pair(&self) -> (&str, &str) {
        (&self.host, &self.port)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Extract the destination from the request's `Host` header.
pub fn destination(request: &Request) -> Result<Destination, ResolutionError> {
    let host = request
        .headers
        .get("Host")
        .ok_or(ResolutionError::MissingHost)?;

    // [v6-literal]:port
    if let Some(rest) = host.strip_prefix('[') {
        if let Some((addr, tail)) = rest.split_once(']') {
            let port = tail.strip_prefix(':').unwrap_or(DEFAULT_PORT);
            return Ok(Destination::new(addr, port));
        }
    }

    Ok(match host.split_once(':') {
        Some((name, port)) => Destination::new(name, port),
        None => Destination::new(host, DEFAULT_PORT),
    })
}
