//! Outbound name resolution and dialing.
//!
//! # Responsibilities
//! - Resolve a destination to candidate socket addresses
//! - Dial candidates in order until one connects
//!
//! # Design Decisions
//! - Resolver and Connector are traits so tests can substitute in-memory peers
//! - Dialing stops at the first success; remaining candidates are never tried
//! - Each attempt has its own deadline; a timed-out attempt counts as a failure

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{lookup_host, TcpStream};

use crate::http::destination::{Destination, ResolutionError};

/// Asynchronous name resolution.
pub trait Resolver: Send + Sync + 'static {
    fn resolve(
        &self,
        destination: &Destination,
    ) -> impl Future<Output = Result<Vec<SocketAddr>, ResolutionError>> + Send;
}

/// Outbound stream factory.
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn connect(&self, addr: SocketAddr) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Resolver backed by the operating system (`getaddrinfo`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    async fn resolve(&self, destination: &Destination) -> Result<Vec<SocketAddr>, ResolutionError> {
        let port = destination.port_number()?;
        let addrs: Vec<SocketAddr> = lookup_host((destination.host.as_str(), port))
            .await
            .map_err(|source| ResolutionError::Lookup {
                host: destination.host.clone(),
                source,
            })?
            .collect();

        if addrs.is_empty() {
            return Err(ResolutionError::NoAddresses(destination.host.clone()));
        }
        Ok(addrs)
    }
}

/// Plain TCP connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Every candidate address failed to connect.
#[derive(Debug, Error)]
#[error("all {attempts} connect attempts failed, last error: {last}")]
pub struct ConnectError {
    pub attempts: usize,
    #[source]
    pub last: io::Error,
}

impl ConnectError {
    pub fn timed_out(&self) -> bool {
        self.last.kind() == io::ErrorKind::TimedOut
    }
}

/// Dial `addrs` in order and return the first stream that connects.
pub async fn connect_first_successful<C: Connector>(
    connector: &C,
    addrs: &[SocketAddr],
    per_attempt: Duration,
) -> Result<(C::Stream, SocketAddr), ConnectError> {
    let mut last = io::Error::new(io::ErrorKind::AddrNotAvailable, "no candidate addresses");

    for (attempt, &addr) in addrs.iter().enumerate() {
        let result = match tokio::time::timeout(per_attempt, connector.connect(addr)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")),
        };

        match result {
            Ok(stream) => {
                tracing::debug!(%addr, attempt = attempt + 1, "Upstream connected");
                return Ok((stream, addr));
            }
            Err(e) => {
                tracing::debug!(%addr, attempt = attempt + 1, error = %e, "Upstream connect failed");
                last = e;
            }
        }
    }

    Err(ConnectError {
        attempts: addrs.len(),
        last,
    })
}
