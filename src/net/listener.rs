//! TCP listener implementation.
//!
//! # Responsibilities
//! - Resolve the bind host and bind every returned address
//! - Accept incoming TCP connections from any bound socket
//! - Optionally enforce max_connections via semaphore
//!
//! # Design Decisions
//! - Binding is all-or-nothing: one failed address fails startup
//! - Accept errors are per-connection and never stop the listener

use std::net::SocketAddr;
use std::sync::Arc;
use futures_util::future::select_all;
use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// The bind host could not be resolved.
    Resolve { host: String, source: std::io::Error },
    /// The bind host resolved to no IPv4/IPv6 address.
    NoAddresses(String),
    /// Failed to bind or listen on an address.
    Bind { addr: SocketAddr, source: std::io::Error },
    /// Failed to accept connection.
    Accept(std::io::Error),
    /// The connection limit semaphore was closed.
    Closed,
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Resolve { host, source } => {
                write!(f, "Failed to resolve {}: {}", host, source)
            }
            ListenerError::NoAddresses(host) => write!(f, "{} has no IPv4/6 addresses", host),
            ListenerError::Bind { addr, source } => write!(f, "Failed to bind {}: {}", addr, source),
            ListenerError::Accept(e) => write!(f, "Failed to accept: {}", e),
            ListenerError::Closed => write!(f, "Listener closed"),
        }
    }
}

impl std::error::Error for ListenerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ListenerError::Resolve { source, .. } | ListenerError::Bind { source, .. } => Some(source),
            ListenerError::Accept(e) => Some(e),
            _ => None,
        }
    }
}

/// Bind a listening socket on every address `host` resolves to.
pub async fn bind_all_addresses(
    host: &str,
    port: u16,
    backlog: u32,
) -> Result<Vec<TcpListener>, ListenerError> {
    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|source| ListenerError::Resolve {
            host: host.to_string(),
            source,
        })?
        .collect();

    if addrs.is_empty() {
        return Err(ListenerError::NoAddresses(host.to_string()));
    }

    let mut listeners = Vec::with_capacity(addrs.len());
    for addr in addrs {
        let listener = bind_one(addr, backlog).map_err(|source| ListenerError::Bind { addr, source })?;
        tracing::info!(address = %listener.local_addr().unwrap_or(addr), "Listening");
        listeners.push(listener);
    }

    Ok(listeners)
}

fn bind_one(addr: SocketAddr, backlog: u32) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}

/// A set of bound TCP listeners with an optional connection limit.
pub struct Listener {
    inner: Vec<TcpListener>,
    connection_limit: Option<Arc<Semaphore>>,
}

impl Listener {
    /// Bind to the configured host and port.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let inner = bind_all_addresses(&config.bind_host, config.port, config.backlog).await?;

        tracing::info!(
            host = %config.bind_host,
            sockets = inner.len(),
            max_connections = ?config.max_connections,
            "Listener bound"
        );

        Ok(Self {
            inner,
            connection_limit: config.max_connections.map(|n| Arc::new(Semaphore::new(n))),
        })
    }

    /// Accept a new connection from whichever socket is ready first.
    ///
    /// With a connection limit, this waits for a free slot before accepting.
    /// The returned permit must be held for the connection's lifetime.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        let permit = match &self.connection_limit {
            Some(limit) => Some(
                Arc::clone(limit)
                    .acquire_owned()
                    .await
                    .map_err(|_| ListenerError::Closed)?,
            ),
            None => None,
        };

        let accepts = self.inner.iter().map(|l| Box::pin(l.accept()));
        let (result, _, _) = select_all(accepts).await;
        let (stream, addr) = result.map_err(ListenerError::Accept)?;

        tracing::debug!(peer_addr = %addr, "Connection accepted");

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    /// Addresses of all bound sockets.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.inner.iter().filter_map(|l| l.local_addr().ok()).collect()
    }

    /// Free connection slots, if a limit is configured.
    pub fn available_permits(&self) -> Option<usize> {
        self.connection_limit.as_ref().map(|s| s.available_permits())
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: Option<OwnedSemaphorePermit>,
}
