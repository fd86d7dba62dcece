//! Shared utilities for integration tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use forward_proxy::http::{Destination, ResolutionError};
use forward_proxy::net::{ListenerError, Resolver, TcpConnector};
use forward_proxy::{ProxyConfig, ProxyServer, Shutdown};

/// Resolves fixed host names to fixed addresses, ignoring the port.
#[derive(Clone, Default)]
pub struct StaticResolver {
    hosts: HashMap<String, Vec<SocketAddr>>,
    calls: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: &str, addrs: Vec<SocketAddr>) -> Self {
        self.hosts.insert(host.to_string(), addrs);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Resolver for StaticResolver {
    async fn resolve(&self, destination: &Destination) -> Result<Vec<SocketAddr>, ResolutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.hosts
            .get(&destination.host)
            .cloned()
            .ok_or_else(|| ResolutionError::NoAddresses(destination.host.clone()))
    }
}

/// Read from `socket` until the end of an HTTP head.
pub async fn read_head(socket: &mut TcpStream) -> Vec<u8> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match socket.read(&mut byte).await {
            Ok(1) => head.push(byte[0]),
            _ => break,
        }
    }
    head
}

/// Mock origin that reports every request head it receives and answers with `body`.
#[allow(dead_code)]
pub async fn start_recording_backend(body: &'static str) -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let head = read_head(&mut socket).await;
                let _ = tx.send(String::from_utf8_lossy(&head).into_owned());
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, rx)
}

/// Mock origin that echoes everything until the client half-closes.
#[allow(dead_code)]
pub async fn start_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut rd, mut wr) = socket.into_split();
                let _ = tokio::io::copy(&mut rd, &mut wr).await;
                let _ = wr.shutdown().await;
            });
        }
    });

    addr
}

/// An address nothing listens on.
#[allow(dead_code)]
pub async fn dead_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Config for a proxy on an ephemeral loopback port with short timeouts.
pub fn test_config() -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_host = "127.0.0.1".into();
    config.listener.port = 0;
    config.timeouts.connect_ms = 1_000;
    config.timeouts.idle_ms = 2_000;
    config.timeouts.shutdown_grace_ms = 1_000;
    config
}

pub struct ProxyHandle {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub task: JoinHandle<Result<(), ListenerError>>,
}

/// Bind and run a proxy that resolves through `resolver` and dials real TCP.
pub async fn spawn_proxy(config: ProxyConfig, resolver: StaticResolver) -> ProxyHandle {
    let server = ProxyServer::with_upstream(config, resolver, TcpConnector);
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addrs()[0];

    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    let task = tokio::spawn(async move { server.run(listener, receiver).await });

    ProxyHandle { addr, shutdown, task }
}

/// Send `request` through the proxy, half-close, and collect the whole reply.
pub async fn send_raw(proxy: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(request).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    String::from_utf8_lossy(&reply).into_owned()
}
