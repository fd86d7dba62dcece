//! Per-session request pipeline.
//!
//! # Responsibilities
//! - Accumulate the request head from partial reads
//! - Parse, sanitize and locate the destination
//! - Resolve and dial the upstream
//! - Forward the request head (and any early body bytes), then relay
//! - Answer failures with an error response while nothing has been forwarded
//!
//! # Design Decisions
//! - Every step reports a `SessionEvent`; the session's state machine decides what is legal
//! - Config, resolver and connector are injected; nothing is global
//! - Header buffers come from a shared pool and go back when the session drops

use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::ProxyConfig;
use crate::http::{
    destination, find_header_end, normalize_target, strip_proxy_headers, ErrorResponse,
    ParseError, Request, ResolutionError,
};
use crate::net::{connect_first_successful, ConnectError, ConnectionId, Connector, Resolver};
use crate::observability::metrics;
use crate::proxy::buffer::BufferPool;
use crate::proxy::relay::{relay, RelayError};
use crate::proxy::session::{CloseReason, Session, SessionEvent, SessionReport};
use crate::resilience::{with_timeout, Stage, TimeoutError};

/// Everything that can end a session early.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("client closed the connection before sending a request")]
    ClientClosed,

    #[error("malformed request: {0}")]
    Parse(#[from] ParseError),

    #[error("cannot resolve destination: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("cannot reach upstream: {0}")]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("session closed on unexpected {0:?} event")]
    Aborted(SessionEvent),
}

impl SessionError {
    pub fn reason(&self) -> CloseReason {
        match self {
            SessionError::ClientClosed => CloseReason::ClientClosed,
            SessionError::Parse(_) => CloseReason::ParseFailed,
            SessionError::Resolution(_) => CloseReason::ResolutionFailed,
            SessionError::Connect(_) => CloseReason::ConnectFailed,
            SessionError::Timeout(_) | SessionError::Relay(RelayError::Idle { .. }) => CloseReason::TimedOut,
            SessionError::Relay(RelayError::Io { .. }) | SessionError::Io(_) => CloseReason::Io,
            SessionError::Aborted(_) => CloseReason::Protocol,
        }
    }

    /// Response owed to the client for this failure, if any.
    pub fn response(&self) -> Option<ErrorResponse> {
        match self {
            SessionError::Parse(_) => Some(ErrorResponse::BadRequest),
            SessionError::Resolution(ResolutionError::MissingHost | ResolutionError::InvalidPort(_)) => {
                Some(ErrorResponse::BadRequest)
            }
            SessionError::Resolution(_) => Some(ErrorResponse::BadGateway),
            SessionError::Connect(e) if e.timed_out() => Some(ErrorResponse::GatewayTimeout),
            SessionError::Connect(_) => Some(ErrorResponse::BadGateway),
            SessionError::Timeout(t) => Some(match t.stage {
                Stage::ReadHeader => ErrorResponse::RequestTimeout,
                _ => ErrorResponse::GatewayTimeout,
            }),
            SessionError::ClientClosed | SessionError::Relay(_) | SessionError::Io(_) | SessionError::Aborted(_) => None,
        }
    }
}

/// Apply `event`, failing the session if the state machine rejected it.
fn step<S, U>(session: &mut Session<S, U>, event: SessionEvent) -> Result<(), SessionError>
where
    S: AsyncWrite + Unpin,
    U: AsyncWrite + Unpin,
{
    if session.advance(event).is_closed() {
        return Err(SessionError::Aborted(event));
    }
    Ok(())
}

fn not_connected() -> SessionError {
    io::Error::new(io::ErrorKind::NotConnected, "session socket already released").into()
}

/// Drives sessions from accept to close.
pub struct Pipeline<R, C> {
    config: Arc<ProxyConfig>,
    resolver: R,
    connector: C,
    buffers: Arc<BufferPool>,
}

impl<R: Resolver, C: Connector> Pipeline<R, C> {
    pub fn new(config: Arc<ProxyConfig>, resolver: R, connector: C) -> Self {
        let limits = &config.limits;
        let buffers = BufferPool::new(
            limits.read_chunk_bytes,
            limits.max_header_bytes + limits.read_chunk_bytes,
            limits.pooled_buffers,
        );
        Self {
            config,
            resolver,
            connector,
            buffers,
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Run one session over `inbound` until it closes.
    pub async fn serve<S>(&self, id: ConnectionId, inbound: S) -> SessionReport
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut session: Session<S, C::Stream> = Session::new(id, inbound, self.buffers.acquire());
        metrics::session_opened();

        if let Err(err) = self.drive(&mut session).await {
            self.fail(&mut session, err).await;
        }
        session.close().await;

        let report = session.report();
        metrics::session_closed(&report, session.started().elapsed());
        tracing::debug!(
            connection_id = %id,
            reason = %report.reason,
            bytes_to_upstream = report.bytes_to_upstream,
            bytes_to_client = report.bytes_to_client,
            "Session closed"
        );
        report
    }

    async fn drive<S>(&self, session: &mut Session<S, C::Stream>) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let timeouts = &self.config.timeouts;

        let head_len = self.read_head(session).await?;
        let mut request = Request::parse(&session.buffer[..head_len])?;
        step(session, SessionEvent::HeaderParsed)?;

        strip_proxy_headers(&mut request);
        let dest = destination(&request)?;
        request.target = normalize_target(&request.target).to_string();
        // Persistent connections are not relayed; ask the origin to close after responding.
        request.headers.set("Connection", "close");

        tracing::info!(
            connection_id = %session.id(),
            method = %request.method,
            target = %request.target,
            destination = %dest,
            "Forwarding request"
        );
        session.request = Some(request);
        step(session, SessionEvent::DestinationFound)?;

        let addrs = with_timeout(Stage::Resolve, timeouts.connect(), self.resolver.resolve(&dest)).await??;
        if addrs.is_empty() {
            return Err(ResolutionError::NoAddresses(dest.host.clone()).into());
        }
        step(session, SessionEvent::ResolveDone)?;

        let (upstream, addr) = connect_first_successful(&self.connector, &addrs, timeouts.connect()).await?;
        tracing::debug!(connection_id = %session.id(), upstream = %addr, "Connected to upstream");
        session.attach_outbound(upstream);
        step(session, SessionEvent::ConnectDone)?;

        self.forward(session, head_len).await?;
        step(session, SessionEvent::WriteDone)?;

        let (Some(inbound), Some(outbound)) = (session.inbound.as_mut(), session.outbound.as_mut()) else {
            return Err(not_connected());
        };
        let result = relay(inbound, outbound, self.config.limits.relay_buffer_bytes, timeouts.idle()).await;
        let stats = match &result {
            Ok(stats) => *stats,
            Err(e) => e.stats(),
        };
        session.bytes_to_upstream += stats.client_to_upstream;
        session.bytes_to_client += stats.upstream_to_client;
        result?;
        session.advance(SessionEvent::RelayDone);

        Ok(())
    }

    /// Read until a complete request head is buffered. Returns its length.
    async fn read_head<S>(&self, session: &mut Session<S, C::Stream>) -> Result<usize, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let limits = &self.config.limits;
        let idle = self.config.timeouts.idle();

        loop {
            if let Some(len) = find_header_end(&session.buffer) {
                if len > limits.max_header_bytes {
                    break;
                }
                return Ok(len);
            }
            if session.buffer.len() > limits.max_header_bytes {
                break;
            }

            let Some(inbound) = session.inbound.as_mut() else {
                return Err(not_connected());
            };
            session.buffer.reserve(limits.read_chunk_bytes);
            let n = with_timeout(Stage::ReadHeader, idle, inbound.read_buf(&mut *session.buffer)).await??;

            if n == 0 {
                if session.buffer.is_empty() {
                    return Err(SessionError::ClientClosed);
                }
                // EOF inside the head: parse whatever arrived.
                return Ok(session.buffer.len());
            }
            step(session, SessionEvent::ReadDone)?;
        }

        Err(ParseError::HeaderTooLarge {
            limit: limits.max_header_bytes,
        }
        .into())
    }

    /// Write the serialized head and any body bytes read past it.
    async fn forward<S>(&self, session: &mut Session<S, C::Stream>, head_len: usize) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut head = session.request.as_ref().ok_or_else(not_connected)?.serialize();
        head.extend_from_slice(b"\r\n");

        let early_body = &session.buffer[head_len..];
        let outbound = session.outbound.as_mut().ok_or_else(not_connected)?;
        let total = (head.len() + early_body.len()) as u64;

        with_timeout(Stage::Forward, self.config.timeouts.idle(), async {
            outbound.write_all(&head).await?;
            outbound.write_all(early_body).await?;
            outbound.flush().await
        })
        .await??;

        session.bytes_to_upstream += total;
        Ok(())
    }

    async fn fail<S>(&self, session: &mut Session<S, C::Stream>, err: SessionError)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let reason = err.reason();
        if reason == CloseReason::ClientClosed {
            tracing::debug!(connection_id = %session.id(), "Client closed before sending a request");
        } else {
            tracing::warn!(
                connection_id = %session.id(),
                state = ?session.state(),
                error = %err,
                "Session failed"
            );
        }

        let respond = self.config.responses.send_error_responses && !session.state().has_forwarded();
        if let (true, Some(response), Some(inbound)) = (respond, err.response(), session.inbound.as_mut()) {
            let bytes = response.to_bytes();
            let write = async {
                inbound.write_all(&bytes).await?;
                inbound.flush().await
            };
            match with_timeout(Stage::Forward, self.config.timeouts.idle(), write).await {
                Ok(Ok(())) => session.bytes_to_client += bytes.len() as u64,
                Ok(Err(e)) => tracing::debug!(error = %e, "Failed to send error response"),
                Err(e) => tracing::debug!(error = %e, "Failed to send error response"),
            }
        }

        session.advance(SessionEvent::Failed(reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Destination;
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{duplex, DuplexStream};
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct MapResolver {
        hosts: HashMap<String, Vec<SocketAddr>>,
        calls: AtomicUsize,
    }

    impl Resolver for MapResolver {
        async fn resolve(&self, destination: &Destination) -> Result<Vec<SocketAddr>, ResolutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.hosts
                .get(&destination.host)
                .cloned()
                .ok_or_else(|| ResolutionError::NoAddresses(destination.host.clone()))
        }
    }

    /// Hands the far end of each dialed duplex pipe to the test.
    struct PipeConnector {
        refuse: bool,
        calls: AtomicUsize,
        peers: mpsc::UnboundedSender<DuplexStream>,
    }

    impl Connector for PipeConnector {
        type Stream = DuplexStream;

        async fn connect(&self, _addr: SocketAddr) -> io::Result<DuplexStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.refuse {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
            }
            let (ours, theirs) = duplex(8 * 1024);
            let _ = self.peers.send(theirs);
            Ok(ours)
        }
    }

    struct Harness {
        pipeline: Arc<Pipeline<MapResolver, PipeConnector>>,
        upstreams: mpsc::UnboundedReceiver<DuplexStream>,
    }

    impl Harness {
        fn new(config: ProxyConfig, refuse: bool) -> Self {
            let mut resolver = MapResolver::default();
            resolver
                .hosts
                .insert("origin.test".into(), vec![SocketAddr::from(([10, 0, 0, 1], 80))]);
            let (tx, rx) = mpsc::unbounded_channel();
            let connector = PipeConnector {
                refuse,
                calls: AtomicUsize::new(0),
                peers: tx,
            };
            Self {
                pipeline: Arc::new(Pipeline::new(Arc::new(config), resolver, connector)),
                upstreams: rx,
            }
        }

        fn start(&self) -> (DuplexStream, tokio::task::JoinHandle<SessionReport>) {
            let (client, proxy_side) = duplex(8 * 1024);
            let pipeline = Arc::clone(&self.pipeline);
            let handle = tokio::spawn(async move { pipeline.serve(ConnectionId::next(), proxy_side).await });
            (client, handle)
        }

        fn resolver_calls(&self) -> usize {
            self.pipeline.resolver.calls.load(Ordering::SeqCst)
        }

        fn dial_calls(&self) -> usize {
            self.pipeline.connector.calls.load(Ordering::SeqCst)
        }
    }

    fn test_config() -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.timeouts.connect_ms = 500;
        config.timeouts.idle_ms = 2_000;
        config
    }

    async fn read_head(stream: &mut DuplexStream) -> String {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        while !buf.ends_with(b"\r\n\r\n") {
            stream.read_exact(&mut byte).await.unwrap();
            buf.push(byte[0]);
        }
        String::from_utf8(buf).unwrap()
    }

    async fn read_all(stream: &mut DuplexStream) -> String {
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn partial_reads_accumulate_into_one_request() {
        let mut harness = Harness::new(test_config(), false);
        let (mut client, session) = harness.start();

        for chunk in ["GET http://origin.test/x HTTP/1.1\r\nHo", "st: origin.test\r\n", "\r\n"] {
            client.write_all(chunk.as_bytes()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let mut upstream = harness.upstreams.recv().await.unwrap();
        let head = read_head(&mut upstream).await;
        assert!(head.starts_with("GET /x HTTP/1.1\r\n"));
        assert!(head.contains("Host:origin.test\r\n"));
        assert!(head.contains("Connection:close\r\n"));

        upstream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").await.unwrap();
        upstream.shutdown().await.unwrap();
        client.shutdown().await.unwrap();

        let response = read_all(&mut client).await;
        assert!(response.ends_with("\r\n\r\nok"));

        let report = session.await.unwrap();
        assert_eq!(report.reason, CloseReason::Completed);
        assert_eq!(report.bytes_to_client, response.len() as u64);
    }

    #[tokio::test]
    async fn early_body_bytes_follow_the_head() {
        let mut harness = Harness::new(test_config(), false);
        let (mut client, session) = harness.start();

        client
            .write_all(b"POST http://origin.test/submit HTTP/1.0\r\nHost: origin.test\r\nContent-Length: 5\r\n\r\nhello")
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        let mut upstream = harness.upstreams.recv().await.unwrap();
        let forwarded = read_all(&mut upstream).await;
        assert!(forwarded.starts_with("POST /submit HTTP/1.0\r\n"));
        assert!(forwarded.ends_with("\r\n\r\nhello"));

        drop(upstream);
        let report = session.await.unwrap();
        assert_eq!(report.bytes_to_upstream, forwarded.len() as u64);
    }

    #[tokio::test]
    async fn unknown_method_gets_400_and_no_upstream() {
        let harness = Harness::new(test_config(), false);
        let (mut client, session) = harness.start();

        client.write_all(b"BOGUS / HTTP/1.1\r\n\r\n").await.unwrap();
        let response = read_all(&mut client).await;

        assert!(response.starts_with("HTTP/1.0 400 Bad Request\r\n"));
        assert_eq!(session.await.unwrap().reason, CloseReason::ParseFailed);
        assert_eq!(harness.resolver_calls(), 0);
        assert_eq!(harness.dial_calls(), 0);
    }

    #[tokio::test]
    async fn silent_mode_closes_without_response() {
        let mut config = test_config();
        config.responses.send_error_responses = false;
        let harness = Harness::new(config, false);
        let (mut client, session) = harness.start();

        client.write_all(b"BOGUS / HTTP/1.1\r\n\r\n").await.unwrap();
        assert_eq!(read_all(&mut client).await, "");
        assert_eq!(session.await.unwrap().reason, CloseReason::ParseFailed);
    }

    #[tokio::test]
    async fn missing_host_never_dials() {
        let harness = Harness::new(test_config(), false);
        let (mut client, session) = harness.start();

        client.write_all(b"GET /no-host HTTP/1.1\r\nAccept: */*\r\n\r\n").await.unwrap();
        let response = read_all(&mut client).await;

        assert!(response.starts_with("HTTP/1.0 400 "));
        assert_eq!(session.await.unwrap().reason, CloseReason::ResolutionFailed);
        assert_eq!(harness.resolver_calls(), 0);
        assert_eq!(harness.dial_calls(), 0);
    }

    #[tokio::test]
    async fn unresolvable_host_gets_502() {
        let harness = Harness::new(test_config(), false);
        let (mut client, session) = harness.start();

        client.write_all(b"GET / HTTP/1.1\r\nHost: nowhere.test\r\n\r\n").await.unwrap();
        let response = read_all(&mut client).await;

        assert!(response.starts_with("HTTP/1.0 502 "));
        assert_eq!(session.await.unwrap().reason, CloseReason::ResolutionFailed);
        assert_eq!(harness.dial_calls(), 0);
    }

    #[tokio::test]
    async fn refused_connect_gets_502() {
        let harness = Harness::new(test_config(), true);
        let (mut client, session) = harness.start();

        client.write_all(b"GET / HTTP/1.1\r\nHost: origin.test\r\n\r\n").await.unwrap();
        let response = read_all(&mut client).await;

        assert!(response.starts_with("HTTP/1.0 502 "));
        assert_eq!(session.await.unwrap().reason, CloseReason::ConnectFailed);
        assert_eq!(harness.dial_calls(), 1);
    }

    #[tokio::test]
    async fn oversized_head_is_rejected() {
        let mut config = test_config();
        config.limits.max_header_bytes = 64;
        config.limits.read_chunk_bytes = 16;
        let harness = Harness::new(config, false);
        let (mut client, session) = harness.start();

        let mut raw = b"GET / HTTP/1.1\r\nHost: origin.test\r\nX-Pad: ".to_vec();
        raw.extend(std::iter::repeat(b'a').take(200));
        client.write_all(&raw).await.unwrap();

        let response = read_all(&mut client).await;
        assert!(response.starts_with("HTTP/1.0 400 "));
        assert_eq!(session.await.unwrap().reason, CloseReason::ParseFailed);
        assert_eq!(harness.resolver_calls(), 0);
    }

    #[tokio::test]
    async fn stalled_client_times_out_with_408() {
        let mut config = test_config();
        config.timeouts.idle_ms = 50;
        let harness = Harness::new(config, false);
        let (mut client, session) = harness.start();

        client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        let response = read_all(&mut client).await;

        assert!(response.starts_with("HTTP/1.0 408 "));
        assert_eq!(session.await.unwrap().reason, CloseReason::TimedOut);
    }

    #[tokio::test]
    async fn immediate_disconnect_is_quiet() {
        let harness = Harness::new(test_config(), false);
        let (client, session) = harness.start();
        drop(client);

        let report = session.await.unwrap();
        assert_eq!(report.reason, CloseReason::ClientClosed);
        assert_eq!(report.bytes_to_client, 0);
    }

    #[tokio::test]
    async fn idle_close_still_counts_relayed_bytes() {
        let mut config = test_config();
        config.timeouts.idle_ms = 100;
        let mut harness = Harness::new(config, false);
        let (mut client, session) = harness.start();

        let request = b"GET http://origin.test/ HTTP/1.1\r\nHost: origin.test\r\n\r\n";
        client.write_all(request).await.unwrap();

        let mut upstream = harness.upstreams.recv().await.unwrap();
        read_head(&mut upstream).await;
        let response = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
        upstream.write_all(response).await.unwrap();
        upstream.shutdown().await.unwrap();

        // The client reads everything but keeps its write side open.
        let received = read_all(&mut client).await;
        assert_eq!(received.len(), response.len());

        let report = session.await.unwrap();
        assert_eq!(report.reason, CloseReason::TimedOut);
        assert_eq!(report.bytes_to_client, response.len() as u64);
        assert!(report.bytes_to_upstream > 0);
    }

    #[test]
    fn rejected_transition_aborts_the_session() {
        let pool = BufferPool::new(64, 1024, 1);
        let (inbound, _peer) = duplex(64);
        let mut session: Session<DuplexStream, DuplexStream> =
            Session::new(ConnectionId::next(), inbound, pool.acquire());

        // Nothing has been read yet, so a parsed header is out of order.
        let err = step(&mut session, SessionEvent::HeaderParsed).unwrap_err();

        assert!(matches!(err, SessionError::Aborted(SessionEvent::HeaderParsed)));
        assert_eq!(err.reason(), CloseReason::Protocol);
        assert!(err.response().is_none());
        assert!(session.state().is_closed());
        assert_eq!(session.report().reason, CloseReason::Protocol);
    }

    #[test]
    fn accepted_transition_keeps_the_session_open() {
        let pool = BufferPool::new(64, 1024, 1);
        let (inbound, _peer) = duplex(64);
        let mut session: Session<DuplexStream, DuplexStream> =
            Session::new(ConnectionId::next(), inbound, pool.acquire());

        assert!(step(&mut session, SessionEvent::ReadDone).is_ok());
        assert!(!session.state().is_closed());
    }
}
