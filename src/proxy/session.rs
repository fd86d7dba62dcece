//! Session state machine.
//!
//! # States
//! - Accepted: inbound socket established, nothing read yet
//! - HeaderReceived: bytes accumulating until a full request head arrives
//! - Parsed: request head parsed and valid
//! - Resolving: headers sanitized, destination known, lookup in flight
//! - Connecting: dialing resolved addresses
//! - Forwarding: writing the request head upstream
//! - Relaying: piping bytes in both directions
//! - Closed: both sockets released
//!
//! # State Transitions
//! ```text
//! Accepted       --ReadDone-->         HeaderReceived
//! HeaderReceived --ReadDone-->         HeaderReceived
//! HeaderReceived --HeaderParsed-->     Parsed
//! Parsed         --DestinationFound--> Resolving
//! Resolving      --ResolveDone-->      Connecting
//! Connecting     --ConnectDone-->      Forwarding
//! Forwarding     --WriteDone-->        Relaying
//! Relaying       --RelayDone-->        Closed
//! any            --Failed-->           Closed
//! Closed         --any-->              Closed
//! ```

use std::fmt;
use std::time::Instant;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::Request;
use crate::net::ConnectionId;
use crate::proxy::buffer::PooledBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Accepted,
    HeaderReceived,
    Parsed,
    Resolving,
    Connecting,
    Forwarding,
    Relaying,
    Closed,
}

impl SessionState {
    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed)
    }

    /// Whether any request bytes may already have reached the upstream.
    pub fn has_forwarded(&self) -> bool {
        matches!(
            self,
            SessionState::Forwarding | SessionState::Relaying | SessionState::Closed
        )
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Relay finished normally.
    Completed,
    /// Client disconnected before sending a request.
    ClientClosed,
    ParseFailed,
    ResolutionFailed,
    ConnectFailed,
    TimedOut,
    Io,
    /// The driver produced an event the current state does not accept.
    Protocol,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Completed => "completed",
            CloseReason::ClientClosed => "client_closed",
            CloseReason::ParseFailed => "parse_failed",
            CloseReason::ResolutionFailed => "resolution_failed",
            CloseReason::ConnectFailed => "connect_failed",
            CloseReason::TimedOut => "timed_out",
            CloseReason::Io => "io",
            CloseReason::Protocol => "protocol",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completion events that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    ReadDone,
    HeaderParsed,
    DestinationFound,
    ResolveDone,
    ConnectDone,
    WriteDone,
    RelayDone,
    Failed(CloseReason),
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("event {event:?} is not valid in state {state:?}")]
pub struct UnexpectedEvent {
    pub state: SessionState,
    pub event: SessionEvent,
}

/// Compute the state that follows `state` when `event` completes.
pub fn transition(state: SessionState, event: SessionEvent) -> Result<SessionState, UnexpectedEvent> {
    use SessionEvent as E;
    use SessionState as S;

    match (state, event) {
        (S::Closed, _) => Ok(S::Closed),
        (_, E::Failed(_)) => Ok(S::Closed),
        (S::Accepted | S::HeaderReceived, E::ReadDone) => Ok(S::HeaderReceived),
        (S::HeaderReceived, E::HeaderParsed) => Ok(S::Parsed),
        (S::Parsed, E::DestinationFound) => Ok(S::Resolving),
        (S::Resolving, E::ResolveDone) => Ok(S::Connecting),
        (S::Connecting, E::ConnectDone) => Ok(S::Forwarding),
        (S::Forwarding, E::WriteDone) => Ok(S::Relaying),
        (S::Relaying, E::RelayDone) => Ok(S::Closed),
        (state, event) => Err(UnexpectedEvent { state, event }),
    }
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub id: ConnectionId,
    pub reason: CloseReason,
    pub bytes_to_upstream: u64,
    pub bytes_to_client: u64,
}

/// Per-connection state: sockets, buffer and the request being processed.
pub struct Session<S, U> {
    id: ConnectionId,
    state: SessionState,
    pub(crate) inbound: Option<S>,
    pub(crate) outbound: Option<U>,
    pub(crate) request: Option<Request>,
    pub(crate) buffer: PooledBuffer,
    close_reason: Option<CloseReason>,
    pub(crate) bytes_to_upstream: u64,
    pub(crate) bytes_to_client: u64,
    started: Instant,
}

impl<S, U> Session<S, U>
where
    S: AsyncWrite + Unpin,
    U: AsyncWrite + Unpin,
{
    pub fn new(id: ConnectionId, inbound: S, buffer: PooledBuffer) -> Self {
        Self {
            id,
            state: SessionState::Accepted,
            inbound: Some(inbound),
            outbound: None,
            request: None,
            buffer,
            close_reason: None,
            bytes_to_upstream: 0,
            bytes_to_client: 0,
            started: Instant::now(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    /// Apply `event`. An event the current state rejects closes the session.
    pub fn advance(&mut self, event: SessionEvent) -> SessionState {
        let next = match transition(self.state, event) {
            Ok(next) => next,
            Err(err) => {
                tracing::error!(connection_id = %self.id, error = %err, "Invalid session transition");
                self.close_reason.get_or_insert(CloseReason::Protocol);
                SessionState::Closed
            }
        };

        if next != self.state {
            tracing::trace!(connection_id = %self.id, from = ?self.state, to = ?next, "Session transition");
        }
        match event {
            SessionEvent::Failed(reason) => {
                self.close_reason.get_or_insert(reason);
            }
            SessionEvent::RelayDone => {
                self.close_reason.get_or_insert(CloseReason::Completed);
            }
            _ => {}
        }
        self.state = next;
        next
    }

    pub(crate) fn attach_outbound(&mut self, outbound: U) {
        self.outbound = Some(outbound);
    }

    /// Release both sockets. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut inbound) = self.inbound.take() {
            let _ = inbound.shutdown().await;
        }
        if let Some(mut outbound) = self.outbound.take() {
            let _ = outbound.shutdown().await;
        }
        if !self.state.is_closed() {
            self.advance(SessionEvent::Failed(CloseReason::ClientClosed));
        }
    }

    pub fn report(&self) -> SessionReport {
        SessionReport {
            id: self.id,
            reason: self.close_reason.unwrap_or(CloseReason::Completed),
            bytes_to_upstream: self.bytes_to_upstream,
            bytes_to_client: self.bytes_to_client,
        }
    }
}
