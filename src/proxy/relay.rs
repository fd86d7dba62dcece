//! Bidirectional byte relay between client and upstream.
//!
//! # Responsibilities
//! - Pipe upstream → client and client → upstream concurrently
//! - Propagate half-close: EOF on one side shuts down the other side's write half
//! - End the relay when neither direction has moved bytes for the idle period
//!
//! # Design Decisions
//! - `write_all` waits for the transport to accept bytes, so a slow peer stalls
//!   its reader instead of growing a queue
//! - An I/O error in either direction ends the whole relay
//! - Byte counts survive an early end; the error carries them

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

/// Bytes moved in each direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_upstream: u64,
    pub upstream_to_client: u64,
}

/// A relay that ended early. Bytes moved before the failure are kept.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay idle for {after:?}")]
    Idle { after: Duration, stats: RelayStats },

    #[error("relay I/O error: {source}")]
    Io {
        #[source]
        source: io::Error,
        stats: RelayStats,
    },
}

impl RelayError {
    pub fn stats(&self) -> RelayStats {
        match self {
            RelayError::Idle { stats, .. } | RelayError::Io { stats, .. } => *stats,
        }
    }
}

/// Per-direction byte counts plus the last time either direction moved bytes,
/// as millis since relay start.
struct Activity {
    start: Instant,
    last_ms: AtomicU64,
    client_to_upstream: AtomicU64,
    upstream_to_client: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            last_ms: AtomicU64::new(0),
            client_to_upstream: AtomicU64::new(0),
            upstream_to_client: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let now = self.start.elapsed().as_millis() as u64;
        self.last_ms.store(now, Ordering::Relaxed);
    }

    fn stats(&self) -> RelayStats {
        RelayStats {
            client_to_upstream: self.client_to_upstream.load(Ordering::Relaxed),
            upstream_to_client: self.upstream_to_client.load(Ordering::Relaxed),
        }
    }

    /// Resolves once no activity has been recorded for `idle`.
    async fn expired(&self, idle: Duration) {
        loop {
            let last = self.start + Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
            let deadline = last + idle;
            if Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep_until(deadline).await;
        }
    }
}

/// Relay bytes between `client` and `upstream` until both directions finish.
pub async fn relay<A, B>(
    client: &mut A,
    upstream: &mut B,
    buffer_size: usize,
    idle: Duration,
) -> Result<RelayStats, RelayError>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_rd, mut client_wr) = tokio::io::split(client);
    let (mut upstream_rd, mut upstream_wr) = tokio::io::split(upstream);
    let activity = Activity::new();

    let outbound = pump(&mut client_rd, &mut upstream_wr, buffer_size, &activity, &activity.client_to_upstream);
    let inbound = pump(&mut upstream_rd, &mut client_wr, buffer_size, &activity, &activity.upstream_to_client);

    tokio::select! {
        result = async { tokio::try_join!(outbound, inbound) } => match result {
            Ok(_) => Ok(activity.stats()),
            Err(source) => Err(RelayError::Io { source, stats: activity.stats() }),
        },
        _ = activity.expired(idle) => Err(RelayError::Idle { after: idle, stats: activity.stats() }),
    }
}

async fn pump<R, W>(
    reader: &mut R,
    writer: &mut W,
    buffer_size: usize,
    activity: &Activity,
    moved: &AtomicU64,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            writer.shutdown().await?;
            return Ok(());
        }
        activity.touch();
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        activity.touch();
        moved.fetch_add(n as u64, Ordering::Relaxed);
    }
}
