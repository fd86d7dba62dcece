//! Accept loop and session spawning.
//!
//! # Responsibilities
//! - Accept connections from every bound socket
//! - Run each session on its own task, inside a span naming the connection
//! - On shutdown, stop accepting and wait for live sessions to drain
//!
//! # Design Decisions
//! - Sessions share only the pipeline (config, resolver, connector, buffer pool)
//! - A failing session never stops the accept loop

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::config::ProxyConfig;
use crate::net::{ConnectionTracker, Connector, Listener, ListenerError, Resolver, SystemResolver, TcpConnector};
use crate::proxy::pipeline::Pipeline;

/// Forward proxy server.
pub struct ProxyServer<R = SystemResolver, C = TcpConnector> {
    pipeline: Arc<Pipeline<R, C>>,
    tracker: ConnectionTracker,
}

impl ProxyServer {
    /// Server that resolves through the system resolver and dials real TCP.
    pub fn new(config: ProxyConfig) -> Self {
        Self::with_upstream(config, SystemResolver, TcpConnector)
    }
}

impl<R: Resolver, C: Connector> ProxyServer<R, C> {
    pub fn with_upstream(config: ProxyConfig, resolver: R, connector: C) -> Self {
        Self {
            pipeline: Arc::new(Pipeline::new(Arc::new(config), resolver, connector)),
            tracker: ConnectionTracker::new(),
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        self.pipeline.config()
    }

    /// Sessions currently running.
    pub fn active_sessions(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Bind the configured listener.
    pub async fn bind(&self) -> Result<Listener, ListenerError> {
        Listener::bind(&self.config().listener).await
    }

    /// Serve `listener` until `shutdown` fires, then drain.
    pub async fn run(&self, listener: Listener, mut shutdown: broadcast::Receiver<()>) -> Result<(), ListenerError> {
        tracing::info!(addresses = ?listener.local_addrs(), "Proxy accepting connections");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown requested, no longer accepting");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let guard = self.tracker.track();
                        let id = guard.id();
                        let pipeline = Arc::clone(&self.pipeline);
                        let span = tracing::info_span!("session", connection_id = %id, peer = %peer);

                        tokio::spawn(
                            async move {
                                let _permit = permit;
                                let _guard = guard;
                                pipeline.serve(id, stream).await;
                            }
                            .instrument(span),
                        );
                    }
                    Err(ListenerError::Closed) => return Err(ListenerError::Closed),
                    Err(e) => tracing::warn!(error = %e, "Accept failed"),
                },
            }
        }
        drop(listener);

        let grace = self.config().timeouts.shutdown_grace();
        let active = self.tracker.active_count();
        if active > 0 {
            tracing::info!(active, grace_ms = grace.as_millis() as u64, "Draining sessions");
        }
        if !self.tracker.drain(grace).await {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                "Grace period elapsed with sessions still open"
            );
        }

        tracing::info!("Proxy stopped");
        Ok(())
    }
}
