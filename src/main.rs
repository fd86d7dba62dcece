//! HTTP forward proxy.
//!
//! ```text
//!     Client                      ┌──────────────────────────────────────────┐
//!     ──── GET http://h/p ───────▶│ listener → session pipeline              │
//!                                 │   read head → parse → strip hop-by-hop   │
//!                                 │   → Host → resolve → dial first success  │──▶ Origin h
//!     ◀────── relayed bytes ──────│   → forward head → relay both ways       │◀──
//!                                 └──────────────────────────────────────────┘
//! ```
//!
//! One task per connection on a single-threaded runtime; sessions share only
//! the immutable config, the resolver/connector pair and the buffer pool.

use clap::Parser;
use std::process::ExitCode;

use forward_proxy::cli::Cli;
use forward_proxy::lifecycle::{wait_for_signal, Shutdown};
use forward_proxy::observability::{init_logging, metrics};
use forward_proxy::ProxyServer;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let config = match Cli::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("forward-proxy: {}", e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "forward-proxy starting");
    tracing::info!(
        bind_host = %config.listener.bind_host,
        port = config.listener.port,
        backlog = config.listener.backlog,
        cache_dir = %config.cache.path.display(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = ProxyServer::new(config);
    let listener = match server.bind().await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start listener");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.trigger();
    });

    if let Err(e) = server.run(listener, receiver).await {
        tracing::error!(error = %e, "Proxy stopped with an error");
        return ExitCode::FAILURE;
    }

    tracing::info!("Shutdown complete");
    ExitCode::SUCCESS
}
