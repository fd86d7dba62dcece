//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for the forward proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind host, port, backlog).
    pub listener: ListenerConfig,

    /// Cache directory. Reserved for a caching layer; not read by the pipeline.
    pub cache: CacheConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Buffer and header size limits.
    pub limits: LimitsConfig,

    /// Error responses sent on the client connection.
    pub responses: ResponseConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Host name or address to bind. Every resolved address is bound.
    pub bind_host: String,

    /// Listen port.
    pub port: u16,

    /// Listen backlog passed to each bound socket.
    pub backlog: u32,

    /// Maximum concurrent sessions. Unlimited when unset.
    pub max_connections: Option<usize>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            port: 8080,
            backlog: 128,
            max_connections: None,
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub path: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./"),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Name resolution and per-address connect timeout in milliseconds.
    pub connect_ms: u64,

    /// Idle timeout in milliseconds: header reads, forwarding writes, relay inactivity.
    pub idle_ms: u64,

    /// How long shutdown waits for active sessions to finish, in milliseconds.
    pub shutdown_grace_ms: u64,
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn idle(&self) -> Duration {
        Duration::from_millis(self.idle_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 5_000,
            idle_ms: 30_000,
            shutdown_grace_ms: 10_000,
        }
    }
}

/// Buffer sizing and header limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest accepted request head, in bytes.
    pub max_header_bytes: usize,

    /// Bytes reserved per read while accumulating the request head.
    pub read_chunk_bytes: usize,

    /// Per-direction relay buffer size.
    pub relay_buffer_bytes: usize,

    /// Header buffers kept in the pool for reuse.
    pub pooled_buffers: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: 64 * 1024,
            read_chunk_bytes: 8 * 1024,
            relay_buffer_bytes: 16 * 1024,
            pooled_buffers: 256,
        }
    }
}

/// Error response behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResponseConfig {
    /// Answer failed sessions with a 400/408/502/504 before closing.
    /// When false, failed sessions are closed silently.
    pub send_error_responses: bool,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            send_error_responses: true,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Only log warnings and errors.
    pub silent: bool,

    /// Explicit tracing filter directive. `RUST_LOG` takes precedence.
    pub log_filter: Option<String>,

    /// Enable Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics server bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            silent: false,
            log_filter: None,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
