//! Minimal HTTP forward proxy library.

pub mod cli;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod proxy;
pub mod resilience;

pub use config::schema::ProxyConfig;
pub use lifecycle::Shutdown;
pub use proxy::ProxyServer;
