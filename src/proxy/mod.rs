//! Proxy core.
//!
//! # Data Flow
//! ```text
//! server.rs (accept, spawn per connection)
//!     → pipeline.rs (read head → parse → sanitize → resolve → dial → forward)
//!     → relay.rs (bidirectional copy until both sides close)
//!
//! session.rs tracks each connection's state; buffer.rs lends header buffers.
//! ```

pub mod buffer;
pub mod pipeline;
pub mod relay;
pub mod server;
pub mod session;

pub use pipeline::{Pipeline, SessionError};
pub use server::ProxyServer;
pub use session::{CloseReason, SessionReport, SessionState};
