//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     listener.rs (resolve bind host → bind every address)
//!
//! Per connection:
//!     listener.rs (accept from any socket, optional limit)
//!     → connection.rs (connection id, live-session count)
//!     → hand off to proxy pipeline
//!     → connector.rs (resolve destination → dial first reachable address)
//! ```
//!
//! # Design Decisions
//! - Listening binds all addresses; dialing stops at the first success
//! - Resolver and Connector are traits supplied to the pipeline

pub mod connection;
pub mod connector;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use connector::{connect_first_successful, ConnectError, Connector, Resolver, SystemResolver, TcpConnector};
pub use listener::{bind_all_addresses, ConnectionPermit, Listener, ListenerError};
