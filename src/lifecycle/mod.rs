//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → accept loop stops → sessions drain within the grace period → exit
//! ```
//!
//! # Design Decisions
//! - Shutdown has a deadline: sessions still open after the grace period are abandoned
//! - A second signal is not special; the grace period already bounds exit

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
