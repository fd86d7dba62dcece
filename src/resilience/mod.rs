//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Session stage waiting on a peer:
//!     → timeouts.rs (connect / idle deadline)
//!     → on expiry: session closes with CloseReason::TimedOut
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every wait on a peer has a deadline
//! - No retries: a failed dial closes the session

pub mod timeouts;

pub use timeouts::{with_timeout, Stage, TimeoutError};
