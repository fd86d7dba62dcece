//! Timeout enforcement.
//!
//! # Responsibilities
//! - Put a deadline on every session stage that waits on a peer
//! - Report which stage expired
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors
//! - Expiry closes the session like any other failure

use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Session stage a deadline applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ReadHeader,
    Resolve,
    Forward,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::ReadHeader => "header read",
            Stage::Resolve => "name resolution",
            Stage::Forward => "request forwarding",
        })
    }
}

/// A stage did not complete before its deadline.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("{stage} timed out after {after:?}")]
pub struct TimeoutError {
    pub stage: Stage,
    pub after: Duration,
}

/// Run `fut` with a deadline of `after`.
pub async fn with_timeout<F: Future>(
    stage: Stage,
    after: Duration,
    fut: F,
) -> Result<F::Output, TimeoutError> {
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| TimeoutError { stage, after })
}
