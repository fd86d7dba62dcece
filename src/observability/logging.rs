//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once per process
//! - Pick the log level from `RUST_LOG`, then config, then the silent flag
//!
//! # Design Decisions
//! - Silent mode only raises the level to `warn`; failures are still reported

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Filter used when neither `RUST_LOG` nor the config names one.
pub fn default_filter(config: &ObservabilityConfig) -> String {
    match (&config.log_filter, config.silent) {
        (Some(filter), _) => filter.clone(),
        (None, true) => "forward_proxy=warn".to_string(),
        (None, false) => "forward_proxy=info".to_string(),
    }
}

/// Install the global subscriber. A second call is a no-op.
pub fn init_logging(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(config).into());

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
