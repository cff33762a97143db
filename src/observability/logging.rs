//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once at startup
//! - Select JSON or pretty output per config
//! - Honor `RUST_LOG` when set, falling back to the configured level
//!
//! # Design Decisions
//! - JSON format for production, pretty format for development
//! - Admission events use a stable `event` field vocabulary
//!   (RQ_DECLINED / RQ_DELAY / RQ_END / RQ_ERROR) so log pipelines can key
//!   on decisions without parsing message text

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Install the global subscriber. Call once, before any spans are created.
pub fn init(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
