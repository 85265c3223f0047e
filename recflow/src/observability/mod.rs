//! Logging setup and span constructors.
//!
//! The crate logs through `tracing` macros only. Binaries embedding it call
//! [`init_tracing`] once at startup to install a subscriber.

use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ExplorerConfig;

/// Builds the log filter: `RUST_LOG` when set, the configured level otherwise.
#[must_use]
pub fn env_filter(config: &ExplorerConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
}

/// Installs a global `fmt` subscriber, as JSON lines when `log_json` is set.
///
/// Returns false when a global subscriber was already installed. Calling it
/// again is harmless.
pub fn init_tracing(config: &ExplorerConfig) -> bool {
    let filter = env_filter(config);
    let installed = if config.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .try_init()
    };
    installed.is_ok()
}

/// Span covering one execution up to a target stage.
#[must_use]
pub fn execution_span(target_stage_id: &str, input_id: &str) -> Span {
    tracing::debug_span!("execute_to_stage", target = %target_stage_id, input = %input_id)
}
