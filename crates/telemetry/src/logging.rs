//! Logging initialization.
//!
//! Installs a `tracing_subscriber::fmt` subscriber. `RUST_LOG` wins when set;
//! otherwise `verbose` selects `debug` over `info`. Installation uses
//! `try_init`, so calling it again (from another test or host) is harmless.

use tracing_subscriber::EnvFilter;

fn filter(verbose: bool) -> EnvFilter {
    let fallback = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Install a human-readable subscriber. Returns `false` if one was already set.
pub fn init_logging(verbose: bool) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter(verbose))
        .with_target(false)
        .try_init()
        .is_ok()
}

/// Install a JSON-lines subscriber for log shipping.
pub fn init_json_logging(verbose: bool) -> bool {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter(verbose))
        .with_current_span(false)
        .try_init()
        .is_ok()
}
