//! Structured logging setup.
//!
//! All crates log through `tracing` macros with structured fields
//! (`opcode`, `attempt`, `delay_ms`, `game_id`). The host installs a
//! subscriber once with [`init_subscriber`] or [`init_json_subscriber`].

use tracing_subscriber::EnvFilter;

/// `RUST_LOG` when set, otherwise `level`.
fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install a compact human-readable subscriber on stderr.
///
/// `level` is a filter directive such as `"info"` or
/// `"livepush_client=debug,info"`. Only the first install in a process
/// takes effect.
pub fn init_subscriber(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_for(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

/// Install a JSON-lines subscriber on stderr, for log shippers.
pub fn init_json_subscriber(level: &str) {
    let _ = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter_for(level))
        .with_current_span(true)
        .with_writer(std::io::stderr)
        .try_init();
}
