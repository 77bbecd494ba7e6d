//! Tracing subscriber setup for binaries and integration harnesses embedding the crate.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "lexiquiz=debug";

/// Install the global subscriber. `RUST_LOG` wins over the default filter. Returns false if
/// a subscriber was already installed.
pub fn init_tracing(json: bool) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    let installed = if json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };
    if installed {
        tracing::info!(json, "tracing initialized");
    }
    installed
}
