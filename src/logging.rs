//! Log subscriber setup for binaries and local debugging.

use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber on stderr. `RUST_LOG` overrides `default_filter`.
///
/// Does nothing if a global subscriber is already set.
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .try_init();
}
