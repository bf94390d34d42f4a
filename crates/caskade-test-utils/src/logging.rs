//! Test logging setup

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "caskade_core=debug,caskade_state_inmemory=debug";

/// Install a fmt subscriber for tests
///
/// `RUST_LOG` takes precedence over the default filter. Safe to call from
/// every test; only the first call installs a subscriber.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
