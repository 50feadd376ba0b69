//! Log output for the CLI.
//!
//! The library only emits `tracing` events; installing a subscriber is the
//! binary's job. Logs go to stderr so stdout stays parseable JSON.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT_ONCE: Once = Once::new();

/// Install the stderr subscriber. Later calls are no-ops.
///
/// `RUST_LOG` wins when set; otherwise `verbose` selects between
/// `netassure=info` and `netassure=debug`.
pub fn init(verbose: bool) {
    INIT_ONCE.call_once(|| {
        let default = if verbose {
            "netassure=debug"
        } else {
            "netassure=info"
        };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    });
}
