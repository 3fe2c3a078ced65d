//! Logging setup shared by the binaries

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `info`, or `debug` when verbose.
/// Calling this twice is harmless (the second install is ignored).
pub fn init(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_thread_ids(verbose);

    if builder.try_init().is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
