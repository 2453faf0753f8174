//! Tracing subscriber setup for the CLI.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Filter used when `RUST_LOG` is not set.
fn default_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("hatrack=info,warn")
    } else {
        EnvFilter::new("warn")
    }
}

/// Install the global subscriber. Logs go to stderr so `--json` output on
/// stdout stays machine-readable.
///
/// Calling it twice is harmless; the second call is ignored.
pub fn init(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(verbose));

    let result = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };

    if let Err(e) = result {
        tracing::debug!(error = %e, "tracing subscriber already installed");
    }
}
