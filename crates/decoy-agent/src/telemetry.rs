//! Tracing subscriber setup for the binary.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` overrides the `info` default.
///
/// Logs go to stderr so CLI output on stdout stays clean.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().with_current_span(false).init();
    } else {
        builder.init();
    }
}
