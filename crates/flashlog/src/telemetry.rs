use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing with an env-based filter and bridge `log` records.
///
/// - Reads `RUST_LOG` for level directives (e.g., "info", "debug,flashlog=trace").
/// - Falls back to `debug` when `debug` is set, `info` otherwise.
/// - Forwards `log` crate records to `tracing` via `LogTracer`.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init(debug: bool) {
    let _ = LogTracer::init();

    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let fmt_layer = fmt::layer().with_target(true).compact();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
