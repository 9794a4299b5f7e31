use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_DIRECTIVE: &str = "info";

/// Install the global tracing subscriber.
///
/// - Level directives come from `RUST_LOG` (e.g. "debug", "info,relay=trace"),
///   falling back to "info".
/// - `log` records (the HTTP handlers log through `log`) are forwarded to `tracing`.
/// - Events are written to stdout in the compact format, with targets.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    let _ = LogTracer::init();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    let fmt_layer = fmt::layer().with_target(true).compact();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
