use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global subscriber. Everything goes to stderr, stdout carries
/// the result document only.
pub fn init(color: bool, json: bool, levels: &str) {
    let filter = EnvFilter::try_new(levels).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    // Ignore errors when setting, since tests can initialize this
    // multiple times.
    let _ = if json {
        builder.json().flatten_event(true).try_init()
    } else {
        builder.with_ansi(color).try_init()
    };
}
