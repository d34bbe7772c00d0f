use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::args::LogLevel;

/// Installs the global subscriber. `HORDE_LOG`, then `RUST_LOG`, override `level`.
///
/// Logs go to stderr; stdout carries task output and the ready line a child
/// worker sends its supervisor.
pub fn init_logging(level: LogLevel, no_color: bool) {
    let filter = std::env::var("HORDE_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .map_or_else(
            |_| EnvFilter::new(level.as_filter()),
            |value| EnvFilter::try_new(value).unwrap_or_else(|_| EnvFilter::new(level.as_filter())),
        );

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(!no_color)
        .finish();

    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set global default subscriber: {}", err);
    }
}
