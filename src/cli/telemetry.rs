use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber. An explicit verbosity level from `-v`
/// wins; otherwise `RUST_LOG` is honored, defaulting to `info`.
///
/// # Errors
///
/// Returns an error when a subscriber is already installed.
pub fn init(level: Option<tracing::Level>) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::new(format!("pg_exporter={level},warn")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init()?;

    Ok(())
}
