//! Process signal handling. One loop owns every signal the exporter reacts
//! to: SIGHUP and SIGUSR1 hot-reload the query catalog in place, while
//! SIGINT and SIGTERM resolve the returned future, which the HTTP server
//! uses as its graceful-shutdown trigger. Folding reload and shutdown into
//! the same select keeps signal handling in a single task whose lifetime
//! matches the server's.

use crate::exporter::Exporter;
use anyhow::{Context, Result};
use std::sync::Arc;

/// Drive the signal loop until a termination signal arrives. Intended as
/// the argument to `with_graceful_shutdown`.
///
/// When handler installation fails the loop is disabled rather than
/// resolved, so a broken signal setup degrades to "no signal support"
/// instead of an immediate shutdown.
pub async fn handle_signals(exporter: Arc<Exporter>) {
    if let Err(err) = signal_loop(exporter).await {
        tracing::error!("fail installing signal handlers: {err:#}");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn signal_loop(exporter: Arc<Exporter>) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint =
        signal(SignalKind::interrupt()).context("fail installing SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("fail installing SIGTERM handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("fail installing SIGHUP handler")?;
    let mut sigusr1 =
        signal(SignalKind::user_defined1()).context("fail installing SIGUSR1 handler")?;

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("SIGINT received, shutting down");
                return Ok(());
            }
            _ = sigterm.recv() => {
                tracing::info!("SIGTERM received, shutting down");
                return Ok(());
            }
            _ = sighup.recv() => reload_from_signal(&exporter, "SIGHUP").await,
            _ = sigusr1.recv() => reload_from_signal(&exporter, "SIGUSR1").await,
        }
    }
}

// no reload signals outside unix, Ctrl+C is the only trigger
#[cfg(not(unix))]
async fn signal_loop(exporter: Arc<Exporter>) -> Result<()> {
    let _ = exporter;
    tokio::signal::ctrl_c()
        .await
        .context("fail installing Ctrl+C handler")?;
    tracing::info!("Ctrl+C received, shutting down");
    Ok(())
}

#[cfg(unix)]
async fn reload_from_signal(exporter: &Exporter, name: &str) {
    tracing::info!("{name} received, reloading");
    if let Err(err) = exporter.reload().await {
        tracing::error!("reload failed: {err:#}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::ExporterBuilder;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    #[cfg(unix)]
    async fn test_signal_loop_stays_pending_without_signals() {
        let exporter = Arc::new(
            ExporterBuilder::new("postgresql://postgres@127.0.0.1:1/postgres?sslmode=disable")
                .build()
                .await
                .unwrap(),
        );

        // no signal is delivered, so the loop must still be waiting
        let result = timeout(Duration::from_millis(100), handle_signals(exporter.clone())).await;
        assert!(result.is_err(), "signal loop should be pending");
        exporter.close().await;
    }
}
