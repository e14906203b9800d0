use crate::catalog::load_config;
use crate::cli::actions::{Action, RunSettings};
use crate::exporter::shutdown::handle_signals;
use crate::exporter::{ExporterBuilder, handlers};
use crate::pgurl::shadow_pgurl;
use anyhow::{Context, Result, anyhow};
use secrecy::ExposeSecret;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Handle the run action: dry-run / explain short circuits, otherwise build
/// the exporter and serve the HTTP surface until shutdown.
///
/// # Errors
///
/// Returns an error when the configuration is invalid, the exporter cannot
/// be built, or the listener cannot be bound.
pub async fn handle(action: Action) -> Result<()> {
    let Action::Run(settings) = action;

    if settings.dry_run {
        return dry_run(&settings);
    }

    let config = settings
        .config
        .clone()
        .ok_or_else(|| anyhow!("no valid config path, provide one with --config or PG_EXPORTER_CONFIG"))?;

    let exporter = ExporterBuilder::new(settings.url.expose_secret())
        .config_path(config)
        .const_labels(&settings.const_labels)
        .tags(&settings.tags)
        .namespace(&settings.namespace)
        .disable_cache(settings.disable_cache)
        .disable_intro(settings.disable_intro)
        .auto_discovery(settings.auto_discovery)
        .fail_fast(settings.fail_fast)
        .exclude_database(&settings.exclude_database)
        .include_database(&settings.include_database)
        .connect_timeout(settings.connect_timeout)
        .build()
        .await?;
    let exporter = Arc::new(exporter);

    if settings.explain {
        println!("{}", exporter.plan_and_explain().await);
        exporter.close().await;
        return Ok(());
    }

    let app = handlers::router(exporter.clone(), &settings.metric_path);
    let listener = match TcpListener::bind(("::", settings.port)).await {
        Ok(listener) => listener,
        Err(_) => TcpListener::bind(("0.0.0.0", settings.port))
            .await
            .with_context(|| format!("fail binding port {}", settings.port))?,
    };

    info!(
        url = shadow_pgurl(settings.url.expose_secret()),
        port = settings.port,
        path = settings.metric_path,
        "pg_exporter started"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(handle_signals(exporter.clone()))
        .await?;

    exporter.close().await;
    Ok(())
}

/// Print every catalog query in priority order, without touching the target.
fn dry_run(settings: &RunSettings) -> Result<()> {
    let config = settings
        .config
        .as_ref()
        .ok_or_else(|| anyhow!("no valid config path, provide one with --config or PG_EXPORTER_CONFIG"))?;
    let catalog = load_config(config)
        .with_context(|| format!("fail loading config {}", config.display()))?;

    let mut queries: Vec<_> = catalog.values().collect();
    queries.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.branch.cmp(&b.branch)));
    for query in queries {
        println!("{}", query.explain());
    }
    Ok(())
}
