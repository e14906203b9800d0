use crate::exporter::Exporter;
use axum::{extract::Extension, http::StatusCode, response::IntoResponse};
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Trigger a catalog reload. Registered for GET and POST; other methods get
/// an automatic 405 with the `Allow` header from the router.
#[instrument(skip(exporter), fields(http.route = "/reload"))]
pub async fn reload(Extension(exporter): Extension<Arc<Exporter>>) -> impl IntoResponse {
    match exporter.reload().await {
        Ok(()) => {
            info!("server reloaded");
            (StatusCode::OK, "server reloaded".to_string())
        }
        Err(err) => {
            error!("reload failed: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("fail to reload: {err:#}"),
            )
        }
    }
}
