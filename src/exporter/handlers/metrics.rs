use crate::exporter::Exporter;
use axum::{
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::{debug, error, instrument};

/// The Prometheus scrape endpoint. Every request runs a full scrape.
#[instrument(skip(exporter), fields(http.route = "/metrics"))]
pub async fn metrics(Extension(exporter): Extension<Arc<Exporter>>) -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    headers.insert(
        "content-type",
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );

    match exporter.collect_text().await {
        Ok(body) => {
            debug!("scrape ok");
            (StatusCode::OK, headers, body)
        }
        Err(err) => {
            error!("scrape failed: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                headers,
                format!("error collecting metrics: {err:#}"),
            )
        }
    }
}
