//! Liveness and replication-role probes. These handlers read only the
//! atomic health snapshot and never contend with a running scrape.

use crate::exporter::Exporter;
use axum::{extract::Extension, http::StatusCode, response::IntoResponse};
use std::sync::Arc;
use tracing::instrument;

/// 200 with the status body while the target is up, 503 otherwise.
#[instrument(skip(exporter), fields(http.route = "/up"))]
pub async fn up_check(Extension(exporter): Extension<Arc<Exporter>>) -> impl IntoResponse {
    let status = exporter.status().as_str();
    let code = if exporter.up() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, status)
}

/// 200 when the target is a primary, 404 when it is a replica, 503 when it
/// is unreachable.
#[instrument(skip(exporter), fields(http.route = "/primary"))]
pub async fn primary_check(Extension(exporter): Extension<Arc<Exporter>>) -> impl IntoResponse {
    let status = exporter.status().as_str();
    let code = if exporter.up() {
        if exporter.recovery() {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::OK
        }
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, status)
}

/// 200 when the target is a replica, 404 when it is a primary, 503 when it
/// is unreachable.
#[instrument(skip(exporter), fields(http.route = "/replica"))]
pub async fn replica_check(Extension(exporter): Extension<Arc<Exporter>>) -> impl IntoResponse {
    let status = exporter.status().as_str();
    let code = if exporter.up() {
        if exporter.recovery() {
            StatusCode::OK
        } else {
            StatusCode::NOT_FOUND
        }
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, status)
}
