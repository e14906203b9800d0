//! HTTP surface: the metrics endpoint, health probes, reload and the
//! diagnostic pages, mapped onto the exporter with fixed status-code
//! semantics.

use crate::exporter::{Exporter, version_string};
use axum::{
    Extension, Router,
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    response::Html,
    routing::get,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, debug_span, instrument};
use ulid::Ulid;

mod health;
mod metrics;
mod reload;

/// Build the exporter router: scrape endpoint at `metric_path`, liveness /
/// role probes under their aliases, and the diagnostic pages.
pub fn router(exporter: Arc<Exporter>, metric_path: &str) -> Router {
    let title_path = metric_path.to_string();
    let mut router = Router::new()
        .route(
            "/",
            get(move || {
                let metric_path = title_path.clone();
                async move { title(&metric_path) }
            }),
        )
        .route("/version", get(version))
        .route(metric_path, get(metrics::metrics))
        .route("/reload", get(reload::reload).post(reload::reload))
        .route("/stat", get(stat))
        .route("/explain", get(explain));

    for path in ["/up", "/read", "/health", "/liveness", "/readiness"] {
        router = router.route(path, get(health::up_check));
    }
    for path in ["/primary", "/leader", "/master", "/read-write", "/rw"] {
        router = router.route(path, get(health::primary_check));
    }
    for path in ["/replica", "/standby", "/slave", "/read-only", "/ro"] {
        router = router.route(path, get(health::replica_check));
    }

    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &Request<Body>| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(Extension(exporter)),
    )
}

fn make_span(request: &Request<Body>) -> Span {
    let path = request.uri().path();
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", path, request_id)
}

fn title(metric_path: &str) -> Html<String> {
    Html(format!(
        "<html><head><title>PG Exporter</title></head><body><h1>PG Exporter</h1><p><a href='{metric_path}'>Metrics</a></p></body></html>"
    ))
}

async fn version() -> String {
    version_string()
}

#[instrument(skip(exporter), fields(http.route = "/stat"))]
async fn stat(Extension(exporter): Extension<Arc<Exporter>>) -> String {
    exporter.stat().await
}

#[instrument(skip(exporter), fields(http.route = "/explain"))]
async fn explain(Extension(exporter): Extension<Arc<Exporter>>) -> Html<String> {
    Html(exporter.explain().await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_links_metric_path() {
        let page = title("/metrics");
        assert!(page.0.contains("href='/metrics'"));
        assert!(page.0.contains("PG Exporter"));
    }

    #[test]
    fn test_version_banner() {
        let banner = version_string();
        assert!(banner.contains("pg_exporter version"));
        assert!(banner.contains("revision:"));
        assert!(banner.contains("build date:"));
    }
}
