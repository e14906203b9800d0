#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use pg_exporter::exporter::{Exporter, ExporterBuilder, handlers};
use std::sync::Arc;
use tokio::net::TcpListener;

// nothing listens on port 1, so every probe and scrape fails fast
const UNREACHABLE_DSN: &str = "postgresql://postgres@127.0.0.1:1/postgres?sslmode=disable";

const SIMPLE_CATALOG: &str = r#"
q:
  sql: SELECT 1 AS v, 'db' AS d
  metrics:
    - d: {usage: label, rename: db}
    - v: {usage: gauge}
"#;

async fn serve(exporter: Arc<Exporter>) -> String {
    let app = handlers::router(exporter, "/metrics");
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    format!("http://{addr}")
}

async fn down_exporter() -> Arc<Exporter> {
    Arc::new(
        ExporterBuilder::new(UNREACHABLE_DSN)
            .config_text(SIMPLE_CATALOG)
            .build()
            .await
            .unwrap(),
    )
}

#[tokio::test]
async fn test_health_endpoints_with_down_target() {
    let exporter = down_exporter().await;
    let base = serve(exporter.clone()).await;
    let client = reqwest::Client::builder().no_proxy().build().unwrap();

    for path in ["/up", "/read", "/health", "/liveness", "/readiness"] {
        let response = client.get(format!("{base}{path}")).send().await.unwrap();
        assert_eq!(response.status(), 503, "{path}");
        assert_eq!(response.text().await.unwrap(), "down", "{path}");
    }
    for path in ["/primary", "/leader", "/master", "/read-write", "/rw"] {
        let response = client.get(format!("{base}{path}")).send().await.unwrap();
        assert_eq!(response.status(), 503, "{path}");
    }
    for path in ["/replica", "/standby", "/slave", "/read-only", "/ro"] {
        let response = client.get(format!("{base}{path}")).send().await.unwrap();
        assert_eq!(response.status(), 503, "{path}");
    }
    exporter.close().await;
}

#[tokio::test]
async fn test_title_and_version_pages() {
    let exporter = down_exporter().await;
    let base = serve(exporter.clone()).await;
    let client = reqwest::Client::builder().no_proxy().build().unwrap();

    let response = client.get(format!("{base}/")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("/metrics"));

    let response = client.get(format!("{base}/version")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("pg_exporter version"));
    exporter.close().await;
}

#[tokio::test]
async fn test_metrics_endpoint_with_down_target() {
    let exporter = down_exporter().await;
    let base = serve(exporter.clone()).await;
    let client = reqwest::Client::builder().no_proxy().build().unwrap();

    let response = client.get(format!("{base}/metrics")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(
        response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );
    let body = response.text().await.unwrap();
    assert!(body.contains("pg_up 0"), "target is down: {body}");
    assert!(body.contains("pg_exporter_up 1"));
    assert!(body.contains("pg_exporter_scrape_total_count 1"));
    assert!(body.contains("pg_exporter_server_scrape_error_count{datname=\"postgres\"}"));
    exporter.close().await;
}

#[tokio::test]
async fn test_stat_and_explain_endpoints() {
    let exporter = down_exporter().await;
    let base = serve(exporter.clone()).await;
    let client = reqwest::Client::builder().no_proxy().build().unwrap();

    let response = client.get(format!("{base}/stat")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.text().await.unwrap().contains("pg_exporter"));

    let response = client.get(format!("{base}/explain")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(
        response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/html")
    );
    exporter.close().await;
}

#[tokio::test]
async fn test_reload_method_semantics() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("pg_exporter.yml");
    std::fs::write(&config, SIMPLE_CATALOG).unwrap();

    let exporter = Arc::new(
        ExporterBuilder::new(UNREACHABLE_DSN)
            .config_path(&config)
            .build()
            .await
            .unwrap(),
    );
    let base = serve(exporter.clone()).await;
    let client = reqwest::Client::builder().no_proxy().build().unwrap();

    // GET and POST are both accepted
    let response = client.get(format!("{base}/reload")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "server reloaded");

    let response = client.post(format!("{base}/reload")).send().await.unwrap();
    assert_eq!(response.status(), 200);

    // other methods are rejected with the allowed set
    let response = client.put(format!("{base}/reload")).send().await.unwrap();
    assert_eq!(response.status(), 405);
    let allow = response.headers().get("allow").unwrap().to_str().unwrap().to_string();
    assert!(allow.contains("GET"), "Allow header was {allow}");
    assert!(allow.contains("POST"), "Allow header was {allow}");
    exporter.close().await;
}

#[tokio::test]
async fn test_reload_failure_returns_500() {
    // built from inline text, so there is no config path to reload from
    let exporter = down_exporter().await;
    let base = serve(exporter.clone()).await;
    let client = reqwest::Client::builder().no_proxy().build().unwrap();

    let response = client.get(format!("{base}/reload")).send().await.unwrap();
    assert_eq!(response.status(), 500);
    assert!(response.text().await.unwrap().contains("fail to reload"));
    exporter.close().await;
}

#[tokio::test]
async fn test_reload_with_broken_config_returns_500_and_keeps_serving() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("pg_exporter.yml");
    std::fs::write(&config, SIMPLE_CATALOG).unwrap();

    let exporter = Arc::new(
        ExporterBuilder::new(UNREACHABLE_DSN)
            .config_path(&config)
            .build()
            .await
            .unwrap(),
    );
    let base = serve(exporter.clone()).await;
    let client = reqwest::Client::builder().no_proxy().build().unwrap();

    std::fs::write(&config, "q:\n  metrics: {{{{").unwrap();
    let response = client.get(format!("{base}/reload")).send().await.unwrap();
    assert_eq!(response.status(), 500);

    // scrapes keep working with the previous catalog
    let response = client.get(format!("{base}/metrics")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    exporter.close().await;
}
