mod common;

use common::TestApp;

#[tokio::test]
async fn health_check_works() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(format!("{}/health", app.address))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("Invalid JSON");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "ingestion-service");
}

#[tokio::test]
async fn metrics_endpoint_serves_prometheus_text() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(format!("{}/metrics", app.address))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status(), 200);
    let body = response.text().await.expect("No body");
    assert!(body.contains("ingestion_db_query_duration_seconds"));
}

#[tokio::test]
async fn ingest_endpoints_require_user_header() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(format!("{}/ingest/jobs/some-job", app.address))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status(), 401);
}
