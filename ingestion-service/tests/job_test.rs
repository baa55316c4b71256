mod common;

use common::TestApp;

#[tokio::test]
async fn unknown_job_returns_404() {
    let app = TestApp::spawn().await;

    let response = app.get_json("/ingest/jobs/does-not-exist").await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn jobs_are_invisible_to_other_users() {
    let app = TestApp::spawn().await;
    let job = app.db.create_job(&app.user_id, 10).await.unwrap();

    let response = app
        .client
        .get(format!("{}/ingest/jobs/{}", app.address, job.job_id))
        .header("X-User-ID", "someone-else")
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn progress_updates_are_visible_to_pollers() {
    let app = TestApp::spawn().await;
    let job = app.db.create_job(&app.user_id, 100).await.unwrap();

    app.db
        .update_job_progress(&job.job_id, 40, Some("Applying rules..."))
        .await
        .unwrap();

    let response = app.get_json(&format!("/ingest/jobs/{}", job.job_id)).await;
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "processing");
    assert_eq!(body["progress"], 40);
    assert_eq!(body["total"], 100);
    assert_eq!(body["message"], "Applying rules...");
    assert!(body["result"].is_null());
}

#[tokio::test]
async fn terminal_states_are_immutable() {
    let app = TestApp::spawn().await;

    // complete stays complete
    let job = app.db.create_job(&app.user_id, 5).await.unwrap();
    app.db
        .complete_job(&job.job_id, "[]", 0, "Complete")
        .await
        .unwrap();

    app.db
        .update_job_progress(&job.job_id, 1, Some("should not apply"))
        .await
        .unwrap();
    app.db.update_job_total(&job.job_id, 99).await.unwrap();
    app.db.fail_job(&job.job_id, "should not apply").await.unwrap();

    let snapshot = app.db.get_job(&app.user_id, &job.job_id).await.unwrap().unwrap();
    assert_eq!(snapshot.status, "complete");
    assert_eq!(snapshot.total, 5);
    assert_eq!(snapshot.message.as_deref(), Some("Complete"));
    assert_eq!(snapshot.error, None);

    // failed stays failed
    let job = app.db.create_job(&app.user_id, 5).await.unwrap();
    app.db.fail_job(&job.job_id, "CSV parsing error").await.unwrap();
    app.db.complete_job(&job.job_id, "[]", 0, "Complete").await.unwrap();

    let snapshot = app.db.get_job(&app.user_id, &job.job_id).await.unwrap().unwrap();
    assert_eq!(snapshot.status, "failed");
    assert_eq!(snapshot.error.as_deref(), Some("CSV parsing error"));
    assert_eq!(snapshot.result_json, None);
}

#[tokio::test]
async fn old_terminal_jobs_are_cleaned_up_processing_jobs_survive() {
    let app = TestApp::spawn().await;

    let finished = app.db.create_job(&app.user_id, 1).await.unwrap();
    app.db.complete_job(&finished.job_id, "[]", 0, "Complete").await.unwrap();
    let running = app.db.create_job(&app.user_id, 1).await.unwrap();

    // A zero-hour threshold makes every terminal job stale.
    let removed = app.db.cleanup_old_jobs(&app.user_id, 0).await.unwrap();
    assert_eq!(removed, 1);

    assert!(app.db.get_job(&app.user_id, &finished.job_id).await.unwrap().is_none());
    assert!(app.db.get_job(&app.user_id, &running.job_id).await.unwrap().is_some());
}
