mod common;

use common::TestApp;
use serde_json::json;

#[tokio::test]
async fn confirming_preview_rows_persists_and_forces_verified() {
    let app = TestApp::spawn().await;
    let groceries = app.seed_bucket("Groceries").await;

    let entries = json!([
        {
            "id": -1,
            "date": "2025-03-01T00:00:00",
            "description": "WOOLWORTHS SYDNEY",
            "raw_description": "WOOLWORTHS 1234 SYDNEY NSW",
            "amount": -82.5,
            "bucket_id": groceries,
            "confidence": 1.0,
            "spender": "Joint"
        },
        {
            "id": -2,
            "date": "2025-03-02T00:00:00",
            "description": "MYSTERY MERCHANT",
            "amount": -12.0
        }
    ]);

    let response = app.confirm(&entries).await;
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    let confirmed = body["confirmed"].as_array().unwrap();
    assert_eq!(confirmed.len(), 2);
    assert_eq!(body["skipped_duplicates"], 0);

    for txn in confirmed {
        assert_eq!(txn["is_verified"], true);
    }
    assert_eq!(confirmed[0]["bucket_id"], groceries);
    // raw_description falls back to the description when absent.
    assert_eq!(confirmed[1]["raw_description"], "MYSTERY MERCHANT");
    assert_eq!(confirmed[1]["spender"], "Joint");
}

#[tokio::test]
async fn double_submit_is_silently_skipped_but_siblings_persist() {
    let app = TestApp::spawn().await;

    let duplicate = json!({
        "id": -1,
        "date": "2025-03-01T00:00:00",
        "description": "WOOLWORTHS SYDNEY",
        "raw_description": "WOOLWORTHS 1234 SYDNEY NSW",
        "amount": -82.5
    });

    let response = app.confirm(&json!([duplicate])).await;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["confirmed"].as_array().unwrap().len(), 1);

    // Same preview row again (double-submit) plus one genuinely new row.
    let fresh = json!({
        "id": -2,
        "date": "2025-03-05T00:00:00",
        "description": "CALTEX FUEL STOP",
        "amount": -61.0
    });

    let response = app.confirm(&json!([duplicate, fresh])).await;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();

    let confirmed = body["confirmed"].as_array().unwrap();
    assert_eq!(body["skipped_duplicates"], 1);
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0]["description"], "CALTEX FUEL STOP");
}

#[tokio::test]
async fn confirming_existing_rows_updates_only_mutable_fields() {
    let app = TestApp::spawn().await;
    let groceries = app.seed_bucket("Groceries").await;
    let dining = app.seed_bucket("Dining").await;

    let response = app
        .confirm(&json!([{
            "id": -1,
            "date": "2025-03-01T00:00:00",
            "description": "LOCAL CAFE",
            "amount": -18.2,
            "bucket_id": groceries
        }]))
        .await;
    let body: serde_json::Value = response.json().await.unwrap();
    let transaction_id = body["confirmed"][0]["transaction_id"].as_i64().unwrap();

    // Recategorize the persisted row and tag it.
    let response = app
        .confirm(&json!([{
            "id": transaction_id,
            "bucket_id": dining,
            "spender": "Alex",
            "tags": "eating-out"
        }]))
        .await;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    let updated = &body["confirmed"][0];

    assert_eq!(updated["bucket_id"], dining);
    assert_eq!(updated["spender"], "Alex");
    assert_eq!(updated["tags"], "eating-out");
    assert_eq!(updated["is_verified"], true);
    // Immutable facts survive untouched.
    assert_eq!(updated["amount"], -18.2);
    assert_eq!(updated["date"], "2025-03-01T00:00:00");
    assert_eq!(updated["description"], "LOCAL CAFE");
}

#[tokio::test]
async fn other_users_transactions_cannot_be_confirmed() {
    let app = TestApp::spawn().await;

    let response = app
        .confirm(&json!([{
            "id": -1,
            "date": "2025-03-01T00:00:00",
            "description": "PRIVATE PURCHASE",
            "amount": -40.0
        }]))
        .await;
    let body: serde_json::Value = response.json().await.unwrap();
    let transaction_id = body["confirmed"][0]["transaction_id"].as_i64().unwrap();

    // A different user referencing that id gets nothing updated.
    let response = app
        .client
        .post(format!("{}/ingest/confirm", app.address))
        .header("X-User-ID", "someone-else")
        .json(&json!([{ "id": transaction_id, "spender": "Mallory" }]))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["confirmed"].as_array().unwrap().is_empty());

    // The row is untouched for its owner.
    let txn = app
        .db
        .get_transaction(&app.user_id, transaction_id)
        .await
        .unwrap()
        .expect("Transaction should still exist");
    assert_eq!(txn.spender.as_deref(), Some("Joint"));
}

#[tokio::test]
async fn preview_entries_missing_required_fields_are_skipped() {
    let app = TestApp::spawn().await;

    let response = app
        .confirm(&json!([{ "id": -1, "description": "NO DATE OR AMOUNT" }]))
        .await;

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["confirmed"].as_array().unwrap().is_empty());
    assert_eq!(body["skipped_duplicates"], 0);
}
