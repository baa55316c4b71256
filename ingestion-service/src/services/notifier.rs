//! One-way client for the notification subsystem.
//!
//! After a confirmation batch commits, every touched bucket gets a budget
//! threshold evaluation. The outcome is not consumed here and a failure
//! must never roll back or surface into the persistence path.

use serde_json::json;
use std::time::Duration;

#[derive(Clone)]
pub struct BudgetNotifier {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl BudgetNotifier {
    pub fn new(endpoint: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();

        if endpoint.is_none() {
            tracing::info!("Notification service not configured - budget checks disabled");
        }

        Self { client, endpoint }
    }

    /// Fire a budget-threshold evaluation for (user, bucket).
    pub async fn check_budget_threshold(&self, user_id: &str, bucket_id: &str) {
        let Some(endpoint) = &self.endpoint else {
            return;
        };

        let url = format!("{}/notifications/budget-check", endpoint.trim_end_matches('/'));
        let body = json!({ "user_id": user_id, "bucket_id": bucket_id });

        match self.client.post(&url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(user_id = %user_id, bucket_id = %bucket_id, "Budget check dispatched");
            }
            Ok(response) => {
                tracing::warn!(
                    user_id = %user_id,
                    bucket_id = %bucket_id,
                    status = %response.status(),
                    "Budget check rejected by notification service"
                );
            }
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    bucket_id = %bucket_id,
                    error = %e,
                    "Budget check failed to reach notification service"
                );
            }
        }
    }
}
