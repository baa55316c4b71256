//! Common test utilities for ingestion-service integration tests.

#![allow(dead_code)]

use ingestion_service::config::{
    DatabaseConfig, GeminiConfig, ImportConfig, IngestionConfig, NotificationConfig, WorkerConfig,
};
use ingestion_service::services::Database;
use ingestion_service::startup::Application;
use service_core::config::Config as CoreConfig;
use std::sync::Once;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,ingestion_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

fn test_config(db_url: String) -> IngestionConfig {
    IngestionConfig {
        common: CoreConfig { port: 0 },
        service_name: "ingestion-service-test".to_string(),
        log_level: "debug".to_string(),
        database: DatabaseConfig {
            url: db_url,
            max_connections: 5,
        },
        gemini: GeminiConfig {
            // No key: the classifier stays disabled and the residue is
            // simply uncategorized, which keeps these tests hermetic.
            api_key: None,
            model: "gemini-2.0-flash".to_string(),
        },
        notifications: NotificationConfig { endpoint: None },
        worker: WorkerConfig {
            worker_count: 1,
            queue_size: 8,
        },
        import: ImportConfig {
            max_upload_bytes: 10 * 1024 * 1024,
            job_max_age_hours: 24,
        },
    }
}

/// Test application wrapper.
pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub db: Database,
    pub user_id: String,
    pub client: reqwest::Client,
    _temp_dir: tempfile::TempDir,
}

impl TestApp {
    /// Spawn a test application against a fresh temp-file SQLite database.
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Spawn with a config tweak applied before build.
    pub async fn spawn_with(tweak: impl FnOnce(&mut IngestionConfig)) -> Self {
        init_tracing();

        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("ingestion-test.db");
        let mut config = test_config(format!("sqlite://{}", db_path.display()));
        tweak(&mut config);

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");
        let port = app.port();
        let db = app.db().clone();

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        let client = reqwest::Client::new();
        let health_url = format!("http://127.0.0.1:{}/health", port);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address: format!("http://127.0.0.1:{}", port),
            port,
            db,
            user_id: format!("user-{}", Uuid::new_v4()),
            client,
            _temp_dir: temp_dir,
        }
    }

    pub async fn seed_bucket(&self, name: &str) -> String {
        self.db
            .create_bucket(&self.user_id, name, None, false, false, 0)
            .await
            .expect("Failed to seed bucket")
            .bucket_id
    }

    pub async fn seed_rule(&self, keywords: &str, bucket_id: &str) {
        self.db
            .create_rule(&self.user_id, keywords, None, None, 0, bucket_id, false, None)
            .await
            .expect("Failed to seed rule");
    }

    /// Multipart form carrying a CSV file plus the default column mapping.
    pub fn csv_form(csv: &str) -> reqwest::multipart::Form {
        Self::csv_form_named(csv, "statement.csv")
    }

    pub fn csv_form_named(csv: &str, filename: &str) -> reqwest::multipart::Form {
        reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(csv.as_bytes().to_vec())
                    .file_name(filename.to_string())
                    .mime_str("text/csv")
                    .expect("Invalid mime type"),
            )
            .text("map_date", "Date")
            .text("map_desc", "Description")
            .text("map_amount", "Amount")
            .text("spender", "Joint")
            .text("skip_duplicates", "true")
    }

    pub async fn post_multipart(
        &self,
        path: &str,
        form: reqwest::multipart::Form,
    ) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.address, path))
            .header("X-User-ID", &self.user_id)
            .multipart(form)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get_json(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.address, path))
            .header("X-User-ID", &self.user_id)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn confirm(&self, entries: &serde_json::Value) -> reqwest::Response {
        self.client
            .post(format!("{}/ingest/confirm", self.address))
            .header("X-User-ID", &self.user_id)
            .json(entries)
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Poll the job endpoint until it leaves `processing`.
    pub async fn poll_until_terminal(&self, job_id: &str) -> serde_json::Value {
        for _ in 0..200 {
            let response = self.get_json(&format!("/ingest/jobs/{}", job_id)).await;
            assert!(response.status().is_success(), "job poll failed");
            let body: serde_json::Value = response.json().await.expect("Invalid job JSON");
            if body["status"] != "processing" {
                return body;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(25)).await;
        }
        panic!("Job {} never reached a terminal state", job_id);
    }
}
