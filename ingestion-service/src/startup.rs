//! Application startup and lifecycle management.

use crate::classifier::gemini::{GeminiConfig as GeminiProviderConfig, GeminiProvider};
use crate::classifier::ClassifierEngine;
use crate::config::IngestionConfig;
use crate::handlers::{health, ingest, jobs};
use crate::services::{init_metrics, BudgetNotifier, Database};
use crate::workers::{ImportTask, ImportWorkerPool};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use service_core::error::AppError;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: IngestionConfig,
    pub db: Database,
    pub classifier: Arc<ClassifierEngine>,
    pub notifier: BudgetNotifier,
    pub job_tx: Option<mpsc::Sender<ImportTask>>,
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
    state: AppState,
    worker_shutdown: CancellationToken,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: IngestionConfig) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(&config.database.url, config.database.max_connections)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to connect to database");
                e
            })?;

        db.run_migrations().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            e
        })?;

        let classifier = Arc::new(match &config.gemini.api_key {
            Some(api_key) => {
                let provider = GeminiProvider::new(GeminiProviderConfig {
                    api_key: api_key.clone(),
                    model: config.gemini.model.clone(),
                })
                .map_err(|e| {
                    AppError::ConfigError(anyhow::anyhow!("Failed to build Gemini client: {}", e))
                })?;
                tracing::info!(model = %config.gemini.model, "AI categorization enabled");
                ClassifierEngine::new(Arc::new(provider))
            }
            None => {
                tracing::info!("GEMINI_API_KEY not set - AI categorization disabled");
                ClassifierEngine::disabled()
            }
        });

        let notifier = BudgetNotifier::new(config.notifications.endpoint.clone());

        let (worker_pool, job_tx) =
            ImportWorkerPool::new(config.worker.clone(), db.clone(), classifier.clone());
        let worker_shutdown = worker_pool.start();

        let state = AppState {
            config: config.clone(),
            db,
            classifier,
            notifier,
            job_tx: Some(job_tx),
        };

        let router = Router::new()
            .route("/health", get(health::health_check))
            .route("/ready", get(health::readiness_check))
            .route("/metrics", get(health::metrics_handler))
            .route("/ingest/csv/preview", post(ingest::preview_csv))
            .route("/ingest/csv", post(ingest::ingest_csv))
            .route("/ingest/csv/start", post(ingest::start_csv_import))
            .route("/ingest/confirm", post(ingest::confirm_transactions))
            .route("/ingest/jobs/:job_id", get(jobs::get_job_status))
            // A hair above the upload cap so the handler's own size check
            // answers with 413 instead of axum's generic body-limit error.
            .layer(DefaultBodyLimit::max(config.import.max_upload_bytes + 1024 * 1024))
            .layer(TraceLayer::new_for_http())
            .layer(axum::middleware::from_fn(request_id_middleware))
            .with_state(state.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Ingestion service listener bound");

        Ok(Self {
            port,
            listener,
            router,
            state,
            worker_shutdown,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.state.db
    }

    /// Token that stops the import worker pool.
    pub fn worker_shutdown(&self) -> CancellationToken {
        self.worker_shutdown.clone()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        tracing::info!(
            service = "ingestion-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, self.router).await
    }
}
