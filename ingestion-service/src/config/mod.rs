//! Configuration module for ingestion-service.

use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub database: DatabaseConfig,
    pub gemini: GeminiConfig,
    pub notifications: NotificationConfig,
    pub worker: WorkerConfig,
    pub import: ImportConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// Absent key disables AI categorization entirely.
    pub api_key: Option<String>,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct NotificationConfig {
    /// Base URL of the notification service; absent disables budget checks.
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_count: usize,
    pub queue_size: usize,
}

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub max_upload_bytes: usize,
    pub job_max_age_hours: i64,
}

impl IngestionConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "ingestion-service".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            },
            gemini: GeminiConfig {
                api_key: env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty()),
                model: env::var("GEMINI_MODEL")
                    .unwrap_or_else(|_| "gemini-2.0-flash".to_string()),
            },
            notifications: NotificationConfig {
                endpoint: env::var("NOTIFICATION_SERVICE_URL")
                    .ok()
                    .filter(|u| !u.is_empty()),
            },
            worker: WorkerConfig {
                worker_count: env::var("IMPORT_WORKER_COUNT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
                queue_size: env::var("IMPORT_QUEUE_SIZE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(32),
            },
            import: ImportConfig {
                max_upload_bytes: env::var("MAX_UPLOAD_BYTES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10 * 1024 * 1024),
                job_max_age_hours: env::var("JOB_MAX_AGE_HOURS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(24),
            },
        })
    }
}
