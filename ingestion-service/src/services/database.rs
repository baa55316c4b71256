//! Database service for ingestion-service.

#![allow(clippy::too_many_arguments)]

use crate::models::{Bucket, CategorizationRule, ImportJob, JobStatus, NewTransaction, Transaction};
use crate::services::metrics::DB_QUERY_DURATION;
use chrono::{Duration, Utc};
use service_core::error::AppError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::collections::HashSet;
use std::str::FromStr;
use tracing::{info, instrument};
use uuid::Uuid;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "ingestion-service"))]
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self, AppError> {
        info!(max_connections = max_connections, "Connecting to SQLite");

        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid DATABASE_URL: {}", e)))?
            .create_if_missing(true)
            .foreign_keys(true)
            // Workers update job rows while request handlers read and
            // write transactions; WAL keeps them from blocking each other.
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("SQLite connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // =========================================================================
    // Bucket Operations
    // =========================================================================

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn create_bucket(
        &self,
        user_id: &str,
        name: &str,
        parent_id: Option<&str>,
        is_transfer: bool,
        is_investment: bool,
        display_order: i64,
    ) -> Result<Bucket, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_bucket"])
            .start_timer();

        let bucket = sqlx::query_as::<_, Bucket>(
            r#"
            INSERT INTO buckets (bucket_id, user_id, name, parent_id, is_transfer, is_investment, display_order, created_utc)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING bucket_id, user_id, name, parent_id, is_transfer, is_investment, display_order, created_utc
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(name)
        .bind(parent_id)
        .bind(is_transfer)
        .bind(is_investment)
        .bind(display_order)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(anyhow::anyhow!("Bucket name already exists: {}", name))
            } else {
                AppError::DatabaseError(anyhow::anyhow!("Failed to create bucket: {}", e))
            }
        })?;

        timer.observe_duration();
        info!(bucket_id = %bucket.bucket_id, "Bucket created");

        Ok(bucket)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn buckets_for_user(&self, user_id: &str) -> Result<Vec<Bucket>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["buckets_for_user"])
            .start_timer();

        let buckets = sqlx::query_as::<_, Bucket>(
            r#"
            SELECT bucket_id, user_id, name, parent_id, is_transfer, is_investment, display_order, created_utc
            FROM buckets
            WHERE user_id = ?
            ORDER BY display_order, name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list buckets: {}", e)))?;

        timer.observe_duration();

        Ok(buckets)
    }

    // =========================================================================
    // Categorization Rule Operations
    // =========================================================================

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn create_rule(
        &self,
        user_id: &str,
        keywords: &str,
        min_amount: Option<f64>,
        max_amount: Option<f64>,
        priority: i64,
        bucket_id: &str,
        mark_for_review: bool,
        apply_tags: Option<&str>,
    ) -> Result<CategorizationRule, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_rule"])
            .start_timer();

        let rule = sqlx::query_as::<_, CategorizationRule>(
            r#"
            INSERT INTO categorization_rules (rule_id, user_id, keywords, min_amount, max_amount, priority, bucket_id, mark_for_review, apply_tags, created_utc)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING rule_id, user_id, keywords, min_amount, max_amount, priority, bucket_id, mark_for_review, apply_tags, created_utc
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(keywords)
        .bind(min_amount)
        .bind(max_amount)
        .bind(priority)
        .bind(bucket_id)
        .bind(mark_for_review)
        .bind(apply_tags)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create rule: {}", e)))?;

        timer.observe_duration();
        info!(rule_id = %rule.rule_id, "Categorization rule created");

        Ok(rule)
    }

    /// Fetch the user's rules. Evaluation ordering is applied in code by
    /// `pipeline::rules::order_rules` so the policy stays testable.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn rules_for_user(&self, user_id: &str) -> Result<Vec<CategorizationRule>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["rules_for_user"])
            .start_timer();

        let rules = sqlx::query_as::<_, CategorizationRule>(
            r#"
            SELECT rule_id, user_id, keywords, min_amount, max_amount, priority, bucket_id, mark_for_review, apply_tags, created_utc
            FROM categorization_rules
            WHERE user_id = ?
            ORDER BY created_utc
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list rules: {}", e)))?;

        timer.observe_duration();

        Ok(rules)
    }

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    /// Snapshot of every stored fingerprint for the user.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn fingerprints_for_user(&self, user_id: &str) -> Result<HashSet<String>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["fingerprints_for_user"])
            .start_timer();

        let fingerprints: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT fingerprint
            FROM transactions
            WHERE user_id = ? AND fingerprint IS NOT NULL
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to load fingerprints: {}", e))
        })?;

        timer.observe_duration();

        Ok(fingerprints.into_iter().collect())
    }

    /// Insert a confirmed transaction.
    ///
    /// Returns `Ok(None)` when the unique (user, fingerprint) index rejects
    /// the row — the caller treats that as a silently skipped duplicate.
    #[instrument(skip(self, new), fields(user_id = %new.user_id))]
    pub async fn insert_transaction(
        &self,
        new: &NewTransaction,
    ) -> Result<Option<Transaction>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_transaction"])
            .start_timer();

        let result = sqlx::query_as::<_, Transaction>(
            r#"
            INSERT INTO transactions (user_id, txn_date, description, raw_description, amount, bucket_id, confidence, is_verified, spender, tags, assigned_to, fingerprint, created_utc)
            VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?, ?)
            RETURNING transaction_id, user_id, txn_date, description, raw_description, amount, bucket_id, confidence, is_verified, spender, tags, assigned_to, fingerprint, created_utc
            "#,
        )
        .bind(&new.user_id)
        .bind(new.txn_date)
        .bind(&new.description)
        .bind(&new.raw_description)
        .bind(new.amount)
        .bind(&new.bucket_id)
        .bind(new.confidence)
        .bind(&new.spender)
        .bind(&new.tags)
        .bind(&new.assigned_to)
        .bind(&new.fingerprint)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await;

        timer.observe_duration();

        match result {
            Ok(txn) => Ok(Some(txn)),
            Err(e) if is_unique_violation(&e) => {
                info!(fingerprint = %new.fingerprint, "Duplicate fingerprint at persist time, skipping");
                Ok(None)
            }
            Err(e) => Err(AppError::DatabaseError(anyhow::anyhow!(
                "Failed to insert transaction: {}",
                e
            ))),
        }
    }

    #[instrument(skip(self), fields(user_id = %user_id, transaction_id = %transaction_id))]
    pub async fn get_transaction(
        &self,
        user_id: &str,
        transaction_id: i64,
    ) -> Result<Option<Transaction>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_transaction"])
            .start_timer();

        let txn = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT transaction_id, user_id, txn_date, description, raw_description, amount, bucket_id, confidence, is_verified, spender, tags, assigned_to, fingerprint, created_utc
            FROM transactions
            WHERE user_id = ? AND transaction_id = ?
            "#,
        )
        .bind(user_id)
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get transaction: {}", e)))?;

        timer.observe_duration();

        Ok(txn)
    }

    /// Apply a user confirmation to an existing transaction.
    ///
    /// Only bucket, spender, tags and assignment are mutable; the row is
    /// force-verified. An empty `assigned_to` clears the assignment.
    /// Returns `Ok(None)` when the row does not exist for this user.
    #[instrument(skip(self), fields(user_id = %user_id, transaction_id = %transaction_id))]
    pub async fn apply_confirmation(
        &self,
        user_id: &str,
        transaction_id: i64,
        bucket_id: Option<&str>,
        spender: Option<&str>,
        tags: Option<&str>,
        assigned_to: Option<&str>,
    ) -> Result<Option<Transaction>, AppError> {
        let Some(existing) = self.get_transaction(user_id, transaction_id).await? else {
            return Ok(None);
        };

        let timer = DB_QUERY_DURATION
            .with_label_values(&["apply_confirmation"])
            .start_timer();

        let spender = spender.map(str::to_string).or(existing.spender);
        let tags = tags.map(str::to_string).or(existing.tags);
        let assigned_to = match assigned_to {
            Some("") => None,
            Some(v) => Some(v.to_string()),
            None => existing.assigned_to,
        };

        let txn = sqlx::query_as::<_, Transaction>(
            r#"
            UPDATE transactions
            SET bucket_id = ?, spender = ?, tags = ?, assigned_to = ?, is_verified = 1
            WHERE user_id = ? AND transaction_id = ?
            RETURNING transaction_id, user_id, txn_date, description, raw_description, amount, bucket_id, confidence, is_verified, spender, tags, assigned_to, fingerprint, created_utc
            "#,
        )
        .bind(bucket_id)
        .bind(spender)
        .bind(tags)
        .bind(assigned_to)
        .bind(user_id)
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update transaction: {}", e))
        })?;

        timer.observe_duration();

        Ok(txn)
    }

    // =========================================================================
    // Import Job Operations
    // =========================================================================

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn create_job(&self, user_id: &str, total: i64) -> Result<ImportJob, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_job"])
            .start_timer();

        let now = Utc::now();
        let job = sqlx::query_as::<_, ImportJob>(
            r#"
            INSERT INTO import_jobs (job_id, user_id, status, progress, total, message, duplicate_count, created_utc, updated_utc)
            VALUES (?, ?, ?, 0, ?, 'Starting...', 0, ?, ?)
            RETURNING job_id, user_id, status, progress, total, message, error, duplicate_count, result_json, created_utc, updated_utc
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(JobStatus::Processing.as_str())
        .bind(total)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create job: {}", e)))?;

        timer.observe_duration();
        info!(job_id = %job.job_id, "Import job created");

        Ok(job)
    }

    /// Update progress/message. A no-op when the job is missing or terminal.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn update_job_progress(
        &self,
        job_id: &str,
        progress: i64,
        message: Option<&str>,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_job_progress"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE import_jobs
            SET progress = ?, message = COALESCE(?, message), updated_utc = ?
            WHERE job_id = ? AND status = 'processing'
            "#,
        )
        .bind(progress)
        .bind(message)
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update job: {}", e)))?;

        timer.observe_duration();

        Ok(())
    }

    /// Set the true row count once parsing has established it.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn update_job_total(&self, job_id: &str, total: i64) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_job_total"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE import_jobs
            SET total = ?, updated_utc = ?
            WHERE job_id = ? AND status = 'processing'
            "#,
        )
        .bind(total)
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update job total: {}", e)))?;

        timer.observe_duration();

        Ok(())
    }

    /// Transition a processing job to `complete` with its result payload.
    #[instrument(skip(self, result_json), fields(job_id = %job_id))]
    pub async fn complete_job(
        &self,
        job_id: &str,
        result_json: &str,
        duplicate_count: i64,
        message: &str,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["complete_job"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE import_jobs
            SET status = ?, progress = total, message = ?, duplicate_count = ?, result_json = ?, updated_utc = ?
            WHERE job_id = ? AND status = 'processing'
            "#,
        )
        .bind(JobStatus::Complete.as_str())
        .bind(message)
        .bind(duplicate_count)
        .bind(result_json)
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to complete job: {}", e)))?;

        timer.observe_duration();
        info!(job_id = %job_id, "Import job complete");

        Ok(())
    }

    /// Transition a processing job to `failed` with a captured error.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn fail_job(&self, job_id: &str, error_message: &str) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["fail_job"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE import_jobs
            SET status = ?, error = ?, updated_utc = ?
            WHERE job_id = ? AND status = 'processing'
            "#,
        )
        .bind(JobStatus::Failed.as_str())
        .bind(error_message)
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to fail job: {}", e)))?;

        timer.observe_duration();
        info!(job_id = %job_id, error = %error_message, "Import job failed");

        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id, job_id = %job_id))]
    pub async fn get_job(&self, user_id: &str, job_id: &str) -> Result<Option<ImportJob>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_job"])
            .start_timer();

        let job = sqlx::query_as::<_, ImportJob>(
            r#"
            SELECT job_id, user_id, status, progress, total, message, error, duplicate_count, result_json, created_utc, updated_utc
            FROM import_jobs
            WHERE user_id = ? AND job_id = ?
            "#,
        )
        .bind(user_id)
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get job: {}", e)))?;

        timer.observe_duration();

        Ok(job)
    }

    /// Delete terminal jobs older than `max_age_hours` for the user.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn cleanup_old_jobs(
        &self,
        user_id: &str,
        max_age_hours: i64,
    ) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["cleanup_old_jobs"])
            .start_timer();

        let cutoff = Utc::now() - Duration::hours(max_age_hours);
        let result = sqlx::query(
            r#"
            DELETE FROM import_jobs
            WHERE user_id = ? AND status != 'processing' AND created_utc < ?
            "#,
        )
        .bind(user_id)
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to clean up jobs: {}", e)))?;

        timer.observe_duration();

        let removed = result.rows_affected();
        if removed > 0 {
            info!(removed = removed, "Old import jobs removed");
        }

        Ok(removed)
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map(|db| matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation))
        .unwrap_or(false)
}
