//! Background import execution.
//!
//! Imports run on a small worker pool fed by a bounded queue, so the HTTP
//! handler returns a job id immediately and pollers observe progress from
//! the job row. Each task reports exactly one terminal transition; the
//! `status = 'processing'` guard in the job updates makes a second
//! transition a no-op.

use crate::classifier::{BatchProgress, ClassifierEngine};
use crate::config::WorkerConfig;
use crate::pipeline::{self, rules};
use crate::services::csv_reader::{self, ColumnMapping};
use crate::services::metrics::IMPORT_JOBS;
use crate::services::Database;
use service_core::error::AppError;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A queued import awaiting a worker.
#[derive(Debug, Clone)]
pub struct ImportTask {
    pub job_id: String,
    pub user_id: String,
    pub content: Vec<u8>,
    pub mapping: ColumnMapping,
    pub spender: Option<String>,
    pub skip_duplicates: bool,
}

pub struct ImportWorkerPool {
    config: WorkerConfig,
    db: Database,
    classifier: Arc<ClassifierEngine>,
    job_rx: Option<mpsc::Receiver<ImportTask>>,
    shutdown_token: CancellationToken,
}

impl ImportWorkerPool {
    pub fn new(
        config: WorkerConfig,
        db: Database,
        classifier: Arc<ClassifierEngine>,
    ) -> (Self, mpsc::Sender<ImportTask>) {
        let (job_tx, job_rx) = mpsc::channel(config.queue_size.max(1));

        let pool = Self {
            config,
            db,
            classifier,
            job_rx: Some(job_rx),
            shutdown_token: CancellationToken::new(),
        };

        (pool, job_tx)
    }

    /// Spawn the distributor and workers; returns the shutdown token.
    pub fn start(mut self) -> CancellationToken {
        let mut job_rx = self.job_rx.take().expect("start() can only be called once");
        let shutdown = self.shutdown_token.clone();
        let token = self.shutdown_token.clone();

        let workers: Vec<ImportWorker> = (0..self.config.worker_count.max(1))
            .map(|id| ImportWorker {
                id,
                db: self.db.clone(),
                classifier: self.classifier.clone(),
            })
            .collect();

        tracing::info!(worker_count = workers.len(), "Starting import worker pool");

        tokio::spawn(async move {
            let mut next_worker = 0;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Import distributor shutting down");
                        break;
                    }
                    task = job_rx.recv() => {
                        match task {
                            Some(task) => {
                                // Round-robin distribution.
                                let worker = workers[next_worker].clone();
                                next_worker = (next_worker + 1) % workers.len();

                                tracing::info!(
                                    worker_id = worker.id,
                                    job_id = %task.job_id,
                                    "Dispatching import to worker"
                                );

                                tokio::spawn(async move {
                                    worker.process_task(task).await;
                                });
                            }
                            None => {
                                tracing::info!("Channel closed, import distributor exiting");
                                break;
                            }
                        }
                    }
                }
            }
        });

        token
    }
}

#[derive(Clone)]
struct ImportWorker {
    id: usize,
    db: Database,
    classifier: Arc<ClassifierEngine>,
}

impl ImportWorker {
    async fn process_task(&self, task: ImportTask) {
        let job_id = task.job_id.clone();
        let start = std::time::Instant::now();

        tracing::info!(
            worker_id = self.id,
            job_id = %job_id,
            bytes = task.content.len(),
            "Import started"
        );

        match self.run_import(task).await {
            Ok(()) => {
                IMPORT_JOBS.with_label_values(&["complete"]).inc();
                tracing::info!(
                    worker_id = self.id,
                    job_id = %job_id,
                    duration_ms = start.elapsed().as_millis(),
                    "Import succeeded"
                );
            }
            Err(e) => {
                IMPORT_JOBS.with_label_values(&["failed"]).inc();
                tracing::error!(
                    worker_id = self.id,
                    job_id = %job_id,
                    error = %e,
                    "Import failed"
                );
                // The failure transition must still be attempted; losing it
                // strands the job in `processing` forever.
                if let Err(record_err) = self.db.fail_job(&job_id, &e.to_string()).await {
                    tracing::error!(
                        job_id = %job_id,
                        error = %record_err,
                        "Failed to record job failure"
                    );
                }
            }
        }
    }

    async fn run_import(&self, task: ImportTask) -> Result<(), AppError> {
        let db = &self.db;

        db.update_job_progress(&task.job_id, 0, Some("Parsing CSV...")).await?;

        let rows = csv_reader::extract_rows(&task.content, &task.mapping)?;

        db.update_job_total(&task.job_id, rows.len() as i64).await?;

        if rows.is_empty() {
            db.complete_job(&task.job_id, "[]", 0, "Complete (no transactions found)")
                .await?;
            return Ok(());
        }

        db.update_job_progress(
            &task.job_id,
            0,
            Some(&format!("Processing {} transactions...", rows.len())),
        )
        .await?;

        let existing_fingerprints = db.fingerprints_for_user(&task.user_id).await?;
        let buckets = db.buckets_for_user(&task.user_id).await?;
        let mut rule_set = db.rules_for_user(&task.user_id).await?;
        rules::order_rules(&mut rule_set);

        db.update_job_progress(&task.job_id, 0, Some("Applying rules...")).await?;

        // Forward classifier progress into the job row for pollers.
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<BatchProgress>();
        let forwarder = {
            let db = db.clone();
            let job_id = task.job_id.clone();
            tokio::spawn(async move {
                while let Some(update) = progress_rx.recv().await {
                    let message = format!(
                        "AI: batch {}/{} ({}/{} processed)",
                        update.batch, update.total_batches, update.processed, update.total
                    );
                    if let Err(e) = db
                        .update_job_progress(&job_id, update.processed as i64, Some(&message))
                        .await
                    {
                        tracing::warn!(job_id = %job_id, error = %e, "Failed to forward progress");
                    }
                }
            })
        };

        let request = pipeline::PreviewRequest {
            user_id: &task.user_id,
            spender: task.spender.as_deref(),
            skip_duplicates: task.skip_duplicates,
        };
        let outcome = pipeline::run_preview(
            &rows,
            &request,
            &existing_fingerprints,
            &buckets,
            &rule_set,
            &self.classifier,
            Some(progress_tx),
        )
        .await;

        // All senders are gone once the pipeline returns.
        let _ = forwarder.await;

        let result_json = serde_json::to_string(&outcome.transactions).map_err(|e| {
            AppError::InternalError(anyhow::anyhow!("Failed to serialize preview: {}", e))
        })?;
        let message = if outcome.duplicate_count > 0 {
            format!("Complete ({} duplicates skipped)", outcome.duplicate_count)
        } else {
            "Complete".to_string()
        };

        db.complete_job(
            &task.job_id,
            &result_json,
            outcome.duplicate_count as i64,
            &message,
        )
        .await?;

        Ok(())
    }
}
