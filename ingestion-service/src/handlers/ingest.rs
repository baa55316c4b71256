//! Statement ingestion endpoints: CSV preview, synchronous import preview,
//! asynchronous import start and batch confirmation.

use crate::dtos::{
    ConfirmEntry, ConfirmResponse, CsvPreviewResponse, PreviewTransaction, StartImportResponse,
    TransactionResponse,
};
use crate::middleware::UserId;
use crate::models::NewTransaction;
use crate::pipeline::{self, rules};
use crate::services::csv_reader::{self, ColumnMapping};
use crate::services::metrics::CONFIRMATIONS;
use crate::startup::AppState;
use crate::workers::ImportTask;
use axum::extract::{Multipart, State};
use axum::Json;
use chrono::{NaiveDate, NaiveDateTime};
use service_core::error::AppError;
use std::collections::HashSet;

/// Parsed multipart form for the CSV endpoints.
struct CsvUpload {
    content: Vec<u8>,
    map_date: Option<String>,
    map_desc: Option<String>,
    map_amount: Option<String>,
    map_debit: Option<String>,
    map_credit: Option<String>,
    spender: String,
    skip_duplicates: bool,
}

impl CsvUpload {
    fn mapping(&self) -> Result<ColumnMapping, AppError> {
        let date = self
            .map_date
            .clone()
            .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("map_date is required")))?;
        let description = self
            .map_desc
            .clone()
            .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("map_desc is required")))?;
        Ok(ColumnMapping {
            date,
            description,
            amount: self.map_amount.clone(),
            debit: self.map_debit.clone(),
            credit: self.map_credit.clone(),
        })
    }
}

/// Read the multipart form, enforcing the CSV extension and the upload cap
/// before anything is parsed.
async fn read_csv_upload(mut multipart: Multipart, max_bytes: usize) -> Result<CsvUpload, AppError> {
    let mut content: Option<Vec<u8>> = None;
    let mut upload = CsvUpload {
        content: Vec::new(),
        map_date: None,
        map_desc: None,
        map_amount: None,
        map_debit: None,
        map_credit: None,
        spender: "Joint".to_string(),
        skip_duplicates: true,
    };

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        AppError::BadRequest(anyhow::anyhow!("Failed to read multipart field: {}", e))
    })? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("unnamed").to_string();
                if !filename.to_lowercase().ends_with(".csv") {
                    return Err(AppError::BadRequest(anyhow::anyhow!(
                        "Only CSV files are supported"
                    )));
                }
                let data = field.bytes().await.map_err(|e| {
                    AppError::BadRequest(anyhow::anyhow!("Failed to read file: {}", e))
                })?;
                if data.len() > max_bytes {
                    return Err(AppError::PayloadTooLarge(format!(
                        "File too large. Maximum size is {}MB.",
                        max_bytes / (1024 * 1024)
                    )));
                }
                content = Some(data.to_vec());
            }
            other => {
                let value = field.text().await.map_err(|e| {
                    AppError::BadRequest(anyhow::anyhow!("Failed to read field {}: {}", other, e))
                })?;
                match other {
                    "map_date" => upload.map_date = Some(value),
                    "map_desc" => upload.map_desc = Some(value),
                    "map_amount" => upload.map_amount = Some(value).filter(|v| !v.is_empty()),
                    "map_debit" => upload.map_debit = Some(value).filter(|v| !v.is_empty()),
                    "map_credit" => upload.map_credit = Some(value).filter(|v| !v.is_empty()),
                    "spender" => upload.spender = value,
                    "skip_duplicates" => {
                        upload.skip_duplicates =
                            matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
                    }
                    _ => {}
                }
            }
        }
    }

    upload.content =
        content.ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("No file uploaded")))?;
    Ok(upload)
}

/// Probe an uploaded CSV's structure before the user maps columns.
pub async fn preview_csv(
    State(state): State<AppState>,
    _user: UserId,
    multipart: Multipart,
) -> Result<Json<CsvPreviewResponse>, AppError> {
    let upload = read_csv_upload(multipart, state.config.import.max_upload_bytes).await?;
    let structure = csv_reader::parse_preview(&upload.content)?;

    Ok(Json(CsvPreviewResponse {
        headers: structure.headers,
        row_count: structure.row_count,
        sample: structure.sample,
    }))
}

/// Synchronous import: parse, categorize and return the preview inline.
/// Suitable for small statements; large ones go through `/ingest/csv/start`.
pub async fn ingest_csv(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    multipart: Multipart,
) -> Result<Json<Vec<PreviewTransaction>>, AppError> {
    let upload = read_csv_upload(multipart, state.config.import.max_upload_bytes).await?;
    let mapping = upload.mapping()?;

    let rows = csv_reader::extract_rows(&upload.content, &mapping)?;
    if rows.is_empty() {
        return Ok(Json(Vec::new()));
    }

    let existing_fingerprints = state.db.fingerprints_for_user(&user_id).await?;
    let buckets = state.db.buckets_for_user(&user_id).await?;
    let mut rule_set = state.db.rules_for_user(&user_id).await?;
    rules::order_rules(&mut rule_set);

    let request = pipeline::PreviewRequest {
        user_id: &user_id,
        spender: Some(&upload.spender),
        skip_duplicates: upload.skip_duplicates,
    };
    let outcome = pipeline::run_preview(
        &rows,
        &request,
        &existing_fingerprints,
        &buckets,
        &rule_set,
        &state.classifier,
        None,
    )
    .await;

    if outcome.duplicate_count > 0 {
        tracing::info!(
            duplicates = outcome.duplicate_count,
            "Skipped duplicate transactions during preview"
        );
    }

    Ok(Json(outcome.transactions))
}

/// Start an asynchronous import; returns immediately with a job id.
pub async fn start_csv_import(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    multipart: Multipart,
) -> Result<Json<StartImportResponse>, AppError> {
    let upload = read_csv_upload(multipart, state.config.import.max_upload_bytes).await?;
    let mapping = upload.mapping()?;

    // Quick structure probe for a progress total; the worker corrects it
    // once the real parse lands.
    let total_estimate = csv_reader::parse_preview(&upload.content)
        .map(|p| p.row_count as i64)
        .unwrap_or(100);

    if let Err(e) = state
        .db
        .cleanup_old_jobs(&user_id, state.config.import.job_max_age_hours)
        .await
    {
        tracing::warn!(error = %e, "Old job cleanup failed");
    }

    let job = state.db.create_job(&user_id, total_estimate).await?;

    let task = ImportTask {
        job_id: job.job_id.clone(),
        user_id,
        content: upload.content,
        mapping,
        spender: Some(upload.spender),
        skip_duplicates: upload.skip_duplicates,
    };

    let Some(job_tx) = &state.job_tx else {
        return Err(AppError::InternalError(anyhow::anyhow!(
            "Worker pool not available"
        )));
    };
    job_tx.send(task).await.map_err(|_| {
        tracing::error!(job_id = %job.job_id, "Failed to enqueue import task");
        AppError::InternalError(anyhow::anyhow!("Worker queue is full"))
    })?;

    tracing::info!(job_id = %job.job_id, total_estimate = total_estimate, "Import job enqueued");

    Ok(Json(StartImportResponse {
        job_id: job.job_id,
        status: "processing".to_string(),
        message: "Import started".to_string(),
        total: total_estimate,
    }))
}

/// Bulk confirm transactions.
///
/// Preview entries (negative id) are persisted after a fresh fingerprint
/// recheck; a collision with a row persisted since the preview is silently
/// skipped and counted, never an error. Existing entries (positive id)
/// only mutate bucket/spender/tags/assignment. Everything touched ends up
/// verified — user confirmation is the definition of verified.
pub async fn confirm_transactions(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(updates): Json<Vec<ConfirmEntry>>,
) -> Result<Json<ConfirmResponse>, AppError> {
    let mut confirmed: Vec<TransactionResponse> = Vec::new();
    let mut skipped_duplicates = 0usize;
    let mut touched_buckets: HashSet<String> = HashSet::new();

    for update in &updates {
        if update.id < 0 {
            let (Some(date), Some(description), Some(amount)) =
                (update.date.as_deref(), update.description.as_deref(), update.amount)
            else {
                tracing::warn!(
                    preview_id = update.id,
                    "Skipping preview entry with missing required fields"
                );
                CONFIRMATIONS.with_label_values(&["invalid"]).inc();
                continue;
            };

            let txn_date = parse_confirm_date(date)?;
            let raw_description = update
                .raw_description
                .clone()
                .unwrap_or_else(|| description.to_string());

            // Recheck against storage even though the preview already did:
            // a concurrent import or a double-submit may have landed the
            // same row since.
            let digest = pipeline::fingerprint(&user_id, txn_date, &raw_description, amount);

            let new = NewTransaction {
                user_id: user_id.clone(),
                txn_date,
                description: description.to_string(),
                raw_description,
                amount,
                bucket_id: update.bucket_id.clone(),
                confidence: update.confidence.unwrap_or(0.0),
                spender: Some(update.spender.clone().unwrap_or_else(|| "Joint".to_string())),
                tags: update.tags.clone(),
                assigned_to: update.assigned_to.clone().filter(|a| !a.is_empty()),
                fingerprint: digest,
            };

            match state.db.insert_transaction(&new).await? {
                Some(txn) => {
                    CONFIRMATIONS.with_label_values(&["created"]).inc();
                    if let Some(bucket_id) = &txn.bucket_id {
                        touched_buckets.insert(bucket_id.clone());
                    }
                    confirmed.push(txn.into());
                }
                None => {
                    CONFIRMATIONS.with_label_values(&["duplicate_skipped"]).inc();
                    skipped_duplicates += 1;
                }
            }
        } else {
            match state
                .db
                .apply_confirmation(
                    &user_id,
                    update.id,
                    update.bucket_id.as_deref(),
                    update.spender.as_deref(),
                    update.tags.as_deref(),
                    update.assigned_to.as_deref(),
                )
                .await?
            {
                Some(txn) => {
                    CONFIRMATIONS.with_label_values(&["updated"]).inc();
                    if let Some(bucket_id) = &txn.bucket_id {
                        touched_buckets.insert(bucket_id.clone());
                    }
                    confirmed.push(txn.into());
                }
                None => {
                    tracing::warn!(
                        transaction_id = update.id,
                        "Confirmation target not found for user, skipping"
                    );
                }
            }
        }
    }

    // Post-commit side effect: budget threshold checks for every touched
    // bucket. Outcomes are not consumed and failures stay in the notifier.
    for bucket_id in &touched_buckets {
        state.notifier.check_budget_threshold(&user_id, bucket_id).await;
    }

    Ok(Json(ConfirmResponse {
        confirmed,
        skipped_duplicates,
    }))
}

fn parse_confirm_date(value: &str) -> Result<NaiveDateTime, AppError> {
    let trimmed = value.trim().trim_end_matches('Z');
    if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt);
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt);
        }
    }
    Err(AppError::BadRequest(anyhow::anyhow!(
        "Unrecognized date: {}",
        value
    )))
}
