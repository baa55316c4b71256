//! Import job polling.

use crate::dtos::{JobStatusResponse, PreviewTransaction};
use crate::middleware::UserId;
use crate::models::JobStatus;
use crate::startup::AppState;
use axum::extract::{Path, State};
use axum::Json;
use service_core::error::AppError;

/// Poll an import job. 404 when the job does not exist or belongs to
/// another user; the two cases are indistinguishable on purpose.
pub async fn get_job_status(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, AppError> {
    let job = state
        .db
        .get_job(&user_id, &job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Job not found")))?;

    let result: Option<Vec<PreviewTransaction>> = if job.status() == JobStatus::Complete {
        match &job.result_json {
            Some(raw) => Some(serde_json::from_str(raw).map_err(|e| {
                AppError::InternalError(anyhow::anyhow!("Corrupt job result: {}", e))
            })?),
            None => Some(Vec::new()),
        }
    } else {
        None
    };

    Ok(Json(JobStatusResponse {
        job_id: job.job_id,
        status: job.status,
        progress: job.progress,
        total: job.total,
        message: job.message,
        error: job.error,
        duplicate_count: job.duplicate_count,
        result,
    }))
}
