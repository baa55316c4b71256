//! Request and response shapes for the ingestion HTTP surface.

use crate::models::{Bucket, Transaction};
use serde::{Deserialize, Serialize};

/// Slim bucket view embedded in preview and transaction responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketSummary {
    pub bucket_id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub is_transfer: bool,
    pub is_investment: bool,
    pub display_order: i64,
}

impl From<&Bucket> for BucketSummary {
    fn from(b: &Bucket) -> Self {
        Self {
            bucket_id: b.bucket_id.clone(),
            name: b.name.clone(),
            parent_id: b.parent_id.clone(),
            is_transfer: b.is_transfer,
            is_investment: b.is_investment,
            display_order: b.display_order,
        }
    }
}

/// An ephemeral candidate transaction shown to the user before confirmation.
///
/// Never written to storage; the negative `id` lets the client round-trip
/// it back through `/ingest/confirm` without colliding with persisted ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewTransaction {
    /// Synthetic negative identifier, `-(row_index + 1)`.
    pub id: i64,
    pub date: String,
    pub description: String,
    pub raw_description: String,
    pub amount: f64,
    pub bucket_id: Option<String>,
    pub bucket: Option<BucketSummary>,
    pub confidence: f64,
    pub is_verified: bool,
    pub spender: Option<String>,
    pub tags: Option<String>,
    pub fingerprint: String,
}

/// CSV structure probe returned by `/ingest/csv/preview`.
#[derive(Debug, Serialize)]
pub struct CsvPreviewResponse {
    pub headers: Vec<String>,
    pub row_count: usize,
    pub sample: Vec<Vec<String>>,
}

/// Immediate response from `/ingest/csv/start`.
#[derive(Debug, Serialize)]
pub struct StartImportResponse {
    pub job_id: String,
    pub status: String,
    pub message: String,
    pub total: i64,
}

/// Snapshot returned by the job polling endpoint.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: String,
    pub progress: i64,
    pub total: i64,
    pub message: Option<String>,
    pub error: Option<String>,
    pub duplicate_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<PreviewTransaction>>,
}

/// One entry in a confirmation batch: a preview row (negative id) to
/// persist, or an existing row (positive id) to update.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmEntry {
    pub id: i64,
    pub date: Option<String>,
    pub description: Option<String>,
    pub raw_description: Option<String>,
    pub amount: Option<f64>,
    pub bucket_id: Option<String>,
    pub confidence: Option<f64>,
    pub spender: Option<String>,
    pub tags: Option<String>,
    pub assigned_to: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub transaction_id: i64,
    pub date: String,
    pub description: String,
    pub raw_description: String,
    pub amount: f64,
    pub bucket_id: Option<String>,
    pub confidence: f64,
    pub is_verified: bool,
    pub spender: Option<String>,
    pub tags: Option<String>,
    pub assigned_to: Option<String>,
}

impl From<Transaction> for TransactionResponse {
    fn from(t: Transaction) -> Self {
        Self {
            transaction_id: t.transaction_id,
            date: t.txn_date.format("%Y-%m-%dT%H:%M:%S").to_string(),
            description: t.description,
            raw_description: t.raw_description,
            amount: t.amount,
            bucket_id: t.bucket_id,
            confidence: t.confidence,
            is_verified: t.is_verified,
            spender: t.spender,
            tags: t.tags,
            assigned_to: t.assigned_to,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub confirmed: Vec<TransactionResponse>,
    pub skipped_duplicates: usize,
}
