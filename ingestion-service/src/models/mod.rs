//! Domain models for ingestion-service.

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::FromRow;

// ============================================================================
// Raw Statement Rows
// ============================================================================

/// One row extracted from a statement file by a parser.
///
/// Parsers validate shape at the boundary; the pipeline relies on this
/// struct and does no further input checking.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub date: NaiveDateTime,
    pub description: String,
    pub amount: f64,
}

// ============================================================================
// Bucket Models
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct Bucket {
    pub bucket_id: String,
    pub user_id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub is_transfer: bool,
    pub is_investment: bool,
    pub display_order: i64,
    pub created_utc: DateTime<Utc>,
}

// ============================================================================
// Categorization Rule Models
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct CategorizationRule {
    pub rule_id: String,
    pub user_id: String,
    /// Comma-joined keyword list; every token must match the description.
    pub keywords: String,
    /// Optional absolute-amount bounds; either side may be open.
    pub min_amount: Option<f64>,
    pub max_amount: Option<f64>,
    pub priority: i64,
    pub bucket_id: String,
    /// A match never auto-verifies when set.
    pub mark_for_review: bool,
    pub apply_tags: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl CategorizationRule {
    pub fn has_amount_filter(&self) -> bool {
        self.min_amount.is_some() || self.max_amount.is_some()
    }

    pub fn keyword_tokens(&self) -> impl Iterator<Item = &str> {
        self.keywords
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

// ============================================================================
// Transaction Models
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct Transaction {
    /// Positive integer id; preview candidates use negative synthetic ids
    /// and never appear in this table.
    pub transaction_id: i64,
    pub user_id: String,
    pub txn_date: NaiveDateTime,
    pub description: String,
    pub raw_description: String,
    pub amount: f64,
    pub bucket_id: Option<String>,
    pub confidence: f64,
    pub is_verified: bool,
    pub spender: Option<String>,
    pub tags: Option<String>,
    pub assigned_to: Option<String>,
    pub fingerprint: Option<String>,
    pub created_utc: DateTime<Utc>,
}

/// A transaction about to be persisted from a confirmed preview.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub user_id: String,
    pub txn_date: NaiveDateTime,
    pub description: String,
    pub raw_description: String,
    pub amount: f64,
    pub bucket_id: Option<String>,
    pub confidence: f64,
    pub spender: Option<String>,
    pub tags: Option<String>,
    pub assigned_to: Option<String>,
    pub fingerprint: String,
}

// ============================================================================
// Import Job Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Processing,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "complete" => Self::Complete,
            "failed" => Self::Failed,
            _ => Self::Processing,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ImportJob {
    pub job_id: String,
    pub user_id: String,
    pub status: String,
    pub progress: i64,
    pub total: i64,
    pub message: Option<String>,
    pub error: Option<String>,
    pub duplicate_count: i64,
    pub result_json: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl ImportJob {
    pub fn status(&self) -> JobStatus {
        JobStatus::parse(&self.status)
    }
}
