//! AI-backed category classification for transactions the rule cascade
//! could not place.
//!
//! A trait-based provider abstraction (Gemini or mock) produces raw model
//! text; the engine owns batching, bounded concurrency, response parsing
//! and vocabulary closure.

pub mod engine;
pub mod gemini;
pub mod mock;

pub use engine::{BatchProgress, ClassifierEngine};

use async_trait::async_trait;
use thiserror::Error;

/// Error type for classifier providers.
#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Classifier not configured: {0}")]
    NotConfigured(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Network error: {0}")]
    NetworkError(String),
}

/// A transaction still uncategorized after rules and keyword matching.
#[derive(Debug, Clone)]
pub struct PendingTransaction {
    /// Global row index within the import, used to merge results back.
    pub index: usize,
    /// Cleaned description.
    pub description: String,
    pub amount: f64,
}

/// A vocabulary-closed category prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// Bucket name exactly as it appears in the user's vocabulary.
    pub bucket_name: String,
    pub confidence: f64,
}

/// Trait for text-completion providers backing the classifier.
#[async_trait]
pub trait CategoryProvider: Send + Sync {
    /// Run a single prompt and return the raw model text.
    async fn complete(&self, prompt: &str) -> Result<String, ClassifierError>;

    /// Health check.
    async fn health_check(&self) -> Result<(), ClassifierError>;
}
