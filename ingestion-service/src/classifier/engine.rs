//! Batching and concurrency engine around a [`CategoryProvider`].

use super::{CategoryProvider, ClassifierError, PendingTransaction, Prediction};
use crate::services::metrics::CLASSIFIER_BATCHES;
use futures::stream::StreamExt;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Small batches keep each response well under the model's output window.
const BATCH_SIZE: usize = 10;
/// Concurrent in-flight batches; bounds latency without tripping rate limits.
const MAX_CONCURRENT_BATCHES: usize = 5;
/// Per-batch deadline; an overdue batch fails alone.
const BATCH_TIMEOUT: Duration = Duration::from_secs(45);
/// Model output is never treated as more certain than an explicit rule.
const MAX_CONFIDENCE: f64 = 0.85;

/// Progress notification emitted after each batch settles.
#[derive(Debug, Clone)]
pub struct BatchProgress {
    pub processed: usize,
    pub total: usize,
    pub batch: usize,
    pub total_batches: usize,
}

/// Drives classification of the uncategorized residue of an import.
pub struct ClassifierEngine {
    provider: Option<Arc<dyn CategoryProvider>>,
}

impl ClassifierEngine {
    pub fn new(provider: Arc<dyn CategoryProvider>) -> Self {
        Self {
            provider: Some(provider),
        }
    }

    /// An engine with no provider: every call returns no predictions.
    pub fn disabled() -> Self {
        Self { provider: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    /// Classify `pending` against the user's bucket vocabulary.
    ///
    /// Batches are dispatched concurrently and may settle in any order;
    /// results are keyed by each transaction's global row index. A failed,
    /// timed-out or unparseable batch loses only its own rows. Progress is
    /// reported per settled batch over `progress`; a dropped receiver is
    /// ignored.
    pub async fn classify_all(
        &self,
        pending: &[PendingTransaction],
        vocabulary: &[String],
        progress: Option<mpsc::UnboundedSender<BatchProgress>>,
    ) -> HashMap<usize, Prediction> {
        let Some(provider) = &self.provider else {
            tracing::info!(
                pending = pending.len(),
                "AI categorization disabled, leaving residue uncategorized"
            );
            return HashMap::new();
        };
        if pending.is_empty() || vocabulary.is_empty() {
            return HashMap::new();
        }

        let total = pending.len();
        let batches: Vec<Vec<PendingTransaction>> =
            pending.chunks(BATCH_SIZE).map(<[_]>::to_vec).collect();
        let total_batches = batches.len();

        tracing::info!(
            total = total,
            total_batches = total_batches,
            "Dispatching classifier batches"
        );

        // Hand each in-flight batch owned, `'static` data. Driving a stream
        // whose futures (or iterator) borrow from `self`/`pending` through
        // `buffer_unordered` trips a higher-ranked-lifetime `Send` inference
        // limitation; owning every capture keeps the per-batch future
        // `'static` and leaves the observable behaviour identical.
        let provider = Arc::clone(provider);
        let vocabulary_owned = Arc::new(vocabulary.to_vec());
        let mut in_flight = futures::stream::iter(
            batches
                .into_iter()
                .enumerate()
                .map(move |(batch_idx, batch)| {
                    classify_batch(
                        Arc::clone(&provider),
                        batch_idx,
                        batch,
                        Arc::clone(&vocabulary_owned),
                    )
                }),
        )
        .buffer_unordered(MAX_CONCURRENT_BATCHES);

        let mut results: HashMap<usize, Prediction> = HashMap::new();
        let mut settled = 0usize;

        while let Some((batch_idx, batch, outcome)) = in_flight.next().await {
            settled += 1;
            match outcome {
                Ok(Ok(text)) => {
                    let parsed = parse_predictions(&text, batch.len(), vocabulary);
                    CLASSIFIER_BATCHES.with_label_values(&["ok"]).inc();
                    tracing::info!(
                        batch = batch_idx + 1,
                        total_batches = total_batches,
                        matched = parsed.len(),
                        batch_size = batch.len(),
                        "Classifier batch complete"
                    );
                    for (local_idx, prediction) in parsed {
                        results.insert(batch[local_idx].index, prediction);
                    }
                }
                Ok(Err(e)) => {
                    CLASSIFIER_BATCHES.with_label_values(&["error"]).inc();
                    tracing::warn!(
                        batch = batch_idx + 1,
                        total_batches = total_batches,
                        error = %e,
                        "Classifier batch failed, rows stay uncategorized"
                    );
                }
                Err(_) => {
                    CLASSIFIER_BATCHES.with_label_values(&["timeout"]).inc();
                    tracing::warn!(
                        batch = batch_idx + 1,
                        total_batches = total_batches,
                        timeout_secs = BATCH_TIMEOUT.as_secs(),
                        "Classifier batch timed out, rows stay uncategorized"
                    );
                }
            }

            if let Some(tx) = &progress {
                let _ = tx.send(BatchProgress {
                    processed: (settled * BATCH_SIZE).min(total),
                    total,
                    batch: settled,
                    total_batches,
                });
            }
        }

        tracing::info!(
            categorized = results.len(),
            total = total,
            "Classifier pass finished"
        );
        results
    }
}

/// Classify a single batch: build the prompt, call the provider under a
/// per-batch timeout, and carry the batch slice and index back out.
///
/// Extracted into a named `async fn` with an explicit lifetime so the
/// returned future's `Send`/lifetime relationship is concrete enough for
/// `buffer_unordered` to accept (an inline async closure trips an HRTB
/// inference limitation here).
async fn classify_batch(
    provider: Arc<dyn CategoryProvider>,
    batch_idx: usize,
    batch: Vec<PendingTransaction>,
    vocabulary: Arc<Vec<String>>,
) -> (
    usize,
    Vec<PendingTransaction>,
    Result<Result<String, ClassifierError>, tokio::time::error::Elapsed>,
) {
    let prompt = build_prompt(&batch, &vocabulary);
    let outcome = tokio::time::timeout(BATCH_TIMEOUT, provider.complete(&prompt)).await;
    (batch_idx, batch, outcome)
}

/// Build the constrained categorization prompt for one batch.
fn build_prompt(batch: &[PendingTransaction], vocabulary: &[String]) -> String {
    let txn_lines: Vec<String> = batch
        .iter()
        .enumerate()
        .map(|(i, txn)| format!("{}. \"{}\" (${:.2})", i, txn.description, txn.amount.abs()))
        .collect();
    let bucket_lines: Vec<String> = vocabulary.iter().map(|name| format!("- {name}")).collect();

    format!(
        r#"You are a financial transaction categorizer.

## CRITICAL: You MUST use ONLY these exact category names:
{buckets}

## Rules:
1. For each transaction, choose the BEST MATCHING category from the list above
2. You MUST use the EXACT category name as written above - copy it exactly
3. DO NOT create new categories or modify the names
4. If nothing fits, skip that transaction

## Transactions to categorize:
{transactions}

## Response format (JSON array only, no other text):
[
  {{"index": 0, "category": "EXACT_CATEGORY_NAME", "confidence": 0.9}},
  {{"index": 1, "category": "EXACT_CATEGORY_NAME", "confidence": 0.8}}
]

JSON:"#,
        buckets = bucket_lines.join("\n"),
        transactions = txn_lines.join("\n"),
    )
}

#[derive(Debug, Deserialize)]
struct RawPrediction {
    index: Option<i64>,
    #[serde(default)]
    category: String,
    confidence: Option<f64>,
}

/// Parse a model response into batch-local predictions.
///
/// Tolerates markdown code fences around the JSON. Returned categories are
/// resolved case-insensitively against the vocabulary; anything outside it
/// is discarded and logged, never coerced. Confidence is clamped to
/// [`MAX_CONFIDENCE`].
fn parse_predictions(
    text: &str,
    batch_len: usize,
    vocabulary: &[String],
) -> HashMap<usize, Prediction> {
    let cleaned = strip_code_fences(text);

    let raw: Vec<RawPrediction> = match serde_json::from_str(cleaned) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to parse classifier response as JSON");
            return HashMap::new();
        }
    };

    let lookup: HashMap<String, &String> = vocabulary
        .iter()
        .map(|name| (name.to_lowercase(), name))
        .collect();

    let mut results = HashMap::new();
    let mut unmatched: Vec<String> = Vec::new();

    for pred in raw {
        let Some(idx) = pred.index else { continue };
        if idx < 0 || idx as usize >= batch_len {
            continue;
        }
        match lookup.get(&pred.category.to_lowercase()) {
            Some(name) => {
                let confidence = pred.confidence.unwrap_or(0.7).clamp(0.0, MAX_CONFIDENCE);
                results.insert(
                    idx as usize,
                    Prediction {
                        bucket_name: (*name).clone(),
                        confidence,
                    },
                );
            }
            None => unmatched.push(pred.category),
        }
    }

    if !unmatched.is_empty() {
        tracing::warn!(
            count = unmatched.len(),
            categories = ?unmatched,
            "Classifier returned categories outside the vocabulary, discarded"
        );
    }

    results
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the fence line (which may carry a language tag) and the closer.
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.trim().trim_end_matches("```").trim()
}
