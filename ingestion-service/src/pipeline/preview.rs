//! Import preview orchestration.
//!
//! Sequences the pipeline for one import: duplicate suppression, rule
//! matching, keyword fallback, one classifier pass over the residue, then
//! preview assembly. Operates on preloaded rules/buckets/fingerprints so
//! it owns no storage handle; callers load collaborator state first.

use crate::classifier::{BatchProgress, ClassifierEngine, PendingTransaction};
use crate::dtos::{BucketSummary, PreviewTransaction};
use crate::models::{Bucket, CategorizationRule, RawRow};
use crate::pipeline::{fingerprint, keywords, normalize, rules};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;

pub struct PreviewRequest<'a> {
    pub user_id: &'a str,
    pub spender: Option<&'a str>,
    pub skip_duplicates: bool,
}

pub struct PreviewOutcome {
    pub transactions: Vec<PreviewTransaction>,
    pub duplicate_count: usize,
}

struct RowOutcome {
    clean_description: String,
    bucket_id: Option<String>,
    confidence: f64,
    is_verified: bool,
    tags: Option<String>,
    fingerprint: String,
}

/// Run the categorization pipeline over extracted statement rows.
///
/// `ordered_rules` must already be sorted by [`rules::order_rules`].
/// Duplicate suppression compares against `existing_fingerprints`, a
/// snapshot of what storage held when the import began; rows repeated
/// within the same upload are not suppressed here — the confirm-time
/// recheck is the backstop for those.
pub async fn run_preview(
    raw_rows: &[RawRow],
    request: &PreviewRequest<'_>,
    existing_fingerprints: &HashSet<String>,
    buckets: &[Bucket],
    ordered_rules: &[CategorizationRule],
    classifier: &ClassifierEngine,
    progress: Option<mpsc::UnboundedSender<BatchProgress>>,
) -> PreviewOutcome {
    // Stage 1: fingerprint every row, dropping known duplicates if asked.
    let mut duplicate_count = 0usize;
    let mut survivors: Vec<(&RawRow, String)> = Vec::with_capacity(raw_rows.len());

    for row in raw_rows {
        let digest = fingerprint(request.user_id, row.date, &row.description, row.amount);
        if request.skip_duplicates && existing_fingerprints.contains(&digest) {
            duplicate_count += 1;
        } else {
            survivors.push((row, digest));
        }
    }

    if request.skip_duplicates {
        tracing::info!(
            duplicates = duplicate_count,
            new = survivors.len(),
            "Duplicate detection finished"
        );
    }

    if survivors.is_empty() {
        return PreviewOutcome {
            transactions: Vec::new(),
            duplicate_count,
        };
    }

    let bucket_by_id: HashMap<&str, &Bucket> =
        buckets.iter().map(|b| (b.bucket_id.as_str(), b)).collect();
    let bucket_id_by_name: HashMap<String, String> = buckets
        .iter()
        .map(|b| (b.name.to_lowercase(), b.bucket_id.clone()))
        .collect();
    let bucket_names: Vec<String> = buckets.iter().map(|b| b.name.clone()).collect();

    // Stage 2: rules first, then the global keyword fallback.
    let mut outcomes: Vec<RowOutcome> = Vec::with_capacity(survivors.len());
    let mut pending: Vec<PendingTransaction> = Vec::new();

    for (i, (row, digest)) in survivors.iter().enumerate() {
        let clean_description = normalize(&row.description);

        let mut bucket_id = None;
        let mut confidence = 0.0;
        let mut is_verified = false;
        let mut tags = None;

        if let Some(matched) = rules::match_rule(&clean_description, row.amount, ordered_rules) {
            bucket_id = Some(matched.bucket_id.clone());
            confidence = 1.0;
            is_verified = !matched.mark_for_review;
            tags = matched.apply_tags.clone();
        } else {
            let (guessed, guess_confidence) =
                keywords::guess_category(&clean_description, &bucket_id_by_name);
            if let Some(guessed) = guessed {
                bucket_id = Some(guessed);
                confidence = guess_confidence;
            }
        }

        if bucket_id.is_none() {
            pending.push(PendingTransaction {
                index: i,
                description: clean_description.clone(),
                amount: row.amount,
            });
        }

        outcomes.push(RowOutcome {
            clean_description,
            bucket_id,
            confidence,
            is_verified,
            tags,
            fingerprint: digest.clone(),
        });
    }

    // Stage 3: one classifier pass over whatever the cascade left behind.
    // Rule and keyword assignments are never revisited.
    if !pending.is_empty() && !bucket_names.is_empty() {
        let predictions = classifier
            .classify_all(&pending, &bucket_names, progress)
            .await;
        for (index, prediction) in predictions {
            if let Some(bucket_id) = bucket_id_by_name.get(&prediction.bucket_name.to_lowercase())
            {
                let outcome = &mut outcomes[index];
                outcome.bucket_id = Some(bucket_id.clone());
                outcome.confidence = prediction.confidence;
                // Model output always needs a human look.
                outcome.is_verified = false;
            }
        }
    }

    // Stage 4: assemble previews with synthetic negative ids.
    let transactions = survivors
        .iter()
        .zip(outcomes)
        .enumerate()
        .map(|(i, ((row, _), outcome))| {
            let bucket = outcome
                .bucket_id
                .as_deref()
                .and_then(|id| bucket_by_id.get(id))
                .map(|b| BucketSummary::from(*b));
            PreviewTransaction {
                id: -((i as i64) + 1),
                date: row.date.format("%Y-%m-%dT%H:%M:%S").to_string(),
                description: outcome.clean_description,
                raw_description: row.description.clone(),
                amount: row.amount,
                bucket_id: outcome.bucket_id,
                bucket,
                confidence: outcome.confidence,
                is_verified: outcome.is_verified,
                spender: request.spender.map(str::to_string),
                tags: outcome.tags,
                fingerprint: outcome.fingerprint,
            }
        })
        .collect();

    PreviewOutcome {
        transactions,
        duplicate_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::mock::MockCategoryProvider;
    use crate::pipeline::rules::order_rules;
    use chrono::{NaiveDate, TimeZone, Utc};
    use std::sync::Arc;

    fn row(day: u32, description: &str, amount: f64) -> RawRow {
        RawRow {
            date: NaiveDate::from_ymd_opt(2025, 3, day)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            description: description.to_string(),
            amount,
        }
    }

    fn bucket(id: &str, name: &str) -> Bucket {
        Bucket {
            bucket_id: id.to_string(),
            user_id: "u1".to_string(),
            name: name.to_string(),
            parent_id: None,
            is_transfer: false,
            is_investment: false,
            display_order: 0,
            created_utc: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn keyword_rule(keywords: &str, bucket_id: &str, mark_for_review: bool) -> CategorizationRule {
        CategorizationRule {
            rule_id: format!("rule-{keywords}"),
            user_id: "u1".to_string(),
            keywords: keywords.to_string(),
            min_amount: None,
            max_amount: None,
            priority: 0,
            bucket_id: bucket_id.to_string(),
            mark_for_review,
            apply_tags: None,
            created_utc: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn request(skip_duplicates: bool) -> PreviewRequest<'static> {
        PreviewRequest {
            user_id: "u1",
            spender: Some("Joint"),
            skip_duplicates,
        }
    }

    #[tokio::test]
    async fn empty_input_yields_empty_outcome() {
        let outcome = run_preview(
            &[],
            &request(true),
            &HashSet::new(),
            &[],
            &[],
            &ClassifierEngine::disabled(),
            None,
        )
        .await;
        assert!(outcome.transactions.is_empty());
        assert_eq!(outcome.duplicate_count, 0);
    }

    #[tokio::test]
    async fn known_duplicate_is_dropped_and_rule_match_is_verified() {
        let rows = vec![
            row(1, "WOOLWORTHS 1234 SYDNEY", -82.5),
            row(2, "CALTEX PETROL STATION", -61.0),
            row(3, "ALREADY IMPORTED ROW", -10.0),
        ];
        let existing: HashSet<String> =
            [fingerprint("u1", rows[2].date, &rows[2].description, rows[2].amount)].into();

        let buckets = vec![bucket("b-groc", "Groceries"), bucket("b-fuel", "Fuel")];
        let mut rule_set = vec![keyword_rule("WOOLWORTHS", "b-groc", false)];
        order_rules(&mut rule_set);

        let outcome = run_preview(
            &rows,
            &request(true),
            &existing,
            &buckets,
            &rule_set,
            &ClassifierEngine::disabled(),
            None,
        )
        .await;

        assert_eq!(outcome.duplicate_count, 1);
        assert_eq!(outcome.transactions.len(), 2);

        let woolies = &outcome.transactions[0];
        assert_eq!(woolies.id, -1);
        assert_eq!(woolies.bucket_id.as_deref(), Some("b-groc"));
        assert_eq!(woolies.confidence, 1.0);
        assert!(woolies.is_verified);
        assert_eq!(woolies.description, "WOOLWORTHS SYDNEY");
        assert_eq!(woolies.raw_description, "WOOLWORTHS 1234 SYDNEY");
        assert_eq!(woolies.bucket.as_ref().unwrap().name, "Groceries");

        // Second row fell through to the keyword table (CALTEX -> Fuel).
        let fuel = &outcome.transactions[1];
        assert_eq!(fuel.id, -2);
        assert_eq!(fuel.bucket_id.as_deref(), Some("b-fuel"));
        assert!(fuel.confidence > 0.0 && fuel.confidence < 1.0);
        assert!(!fuel.is_verified);
    }

    #[tokio::test]
    async fn all_duplicates_short_circuits_before_the_classifier() {
        let rows = vec![row(1, "SAME ROW", -10.0), row(2, "OTHER ROW", -20.0)];
        let existing: HashSet<String> = rows
            .iter()
            .map(|r| fingerprint("u1", r.date, &r.description, r.amount))
            .collect();

        let provider = Arc::new(MockCategoryProvider::always("[]"));
        let engine = ClassifierEngine::new(provider.clone());

        let outcome = run_preview(
            &rows,
            &request(true),
            &existing,
            &[bucket("b1", "Groceries")],
            &[],
            &engine,
            None,
        )
        .await;

        assert!(outcome.transactions.is_empty());
        assert_eq!(outcome.duplicate_count, 2);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn rule_matched_rows_are_never_sent_to_the_classifier() {
        let rows = vec![
            row(1, "WOOLWORTHS METRO", -30.0),
            row(2, "MYSTERY MERCHANT", -12.0),
        ];
        let buckets = vec![bucket("b-groc", "Groceries"), bucket("b-din", "Dining")];
        let mut rule_set = vec![keyword_rule("WOOLWORTHS", "b-groc", false)];
        order_rules(&mut rule_set);

        // The model would put everything into Dining if asked.
        let provider = Arc::new(MockCategoryProvider::always(
            r#"[{"index": 0, "category": "Dining", "confidence": 0.9},
                {"index": 1, "category": "Dining", "confidence": 0.9}]"#,
        ));
        let engine = ClassifierEngine::new(provider.clone());

        let outcome = run_preview(
            &rows,
            &request(false),
            &HashSet::new(),
            &buckets,
            &rule_set,
            &engine,
            None,
        )
        .await;

        assert_eq!(provider.call_count(), 1);

        // Rule assignment survives untouched.
        let ruled = &outcome.transactions[0];
        assert_eq!(ruled.bucket_id.as_deref(), Some("b-groc"));
        assert_eq!(ruled.confidence, 1.0);
        assert!(ruled.is_verified);

        // The residue row got the model's answer, capped and unverified.
        // Batch-local index 0 maps back to global row 1.
        let classified = &outcome.transactions[1];
        assert_eq!(classified.bucket_id.as_deref(), Some("b-din"));
        assert!(classified.confidence <= 0.85);
        assert!(!classified.is_verified);
    }

    #[tokio::test]
    async fn review_flagged_rule_match_is_not_verified() {
        let rows = vec![row(1, "GYM MEMBERSHIP DEBIT", -25.0)];
        let buckets = vec![bucket("b-health", "Health")];
        let mut rule_set = vec![keyword_rule("GYM", "b-health", true)];
        order_rules(&mut rule_set);

        let outcome = run_preview(
            &rows,
            &request(false),
            &HashSet::new(),
            &buckets,
            &rule_set,
            &ClassifierEngine::disabled(),
            None,
        )
        .await;

        let txn = &outcome.transactions[0];
        assert_eq!(txn.confidence, 1.0);
        assert!(!txn.is_verified);
    }

    #[tokio::test]
    async fn rule_tags_are_stamped_onto_the_preview() {
        let rows = vec![row(1, "TRANSFER TO SAVINGS", -500.0)];
        let buckets = vec![bucket("b-sav", "Savings")];
        let mut tagged = keyword_rule("TRANSFER", "b-sav", false);
        tagged.apply_tags = Some("transfer,internal".to_string());
        let mut rule_set = vec![tagged];
        order_rules(&mut rule_set);

        let outcome = run_preview(
            &rows,
            &request(false),
            &HashSet::new(),
            &buckets,
            &rule_set,
            &ClassifierEngine::disabled(),
            None,
        )
        .await;

        assert_eq!(
            outcome.transactions[0].tags.as_deref(),
            Some("transfer,internal")
        );
    }

    #[tokio::test]
    async fn uncategorized_residue_stays_uncategorized_when_disabled() {
        let rows = vec![row(1, "MYSTERY MERCHANT", -12.0)];
        let outcome = run_preview(
            &rows,
            &request(false),
            &HashSet::new(),
            &[bucket("b1", "Groceries")],
            &[],
            &ClassifierEngine::disabled(),
            None,
        )
        .await;

        let txn = &outcome.transactions[0];
        assert_eq!(txn.bucket_id, None);
        assert_eq!(txn.confidence, 0.0);
        assert!(!txn.is_verified);
    }
}
