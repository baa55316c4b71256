//! User rule ordering and matching.

use crate::models::CategorizationRule;
use std::cmp::Reverse;

/// Sort rules into evaluation order.
///
/// The order is a two-key policy, not a derived score: rules carrying an
/// amount filter always outrank rules without one regardless of priority;
/// within a tier higher priority wins; remaining ties go to the most
/// recently created rule.
pub fn order_rules(rules: &mut [CategorizationRule]) {
    rules.sort_by_key(|r| {
        (
            Reverse(r.has_amount_filter()),
            Reverse(r.priority),
            Reverse(r.created_utc),
        )
    });
}

/// Return the first rule matching the cleaned description and amount.
///
/// A rule matches when every keyword token appears as a case-insensitive
/// substring of the description and, if an amount filter is present, the
/// absolute amount falls within `[min, max]` (either bound open-ended).
/// `rules` must already be in evaluation order, which makes the result
/// total: ties are impossible.
pub fn match_rule<'a>(
    clean_description: &str,
    amount: f64,
    rules: &'a [CategorizationRule],
) -> Option<&'a CategorizationRule> {
    let desc_lower = clean_description.to_lowercase();
    rules.iter().find(|rule| rule_matches(&desc_lower, amount, rule))
}

fn rule_matches(desc_lower: &str, amount: f64, rule: &CategorizationRule) -> bool {
    let mut tokens = rule.keyword_tokens().peekable();
    if tokens.peek().is_none() {
        return false;
    }
    if !tokens.all(|token| desc_lower.contains(&token.to_lowercase())) {
        return false;
    }

    let magnitude = amount.abs();
    if let Some(min) = rule.min_amount {
        if magnitude < min {
            return false;
        }
    }
    if let Some(max) = rule.max_amount {
        if magnitude > max {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn rule(keywords: &str, priority: i64, min: Option<f64>, max: Option<f64>) -> CategorizationRule {
        CategorizationRule {
            rule_id: format!("rule-{keywords}-{priority}"),
            user_id: "u1".to_string(),
            keywords: keywords.to_string(),
            min_amount: min,
            max_amount: max,
            priority,
            bucket_id: format!("bucket-{keywords}"),
            mark_for_review: false,
            apply_tags: None,
            created_utc: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn all_keywords_must_match() {
        let rules = vec![rule("uber, eats", 0, None, None)];
        assert!(match_rule("UBER EATS SYDNEY", -30.0, &rules).is_some());
        assert!(match_rule("UBER TRIP", -30.0, &rules).is_none());
    }

    #[test]
    fn amount_filtered_rule_outranks_higher_priority_unfiltered() {
        let mut rules = vec![
            rule("fuel", 100, None, None),
            rule("fuel", 1, Some(40.0), Some(50.0)),
        ];
        order_rules(&mut rules);

        let matched = match_rule("CALTEX FUEL", -45.0, &rules).unwrap();
        assert!(matched.has_amount_filter());
        assert_eq!(matched.bucket_id, "bucket-fuel");
        assert_eq!(matched.priority, 1);
    }

    #[test]
    fn amount_bounds_are_inclusive_and_sign_blind() {
        let rules = vec![rule("fuel", 0, Some(40.0), Some(50.0))];
        assert!(match_rule("CALTEX FUEL", -45.0, &rules).is_some());
        assert!(match_rule("CALTEX FUEL", -40.0, &rules).is_some());
        assert!(match_rule("CALTEX FUEL", -50.0, &rules).is_some());
        assert!(match_rule("CALTEX FUEL", -60.0, &rules).is_none());
        assert!(match_rule("CALTEX FUEL", 45.0, &rules).is_some());
    }

    #[test]
    fn open_ended_bounds() {
        let min_only = vec![rule("transfer", 0, Some(1000.0), None)];
        assert!(match_rule("TRANSFER TO SAVINGS", -2500.0, &min_only).is_some());
        assert!(match_rule("TRANSFER TO SAVINGS", -999.0, &min_only).is_none());

        let max_only = vec![rule("coffee", 0, None, Some(10.0))];
        assert!(match_rule("COFFEE RUN", -4.5, &max_only).is_some());
        assert!(match_rule("COFFEE RUN", -12.0, &max_only).is_none());
    }

    #[test]
    fn priority_then_recency_breaks_ties() {
        let mut older_high = rule("netflix", 10, None, None);
        older_high.bucket_id = "bucket-older".to_string();
        let mut newer_high = rule("netflix", 10, None, None);
        newer_high.bucket_id = "bucket-newer".to_string();
        newer_high.created_utc = older_high.created_utc + Duration::days(1);
        let low = rule("netflix", 1, None, None);

        let mut rules = vec![low, older_high, newer_high];
        order_rules(&mut rules);

        let matched = match_rule("NETFLIX.COM", -15.99, &rules).unwrap();
        assert_eq!(matched.bucket_id, "bucket-newer");
    }

    #[test]
    fn empty_keyword_list_never_matches() {
        let rules = vec![rule(" , ", 0, None, None)];
        assert!(match_rule("ANYTHING", -10.0, &rules).is_none());
    }
}
