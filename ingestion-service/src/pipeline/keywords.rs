//! Global keyword fallback for descriptions no user rule matched.
//!
//! A static table maps common merchant tokens to category name hints. A
//! hint only applies when the user actually has a bucket with that name;
//! the guesser never invents categories. Confidence stays strictly below
//! the 1.0 reserved for explicit rule matches.

use std::collections::HashMap;

/// (merchant token, category name hint). Tokens are matched as
/// case-insensitive substrings of the cleaned description.
const KEYWORD_TABLE: &[(&str, &str)] = &[
    ("woolworths", "Groceries"),
    ("coles", "Groceries"),
    ("aldi", "Groceries"),
    ("iga ", "Groceries"),
    ("foodworks", "Groceries"),
    ("harris farm", "Groceries"),
    ("mcdonald", "Takeaway"),
    ("kfc", "Takeaway"),
    ("hungry jack", "Takeaway"),
    ("domino", "Takeaway"),
    ("subway", "Takeaway"),
    ("uber eats", "Takeaway"),
    ("menulog", "Takeaway"),
    ("deliveroo", "Takeaway"),
    ("doordash", "Takeaway"),
    ("uber", "Transport"),
    ("didi", "Transport"),
    ("opal", "Transport"),
    ("myki", "Transport"),
    ("translink", "Transport"),
    ("taxi", "Transport"),
    ("caltex", "Fuel"),
    ("ampol", "Fuel"),
    ("bp ", "Fuel"),
    ("shell", "Fuel"),
    ("7-eleven", "Fuel"),
    ("united petroleum", "Fuel"),
    ("agl", "Utilities"),
    ("origin energy", "Utilities"),
    ("energyaustralia", "Utilities"),
    ("sydney water", "Utilities"),
    ("telstra", "Utilities"),
    ("optus", "Utilities"),
    ("vodafone", "Utilities"),
    ("netflix", "Subscriptions"),
    ("spotify", "Subscriptions"),
    ("disney", "Subscriptions"),
    ("stan.com", "Subscriptions"),
    ("youtube premium", "Subscriptions"),
    ("apple.com/bill", "Subscriptions"),
    ("chemist warehouse", "Health"),
    ("priceline pharmacy", "Health"),
    ("terry white", "Health"),
    ("medicare", "Health"),
    ("medibank", "Insurance"),
    ("bupa", "Insurance"),
    ("nib ", "Insurance"),
    ("nrma", "Insurance"),
    ("aami", "Insurance"),
    ("allianz", "Insurance"),
    ("bunnings", "Home"),
    ("ikea", "Home"),
    ("kmart", "Shopping"),
    ("big w", "Shopping"),
    ("target", "Shopping"),
    ("jb hi-fi", "Shopping"),
    ("officeworks", "Shopping"),
    ("amazon", "Shopping"),
    ("ebay", "Shopping"),
    ("qantas", "Travel"),
    ("jetstar", "Travel"),
    ("virgin australia", "Travel"),
    ("airbnb", "Travel"),
    ("booking.com", "Travel"),
    ("salary", "Income"),
    ("payroll", "Income"),
    ("centrelink", "Income"),
];

/// Floor and ceiling for the heuristic confidence; a keyword guess is never
/// as certain as a rule (1.0) nor more certain than the AI clamp (0.85).
const MIN_CONFIDENCE: f64 = 0.45;
const MAX_CONFIDENCE: f64 = 0.80;

/// Look up the cleaned description in the global keyword table.
///
/// `buckets_by_name` maps lower-cased bucket names to bucket ids for the
/// importing user. The longest matching token wins; its confidence scales
/// with how much of the description the token explains. No match, or a
/// hint naming a bucket the user does not have, yields `(None, 0.0)`.
pub fn guess_category(
    clean_description: &str,
    buckets_by_name: &HashMap<String, String>,
) -> (Option<String>, f64) {
    let desc_lower = clean_description.to_lowercase();
    if desc_lower.is_empty() {
        return (None, 0.0);
    }

    let mut best: Option<(&str, &str)> = None;
    for (token, hint) in KEYWORD_TABLE {
        if desc_lower.contains(token) && buckets_by_name.contains_key(&hint.to_lowercase()) {
            let better = match best {
                Some((current, _)) => token.len() > current.len(),
                None => true,
            };
            if better {
                best = Some((token, hint));
            }
        }
    }

    match best {
        Some((token, hint)) => {
            let bucket_id = buckets_by_name[&hint.to_lowercase()].clone();
            let specificity = (token.trim().len() as f64 / desc_lower.len() as f64).min(1.0);
            let confidence = MIN_CONFIDENCE + (MAX_CONFIDENCE - MIN_CONFIDENCE) * specificity;
            (Some(bucket_id), confidence)
        }
        None => (None, 0.0),
    }
}
