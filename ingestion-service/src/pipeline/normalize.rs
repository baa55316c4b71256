//! Statement description normalization.
//!
//! Banks append noise to merchant text: store numbers, masked card tails,
//! receipt references and trailing state codes. Stripping them produces a
//! stable key for rule and keyword matching while keeping the original
//! casing for display. `normalize` is pure and idempotent.

use once_cell::sync::Lazy;
use regex::Regex;

/// Masked card tails: "xx1234", "****1234", "CARD 1234", "card xx 1234".
static CARD_TAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:card\s*)?x{2,}\s*\d{2,4}\b|\*{2,}\s*\d{2,4}\b|\bcard\s+\d{4}\b").unwrap()
});

/// Receipt / reference identifiers: "REF 12A34B", "receipt #99201".
static REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:ref(?:erence)?|receipt)\s*[:#]?\s*[a-z0-9]+\b").unwrap());

/// Standalone digit runs (store and terminal numbers): "WOOLWORTHS 1234".
static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"#?\b\d{3,}\b").unwrap());

/// Trailing AU state / country codes appended after the suburb.
static TRAILING_REGION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+(?:nsw|vic|qld|tas|act|wa|sa|nt|aus?)\s*$").unwrap());

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Strip statement noise from a raw description.
///
/// Returns a display-cased cleaned string; matching callers lower-case it
/// themselves. Falls back to the whitespace-collapsed input when stripping
/// would leave nothing to match on.
pub fn normalize(raw: &str) -> String {
    let mut text = CARD_TAIL.replace_all(raw, " ").into_owned();
    text = REFERENCE.replace_all(&text, " ").into_owned();
    text = DIGIT_RUN.replace_all(&text, " ").into_owned();

    let mut collapsed = WHITESPACE.replace_all(&text, " ").trim().to_string();
    loop {
        let stripped = TRAILING_REGION.replace(&collapsed, "").into_owned();
        if stripped == collapsed {
            break;
        }
        collapsed = stripped;
    }
    let collapsed = collapsed.trim().to_string();

    if collapsed.is_empty() {
        WHITESPACE.replace_all(raw, " ").trim().to_string()
    } else {
        collapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_store_numbers_and_card_tails() {
        assert_eq!(normalize("WOOLWORTHS 1234 SYDNEY"), "WOOLWORTHS SYDNEY");
        assert_eq!(normalize("NETFLIX.COM CARD 4921"), "NETFLIX.COM");
        assert_eq!(normalize("AMAZON AU xx4921"), "AMAZON");
        assert_eq!(normalize("EBAY *O-BRIEN ****1881"), "EBAY *O-BRIEN");
    }

    #[test]
    fn strips_references_and_trailing_regions() {
        assert_eq!(normalize("COLES EXPRESS RECEIPT #99201"), "COLES EXPRESS");
        assert_eq!(normalize("BUNNINGS WAREHOUSE CHATSWOOD NSW"), "BUNNINGS WAREHOUSE CHATSWOOD");
        assert_eq!(normalize("KMART 0412 MELBOURNE VIC AU"), "KMART MELBOURNE");
    }

    #[test]
    fn collapses_whitespace_and_preserves_casing() {
        assert_eq!(normalize("  Uber   Eats   Pty  Ltd "), "Uber Eats Pty Ltd");
    }

    #[test]
    fn idempotent() {
        for raw in [
            "WOOLWORTHS 1234 SYDNEY NSW",
            "NETFLIX.COM CARD 4921",
            "Uber   Eats",
            "938271",
            "",
        ] {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn falls_back_to_input_when_everything_is_noise() {
        assert_eq!(normalize("938271"), "938271");
    }
}
