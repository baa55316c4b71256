//! Content fingerprinting for duplicate detection.

use chrono::NaiveDateTime;
use sha2::{Digest, Sha256};

/// Hex length of the stored fingerprint. Enough collision resistance for
/// per-user volumes of a household finance tool; not a security boundary.
const FINGERPRINT_LEN: usize = 16;

/// Deterministic digest of (user, date, raw description, absolute amount).
///
/// The description is lower-cased and trimmed and the amount loses its sign
/// before hashing, so re-importing the same statement row always collides
/// while a refund does not collide with its matching charge's date/text
/// unless they are otherwise identical. A one-cent rounding difference or
/// stray whitespace inside the exported text defeats detection; that is an
/// accepted limitation of the heuristic.
pub fn fingerprint(user_id: &str, date: NaiveDateTime, raw_description: &str, amount: f64) -> String {
    let key = format!(
        "{}|{}|{}|{:.2}",
        user_id,
        date.format("%Y-%m-%dT%H:%M:%S"),
        raw_description.trim().to_lowercase(),
        amount.abs(),
    );
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(digest)[..FINGERPRINT_LEN].to_string()
}
