//! The transaction categorization pipeline.
//!
//! Stages run in a fixed order per import: duplicate suppression by
//! fingerprint, user rules, global keyword fallback, then an AI pass over
//! whatever is still uncategorized. Everything here is pure over preloaded
//! data; storage stays at the handler and worker boundaries.

pub mod fingerprint;
pub mod keywords;
pub mod normalize;
pub mod preview;
pub mod rules;

pub use fingerprint::fingerprint;
pub use normalize::normalize;
pub use preview::{run_preview, PreviewOutcome, PreviewRequest};
