mod negative;
mod storage;

pub use negative::{CachedNegativeOutcome, DEFAULT_NEGATIVE_TTL, NegativeCache, OutcomeKey};
pub use storage::{LocalArtifactCache, MappedArtifact, sanitize};
