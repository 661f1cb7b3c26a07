use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;

/// Default lifetime of a recorded outcome (12h).
pub const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(60 * 60 * 12);

/// Identifies one upstream exchange: request method plus resolved upstream URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutcomeKey {
    pub method: String,
    pub target: String,
}

impl OutcomeKey {
    pub fn new(method: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            target: target.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedNegativeOutcome {
    pub target_url: String,
    pub status: u16,
    pub created_at: DateTime<Utc>,
}

impl CachedNegativeOutcome {
    pub fn is_expired_at(&self, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
        now.signed_duration_since(self.created_at) > ttl
    }
}

/// Remembers terminal upstream outcomes so repeated requests for a missing
/// artifact do not hit the network again until the entry expires.
///
/// Backed by a sharded concurrent map; unrelated targets never contend on a
/// single lock.
#[derive(Debug)]
pub struct NegativeCache {
    entries: DashMap<OutcomeKey, CachedNegativeOutcome>,
    ttl: TimeDelta,
}

impl Default for NegativeCache {
    fn default() -> Self {
        Self::new(DEFAULT_NEGATIVE_TTL)
    }
}

impl NegativeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
        }
    }

    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    pub fn lookup(&self, key: &OutcomeKey) -> Option<CachedNegativeOutcome> {
        self.lookup_at(key, Utc::now())
    }

    /// Expired entries are removed here, lazily, and reported as a miss.
    pub fn lookup_at(&self, key: &OutcomeKey, now: DateTime<Utc>) -> Option<CachedNegativeOutcome> {
        let outcome = self.entries.get(key).map(|entry| entry.value().clone())?;

        if outcome.is_expired_at(now, self.ttl) {
            let ttl = self.ttl;
            // Only drop the entry if no fresher outcome replaced it in the meantime.
            self.entries
                .remove_if(key, |_, current| current.is_expired_at(now, ttl));
            tracing::debug!(target_url = %outcome.target_url, "negative cache entry expired");
            return None;
        }

        Some(outcome)
    }

    pub fn record(&self, key: OutcomeKey, status: u16) {
        self.record_at(key, status, Utc::now());
    }

    pub fn record_at(&self, key: OutcomeKey, status: u16, created_at: DateTime<Utc>) {
        let outcome = CachedNegativeOutcome {
            target_url: key.target.clone(),
            status,
            created_at,
        };
        self.entries.insert(key, outcome);
    }

    pub fn remove(&self, key: &OutcomeKey) -> Option<CachedNegativeOutcome> {
        self.entries.remove(key).map(|(_, outcome)| outcome)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
