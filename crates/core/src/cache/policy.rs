//! Time-to-live classification of cached records.

use chrono::{DateTime, TimeDelta, Utc};

/// Freshness of a record relative to a [`CachePolicy`] at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Expired,
}

/// How long a fetched record may be served without refetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    ttl: TimeDelta,
}

impl CachePolicy {
    pub fn new(ttl: TimeDelta) -> Self {
        Self { ttl }
    }

    pub fn from_days(days: u32) -> Self {
        Self::new(TimeDelta::days(i64::from(days)))
    }

    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    /// A record is fresh iff `now - fetched_at < ttl`.
    pub fn classify(&self, fetched_at: DateTime<Utc>, now: DateTime<Utc>) -> Freshness {
        if now.signed_duration_since(fetched_at) < self.ttl { Freshness::Fresh } else { Freshness::Expired }
    }

    pub fn is_fresh(&self, fetched_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.classify(fetched_at, now) == Freshness::Fresh
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::from_days(7)
    }
}
