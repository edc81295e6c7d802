//! Cache statistics, classified by policy at call time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::connection::CacheStore;
use super::policy::{CachePolicy, Freshness};
use super::records::{RecordKind, parse_timestamp};
use crate::Error;

/// Record counts for one kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindStats {
    pub total: u64,
    pub fresh: u64,
    pub expired: u64,
}

impl KindStats {
    fn record(&mut self, freshness: Freshness) {
        self.total += 1;
        match freshness {
            Freshness::Fresh => self.fresh += 1,
            Freshness::Expired => self.expired += 1,
        }
    }
}

/// Snapshot of the store's contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub jobs: KindStats,
    pub profiles: KindStats,
    pub database_size_bytes: u64,
    pub ttl_secs: i64,
}

impl CacheStats {
    pub fn for_kind(&self, kind: RecordKind) -> &KindStats {
        match kind {
            RecordKind::Job => &self.jobs,
            RecordKind::Profile => &self.profiles,
        }
    }

    pub fn total_records(&self) -> u64 {
        self.jobs.total + self.profiles.total
    }

    pub fn fresh_records(&self) -> u64 {
        self.jobs.fresh + self.profiles.fresh
    }

    pub fn expired_records(&self) -> u64 {
        self.jobs.expired + self.profiles.expired
    }

    pub fn total_jobs(&self) -> u64 {
        self.jobs.total
    }

    pub fn valid_jobs(&self) -> u64 {
        self.jobs.fresh
    }

    pub fn expired_jobs(&self) -> u64 {
        self.jobs.expired
    }

    pub fn total_profiles(&self) -> u64 {
        self.profiles.total
    }

    pub fn valid_profiles(&self) -> u64 {
        self.profiles.fresh
    }

    pub fn expired_profiles(&self) -> u64 {
        self.profiles.expired
    }

    pub fn database_size_mb(&self) -> f64 {
        (self.database_size_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
    }
}

impl CacheStore {
    /// Count records per kind and classify each against `policy` now.
    pub async fn stats(&self, policy: &CachePolicy) -> Result<CacheStats, Error> {
        self.stats_at(policy, Utc::now()).await
    }

    /// Like [`stats`](Self::stats) with an explicit classification instant.
    pub async fn stats_at(&self, policy: &CachePolicy, now: DateTime<Utc>) -> Result<CacheStats, Error> {
        let policy = *policy;
        self.conn
            .call(move |conn| -> Result<CacheStats, Error> {
                let mut jobs = KindStats::default();
                let mut profiles = KindStats::default();

                let mut stmt = conn.prepare("SELECT key, kind, fetched_at FROM records")?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
                })?;

                for row in rows {
                    let (key, kind, fetched_at) = row?;
                    let kind = kind
                        .parse::<RecordKind>()
                        .map_err(|e| Error::CorruptRecord { key: key.clone(), reason: e.to_string() })?;
                    let freshness = policy.classify(parse_timestamp(&key, &fetched_at)?, now);
                    match kind {
                        RecordKind::Job => jobs.record(freshness),
                        RecordKind::Profile => profiles.record(freshness),
                    }
                }

                let size: i64 = conn.query_row(
                    "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
                    [],
                    |row| row.get(0),
                )?;

                Ok(CacheStats {
                    jobs,
                    profiles,
                    database_size_bytes: size.max(0) as u64,
                    ttl_secs: policy.ttl().num_seconds(),
                })
            })
            .await
            .map_err(Error::from)
    }
}
