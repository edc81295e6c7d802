//! Record CRUD operations.
//!
//! Provides point lookup, upsert, age-based purge and maintenance for cached
//! records. Freshness is never applied here; callers classify records with a
//! [`CachePolicy`](super::CachePolicy).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, SubsecRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

use super::connection::CacheStore;
use super::hash::CacheKey;
use super::policy::CachePolicy;
use crate::Error;

/// Extracted fields of a fetched page, keyed by field name.
pub type Payload = BTreeMap<String, serde_json::Value>;

/// The kind of record a request produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Job,
    Profile,
}

impl RecordKind {
    pub const ALL: [RecordKind; 2] = [RecordKind::Job, RecordKind::Profile];

    pub const fn as_str(self) -> &'static str {
        match self {
            RecordKind::Job => "job",
            RecordKind::Profile => "profile",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "job" => Ok(RecordKind::Job),
            "profile" => Ok(RecordKind::Profile),
            other => Err(Error::InvalidInput(format!("unknown record kind: {other}"))),
        }
    }
}

/// A fetched page as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub key: CacheKey,
    pub kind: RecordKind,
    pub payload: Payload,
    pub fetched_at: DateTime<Utc>,
}

impl CacheRecord {
    /// Create a record fetched now.
    pub fn new(key: CacheKey, kind: RecordKind, payload: Payload) -> Self {
        Self::with_fetched_at(key, kind, payload, Utc::now())
    }

    /// Create a record with an explicit fetch time.
    ///
    /// The timestamp is truncated to microseconds, the precision the store keeps.
    pub fn with_fetched_at(key: CacheKey, kind: RecordKind, payload: Payload, fetched_at: DateTime<Utc>) -> Self {
        Self { key, kind, payload, fetched_at: fetched_at.trunc_subsecs(6) }
    }

    pub fn is_fresh(&self, policy: &CachePolicy, now: DateTime<Utc>) -> bool {
        policy.is_fresh(self.fetched_at, now)
    }
}

/// Fixed-width RFC 3339 so that lexical order equals chronological order.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(key: &str, raw: &str) -> Result<DateTime<Utc>, Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::CorruptRecord { key: key.to_string(), reason: format!("bad fetched_at '{raw}': {e}") })
}

/// Raw column values of one `records` row.
pub(crate) struct RawRecord {
    pub key: String,
    pub kind: String,
    pub payload_json: String,
    pub fetched_at: String,
}

pub(crate) const SELECT_COLUMNS: &str = "SELECT key, kind, payload_json, fetched_at FROM records";

impl RawRecord {
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self { key: row.get(0)?, kind: row.get(1)?, payload_json: row.get(2)?, fetched_at: row.get(3)? })
    }

    pub(crate) fn decode(self) -> Result<CacheRecord, Error> {
        let kind = self
            .kind
            .parse::<RecordKind>()
            .map_err(|e| Error::CorruptRecord { key: self.key.clone(), reason: e.to_string() })?;
        let payload: Payload = serde_json::from_str(&self.payload_json)
            .map_err(|e| Error::CorruptRecord { key: self.key.clone(), reason: format!("bad payload: {e}") })?;
        let fetched_at = parse_timestamp(&self.key, &self.fetched_at)?;
        Ok(CacheRecord { key: CacheKey::from_raw(self.key), kind, payload, fetched_at })
    }
}

pub(crate) fn upsert(conn: &rusqlite::Connection, record: &CacheRecord) -> Result<(), Error> {
    let payload_json = serde_json::to_string(&record.payload)?;
    conn.execute(
        "INSERT INTO records (key, kind, payload_json, fetched_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(key) DO UPDATE SET
             kind = excluded.kind,
             payload_json = excluded.payload_json,
             fetched_at = excluded.fetched_at",
        params![record.key.as_str(), record.kind.as_str(), payload_json, format_timestamp(record.fetched_at)],
    )?;
    Ok(())
}

impl CacheStore {
    /// Get a record by key, regardless of freshness.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<CacheRecord>, Error> {
        let key = key.as_str().to_string();
        self.conn
            .call(move |conn| -> Result<Option<CacheRecord>, Error> {
                let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE key = ?1"))?;
                match stmt.query_row(params![key], RawRecord::from_row) {
                    Ok(raw) => raw.decode().map(Some),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Insert or replace a record.
    ///
    /// Uses UPSERT semantics: at most one record per key; a second write
    /// replaces kind, payload and `fetched_at`.
    pub async fn put(&self, record: &CacheRecord) -> Result<(), Error> {
        let owned = record.clone();
        self.conn
            .call(move |conn| -> Result<(), Error> { upsert(conn, &owned) })
            .await
            .map_err(Error::from)?;
        tracing::debug!(key = %record.key, kind = %record.kind, "record cached");
        Ok(())
    }

    /// Delete records fetched more than `older_than` ago.
    ///
    /// Returns the number of deleted entries.
    pub async fn purge(&self, older_than: TimeDelta) -> Result<u64, Error> {
        self.purge_before(Utc::now() - older_than).await
    }

    /// Delete records with `fetched_at` strictly before `cutoff`.
    pub async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, Error> {
        let cutoff = format_timestamp(cutoff);
        let deleted = self
            .conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM records WHERE fetched_at < ?1", params![cutoff])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)?;
        tracing::info!(deleted, "purged cached records");
        Ok(deleted)
    }

    /// Delete every record.
    pub async fn clear(&self) -> Result<u64, Error> {
        let deleted = self
            .conn
            .call(|conn| -> Result<u64, Error> { Ok(conn.execute("DELETE FROM records", [])? as u64) })
            .await
            .map_err(Error::from)?;
        tracing::info!(deleted, "cleared cache");
        Ok(deleted)
    }

    /// Reclaim space left behind by deletions.
    pub async fn compact(&self) -> Result<(), Error> {
        self.conn
            .call(|conn| conn.execute_batch("VACUUM"))
            .await
            .map_err(Error::Database)
    }

    /// Number of stored records, fresh or not.
    pub async fn count(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}
