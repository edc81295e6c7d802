//! Predicate scans over cached payloads.
//!
//! Searches never consult freshness: expired records are returned too, newest
//! first, so "latest known value" queries are deterministic.

use serde_json::Value;
use tokio_rusqlite::params;

use super::connection::CacheStore;
use super::records::{CacheRecord, Payload, RawRecord, RecordKind, SELECT_COLUMNS};
use crate::Error;

/// One condition over a payload.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldMatch {
    /// Case-insensitive substring match on one field.
    Contains { field: String, needle: String },
    /// Exact JSON equality on one field.
    Equals { field: String, value: Value },
    /// Case-insensitive substring match on any of several fields.
    AnyContains { fields: Vec<String>, needle: String },
}

impl FieldMatch {
    fn matches(&self, payload: &Payload) -> bool {
        match self {
            FieldMatch::Contains { field, needle } => payload.get(field).is_some_and(|v| contains_ci(v, needle)),
            FieldMatch::Equals { field, value } => payload.get(field) == Some(value),
            FieldMatch::AnyContains { fields, needle } => fields
                .iter()
                .any(|field| payload.get(field).is_some_and(|v| contains_ci(v, needle))),
        }
    }
}

fn contains_ci(value: &Value, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    match value {
        Value::String(s) => s.to_lowercase().contains(&needle),
        Value::Null => false,
        other => other.to_string().to_lowercase().contains(&needle),
    }
}

/// Conjunction of [`FieldMatch`] conditions. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    conditions: Vec<FieldMatch>,
}

impl SearchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(mut self, field: impl Into<String>, needle: impl Into<String>) -> Self {
        self.conditions.push(FieldMatch::Contains { field: field.into(), needle: needle.into() });
        self
    }

    pub fn equals(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(FieldMatch::Equals { field: field.into(), value: value.into() });
        self
    }

    /// Keyword search across several fields, e.g. title or description.
    pub fn any_contains<I, S>(mut self, fields: I, needle: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.conditions.push(FieldMatch::AnyContains {
            fields: fields.into_iter().map(Into::into).collect(),
            needle: needle.into(),
        });
        self
    }

    pub fn conditions(&self) -> &[FieldMatch] {
        &self.conditions
    }

    pub fn matches(&self, payload: &Payload) -> bool {
        self.conditions.iter().all(|c| c.matches(payload))
    }
}

impl CacheStore {
    /// Records of `kind` (or every kind) matching `filter`, newest first.
    pub async fn search(
        &self, kind: Option<RecordKind>, filter: &SearchFilter, limit: Option<usize>,
    ) -> Result<Vec<CacheRecord>, Error> {
        let filter = filter.clone();
        let mut records = self.search_with(kind, move |payload| filter.matches(payload)).await?;
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    /// Records of `kind` (or every kind) whose payload satisfies `predicate`, newest first.
    pub async fn search_with<P>(&self, kind: Option<RecordKind>, predicate: P) -> Result<Vec<CacheRecord>, Error>
    where
        P: Fn(&Payload) -> bool + Send + 'static,
    {
        let kind = kind.map(RecordKind::as_str);
        self.conn
            .call(move |conn| -> Result<Vec<CacheRecord>, Error> {
                let mut stmt = conn.prepare(&format!(
                    "{SELECT_COLUMNS} WHERE (?1 IS NULL OR kind = ?1) ORDER BY fetched_at DESC, key ASC"
                ))?;
                let rows = stmt.query_map(params![kind], RawRecord::from_row)?;

                let mut matched = Vec::new();
                for row in rows {
                    let record = row?.decode()?;
                    if predicate(&record.payload) {
                        matched.push(record);
                    }
                }
                Ok(matched)
            })
            .await
            .map_err(Error::from)
    }

    /// Every record, newest first.
    pub async fn all_records(&self) -> Result<Vec<CacheRecord>, Error> {
        self.search_with(None, |_| true).await
    }
}
