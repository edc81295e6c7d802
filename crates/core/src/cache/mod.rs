//! SQLite-backed store of fetched records.
//!
//! This module provides a persistent, key-addressed cache using SQLite with
//! async access via tokio-rusqlite. It supports:
//!
//! - Deterministic SHA-256 cache keys
//! - Automatic schema migrations
//! - WAL mode for concurrent access
//! - Predicate search, policy-classified statistics, age purge
//! - Atomic JSON export and transactional re-ingest

pub mod connection;
pub mod export;
pub mod hash;
pub mod migrations;
pub mod policy;
pub mod records;
pub mod search;
pub mod stats;

pub use crate::Error;

pub use connection::CacheStore;
pub use export::{ExportDocument, ExportSummary};
pub use hash::{CacheKey, compute_cache_key};
pub use policy::{CachePolicy, Freshness};
pub use records::{CacheRecord, Payload, RecordKind};
pub use search::{FieldMatch, SearchFilter};
pub use stats::{CacheStats, KindStats};
