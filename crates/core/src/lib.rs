//! Core types and shared functionality for harvest.
//!
//! This crate provides:
//! - Record cache with SQLite backend
//! - Unified error and failure types
//! - Retry with exponential backoff
//! - Bounded readiness polling
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod retry;
pub mod wait;

pub use cache::{CacheKey, CachePolicy, CacheRecord, CacheStats, CacheStore, Payload, RecordKind, SearchFilter};
pub use config::{AppConfig, ConfigError};
pub use error::{Error, FailureKind, FetchFailure};
pub use retry::{RetryError, RetryExecutor, RetryPolicy};
pub use wait::WaitCondition;
