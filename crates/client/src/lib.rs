//! Fetch orchestration for harvest.
//!
//! This crate turns logical requests into cache keys, answers them from the
//! record cache when fresh, and otherwise drives a [`PageFetcher`] under the
//! retry policy. The `render` feature adds a headless-browser fetcher.

pub mod canonical;
pub mod extract;
pub mod fetcher;
pub mod orchestrator;
#[cfg(feature = "render")]
pub mod render;
pub mod request;

pub use canonical::{UrlError, canonicalize};
pub use extract::{ExtractionRules, FieldRule, clean_text, extract_fields};
pub use fetcher::PageFetcher;
pub use orchestrator::{FetchMetrics, FetchOrchestrator, FetchOutcome, FetchSource};
pub use request::{FetchRequest, SearchEndpoint, SearchQuery, Target};

#[cfg(feature = "render")]
pub use render::{BrowserOptions, BrowserSession, SelectorFetcher};
