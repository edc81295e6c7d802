//! The seam between the orchestrator and whatever actually loads pages.

use std::sync::Arc;

use harvest_core::{FetchFailure, Payload, WaitCondition};

use crate::request::Target;

/// Loads one target and extracts its fields.
///
/// Implementations classify every failure with a
/// [`FailureKind`](harvest_core::FailureKind) and use `wait` for any
/// readiness polling so the caller's timeout and deadline apply.
#[async_trait::async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, target: &Target, wait: &WaitCondition) -> Result<Payload, FetchFailure>;
}

#[async_trait::async_trait]
impl<T: PageFetcher + ?Sized> PageFetcher for Arc<T> {
    async fn fetch(&self, target: &Target, wait: &WaitCondition) -> Result<Payload, FetchFailure> {
        (**self).fetch(target, wait).await
    }
}
