//! Cache-first fetching with retries.
//!
//! A request is answered from the store when a fresh record exists. Otherwise
//! the [`PageFetcher`] runs under the retry policy and a successful payload is
//! written back before being returned. Expired records are never served.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{TimeDelta, Utc};
use harvest_core::cache::{CacheKey, CachePolicy, CacheRecord, CacheStats, CacheStore, ExportSummary, Payload};
use harvest_core::{AppConfig, Error, FetchFailure, RecordKind, RetryExecutor, SearchFilter, WaitCondition};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::fetcher::PageFetcher;
use crate::request::FetchRequest;

/// Results returned by [`FetchOrchestrator::search_cached`] when no limit is given.
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Where a payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "source")]
pub enum FetchSource {
    CacheHit,
    Live { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub payload: Payload,
    pub source: FetchSource,
}

/// Request counters since the orchestrator was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchMetrics {
    pub requests: u64,
    pub cache_hits: u64,
    pub live_fetches: u64,
    pub failures: u64,
}

impl FetchMetrics {
    /// Percentage of requests served from the cache, rounded to 2 decimals.
    pub fn hit_rate(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        (self.cache_hits as f64 / self.requests as f64 * 10_000.0).round() / 100.0
    }
}

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    live_fetches: AtomicU64,
    failures: AtomicU64,
}

type LockMap = Mutex<HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>>;

/// Holds a key's in-flight lock entry; removes it from the map when the last holder leaves.
struct InFlight<'a> {
    map: &'a LockMap,
    key: CacheKey,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> InFlight<'a> {
    fn acquire(map: &'a LockMap, key: &CacheKey) -> Self {
        let mut locks = map.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = locks.entry(key.clone()).or_default().clone();
        Self { map, key: key.clone(), lock }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut locks = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        // The map and this guard are the only remaining owners.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.key);
        }
    }
}

/// Coordinates the cache, retry policy and page fetcher.
pub struct FetchOrchestrator<F> {
    store: CacheStore,
    fetcher: F,
    policy: CachePolicy,
    retry: RetryExecutor,
    wait: WaitCondition,
    in_flight: LockMap,
    counters: Counters,
}

impl<F: PageFetcher> FetchOrchestrator<F> {
    pub fn new(store: CacheStore, fetcher: F, policy: CachePolicy, retry: RetryExecutor, wait: WaitCondition) -> Self {
        Self { store, fetcher, policy, retry, wait, in_flight: Mutex::new(HashMap::new()), counters: Counters::default() }
    }

    /// Build with the policies derived from `config`.
    pub fn from_config(store: CacheStore, fetcher: F, config: &AppConfig) -> Self {
        Self::new(
            store,
            fetcher,
            config.cache_policy(),
            RetryExecutor::new(config.retry_policy()),
            config.wait_condition(),
        )
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Fresh cached payload, or a live fetch that is cached before returning.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<Payload, Error> {
        Ok(self.fetch_outcome(request).await?.payload)
    }

    /// Like [`fetch`](Self::fetch), giving up once `deadline` passes.
    pub async fn fetch_until(&self, request: &FetchRequest, deadline: Instant) -> Result<Payload, Error> {
        Ok(self.run(request, Some(deadline)).await?.payload)
    }

    /// Like [`fetch`](Self::fetch), also reporting where the payload came from.
    pub async fn fetch_outcome(&self, request: &FetchRequest) -> Result<FetchOutcome, Error> {
        self.run(request, None).await
    }

    async fn run(&self, request: &FetchRequest, deadline: Option<Instant>) -> Result<FetchOutcome, Error> {
        let key = request.cache_key();
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        match self.resolve(&key, request, deadline).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = %key, target = %request.target, error = %e, "fetch failed");
                Err(e)
            }
        }
    }

    async fn resolve(
        &self, key: &CacheKey, request: &FetchRequest, deadline: Option<Instant>,
    ) -> Result<FetchOutcome, Error> {
        if let Some(payload) = self.lookup_fresh(key).await? {
            return Ok(self.hit(payload));
        }

        let slot = InFlight::acquire(&self.in_flight, key);
        let _guard = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, slot.lock.lock()).await.map_err(|_| {
                tracing::debug!(key = %key, "deadline passed waiting for in-flight fetch");
                Error::DeadlineExceeded { key: key.to_string(), attempts: 0, last: None }
            })?,
            None => slot.lock.lock().await,
        };

        // Another caller may have filled the entry while we waited.
        if let Some(payload) = self.lookup_fresh(key).await? {
            return Ok(self.hit(payload));
        }

        tracing::debug!(key = %key, target = %request.target, "cache miss, fetching");
        self.counters.live_fetches.fetch_add(1, Ordering::Relaxed);
        self.fetch_live(key, request, deadline).await
    }

    fn hit(&self, payload: Payload) -> FetchOutcome {
        self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
        FetchOutcome { payload, source: FetchSource::CacheHit }
    }

    async fn lookup_fresh(&self, key: &CacheKey) -> Result<Option<Payload>, Error> {
        match self.store.get(key).await? {
            Some(record) if record.is_fresh(&self.policy, Utc::now()) => {
                tracing::debug!(key = %key, "cache hit");
                Ok(Some(record.payload))
            }
            Some(record) => {
                tracing::debug!(key = %key, fetched_at = %record.fetched_at, "cached record expired");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn fetch_live(
        &self, key: &CacheKey, request: &FetchRequest, deadline: Option<Instant>,
    ) -> Result<FetchOutcome, Error> {
        let fetcher = &self.fetcher;
        let target = &request.target;
        let base_wait = self.wait;
        let mut attempts = 0;

        let result = self
            .retry
            .execute_until(
                |attempt| {
                    attempts = attempt;
                    let wait = base_wait.bounded_by(deadline);
                    async move {
                        let payload = fetcher.fetch(target, &wait).await?;
                        if payload.is_empty() {
                            return Err(FetchFailure::element_not_found(format!("no fields extracted from {target}")));
                        }
                        Ok(payload)
                    }
                },
                deadline,
            )
            .await;

        let payload = result.map_err(|e| e.into_error(key))?;

        let record = CacheRecord::new(key.clone(), request.kind, payload.clone());
        if let Err(e) = self.store.put(&record).await {
            tracing::error!(key = %key, error = %e, "fetched payload could not be cached");
        }

        Ok(FetchOutcome { payload, source: FetchSource::Live { attempts } })
    }

    pub fn metrics(&self) -> FetchMetrics {
        FetchMetrics {
            requests: self.counters.requests.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            live_fetches: self.counters.live_fetches.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    pub async fn get_cache_stats(&self) -> Result<CacheStats, Error> {
        self.store.stats(&self.policy).await
    }

    /// Delete records older than `older_than`, or every record when `None`.
    ///
    /// Clearing everything also compacts the database file.
    pub async fn clear_cache(&self, older_than: Option<TimeDelta>) -> Result<u64, Error> {
        match older_than {
            Some(age) => self.store.purge(age).await,
            None => {
                let removed = self.store.clear().await?;
                self.store.compact().await?;
                Ok(removed)
            }
        }
    }

    pub async fn compact_cache(&self) -> Result<(), Error> {
        self.store.compact().await
    }

    pub async fn export_to_json(&self, path: impl AsRef<Path>) -> Result<ExportSummary, Error> {
        self.store.export_all(path).await
    }

    pub async fn import_from_json(&self, path: impl AsRef<Path>) -> Result<u64, Error> {
        self.store.import_all(path).await
    }

    /// Cached records matching `filter`, newest first, expired ones included.
    pub async fn search_cached(
        &self, kind: Option<RecordKind>, filter: &SearchFilter, limit: Option<usize>,
    ) -> Result<Vec<CacheRecord>, Error> {
        self.store
            .search(kind, filter, Some(limit.unwrap_or(DEFAULT_SEARCH_LIMIT)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_core::{FailureKind, RetryPolicy};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use crate::request::Target;

    /// Replays scripted results, then keeps returning the last one.
    struct ScriptedFetcher {
        calls: AtomicU32,
        script: Mutex<VecDeque<Result<Payload, FetchFailure>>>,
        last: Mutex<Option<Result<Payload, FetchFailure>>>,
        delay: Duration,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Result<Payload, FetchFailure>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                script: Mutex::new(script.into()),
                last: Mutex::new(None),
                delay: Duration::ZERO,
            })
        }

        fn slow(script: Vec<Result<Payload, FetchFailure>>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                script: Mutex::new(script.into()),
                last: Mutex::new(None),
                delay,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl PageFetcher for ScriptedFetcher {
        async fn fetch(&self, _target: &Target, _wait: &WaitCondition) -> Result<Payload, FetchFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            let mut last = self.last.lock().unwrap();
            match next {
                Some(result) => {
                    *last = Some(result.clone());
                    result
                }
                None => last.clone().unwrap_or_else(|| Err(FetchFailure::unavailable("empty script"))),
            }
        }
    }

    fn job_payload() -> Payload {
        [("title".to_string(), json!("Engineer")), ("company".to_string(), json!("Acme"))]
            .into_iter()
            .collect()
    }

    fn fast_retry() -> RetryExecutor {
        RetryExecutor::new(RetryPolicy::new(3, Duration::from_millis(100)))
    }

    async fn orchestrator(fetcher: Arc<ScriptedFetcher>) -> FetchOrchestrator<Arc<ScriptedFetcher>> {
        let store = CacheStore::open_in_memory().await.unwrap();
        FetchOrchestrator::new(store, fetcher, CachePolicy::default(), fast_retry(), WaitCondition::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_then_cache_hit() {
        let fetcher = ScriptedFetcher::new(vec![Ok(job_payload())]);
        let orch = orchestrator(fetcher.clone()).await;
        let request = FetchRequest::job("https://x/job/123").unwrap();

        let first = orch.fetch_outcome(&request).await.unwrap();
        assert_eq!(first.payload, job_payload());
        assert_eq!(first.source, FetchSource::Live { attempts: 1 });

        let stats = orch.get_cache_stats().await.unwrap();
        assert_eq!(stats.total_jobs(), 1);
        assert_eq!(stats.valid_jobs(), 1);

        let second = orch.fetch_outcome(&request).await.unwrap();
        assert_eq!(second.payload, first.payload);
        assert_eq!(second.source, FetchSource::CacheHit);
        assert_eq!(fetcher.calls(), 1);

        let metrics = orch.metrics();
        assert_eq!(metrics.requests, 2);
        assert_eq!(metrics.cache_hits, 1);
        assert_eq!(metrics.live_fetches, 1);
        assert_eq!(metrics.hit_rate(), 50.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_record_is_refetched_not_served() {
        let fetcher = ScriptedFetcher::new(vec![Ok(job_payload())]);
        let orch = orchestrator(fetcher.clone()).await;
        let request = FetchRequest::job("https://x/job/123").unwrap();

        let mut stale = Payload::new();
        stale.insert("title".into(), json!("Old title"));
        let record =
            CacheRecord::with_fetched_at(request.cache_key(), RecordKind::Job, stale, Utc::now() - TimeDelta::days(8));
        orch.store().put(&record).await.unwrap();

        let payload = orch.fetch(&request).await.unwrap();
        assert_eq!(payload, job_payload());
        assert_eq!(fetcher.calls(), 1);

        let stored = orch.store().get(&request.cache_key()).await.unwrap().unwrap();
        assert_eq!(stored.payload, job_payload());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_record_not_used_as_fallback() {
        let fetcher = ScriptedFetcher::new(vec![Err(FetchFailure::timeout("slow page"))]);
        let orch = orchestrator(fetcher.clone()).await;
        let request = FetchRequest::job("https://x/job/123").unwrap();

        let record = CacheRecord::with_fetched_at(
            request.cache_key(),
            RecordKind::Job,
            job_payload(),
            Utc::now() - TimeDelta::days(30),
        );
        orch.store().put(&record).await.unwrap();

        let err = orch.fetch(&request).await.unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let fetcher = ScriptedFetcher::new(vec![Err(FetchFailure::timeout("slow page"))]);
        let orch = orchestrator(fetcher.clone()).await;
        let request = FetchRequest::job("https://x/job/1").unwrap();

        let err = orch.fetch(&request).await.unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { attempts: 3, ref last, .. } if last.kind == FailureKind::Timeout));
        assert_eq!(fetcher.calls(), 3);
        assert_eq!(orch.store().count().await.unwrap(), 0);
        assert_eq!(orch.metrics().failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_single_attempt() {
        let fetcher = ScriptedFetcher::new(vec![Err(FetchFailure::auth_required("login wall"))]);
        let orch = orchestrator(fetcher.clone()).await;
        let request = FetchRequest::profile("https://x/in/jane").unwrap();

        let err = orch.fetch(&request).await.unwrap_err();
        assert!(matches!(err, Error::FetchFailed { .. }));
        assert_eq!(err.failure_kind(), Some(FailureKind::AuthRequired));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let fetcher = ScriptedFetcher::new(vec![
            Err(FetchFailure::stale_reference("node detached")),
            Err(FetchFailure::timeout("slow")),
            Ok(job_payload()),
        ]);
        let orch = orchestrator(fetcher.clone()).await;
        let request = FetchRequest::job("https://x/job/2").unwrap();

        let outcome = orch.fetch_outcome(&request).await.unwrap();
        assert_eq!(outcome.source, FetchSource::Live { attempts: 3 });
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_payload_is_a_failure() {
        let fetcher = ScriptedFetcher::new(vec![Ok(Payload::new()), Ok(job_payload())]);
        let orch = orchestrator(fetcher.clone()).await;
        let request = FetchRequest::job("https://x/job/3").unwrap();

        let outcome = orch.fetch_outcome(&request).await.unwrap();
        assert_eq!(outcome.source, FetchSource::Live { attempts: 2 });
        assert_eq!(outcome.payload, job_payload());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let fetcher = ScriptedFetcher::new(vec![Err(FetchFailure::timeout("slow"))]);
        let store = CacheStore::open_in_memory().await.unwrap();
        let retry = RetryExecutor::new(RetryPolicy::new(5, Duration::from_secs(1)));
        let orch = FetchOrchestrator::new(store, fetcher.clone(), CachePolicy::default(), retry, WaitCondition::default());
        let request = FetchRequest::job("https://x/job/4").unwrap();

        let deadline = Instant::now() + Duration::from_millis(1500);
        let err = orch.fetch_until(&request, deadline).await.unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded { attempts: 2, .. }));
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_same_key_fetches_once() {
        let fetcher = ScriptedFetcher::slow(vec![Ok(job_payload())], Duration::from_millis(500));
        let orch = Arc::new(orchestrator(fetcher.clone()).await);
        let request = FetchRequest::job("https://x/job/5").unwrap();

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let orch = orch.clone();
                let request = request.clone();
                tokio::spawn(async move { orch.fetch(&request).await })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), job_payload());
        }
        assert_eq!(fetcher.calls(), 1);
        assert!(orch.in_flight.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_fetch_independently() {
        let fetcher = ScriptedFetcher::new(vec![Ok(job_payload())]);
        let orch = orchestrator(fetcher.clone()).await;

        orch.fetch(&FetchRequest::job("https://x/job/6").unwrap()).await.unwrap();
        orch.fetch(&FetchRequest::profile("https://x/job/6").unwrap()).await.unwrap();
        assert_eq!(fetcher.calls(), 2);

        let stats = orch.get_cache_stats().await.unwrap();
        assert_eq!(stats.total_jobs(), 1);
        assert_eq!(stats.total_profiles(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_before_fetch() {
        let fetcher = ScriptedFetcher::new(vec![Ok(job_payload())]);
        let store = CacheStore::open_in_memory().await.unwrap();
        let orch = FetchOrchestrator::new(
            store.clone(),
            fetcher.clone(),
            CachePolicy::default(),
            fast_retry(),
            WaitCondition::default(),
        );
        store.close().await.unwrap();

        let err = orch.fetch(&FetchRequest::job("https://x/job/7").unwrap()).await.unwrap_err();
        assert!(err.is_storage());
        assert_eq!(fetcher.calls(), 0);

        let metrics = orch.metrics();
        assert_eq!(metrics.requests, 1);
        assert_eq!(metrics.failures, 1);
        assert_eq!(metrics.live_fetches, 0);
    }

    /// Announces that a fetch has started, then holds it open until released.
    struct BlockingFetcher {
        started: tokio::sync::Notify,
        release: tokio::sync::Notify,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl PageFetcher for BlockingFetcher {
        async fn fetch(&self, _target: &Target, _wait: &WaitCondition) -> Result<Payload, FetchFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();
            self.release.notified().await;
            Ok(job_payload())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_wait_for_in_flight_fetch() {
        let fetcher = Arc::new(BlockingFetcher {
            started: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
            calls: AtomicU32::new(0),
        });
        let store = CacheStore::open_in_memory().await.unwrap();
        let orch = Arc::new(FetchOrchestrator::new(
            store,
            fetcher.clone(),
            CachePolicy::default(),
            fast_retry(),
            WaitCondition::default(),
        ));
        let request = FetchRequest::job("https://x/job/9").unwrap();

        let first = {
            let orch = orch.clone();
            let request = request.clone();
            tokio::spawn(async move { orch.fetch(&request).await })
        };
        fetcher.started.notified().await;

        let start = Instant::now();
        let err = orch.fetch_until(&request, start + Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded { attempts: 0, last: None, .. }));
        assert!(start.elapsed() <= Duration::from_secs(1));

        fetcher.release.notify_one();
        assert_eq!(first.await.unwrap().unwrap(), job_payload());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(orch.metrics().failures, 1);
        assert!(orch.in_flight.lock().unwrap().is_empty());
    }

    /// Records the wait timeout each attempt was given.
    struct WaitRecorder {
        timeouts: Mutex<Vec<Duration>>,
    }

    #[async_trait::async_trait]
    impl PageFetcher for WaitRecorder {
        async fn fetch(&self, _target: &Target, wait: &WaitCondition) -> Result<Payload, FetchFailure> {
            self.timeouts.lock().unwrap().push(wait.timeout());
            Ok(job_payload())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_shortens_fetcher_wait() {
        let fetcher = Arc::new(WaitRecorder { timeouts: Mutex::new(Vec::new()) });
        let store = CacheStore::open_in_memory().await.unwrap();
        let wait = WaitCondition::new(Duration::from_secs(10), Duration::from_millis(500));
        let orch = FetchOrchestrator::new(store, fetcher.clone(), CachePolicy::default(), fast_retry(), wait);

        let remaining = Duration::from_secs(3);
        orch.fetch_until(&FetchRequest::job("https://x/job/10").unwrap(), Instant::now() + remaining)
            .await
            .unwrap();
        orch.fetch(&FetchRequest::job("https://x/job/11").unwrap()).await.unwrap();

        let timeouts = fetcher.timeouts.lock().unwrap().clone();
        assert_eq!(timeouts.len(), 2);
        assert!(timeouts[0] <= remaining);
        assert!(!timeouts[0].is_zero());
        assert_eq!(timeouts[1], Duration::from_secs(10));
    }

    /// Closes the store mid-fetch so the write-back fails.
    struct ClosingFetcher {
        store: Mutex<Option<CacheStore>>,
    }

    #[async_trait::async_trait]
    impl PageFetcher for ClosingFetcher {
        async fn fetch(&self, _target: &Target, _wait: &WaitCondition) -> Result<Payload, FetchFailure> {
            let store = self.store.lock().unwrap().take();
            if let Some(store) = store {
                store.close().await.unwrap();
            }
            Ok(job_payload())
        }
    }

    #[tokio::test]
    async fn test_cache_write_failure_still_returns_payload() {
        let store = CacheStore::open_in_memory().await.unwrap();
        let fetcher = ClosingFetcher { store: Mutex::new(Some(store.clone())) };
        let orch = FetchOrchestrator::new(store, fetcher, CachePolicy::default(), fast_retry(), WaitCondition::default());

        let outcome = orch.fetch_outcome(&FetchRequest::job("https://x/job/8").unwrap()).await.unwrap();
        assert_eq!(outcome.payload, job_payload());
        assert_eq!(outcome.source, FetchSource::Live { attempts: 1 });
        assert!(orch.get_cache_stats().await.unwrap_err().is_storage());
    }

    #[tokio::test]
    async fn test_clear_cache() {
        let fetcher = ScriptedFetcher::new(vec![Ok(job_payload())]);
        let orch = orchestrator(fetcher).await;
        for (id, days) in [("a", 1), ("b", 10), ("c", 40)] {
            let record = CacheRecord::with_fetched_at(
                FetchRequest::job(&format!("https://x/job/{id}")).unwrap().cache_key(),
                RecordKind::Job,
                job_payload(),
                Utc::now() - TimeDelta::days(days),
            );
            orch.store().put(&record).await.unwrap();
        }

        assert_eq!(orch.clear_cache(Some(TimeDelta::days(30))).await.unwrap(), 1);
        assert_eq!(orch.clear_cache(None).await.unwrap(), 2);
        assert_eq!(orch.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_search_cached_default_limit() {
        let fetcher = ScriptedFetcher::new(vec![Ok(job_payload())]);
        let orch = orchestrator(fetcher).await;
        for i in 0..12 {
            let record = CacheRecord::with_fetched_at(
                FetchRequest::job(&format!("https://x/job/{i}")).unwrap().cache_key(),
                RecordKind::Job,
                job_payload(),
                Utc::now() - TimeDelta::minutes(i),
            );
            orch.store().put(&record).await.unwrap();
        }

        let filter = SearchFilter::new().contains("company", "acme");
        assert_eq!(orch.search_cached(Some(RecordKind::Job), &filter, None).await.unwrap().len(), 10);
        assert_eq!(orch.search_cached(Some(RecordKind::Job), &filter, Some(20)).await.unwrap().len(), 12);
        assert!(orch.search_cached(Some(RecordKind::Profile), &filter, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_export_and_import() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");

        let fetcher = ScriptedFetcher::new(vec![Ok(job_payload())]);
        let orch = orchestrator(fetcher.clone()).await;
        orch.fetch(&FetchRequest::job("https://x/job/123").unwrap()).await.unwrap();

        let summary = orch.export_to_json(&path).await.unwrap();
        assert_eq!((summary.jobs, summary.profiles), (1, 0));

        let restored = orchestrator(fetcher.clone()).await;
        assert_eq!(restored.import_from_json(&path).await.unwrap(), 1);
        restored.fetch(&FetchRequest::job("https://x/job/123").unwrap()).await.unwrap();
        assert_eq!(fetcher.calls(), 1);
    }

    #[test]
    fn test_hit_rate_rounding() {
        let metrics = FetchMetrics { requests: 3, cache_hits: 1, ..Default::default() };
        assert_eq!(metrics.hit_rate(), 33.33);
        assert_eq!(FetchMetrics::default().hit_rate(), 0.0);
    }
}
