//! TTL Result Cache Module
//!
//! Query results with a time-to-live. One `TtlCache` type serves every query
//! kind; the kind decides the table, the normalization rules and the
//! projected diagnostic fields.
//!
//! Expiration is lazy: a row with `expires_at <= now` reads as absent whether or
//! not it has been swept. `clear_expired` removes such rows for good.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::accounting::AccessRecorder;
use crate::cache::clock::Clock;
use crate::cache::entry::{EntryMeta, ResultRow};
use crate::cache::kinds::{ArchiveSearch, Feasibility, QueryKind};
use crate::cache::stats::{SessionCounters, TtlStats};
use crate::error::{CacheError, Result};
use crate::keys::{normalize, CacheKey, KeyGenerator, NormalizedParams};
use crate::storage::CacheBackend;

pub type SearchCache = TtlCache<ArchiveSearch>;
pub type FeasibilityCache = TtlCache<Feasibility>;

// == TTL Cache ==
pub struct TtlCache<K: QueryKind> {
    backend: Arc<dyn CacheBackend>,
    recorder: AccessRecorder,
    clock: Arc<dyn Clock>,
    keys: KeyGenerator,
    default_ttl: u64,
    session: Arc<SessionCounters>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: QueryKind> Clone for TtlCache<K> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            recorder: self.recorder.clone(),
            clock: Arc::clone(&self.clock),
            keys: self.keys.clone(),
            default_ttl: self.default_ttl,
            session: Arc::clone(&self.session),
            _kind: PhantomData,
        }
    }
}

impl<K: QueryKind> TtlCache<K> {
    /// Creates a cache over a shared backend.
    ///
    /// # Arguments
    /// * `backend` - Storage shared by every cache of the process
    /// * `recorder` - Accounting handle receiving hits
    /// * `clock` - Time source for expiry decisions
    /// * `default_ttl` - Lifetime in seconds used by `set`
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        recorder: AccessRecorder,
        clock: Arc<dyn Clock>,
        default_ttl: u64,
    ) -> Self {
        Self {
            backend,
            recorder,
            clock,
            keys: KeyGenerator::new(),
            default_ttl,
            session: Arc::new(SessionCounters::new()),
            _kind: PhantomData,
        }
    }

    pub fn with_key_generator(mut self, keys: KeyGenerator) -> Self {
        self.keys = keys;
        self
    }

    pub fn default_ttl(&self) -> u64 {
        self.default_ttl
    }

    /// Key under which `params` are stored.
    pub fn key_for(&self, params: &K::Params) -> Result<CacheKey> {
        self.prepare(params).map(|(key, _)| key)
    }

    fn prepare(&self, params: &K::Params) -> Result<(CacheKey, NormalizedParams)> {
        let normalized = normalize(params, &K::RULES)?;
        Ok((self.keys.generate(&normalized), normalized))
    }

    /// Returns the cached result for `params`, or `None` on a miss.
    ///
    /// Storage and decode failures are logged and reported as a miss. Malformed
    /// parameters are an error.
    pub async fn get<T: DeserializeOwned>(&self, params: &K::Params) -> Result<Option<T>> {
        let key = self.key_for(params)?;
        let now = self.clock.now();

        let row = match self.backend.get_result(K::TABLE, key.as_str()).await {
            Ok(Some(row)) if !row.is_expired(now) => row,
            Ok(_) => {
                self.session.record_miss();
                debug!(cache = K::TABLE.label(), key = %key, "Cache miss");
                return Ok(None);
            }
            Err(e) => {
                self.session.record_error();
                self.session.record_miss();
                warn!(cache = K::TABLE.label(), key = %key, error = %e, "Cache read failed, treating as miss");
                return Ok(None);
            }
        };

        match serde_json::from_slice(&row.payload) {
            Ok(value) => {
                self.recorder.record(K::TABLE, &key, row.updated_at, now);
                self.session.record_hit();
                debug!(cache = K::TABLE.label(), key = %key, "Cache hit");
                Ok(Some(value))
            }
            Err(e) => {
                self.session.record_error();
                self.session.record_miss();
                warn!(cache = K::TABLE.label(), key = %key, error = %e, "Cached payload undecodable, treating as miss");
                Ok(None)
            }
        }
    }

    /// Stores `payload` with the default TTL.
    pub async fn set<T: Serialize>(&self, params: &K::Params, payload: &T) -> Result<()> {
        self.set_with_ttl(params, payload, self.default_ttl).await
    }

    /// Stores `payload` for `ttl_seconds`. Zero stores an already expired row.
    pub async fn set_with_ttl<T: Serialize>(
        &self,
        params: &K::Params,
        payload: &T,
        ttl_seconds: u64,
    ) -> Result<()> {
        let now = self.clock.now();
        let expires_at = i64::try_from(ttl_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.write(params, payload, now, expires_at).await
    }

    /// Stores `payload` until an absolute instant, which may already be past.
    pub async fn set_until<T: Serialize>(
        &self,
        params: &K::Params,
        payload: &T,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let now = self.clock.now();
        self.write(params, payload, now, expires_at).await
    }

    async fn write<T: Serialize>(
        &self,
        params: &K::Params,
        payload: &T,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let (key, normalized) = self.prepare(params)?;
        let value = serde_json::to_value(payload).map_err(CacheError::unserializable)?;
        let summary = K::summarize(&value);
        let row = ResultRow::fresh(
            key.clone(),
            K::project(&normalized),
            serde_json::to_vec(&value).map_err(CacheError::unserializable)?,
            summary,
            now,
            expires_at,
        );

        match self.backend.upsert_result(K::TABLE, row).await {
            Ok(()) => debug!(cache = K::TABLE.label(), key = %key, expires_at = %expires_at, "Cached result"),
            Err(e) => {
                self.session.record_error();
                warn!(cache = K::TABLE.label(), key = %key, error = %e, "Cache write failed");
            }
        }
        Ok(())
    }

    /// Removes the entry for `params`. Returns whether one existed.
    pub async fn clear(&self, params: &K::Params) -> Result<bool> {
        let key = self.key_for(params)?;
        self.backend.delete_result(K::TABLE, key.as_str()).await
    }

    pub async fn clear_all(&self) -> Result<u64> {
        let removed = self.backend.delete_all_results(K::TABLE).await?;
        info!(cache = K::TABLE.label(), removed, "Cache cleared");
        Ok(removed)
    }

    /// Deletes every expired row.
    pub async fn clear_expired(&self) -> Result<u64> {
        let removed = self
            .backend
            .delete_expired_results(K::TABLE, self.clock.now())
            .await?;
        if removed > 0 {
            info!(cache = K::TABLE.label(), removed, "Expired entries removed");
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<TtlStats> {
        let aggregate = self
            .backend
            .result_aggregate(K::TABLE, self.clock.now())
            .await?;
        Ok(TtlStats::from_aggregate(aggregate, self.session.snapshot()))
    }

    /// Metadata of the stored row, expired or not. Does not count as an access.
    pub async fn inspect(&self, params: &K::Params) -> Result<Option<EntryMeta>> {
        let key = self.key_for(params)?;
        let now = self.clock.now();
        Ok(self
            .backend
            .get_result(K::TABLE, key.as_str())
            .await?
            .map(|row| row.meta(now)))
    }

    /// Returns the cached result, or runs `fetch` on a miss and caches its output.
    ///
    /// Errors from `fetch` are returned as-is and nothing is cached.
    pub async fn get_or_fetch<T, F, Fut, E>(&self, params: &K::Params, fetch: F) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<CacheError>,
    {
        if let Some(cached) = self.get(params).await? {
            return Ok(cached);
        }

        let fresh = fetch().await?;
        self.set(params, &fresh).await?;
        Ok(fresh)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::keys::{ArchiveSearchParams, FeasibilityParams};
    use crate::storage::failing::{FailingBackend, FailureMode};
    use crate::storage::MemoryBackend;
    use chrono::TimeZone;
    use serde_json::{json, Value};

    struct Harness {
        cache: SearchCache,
        clock: Arc<ManualClock>,
        recorder: AccessRecorder,
    }

    fn harness() -> Harness {
        let backend: Arc<dyn CacheBackend> = Arc::new(MemoryBackend::new());
        let (recorder, _handle) = AccessRecorder::spawn(backend.clone(), 64);
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
        ));
        let cache = SearchCache::new(backend, recorder.clone(), clock.clone(), 3600);
        Harness {
            cache,
            clock,
            recorder,
        }
    }

    fn params() -> ArchiveSearchParams {
        ArchiveSearchParams::new("POLYGON((0 0,1 0,1 1,0 0))").with_dates("2025-01-01", "2025-01-31")
    }

    #[tokio::test]
    async fn test_get_miss_on_empty() {
        let h = harness();
        let cached: Option<Value> = h.cache.get(&params()).await.unwrap();
        assert!(cached.is_none());
        assert_eq!(h.cache.stats().await.unwrap().session.misses, 1);
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let h = harness();
        let payload = json!({"total": 2, "archives": [{"id": "a"}, {"id": "b"}]});
        h.cache.set(&params(), &payload).await.unwrap();

        let cached: Option<Value> = h.cache.get(&params()).await.unwrap();
        assert_eq!(cached, Some(payload));
    }

    #[tokio::test]
    async fn test_expiry_with_simulated_clock() {
        let h = harness();
        h.cache.set_with_ttl(&params(), &json!({"total": 1}), 60).await.unwrap();

        h.clock.advance(Duration::seconds(59));
        assert!(h.cache.get::<Value>(&params()).await.unwrap().is_some());

        h.clock.advance(Duration::seconds(1));
        assert!(h.cache.get::<Value>(&params()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zero_ttl_is_immediately_expired() {
        let h = harness();
        h.cache.set_with_ttl(&params(), &json!({"total": 0}), 0).await.unwrap();

        assert!(h.cache.get::<Value>(&params()).await.unwrap().is_none());

        // The row is stored, only unreadable
        let meta = h.cache.inspect(&params()).await.unwrap().unwrap();
        assert!(meta.expired);
        assert_eq!(h.cache.stats().await.unwrap().expired_entries, 1);
    }

    #[tokio::test]
    async fn test_set_until_past_instant() {
        let h = harness();
        let past = h.clock.now() - Duration::hours(1);
        h.cache.set_until(&params(), &json!({}), past).await.unwrap();
        assert!(h.cache.get::<Value>(&params()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hits_are_recorded() {
        let h = harness();
        h.cache.set(&params(), &json!({"total": 3})).await.unwrap();

        h.cache.get::<Value>(&params()).await.unwrap();
        h.clock.advance(Duration::seconds(10));
        h.cache.get::<Value>(&params()).await.unwrap();
        h.recorder.flush().await;

        let meta = h.cache.inspect(&params()).await.unwrap().unwrap();
        assert_eq!(meta.hit_count, 2);
        assert_eq!(meta.last_accessed_at, Some(h.clock.now()));
        assert_eq!(meta.summary, Some(3.0));
    }

    #[tokio::test]
    async fn test_overwrite_resets_hits() {
        let h = harness();
        h.cache.set(&params(), &json!({"v": 1})).await.unwrap();
        h.cache.get::<Value>(&params()).await.unwrap();
        h.recorder.flush().await;

        h.clock.advance(Duration::seconds(30));
        h.cache.set(&params(), &json!({"v": 2})).await.unwrap();

        let meta = h.cache.inspect(&params()).await.unwrap().unwrap();
        assert_eq!(meta.hit_count, 0);
        assert!(meta.last_accessed_at.is_none());
        assert!(meta.created_at < meta.updated_at);
        assert_eq!(
            h.cache.get::<Value>(&params()).await.unwrap(),
            Some(json!({"v": 2}))
        );
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let h = harness();
        h.cache.set(&params(), &json!({})).await.unwrap();

        assert!(h.cache.clear(&params()).await.unwrap());
        assert!(!h.cache.clear(&params()).await.unwrap());
        assert!(h.cache.get::<Value>(&params()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_expired_keeps_live_rows() {
        let h = harness();
        let other = ArchiveSearchParams::new("POINT(5 5)");
        h.cache.set_with_ttl(&params(), &json!({}), 10).await.unwrap();
        h.cache.set_with_ttl(&other, &json!({}), 1000).await.unwrap();

        h.clock.advance(Duration::seconds(10));
        assert_eq!(h.cache.clear_expired().await.unwrap(), 1);
        assert!(h.cache.get::<Value>(&other).await.unwrap().is_some());
        assert_eq!(h.cache.clear_all().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_malformed_geometry_propagates() {
        let backend: Arc<dyn CacheBackend> = Arc::new(MemoryBackend::new());
        let (recorder, _handle) = AccessRecorder::spawn(backend.clone(), 4);
        let cache: TtlCache<MalformedKind> =
            TtlCache::new(backend, recorder, Arc::new(ManualClock::default()), 60);

        let err = cache.get::<Value>(&json!({"aoi": 42})).await.unwrap_err();
        assert!(matches!(err, CacheError::MalformedInput(_)));
        let err = cache.set(&json!("not an object"), &json!({})).await.unwrap_err();
        assert!(matches!(err, CacheError::MalformedInput(_)));
    }

    #[tokio::test]
    async fn test_unserializable_payload_is_malformed_input() {
        let h = harness();
        // JSON object keys must be strings
        let payload = std::collections::BTreeMap::from([((1, 2), "cell")]);

        let err = h.cache.set(&params(), &payload).await.unwrap_err();

        assert!(matches!(err, CacheError::MalformedInput(_)));
        assert!(h.cache.inspect(&params()).await.unwrap().is_none());
    }

    fn failing_cache(mode: FailureMode) -> (SearchCache, Arc<FailingBackend>, AccessRecorder) {
        let backend = Arc::new(FailingBackend::new(mode));
        let (recorder, _handle) = AccessRecorder::spawn(backend.clone(), 16);
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
        ));
        let cache = SearchCache::new(backend.clone(), recorder.clone(), clock, 3600);
        (cache, backend, recorder)
    }

    #[tokio::test]
    async fn test_storage_failure_on_read_path_is_a_miss() {
        let (cache, _, _) = failing_cache(FailureMode::Everything);

        let cached: Option<Value> = cache.get(&params()).await.unwrap();

        assert!(cached.is_none());
        let session = cache.session.snapshot();
        assert_eq!(session.misses, 1);
        assert_eq!(session.errors, 1);
    }

    #[tokio::test]
    async fn test_storage_failure_on_write_path_is_absorbed() {
        let (cache, _, _) = failing_cache(FailureMode::Everything);

        cache.set(&params(), &json!({"total": 1})).await.unwrap();
        cache.set_with_ttl(&params(), &json!({"total": 1}), 60).await.unwrap();

        assert_eq!(cache.session.snapshot().errors, 2);
    }

    #[tokio::test]
    async fn test_storage_failure_on_maintenance_propagates() {
        let (cache, _, _) = failing_cache(FailureMode::Everything);

        assert!(matches!(
            cache.clear(&params()).await,
            Err(CacheError::StorageUnavailable(_))
        ));
        assert!(matches!(
            cache.clear_all().await,
            Err(CacheError::StorageUnavailable(_))
        ));
        assert!(matches!(
            cache.clear_expired().await,
            Err(CacheError::StorageUnavailable(_))
        ));
        assert!(matches!(
            cache.stats().await,
            Err(CacheError::StorageUnavailable(_))
        ));
        assert!(matches!(
            cache.inspect(&params()).await,
            Err(CacheError::StorageUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_accounting_failure_never_reaches_reader() {
        let (cache, backend, recorder) = failing_cache(FailureMode::Accounting);
        cache.set(&params(), &json!({"total": 5})).await.unwrap();

        let cached: Option<Value> = cache.get(&params()).await.unwrap();
        recorder.flush().await;

        assert_eq!(cached, Some(json!({"total": 5})));
        assert_eq!(backend.access_attempts(), 1);
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.total_hits, 0);
        assert_eq!(stats.session.hits, 1);
        assert_eq!(stats.session.errors, 0);
        // The cache keeps serving after the failed update
        assert!(cache.get::<Value>(&params()).await.unwrap().is_some());
    }

    struct MalformedKind;

    impl QueryKind for MalformedKind {
        type Params = Value;
        const TABLE: crate::cache::entry::ResultTable = crate::cache::entry::ResultTable::Search;
        const RULES: crate::keys::NormalizationRules = crate::keys::ARCHIVE_SEARCH_RULES;
        const GEOMETRY_FIELD: &'static str = "aoi";
        const DATE_FROM_FIELD: &'static str = "fromDate";
        const DATE_TO_FIELD: &'static str = "toDate";

        fn summarize(_: &Value) -> Option<f64> {
            None
        }
    }

    #[tokio::test]
    async fn test_get_or_fetch_fetches_once() {
        let h = harness();
        let mut calls = 0;

        let first: std::result::Result<Value, CacheError> = h
            .cache
            .get_or_fetch(&params(), || {
                calls += 1;
                async { Ok(json!({"total": 7})) }
            })
            .await;
        assert_eq!(first.unwrap(), json!({"total": 7}));

        let second: std::result::Result<Value, CacheError> = h
            .cache
            .get_or_fetch(&params(), || async { Ok(json!({"total": 0})) })
            .await;
        assert_eq!(second.unwrap(), json!({"total": 7}));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_get_or_fetch_error_caches_nothing() {
        let h = harness();
        let result: std::result::Result<Value, CacheError> = h
            .cache
            .get_or_fetch(&params(), || async {
                Err(CacheError::StorageUnavailable("upstream down".into()))
            })
            .await;
        assert!(result.is_err());
        assert!(h.cache.inspect(&params()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_kinds_use_separate_tables() {
        let backend: Arc<dyn CacheBackend> = Arc::new(MemoryBackend::new());
        let (recorder, _handle) = AccessRecorder::spawn(backend.clone(), 4);
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let searches = SearchCache::new(backend.clone(), recorder.clone(), clock.clone(), 60);
        let feasibility = FeasibilityCache::new(backend, recorder, clock, 60);

        let fparams = FeasibilityParams::new("POINT(0 0)", "DAY");
        feasibility.set(&fparams, &json!({"feasibilityScore": 0.9})).await.unwrap();

        assert_eq!(searches.stats().await.unwrap().total_entries, 0);
        let stats = feasibility.stats().await.unwrap();
        assert_eq!(stats.total_entries, 1);
        let meta = feasibility.inspect(&fparams).await.unwrap().unwrap();
        assert_eq!(meta.summary, Some(0.9));
    }
}
