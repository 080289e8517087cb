//! Read-through loading for dashboard collections.
//!
//! The resident dashboard serves each collection from the cache while the
//! client is online and the entry is live, and otherwise asks the backing
//! fetcher. Offline reads always go to the fetcher, whose own persistence
//! layer answers from its local copy. Fresh results are written back so the
//! next load is a hit.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use residenthub_core::{HubResult, RetryConfig, Timestamp, UserId};

use super::keys::CacheKey;
use super::ttl::TtlCache;

/// Fetches a collection from the hosted document store.
#[async_trait]
pub trait CollectionFetcher<T>: Send + Sync {
    /// Fetch `key`'s collection, scoped to `user` when given.
    async fn fetch(&self, key: CacheKey, user: Option<&UserId>) -> HubResult<T>;
}

/// Result of a load, carrying where the value came from.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    cached_at: Timestamp,
    was_cache_hit: bool,
}

impl<T> CacheRead<T> {
    /// Create a new cache read from a cache hit.
    pub fn from_cache(value: T, cached_at: Timestamp) -> Self {
        Self {
            value,
            cached_at,
            was_cache_hit: true,
        }
    }

    /// Create a new cache read from a fetch.
    pub fn from_fetch(value: T, fetched_at: Timestamp) -> Self {
        Self {
            value,
            cached_at: fetched_at,
            was_cache_hit: false,
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    /// When the value was written to the cache (or fetched).
    pub fn cached_at(&self) -> Timestamp {
        self.cached_at
    }

    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    pub fn was_cache_miss(&self) -> bool {
        !self.was_cache_hit
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            cached_at: self.cached_at,
            was_cache_hit: self.was_cache_hit,
        }
    }
}

/// Read-through loader over a shared [`TtlCache`].
pub struct ReadThroughLoader<T> {
    cache: Arc<TtlCache<T>>,
    retry: RetryConfig,
}

impl<T> ReadThroughLoader<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(cache: Arc<TtlCache<T>>, retry: RetryConfig) -> Self {
        Self { cache, retry }
    }

    pub fn cache(&self) -> &TtlCache<T> {
        &self.cache
    }

    /// Load a collection.
    ///
    /// Online with a live entry: returns the cached value. Otherwise fetches,
    /// retrying failed fetches up to `max_retries` times, and caches the
    /// result with the cache's default TTL. The last fetch error is returned
    /// when every attempt fails.
    pub async fn load<F>(
        &self,
        key: CacheKey,
        user: Option<&UserId>,
        offline: bool,
        fetcher: &F,
    ) -> HubResult<CacheRead<T>>
    where
        F: CollectionFetcher<T> + ?Sized,
    {
        let cache_key = cache_key_for(key, user);

        if !offline {
            if let Some((value, written_at)) = self.cache.get_entry(&cache_key) {
                tracing::trace!(key = %cache_key, "Dashboard collection served from cache");
                return Ok(CacheRead::from_cache(value, written_at));
            }
        }

        let value = self.fetch_with_retry(key, user, fetcher).await?;
        let fetched_at = self.cache.now();
        self.cache.put(cache_key, value.clone());
        Ok(CacheRead::from_fetch(value, fetched_at))
    }

    /// Replace the cached copy after a live-update push.
    pub fn refresh(&self, key: CacheKey, user: Option<&UserId>, value: T) {
        self.cache.put(cache_key_for(key, user), value);
    }

    /// Drop the cached copy, forcing the next load to fetch.
    pub fn invalidate(&self, key: CacheKey, user: Option<&UserId>) -> bool {
        self.cache.delete(&cache_key_for(key, user))
    }

    async fn fetch_with_retry<F>(
        &self,
        key: CacheKey,
        user: Option<&UserId>,
        fetcher: &F,
    ) -> HubResult<T>
    where
        F: CollectionFetcher<T> + ?Sized,
    {
        let mut attempt: u32 = 0;
        loop {
            match fetcher.fetch(key, user).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.retry.max_retries => {
                    attempt += 1;
                    let backoff = self.retry.backoff_for(attempt);
                    tracing::warn!(
                        collection = %key,
                        attempt,
                        max_retries = self.retry.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Dashboard fetch failed, retrying"
                    );
                    if backoff > Duration::ZERO {
                        tokio::time::sleep(backoff).await;
                    }
                }
                Err(err) => {
                    tracing::warn!(collection = %key, error = %err, "Dashboard fetch failed");
                    return Err(err);
                }
            }
        }
    }
}

fn cache_key_for(key: CacheKey, user: Option<&UserId>) -> String {
    match user {
        Some(user) => key.scoped(user),
        None => key.as_str().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::ManualScheduler;
    use residenthub_core::{CacheSettings, HubError, ManualClock, StoreError};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyFetcher {
        failures_before_success: u32,
        calls: AtomicU32,
    }

    impl FlakyFetcher {
        fn new(failures_before_success: u32) -> Self {
            Self {
                failures_before_success,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CollectionFetcher<Vec<String>> for FlakyFetcher {
        async fn fetch(&self, key: CacheKey, _user: Option<&UserId>) -> HubResult<Vec<String>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                Err(HubError::Store(StoreError::FetchFailed {
                    collection: key.to_string(),
                    reason: "unavailable".to_string(),
                }))
            } else {
                Ok(vec![format!("{}-{}", key, call)])
            }
        }
    }

    fn loader(retry: RetryConfig) -> (Arc<ManualClock>, ReadThroughLoader<Vec<String>>) {
        let clock = Arc::new(ManualClock::fixed());
        let scheduler = Arc::new(ManualScheduler::new(clock.clone()));
        let cache = Arc::new(TtlCache::new(
            clock.clone(),
            scheduler,
            &CacheSettings::default(),
        ));
        (clock, ReadThroughLoader::new(cache, retry))
    }

    #[tokio::test]
    async fn test_miss_fetches_then_hit_serves_cache() {
        let (_clock, loader) = loader(RetryConfig::none());
        let fetcher = FlakyFetcher::new(0);
        let user = UserId::new("u1");

        let first = loader
            .load(CacheKey::Payments, Some(&user), false, &fetcher)
            .await
            .unwrap();
        assert!(first.was_cache_miss());

        let second = loader
            .load(CacheKey::Payments, Some(&user), false, &fetcher)
            .await
            .unwrap();
        assert!(second.was_cache_hit());
        assert_eq!(second.value(), first.value());
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_offline_bypasses_cache() {
        let (_clock, loader) = loader(RetryConfig::none());
        let fetcher = FlakyFetcher::new(0);

        loader.load(CacheKey::Notices, None, false, &fetcher).await.unwrap();
        let offline = loader.load(CacheKey::Notices, None, true, &fetcher).await.unwrap();
        assert!(offline.was_cache_miss());
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refetched() {
        let (clock, loader) = loader(RetryConfig::none());
        let fetcher = FlakyFetcher::new(0);

        loader.load(CacheKey::Complaints, None, false, &fetcher).await.unwrap();
        clock.advance(loader.cache().default_ttl());
        let read = loader.load(CacheKey::Complaints, None, false, &fetcher).await.unwrap();
        assert!(read.was_cache_miss());
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let retry = RetryConfig {
            max_retries: 3,
            initial_backoff_ms: 0,
            backoff_multiplier: 1.0,
        };
        let (_clock, loader) = loader(retry);
        let fetcher = FlakyFetcher::new(2);

        let read = loader.load(CacheKey::Payments, None, false, &fetcher).await.unwrap();
        assert_eq!(read.into_value(), vec!["payments-2".to_string()]);
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let retry = RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 0,
            backoff_multiplier: 1.0,
        };
        let (_clock, loader) = loader(retry);
        let fetcher = FlakyFetcher::new(10);

        let err = loader
            .load(CacheKey::Payments, None, false, &fetcher)
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Store(StoreError::FetchFailed { .. })));
        assert_eq!(fetcher.calls(), 3);
        assert!(loader.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_linear_backoff() {
        let retry = RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 2000,
            backoff_multiplier: 1.0,
        };
        let (_clock, loader) = loader(retry);
        let fetcher = FlakyFetcher::new(2);

        let started = tokio::time::Instant::now();
        loader.load(CacheKey::Notices, None, false, &fetcher).await.unwrap();
        // 2000ms before the first retry, 4000ms before the second.
        assert!(started.elapsed() >= Duration::from_millis(6000));
    }

    #[tokio::test]
    async fn test_refresh_and_invalidate() {
        let (_clock, loader) = loader(RetryConfig::none());
        let fetcher = FlakyFetcher::new(0);
        let user = UserId::new("u7");

        loader.refresh(CacheKey::Payments, Some(&user), vec!["pushed".to_string()]);
        let read = loader
            .load(CacheKey::Payments, Some(&user), false, &fetcher)
            .await
            .unwrap();
        assert!(read.was_cache_hit());
        assert_eq!(read.value(), &vec!["pushed".to_string()]);

        assert!(loader.invalidate(CacheKey::Payments, Some(&user)));
        assert!(!loader.invalidate(CacheKey::Payments, Some(&user)));
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_user_scopes_do_not_leak() {
        let (_clock, loader) = loader(RetryConfig::none());
        let fetcher = FlakyFetcher::new(0);

        loader.refresh(CacheKey::Payments, Some(&UserId::new("a")), vec!["a".to_string()]);
        let other = loader
            .load(CacheKey::Payments, Some(&UserId::new("b")), false, &fetcher)
            .await
            .unwrap();
        assert!(other.was_cache_miss());
    }

    #[test]
    fn test_cache_read_map() {
        let read = CacheRead::from_fetch(42i32, chrono::Utc::now());
        let mapped = read.map(|v| v.to_string());
        assert!(mapped.was_cache_miss());
        assert_eq!(mapped.into_value(), "42");
    }
}
