//! Depot id cache
//!
//! The provider-side depot id changes rarely but can change (depot migrated,
//! merchant re-onboarded), so it is held behind an explicit TTL instead of
//! being fetched once and kept forever. A provider call that fails with a
//! stale depot calls `invalidate` and the next dispatch refetches.

use super::provider::ProviderError;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

struct CachedDepot {
    depot_id: String,
    fetched_at: Instant,
}

pub struct DepotCache {
    ttl: Duration,
    inner: Mutex<Option<CachedDepot>>,
}

impl DepotCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(None),
        }
    }

    /// Return the cached depot id, refreshing through `refresh` when the
    /// entry is missing or past its TTL
    pub async fn get_or_refresh<F, Fut>(&self, refresh: F) -> Result<String, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, ProviderError>>,
    {
        {
            let cached = self.inner.lock();
            if let Some(entry) = cached.as_ref()
                && entry.fetched_at.elapsed() < self.ttl
            {
                return Ok(entry.depot_id.clone());
            }
        }

        let depot_id = refresh().await?;
        *self.inner.lock() = Some(CachedDepot {
            depot_id: depot_id.clone(),
            fetched_at: Instant::now(),
        });
        Ok(depot_id)
    }

    /// Drop the cached entry; next call refetches
    pub fn invalidate(&self) {
        *self.inner.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_skips_refresh() {
        let cache = DepotCache::new(Duration::from_secs(60));
        let calls = AtomicU32::new(0);

        let fetch = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok("depot-1".to_string())
        };

        assert_eq!(cache.get_or_refresh(fetch).await.unwrap(), "depot-1");
        assert_eq!(
            cache
                .get_or_refresh(|| async { unreachable!() })
                .await
                .unwrap(),
            "depot-1"
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_refetches() {
        let cache = DepotCache::new(Duration::from_secs(60));

        cache
            .get_or_refresh(|| async { Ok("depot-1".to_string()) })
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;

        let refreshed = cache
            .get_or_refresh(|| async { Ok("depot-2".to_string()) })
            .await
            .unwrap();
        assert_eq!(refreshed, "depot-2");
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let cache = DepotCache::new(Duration::from_secs(60));

        cache
            .get_or_refresh(|| async { Ok("depot-1".to_string()) })
            .await
            .unwrap();
        cache.invalidate();

        let refreshed = cache
            .get_or_refresh(|| async { Ok("depot-2".to_string()) })
            .await
            .unwrap();
        assert_eq!(refreshed, "depot-2");
    }

    #[tokio::test]
    async fn test_failed_refresh_leaves_cache_empty() {
        let cache = DepotCache::new(Duration::from_secs(60));

        let err = cache
            .get_or_refresh(|| async { Err(ProviderError::Unavailable("down".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));

        // Next call tries again rather than serving a phantom entry
        let ok = cache
            .get_or_refresh(|| async { Ok("depot-1".to_string()) })
            .await
            .unwrap();
        assert_eq!(ok, "depot-1");
    }
}
