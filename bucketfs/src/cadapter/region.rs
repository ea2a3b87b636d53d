//! Per-bucket client cache.
//!
//! Buckets can live in regions other than the default client's. Resolving the
//! region costs a round trip, so the resolved client is kept for the lifetime of
//! the backend. Entries are never evicted individually; `clear` drops them all.

use moka::future::Cache;
use std::future::Future;
use std::sync::Arc;

pub struct RegionCache<C>
where
    C: Clone + Send + Sync + 'static,
{
    clients: Cache<String, C>,
}

impl<C> RegionCache<C>
where
    C: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            clients: Cache::builder().build(),
        }
    }

    /// Returns the cached client for `bucket`, resolving it with `init` on first use.
    ///
    /// Concurrent first requests for the same bucket share one resolution; the
    /// other callers wait for its result instead of racing.
    pub async fn get_or_resolve<F, E>(&self, bucket: &str, init: F) -> Result<C, Arc<E>>
    where
        F: Future<Output = Result<C, E>>,
        E: Send + Sync + 'static,
    {
        self.clients.try_get_with(bucket.to_string(), init).await
    }

    pub async fn get(&self, bucket: &str) -> Option<C> {
        self.clients.get(bucket).await
    }

    pub fn clear(&self) {
        self.clients.invalidate_all();
    }
}

impl<C> Default for RegionCache<C>
where
    C: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_first_access_resolves_once() {
        let cache: Arc<RegionCache<String>> = Arc::new(RegionCache::new());
        let resolved = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let resolved = resolved.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_resolve("logs", async move {
                        resolved.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, String>("eu-west-1".to_string())
                    })
                    .await
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), "eu-west-1");
        }
        assert_eq!(resolved.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_resolution_is_not_cached() {
        let cache: RegionCache<String> = RegionCache::new();
        let err = cache
            .get_or_resolve("data", async { Err::<String, _>("denied".to_string()) })
            .await
            .unwrap_err();
        assert_eq!(err.as_str(), "denied");
        assert!(cache.get("data").await.is_none());

        let ok = cache
            .get_or_resolve("data", async { Ok::<_, String>("us-east-2".to_string()) })
            .await
            .unwrap();
        assert_eq!(ok, "us-east-2");
    }

    #[tokio::test]
    async fn test_clear_drops_all_clients() {
        let cache: RegionCache<String> = RegionCache::new();
        cache
            .get_or_resolve("a", async { Ok::<_, String>("r1".into()) })
            .await
            .unwrap();
        assert_eq!(cache.get("a").await.as_deref(), Some("r1"));
        cache.clear();
        assert!(cache.get("a").await.is_none());
    }
}
