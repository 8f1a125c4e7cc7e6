//! Cached, periodically refreshed model catalog (§4.5).

use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::ModelInfo;
use crate::errors::LlmAdapterError;

struct CacheEntry {
    models: Vec<ModelInfo>,
    fetched_at: Instant,
}

/// Wraps a fetch function with a TTL cache. On a miss, the first caller
/// populates the cache and subsequent callers (even concurrent ones that
/// arrive after the populating call returns) reuse the result. On upstream
/// failure, an expired-but-present cache entry is returned as a best-effort
/// fallback rather than propagating the error.
pub struct ModelCatalog {
    ttl: Duration,
    entry: Mutex<Option<CacheEntry>>,
}

impl ModelCatalog {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: Mutex::new(None),
        }
    }

    /// Returns the cached catalog, refreshing via `fetch` if the cache is
    /// empty or past its TTL. `force` bypasses the TTL check entirely.
    pub async fn get<F, Fut>(&self, force: bool, fetch: F) -> Result<Vec<ModelInfo>, LlmAdapterError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<ModelInfo>, LlmAdapterError>>,
    {
        let needs_refresh = {
            let guard = self.entry.lock().expect("model catalog lock poisoned");
            match guard.as_ref() {
                None => true,
                Some(entry) => force || entry.fetched_at.elapsed() > self.ttl,
            }
        };

        if !needs_refresh {
            let guard = self.entry.lock().expect("model catalog lock poisoned");
            return Ok(guard.as_ref().expect("checked above").models.clone());
        }

        match fetch().await {
            Ok(models) => {
                let mut guard = self.entry.lock().expect("model catalog lock poisoned");
                *guard = Some(CacheEntry {
                    models: models.clone(),
                    fetched_at: Instant::now(),
                });
                Ok(models)
            }
            Err(err) => {
                let guard = self.entry.lock().expect("model catalog lock poisoned");
                match guard.as_ref() {
                    Some(entry) => {
                        tracing::warn!(error = %err, "model catalog refresh failed, serving stale entry");
                        Ok(entry.models.clone())
                    }
                    None => Err(err),
                }
            }
        }
    }

    /// Drops the cached entry so the next `get` call always refetches.
    pub fn invalidate(&self) {
        *self.entry.lock().expect("model catalog lock poisoned") = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ModelType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_model(name: &str) -> ModelInfo {
        ModelInfo {
            name: name.to_string(),
            display_name: name.to_string(),
            model_type: ModelType::Thinking,
            max_tokens: 4096,
            supports_tools: true,
            supports_agents: false,
            cost_per_1k_tokens: 0.01,
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn second_call_within_ttl_does_not_refetch() {
        let catalog = ModelCatalog::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);
        let first = catalog
            .get(false, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(vec![sample_model("m1")])
            })
            .await
            .unwrap();
        let second = catalog
            .get(false, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(vec![sample_model("m2")])
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first[0].name, "m1");
        assert_eq!(second[0].name, "m1");
    }

    #[tokio::test]
    async fn force_refresh_bypasses_ttl() {
        let catalog = ModelCatalog::new(Duration::from_secs(3600));
        catalog.get(false, || async { Ok(vec![sample_model("m1")]) }).await.unwrap();
        let refreshed = catalog
            .get(true, || async { Ok(vec![sample_model("m2")]) })
            .await
            .unwrap();
        assert_eq!(refreshed[0].name, "m2");
    }

    #[tokio::test]
    async fn stale_entry_served_on_fetch_failure() {
        let catalog = ModelCatalog::new(Duration::from_millis(1));
        catalog.get(false, || async { Ok(vec![sample_model("m1")]) }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let result = catalog
            .get(false, || async { Err(LlmAdapterError::Upstream("down".to_string())) })
            .await
            .unwrap();
        assert_eq!(result[0].name, "m1");
    }

    #[tokio::test]
    async fn empty_cache_propagates_fetch_failure() {
        let catalog = ModelCatalog::new(Duration::from_secs(60));
        let result = catalog
            .get(false, || async { Err(LlmAdapterError::Upstream("down".to_string())) })
            .await;
        assert!(result.is_err());
    }
}
