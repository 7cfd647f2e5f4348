use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::result_cache::ResultCache;
use super::types::{CachedOutput, Query};
use crate::app::CacheFailurePolicy;
use crate::utils::{LookingGlassError, Result};

/// Runs a device query for real (SSH, HTTP API, fake output...)
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, query: &Query) -> Result<CachedOutput>;
}

/// What a caller gets back for a cached query
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub output: CachedOutput,
    pub cache_key: String,
    pub was_cached: bool,
    pub elapsed_ms: u64,
    /// Time of the original execution, not of this response
    pub logical_timestamp: DateTime<Utc>,
    pub format: &'static str,
}

/// Serves queries from the result cache, executing them on a miss
pub struct CachedQueryRunner {
    cache: Arc<ResultCache>,
    policy: CacheFailurePolicy,
}

impl CachedQueryRunner {
    pub fn new(cache: Arc<ResultCache>, policy: CacheFailurePolicy) -> Self {
        Self { cache, policy }
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Answer `query`, from cache when possible.
    ///
    /// Concurrent identical misses each run the executor; the last write wins.
    pub async fn execute(
        &self,
        query: &Query,
        executor: &dyn QueryExecutor,
    ) -> Result<QueryResponse> {
        let cache_key = self.cache.digest(query);
        info!(query = %query.summary(), cache_key = %cache_key, "Starting query execution");

        match self.cache.lookup(&cache_key).await {
            Ok(Some(entry)) => {
                self.cache.refresh(&cache_key, self.cache.ttl()).await;
                info!(cache_key = %cache_key, "Execution completed from cache");
                return Ok(QueryResponse {
                    format: entry.output.format(),
                    output: entry.output,
                    cache_key,
                    was_cached: true,
                    elapsed_ms: 0,
                    logical_timestamp: entry.timestamp,
                });
            }
            Ok(None) => {}
            Err(e) => match self.policy {
                CacheFailurePolicy::Fail => return Err(e),
                CacheFailurePolicy::Bypass => {
                    warn!(cache_key = %cache_key, error = %e, "Cache unavailable, executing live");
                    let (output, elapsed_ms) = self.run_live(query, executor).await?;
                    return Ok(QueryResponse {
                        format: output.format(),
                        output,
                        cache_key,
                        was_cached: false,
                        elapsed_ms,
                        logical_timestamp: query.received_at,
                    });
                }
            },
        }

        let (output, elapsed_ms) = self.run_live(query, executor).await?;
        let timestamp = query.received_at;

        if let Err(e) = self
            .cache
            .populate(&cache_key, &output, timestamp, self.cache.ttl())
            .await
        {
            // The expensive part already ran; hand the result back uncached
            warn!(cache_key = %cache_key, error = %e, "Failed to cache response");
        }

        info!(cache_key = %cache_key, elapsed_ms, "Execution completed");
        Ok(QueryResponse {
            format: output.format(),
            output,
            cache_key,
            was_cached: false,
            elapsed_ms,
            logical_timestamp: timestamp,
        })
    }

    async fn run_live(
        &self,
        query: &Query,
        executor: &dyn QueryExecutor,
    ) -> Result<(CachedOutput, u64)> {
        let started = Instant::now();
        let output = executor.execute(query).await.map_err(|e| match e {
            LookingGlassError::QueryFailed(_) => e,
            other => LookingGlassError::QueryFailed(other.to_string()),
        })?;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(elapsed_ms, "Runtime");
        Ok((output, elapsed_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::CacheConfig;
    use crate::cache::store::MemoryStore;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Executor that counts calls and takes a fixed amount of (tokio) time
    struct CountingExecutor {
        calls: AtomicUsize,
        delay: Duration,
        output: CachedOutput,
    }

    impl CountingExecutor {
        fn new(output: CachedOutput, delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
                output,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QueryExecutor for CountingExecutor {
        async fn execute(&self, _query: &Query) -> Result<CachedOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(self.output.clone())
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl QueryExecutor for FailingExecutor {
        async fn execute(&self, _query: &Query) -> Result<CachedOutput> {
            Err(LookingGlassError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "ssh refused",
            )))
        }
    }

    fn runner(store: Arc<MemoryStore>, policy: CacheFailurePolicy) -> CachedQueryRunner {
        let cache = Arc::new(ResultCache::new(store, &CacheConfig::default()));
        CachedQueryRunner::new(cache, policy)
    }

    #[tokio::test(start_paused = true)]
    async fn test_miss_then_hit() {
        let store = Arc::new(MemoryStore::new());
        let runner = runner(store, CacheFailurePolicy::Bypass);
        let executor = CountingExecutor::new(
            CachedOutput::from_value(json!({"vrf": "default"})).unwrap(),
            Duration::from_millis(1500),
        );
        let first_seen = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let query = Query::new("203.0.113.1", "bgp_route", "edge1").with_received_at(first_seen);

        let miss = runner.execute(&query, &executor).await.unwrap();
        assert!(!miss.was_cached);
        assert!((1500..1600).contains(&miss.elapsed_ms));
        assert_eq!(miss.logical_timestamp, first_seen);
        assert_eq!(miss.format, "application/json");

        // A later identical request with different transport metadata
        let later = Query::new("203.0.113.1", "bgp_route", "edge1")
            .with_request_id("second")
            .with_received_at(first_seen + chrono::Duration::minutes(1));
        let hit = runner.execute(&later, &executor).await.unwrap();

        assert!(hit.was_cached);
        assert_eq!(hit.elapsed_ms, 0);
        assert_eq!(hit.cache_key, miss.cache_key);
        assert_eq!(hit.output, miss.output);
        assert_eq!(hit.logical_timestamp, first_seen);
        assert_eq!(executor.calls(), 1);
    }

    #[tokio::test]
    async fn test_text_output_format() {
        let runner = runner(Arc::new(MemoryStore::new()), CacheFailurePolicy::Bypass);
        let executor = CountingExecutor::new(
            CachedOutput::Text("PING 192.0.2.1".into()),
            Duration::ZERO,
        );
        let response = runner
            .execute(&Query::new("192.0.2.1", "ping", "edge1"), &executor)
            .await
            .unwrap();
        assert_eq!(response.format, "text/plain");
    }

    #[tokio::test]
    async fn test_bypass_policy_executes_live_when_store_is_down() {
        let store = Arc::new(MemoryStore::new());
        store.set_available(false);
        let runner = runner(store.clone(), CacheFailurePolicy::Bypass);
        let executor = CountingExecutor::new(CachedOutput::Text("ok".into()), Duration::ZERO);
        let query = Query::new("192.0.2.1", "ping", "edge1");

        let first = runner.execute(&query, &executor).await.unwrap();
        let second = runner.execute(&query, &executor).await.unwrap();
        assert!(!first.was_cached);
        assert!(!second.was_cached);
        assert_eq!(executor.calls(), 2);

        store.set_available(true);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_fail_policy_surfaces_cache_unavailable() {
        let store = Arc::new(MemoryStore::new());
        store.set_available(false);
        let runner = runner(store, CacheFailurePolicy::Fail);
        let executor = CountingExecutor::new(CachedOutput::Text("ok".into()), Duration::ZERO);

        let result = runner
            .execute(&Query::new("192.0.2.1", "ping", "edge1"), &executor)
            .await;
        assert!(matches!(result, Err(LookingGlassError::CacheUnavailable(_))));
        assert_eq!(executor.calls(), 0);
    }

    #[tokio::test]
    async fn test_executor_failure_is_not_cached() {
        let store = Arc::new(MemoryStore::new());
        let runner = runner(store.clone(), CacheFailurePolicy::Bypass);

        let result = runner
            .execute(&Query::new("192.0.2.1", "ping", "edge1"), &FailingExecutor)
            .await;
        assert!(matches!(result, Err(LookingGlassError::QueryFailed(_))));
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_both_execute() {
        let runner = runner(Arc::new(MemoryStore::new()), CacheFailurePolicy::Bypass);
        let executor = CountingExecutor::new(
            CachedOutput::Text("out".into()),
            Duration::from_millis(50),
        );
        let query = Query::new("192.0.2.1", "ping", "edge1");

        let (a, b) = tokio::join!(
            runner.execute(&query, &executor),
            runner.execute(&query, &executor)
        );
        assert!(!a.unwrap().was_cached);
        assert!(!b.unwrap().was_cached);
        assert_eq!(executor.calls(), 2);

        let third = runner.execute(&query, &executor).await.unwrap();
        assert!(third.was_cached);
    }
}
