use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::store::KeyValueStore;
use super::types::{CacheEntry, CacheStats, CachedOutput, Query};
use crate::app::CacheConfig;
use crate::constants::{CACHE_FIELD_OUTPUT, CACHE_FIELD_TIMESTAMP};
use crate::utils::Result;

/// Compute the SHA256 fingerprint of a query's semantic identity.
///
/// Only target, query type, device and parameters are hashed. Each field is
/// length-prefixed so adjacent fields can never run into each other.
pub fn query_digest(query: &Query) -> String {
    let mut hasher = Sha256::new();
    let mut feed = |part: &str| {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    };

    feed(&query.device_id);
    feed(&query.query_type);
    feed(&query.target);
    // BTreeMap iterates in key order, so parameter order never matters
    for (name, value) in &query.parameters {
        feed(name);
        feed(value);
    }

    format!("{:x}", hasher.finalize())
}

/// Content-addressed cache for device query results
pub struct ResultCache {
    store: Arc<dyn KeyValueStore>,
    key_prefix: String,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    refresh_failures: AtomicU64,
}

impl ResultCache {
    /// Create a cache over `store` using the configured prefix and TTL
    pub fn new(store: Arc<dyn KeyValueStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            key_prefix: config.key_prefix.clone(),
            ttl: config.timeout(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            refresh_failures: AtomicU64::new(0),
        }
    }

    /// Configured sliding expiration
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store key for a query
    pub fn digest(&self, query: &Query) -> String {
        format!("{}.{}", self.key_prefix, query_digest(query))
    }

    /// Look a key up. A miss leaves the store untouched.
    pub async fn lookup(&self, key: &str) -> Result<Option<CacheEntry>> {
        let raw_output = self.store.get_field(key, CACHE_FIELD_OUTPUT).await?;

        let Some(raw_output) = raw_output else {
            self.record_miss(key);
            return Ok(None);
        };

        let Some(output) = CachedOutput::from_value(raw_output) else {
            warn!(cache_key = %key, "Cached output has an unexpected shape, ignoring");
            self.record_miss(key);
            return Ok(None);
        };

        let raw_timestamp = self.store.get_field(key, CACHE_FIELD_TIMESTAMP).await?;
        let Some(timestamp) = raw_timestamp.as_ref().and_then(parse_timestamp) else {
            // Output without a usable timestamp is an entry caught mid-write
            debug!(cache_key = %key, "Cached entry has no timestamp, treating as miss");
            self.record_miss(key);
            return Ok(None);
        };

        self.hits.fetch_add(1, Ordering::Relaxed);
        debug!(cache_key = %key, "Cache hit");

        Ok(Some(CacheEntry {
            key: key.to_string(),
            structured: output.is_structured(),
            output,
            timestamp,
            ttl: self.ttl,
        }))
    }

    /// Slide the expiration of a hit entry back to `ttl`.
    ///
    /// Returns whether the store accepted the refresh; failures are logged
    /// and the entry is still served.
    pub async fn refresh(&self, key: &str, ttl: Duration) -> bool {
        match self.store.expire(key, ttl).await {
            Ok(()) => {
                debug!(cache_key = %key, ttl_secs = ttl.as_secs(), "Cache TTL refreshed");
                true
            }
            Err(e) => {
                self.refresh_failures.fetch_add(1, Ordering::Relaxed);
                warn!(cache_key = %key, error = %e, "Failed to refresh cache TTL");
                false
            }
        }
    }

    /// Write the result of a miss.
    ///
    /// The timestamp is written before the output so a concurrent reader that
    /// sees the output always finds a timestamp next to it. A key whose TTL
    /// cannot be set is removed again.
    pub async fn populate(
        &self,
        key: &str,
        output: &CachedOutput,
        timestamp: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<()> {
        self.store
            .set_field(key, CACHE_FIELD_TIMESTAMP, Value::String(timestamp.to_rfc3339()))
            .await?;
        self.store
            .set_field(key, CACHE_FIELD_OUTPUT, output.to_value())
            .await?;
        if let Err(e) = self.store.expire(key, ttl).await {
            if let Err(cleanup) = self.store.delete(key).await {
                warn!(cache_key = %key, error = %cleanup, "Failed to remove entry left without TTL");
            }
            return Err(e);
        }

        debug!(
            cache_key = %key,
            cache_timeout = ttl.as_secs(),
            structured = output.is_structured(),
            "Response cached"
        );
        Ok(())
    }

    /// Check the backing store is reachable
    pub async fn healthcheck(&self) -> Result<()> {
        self.store.healthcheck().await
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats::new(
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.refresh_failures.load(Ordering::Relaxed),
        )
    }

    fn record_miss(&self, key: &str) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(cache_key = %key, "Cache miss");
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
