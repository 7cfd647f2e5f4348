use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::utils::{LookingGlassError, Result};

/// Networked key-value store holding one field map per key.
///
/// Implementations report an unreachable backend as
/// [`LookingGlassError::CacheUnavailable`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read one field of a key's map
    async fn get_field(&self, key: &str, field: &str) -> Result<Option<Value>>;

    /// Upsert one field of a key's map. Existing expiry is left untouched.
    async fn set_field(&self, key: &str, field: &str, value: Value) -> Result<()>;

    /// Set the remaining lifetime of a key to exactly `ttl`
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Remove a key and all of its fields
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check the backend is reachable
    async fn healthcheck(&self) -> Result<()>;
}

#[derive(Debug)]
struct StoredMap {
    fields: HashMap<String, Value>,
    expires_at: Option<Instant>,
}

impl StoredMap {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// How often writes sweep every expired key out of the map
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct Entries {
    map: HashMap<String, StoredMap>,
    next_sweep: Instant,
}

impl Entries {
    fn purge_if_expired(&mut self, key: &str, now: Instant) {
        if self.map.get(key).is_some_and(|entry| entry.is_expired(now)) {
            self.map.remove(key);
        }
    }

    /// Drop every expired key once per sweep interval. Keys that are never
    /// read again would otherwise stay in the map for good.
    fn sweep_if_due(&mut self, now: Instant) {
        if now < self.next_sweep {
            return;
        }
        let before = self.map.len();
        self.map.retain(|_, entry| !entry.is_expired(now));
        self.next_sweep = now + SWEEP_INTERVAL;

        let swept = before - self.map.len();
        if swept > 0 {
            debug!(swept, remaining = self.map.len(), "Swept expired cache keys");
        }
    }
}

/// Process-local store with TTL expiry on the tokio clock.
///
/// Expired keys are dropped when touched, and writes sweep the whole map
/// at most once per interval.
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<Entries>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            entries: Mutex::new(Entries {
                map: HashMap::new(),
                next_sweep: Instant::now() + SWEEP_INTERVAL,
            }),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the backend going away or coming back
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Time left before `key` expires, `None` if absent or persistent
    pub fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.purge_if_expired(key, now);
        entries
            .map
            .get(key)
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.map.retain(|_, entry| !entry.is_expired(now));
        entries.map.len()
    }

    /// Keys physically held, expired or not
    #[cfg(test)]
    fn held(&self) -> usize {
        self.entries.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LookingGlassError::CacheUnavailable(
                "memory store marked unavailable".to_string(),
            ))
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_field(&self, key: &str, field: &str) -> Result<Option<Value>> {
        self.ensure_available()?;
        let mut entries = self.entries.lock();
        entries.purge_if_expired(key, Instant::now());
        Ok(entries
            .map
            .get(key)
            .and_then(|entry| entry.fields.get(field).cloned()))
    }

    async fn set_field(&self, key: &str, field: &str, value: Value) -> Result<()> {
        self.ensure_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.sweep_if_due(now);
        entries.purge_if_expired(key, now);
        entries
            .map
            .entry(key.to_string())
            .or_insert_with(|| StoredMap {
                fields: HashMap::new(),
                expires_at: None,
            })
            .fields
            .insert(field.to_string(), value);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.ensure_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.sweep_if_due(now);
        entries.purge_if_expired(key, now);
        if let Some(entry) = entries.map.get_mut(key) {
            entry.expires_at = Some(now + ttl);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.ensure_available()?;
        self.entries.lock().map.remove(key);
        Ok(())
    }

    async fn healthcheck(&self) -> Result<()> {
        self.ensure_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fields_round_trip() {
        let store = MemoryStore::new();
        store.set_field("k", "output", json!("text")).await.unwrap();
        store.set_field("k", "timestamp", json!("t")).await.unwrap();

        assert_eq!(store.get_field("k", "output").await.unwrap(), Some(json!("text")));
        assert_eq!(store.get_field("k", "timestamp").await.unwrap(), Some(json!("t")));
        assert_eq!(store.get_field("k", "missing").await.unwrap(), None);
        assert_eq!(store.get_field("other", "output").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_purges_key() {
        let store = MemoryStore::new();
        store.set_field("k", "output", json!("v")).await.unwrap();
        store.expire("k", Duration::from_secs(10)).await.unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(store.get_field("k", "output").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.get_field("k", "output").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_resets_rather_than_extends() {
        let store = MemoryStore::new();
        store.set_field("k", "output", json!("v")).await.unwrap();
        store.expire("k", Duration::from_secs(60)).await.unwrap();

        tokio::time::advance(Duration::from_secs(40)).await;
        store.expire("k", Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.remaining_ttl("k"), Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_expire_on_missing_key_is_noop() {
        let store = MemoryStore::new();
        store.expire("ghost", Duration::from_secs(5)).await.unwrap();
        assert!(store.is_empty());
        assert_eq!(store.remaining_ttl("ghost"), None);
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = MemoryStore::new();
        store.set_available(false);

        assert!(matches!(
            store.healthcheck().await,
            Err(LookingGlassError::CacheUnavailable(_))
        ));
        assert!(store.get_field("k", "output").await.is_err());

        store.set_available(true);
        assert!(store.healthcheck().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_sweep_keys_that_are_never_read_again() {
        let store = MemoryStore::new();
        for i in 0..1000 {
            let key = format!("digest-{i}");
            store.set_field(&key, "output", json!("v")).await.unwrap();
            store.expire(&key, Duration::from_secs(1)).await.unwrap();
        }
        assert_eq!(store.held(), 1000);

        tokio::time::advance(Duration::from_secs(3600)).await;
        store.set_field("fresh", "output", json!("v")).await.unwrap();
        assert_eq!(store.get_field("fresh", "output").await.unwrap(), Some(json!("v")));

        assert_eq!(store.held(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_live_and_persistent_keys() {
        let store = MemoryStore::new();
        store.set_field("short", "output", json!(1)).await.unwrap();
        store.expire("short", Duration::from_secs(5)).await.unwrap();
        store.set_field("long", "output", json!(2)).await.unwrap();
        store.expire("long", Duration::from_secs(600)).await.unwrap();
        store.set_field("forever", "output", json!(3)).await.unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        store.set_field("trigger", "output", json!(4)).await.unwrap();

        assert_eq!(store.held(), 3);
        assert!(store.get_field("long", "output").await.unwrap().is_some());
        assert!(store.get_field("forever", "output").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_removes_every_field() {
        let store = MemoryStore::new();
        store.set_field("k", "output", json!("v")).await.unwrap();
        store.set_field("k", "timestamp", json!("t")).await.unwrap();

        store.delete("k").await.unwrap();
        assert_eq!(store.get_field("k", "output").await.unwrap(), None);
        assert_eq!(store.held(), 0);
    }
}
