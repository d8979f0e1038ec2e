use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::row::StoreError;

/// Release handle for a [`KVCache::lock`] acquisition. Dropping it without
/// calling `release` still lets the lock expire via its TTL, but callers
/// should release promptly to avoid blocking other waiters.
#[async_trait]
pub trait Lock: Send + Sync {
    async fn release(&self);
    async fn extend(&self, ttl: Duration);
}

/// `get/set(ttl)/delete/exists/mget/mset/mdel/increment/expire/ttl/keys(pattern)/scan/lock`.
/// Locks are mutually exclusive and auto-expire.
#[async_trait]
pub trait KVCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StoreError>;
    async fn mset(&self, entries: Vec<(String, Vec<u8>)>, ttl: Option<Duration>) -> Result<(), StoreError>;
    async fn mdel(&self, keys: &[String]) -> Result<u64, StoreError>;
    async fn increment(&self, key: &str, by: i64) -> Result<i64, StoreError>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;
    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), StoreError>;
    async fn lock(
        &self,
        key: &str,
        ttl: Duration,
        retries: u32,
    ) -> Result<Option<Arc<dyn Lock>>, StoreError>;
}

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

/// Single-process reference [`KVCache`] backed by a mutex-guarded hash map.
/// Suitable for snapshot/health-score TTL caches and a per-account refresh
/// mutex in a single-replica deployment.
#[derive(Default)]
pub struct InMemoryKVCache {
    entries: Mutex<HashMap<String, Entry>>,
    locks: Arc<Mutex<HashMap<String, Instant>>>,
}

impl InMemoryKVCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_live(entry: &Entry, now: Instant) -> bool {
        entry.expires_at.map(|exp| exp > now).unwrap_or(true)
    }
}

struct InMemoryLock {
    key: String,
    locks: Arc<Mutex<HashMap<String, Instant>>>,
}

#[async_trait]
impl KVCache for InMemoryKVCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut guard = self.entries.lock().await;
        let now = Instant::now();
        if let Some(entry) = guard.get(key) {
            if Self::is_live(entry, now) {
                return Ok(Some(entry.value.clone()));
            }
            guard.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut guard = self.entries.lock().await;
        guard.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut guard = self.entries.lock().await;
        Ok(guard.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.get(key).await?);
        }
        Ok(out)
    }

    async fn mset(&self, entries: Vec<(String, Vec<u8>)>, ttl: Option<Duration>) -> Result<(), StoreError> {
        for (key, value) in entries {
            self.set(&key, value, ttl).await?;
        }
        Ok(())
    }

    async fn mdel(&self, keys: &[String]) -> Result<u64, StoreError> {
        let mut count = 0;
        for key in keys {
            if self.delete(key).await? {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn increment(&self, key: &str, by: i64) -> Result<i64, StoreError> {
        let mut guard = self.entries.lock().await;
        let now = Instant::now();
        let current = guard
            .get(key)
            .filter(|e| Self::is_live(e, now))
            .and_then(|e| std::str::from_utf8(&e.value).ok())
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(0);
        let next = current + by;
        guard.insert(
            key.to_string(),
            Entry {
                value: next.to_string().into_bytes(),
                expires_at: None,
            },
        );
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut guard = self.entries.lock().await;
        if let Some(entry) = guard.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let guard = self.entries.lock().await;
        Ok(guard.get(key).and_then(|e| {
            e.expires_at.map(|exp| exp.saturating_duration_since(Instant::now()))
        }))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let guard = self.entries.lock().await;
        let now = Instant::now();
        Ok(guard
            .iter()
            .filter(|(_, e)| Self::is_live(e, now))
            .map(|(k, _)| k.clone())
            .filter(|k| glob_match(pattern, k))
            .collect())
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), StoreError> {
        let mut matched = self.keys(pattern).await?;
        matched.sort();
        let start = cursor as usize;
        if start >= matched.len() {
            return Ok((0, Vec::new()));
        }
        let end = (start + count).min(matched.len());
        let next_cursor = if end >= matched.len() { 0 } else { end as u64 };
        Ok((next_cursor, matched[start..end].to_vec()))
    }

    async fn lock(
        &self,
        key: &str,
        ttl: Duration,
        retries: u32,
    ) -> Result<Option<Arc<dyn Lock>>, StoreError> {
        for attempt in 0..=retries {
            {
                let mut guard = self.locks.lock().await;
                let now = Instant::now();
                let held = guard.get(key).map(|exp| *exp > now).unwrap_or(false);
                if !held {
                    guard.insert(key.to_string(), now + ttl);
                    return Ok(Some(Arc::new(InMemoryLock {
                        key: key.to_string(),
                        locks: self.locks.clone(),
                    }) as Arc<dyn Lock>));
                }
            }
            if attempt < retries {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Lock for InMemoryLock {
    async fn release(&self) {
        self.locks.lock().await.remove(&self.key);
    }

    async fn extend(&self, ttl: Duration) {
        if let Some(exp) = self.locks.lock().await.get_mut(&self.key) {
            *exp = Instant::now() + ttl;
        }
    }
}

fn glob_match(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return value.starts_with(prefix);
    }
    pattern == value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_and_get_roundtrip() {
        let cache = InMemoryKVCache::new();
        cache.set("k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn ttl_expires_entries() {
        let cache = InMemoryKVCache::new();
        cache
            .set("k", b"v".to_vec(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn lock_is_mutually_exclusive() {
        let cache = InMemoryKVCache::new();
        let first = cache.lock("acct-1", Duration::from_secs(5), 0).await.unwrap();
        assert!(first.is_some());
        let second = cache.lock("acct-1", Duration::from_millis(1), 0).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn increment_accumulates() {
        let cache = InMemoryKVCache::new();
        assert_eq!(cache.increment("n", 3).await.unwrap(), 3);
        assert_eq!(cache.increment("n", 4).await.unwrap(), 7);
    }
}
