//! cache/lru.rs
//!
//! Bounded key-value cache (C2): strict LRU eviction plus per-entry TTL,
//! with admission/eviction/load-through callbacks wired in at construction.
//! Hand-rolled rather than pulled from a crate -- this corpus reaches for a
//! crate when one exists for the concern (sqlx, tower-http) and writes the
//! small data structure itself when it doesn't (see `db::adapter`'s
//! `BatchInsertRow`-shaped hand rolled row mapping).

use crate::error::{AppError, AppResult};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

type LoadFn = Arc<dyn Fn(String) -> BoxFuture<'static, AppResult<Bytes>> + Send + Sync>;
type EvictFn = Arc<dyn Fn(&str) + Send + Sync>;
type AddFn = Arc<dyn Fn(&str) + Send + Sync>;

struct Entry {
    value: Bytes,
    deadline: Instant,
}

struct Inner {
    map: HashMap<String, Entry>,
    /// Recency order, oldest (least recently used) at the front.
    order: VecDeque<String>,
}

impl Inner {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key.to_string());
    }

    fn remove(&mut self, key: &str) -> Option<Entry> {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.map.remove(key)
    }
}

pub struct LruCache {
    inner: Mutex<Inner>,
    capacity: usize,
    default_ttl: Duration,
    on_evict: Option<EvictFn>,
    on_add: Option<AddFn>,
    on_load: Option<LoadFn>,
}

pub struct LruCacheBuilder {
    capacity: usize,
    default_ttl: Duration,
    on_evict: Option<EvictFn>,
    on_add: Option<AddFn>,
    on_load: Option<LoadFn>,
}

impl LruCacheBuilder {
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            capacity,
            default_ttl,
            on_evict: None,
            on_add: None,
            on_load: None,
        }
    }

    pub fn on_evict(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_evict = Some(Arc::new(f));
        self
    }

    pub fn on_add(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_add = Some(Arc::new(f));
        self
    }

    pub fn on_load(
        mut self,
        f: impl Fn(String) -> BoxFuture<'static, AppResult<Bytes>> + Send + Sync + 'static,
    ) -> Self {
        self.on_load = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Arc<LruCache> {
        Arc::new(LruCache {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity: self.capacity,
            default_ttl: self.default_ttl,
            on_evict: self.on_evict,
            on_add: self.on_add,
            on_load: self.on_load,
        })
    }
}

impl LruCache {
    pub fn set(&self, key: String, value: Bytes) -> AppResult<()> {
        self.setex(key, value, self.default_ttl)
    }

    pub fn setex(&self, key: String, value: Bytes, ttl: Duration) -> AppResult<()> {
        if key.is_empty() {
            return Err(AppError::Internal("empty cache key".into()));
        }
        let evicted = {
            let mut inner = self.inner.lock();
            inner.map.insert(
                key.clone(),
                Entry {
                    value,
                    deadline: Instant::now() + ttl,
                },
            );
            inner.touch(&key);
            let mut evicted = None;
            if inner.order.len() > self.capacity {
                if let Some(victim) = inner.order.pop_front() {
                    inner.map.remove(&victim);
                    evicted = Some(victim);
                }
            }
            evicted
        };
        // Admit-before-evict: the event log should read "added, added,
        // added, evicted", not interleave the evict ahead of the add that
        // caused it.
        self.fire_add(&key);
        if let Some(victim) = evicted {
            self.fire_evict(&victim);
        }
        Ok(())
    }

    /// Read-through get: on miss (absent or TTL-expired) the load callback
    /// fires and its return value is admitted with the default TTL before
    /// returning to the caller.
    pub async fn get(&self, key: &str) -> AppResult<Bytes> {
        if key.is_empty() {
            return Err(AppError::Internal("empty cache key".into()));
        }

        let mut expired = false;
        let hit = {
            let mut inner = self.inner.lock();
            match inner.map.get(key) {
                Some(entry) if entry.deadline > Instant::now() => {
                    let v = entry.value.clone();
                    inner.touch(key);
                    Some(v)
                }
                Some(_) => {
                    inner.remove(key);
                    expired = true;
                    None
                }
                None => None,
            }
        };

        if let Some(v) = hit {
            return Ok(v);
        }
        if expired {
            self.fire_evict(key);
        }

        let on_load = self
            .on_load
            .clone()
            .ok_or_else(|| AppError::CacheEmpty(key.to_string()))?;
        let value = on_load(key.to_string()).await?;
        self.setex(key.to_string(), value.clone(), self.default_ttl)?;
        Ok(value)
    }

    fn fire_evict(&self, key: &str) {
        if let Some(cb) = &self.on_evict {
            cb(key);
        }
    }

    fn fire_add(&self, key: &str) {
        if let Some(cb) = &self.on_add {
            cb(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn empty_key_rejected() {
        let cache = LruCacheBuilder::new(2, Duration::from_secs(60)).build();
        assert!(cache.set(String::new(), Bytes::from_static(b"x")).is_err());
    }

    #[test]
    fn capacity_evicts_oldest() {
        let evicted = Arc::new(Mutex::new(Vec::<String>::new()));
        let evicted2 = evicted.clone();
        let cache = LruCacheBuilder::new(2, Duration::from_secs(60))
            .on_evict(move |k| evicted2.lock().push(k.to_string()))
            .build();

        cache.set("A".into(), Bytes::from_static(b"a")).unwrap();
        cache.set("B".into(), Bytes::from_static(b"b")).unwrap();
        cache.set("C".into(), Bytes::from_static(b"c")).unwrap();

        assert_eq!(evicted.lock().as_slice(), &["A".to_string()]);
    }

    #[tokio::test]
    async fn ttl_expiry_triggers_load_through() {
        let load_calls = Arc::new(AtomicUsize::new(0));
        let load_calls2 = load_calls.clone();
        let cache = LruCacheBuilder::new(4, Duration::from_millis(5))
            .on_load(move |_key| {
                let calls = load_calls2.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Bytes::from_static(b"reloaded"))
                })
            })
            .build();

        cache
            .setex("A".into(), Bytes::from_static(b"a"), Duration::from_millis(5))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let v = cache.get("A").await.unwrap();
        assert_eq!(v, Bytes::from_static(b"reloaded"));
        assert_eq!(load_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fresh_get_within_ttl_skips_load() {
        let cache = LruCacheBuilder::new(4, Duration::from_secs(5))
            .on_load(|_| Box::pin(async { Ok(Bytes::from_static(b"should-not-load")) }))
            .build();
        cache.set("A".into(), Bytes::from_static(b"a")).unwrap();
        let v = cache.get("A").await.unwrap();
        assert_eq!(v, Bytes::from_static(b"a"));
    }
}
