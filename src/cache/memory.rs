//! In-memory cache store.
//!
//! Keeps entries in a `RwLock<HashMap>` for the lifetime of the process.
//! Useful for single-shot runs without memcached and for tests.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use super::store::{CacheFuture, CacheStore};

struct Slot {
    value: String,
    expires_at: Instant,
}

#[derive(Default)]
pub struct MemoryCacheStore {
    inner: RwLock<HashMap<String, Slot>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.read().expect("rwlock poisoned").len()
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> CacheFuture<'_, Option<String>> {
        let key = key.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner
                .get(&key)
                .filter(|slot| Instant::now() < slot.expires_at)
                .map(|slot| slot.value.clone()))
        })
    }

    fn set(&self, key: &str, value: String, ttl: Duration) -> CacheFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            let slot = Slot {
                value,
                expires_at: Instant::now() + ttl,
            };
            self.inner
                .write()
                .expect("rwlock poisoned")
                .insert(key, slot);
            Ok(())
        })
    }

    fn ping(&self) -> CacheFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}
