//! Abstract cache store trait.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::errors::CacheError;

/// Boxed future returned by cache store operations.
pub type CacheFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CacheError>> + Send + 'a>>;

/// Minimal key/value contract the cache manager needs.
///
/// Implementations must be safe under concurrent use from independent
/// polling tasks.
pub trait CacheStore: Send + Sync {
    /// Value stored under `key`, `None` when absent or expired.
    fn get(&self, key: &str) -> CacheFuture<'_, Option<String>>;

    /// Store `value` under `key`, expiring after `ttl`.
    fn set(&self, key: &str, value: String, ttl: Duration) -> CacheFuture<'_, ()>;

    /// Check the backend is reachable.
    fn ping(&self) -> CacheFuture<'_, ()>;
}
