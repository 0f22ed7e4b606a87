//! Shared statistics cache.
//!
//! The cache is a process-external key/value store shared with the
//! federation front-end. [`store::CacheStore`] is the narrow read/write
//! interface; [`manager::CacheManager`] layers entry encoding, freshness
//! and time-to-live policy on top of it.
//!
//! Keys written by concurrent polling tasks are disjoint (one per
//! endpoint id), so stores need no cross-key locking.

pub mod manager;
pub mod memcached;
pub mod memory;
pub mod store;

pub use manager::{CacheEntry, CacheManager, CacheSettings, Connectivity};
pub use store::CacheStore;
