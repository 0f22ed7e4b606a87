//! Cache entry encoding, freshness and time-to-live policy.
//!
//! Staleness is a read-time judgment: an entry is fresh while
//! `now - last_poll < frequency`. Entries are never deleted, only
//! overwritten; the store-level TTL just keeps them from outliving a few
//! missed polling cycles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::store::CacheStore;
use crate::errors::PollError;
use crate::model::{PhysicalKey, StorageStatsResult};
use crate::status::StatusRecord;

/// Longest relative expiry memcached accepts (30 days).
pub const MAX_TTL: Duration = Duration::from_secs(30 * 24 * 3600);

/// Last known state of one endpoint spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: String,
    /// Last successful statistics, possibly from an earlier poll.
    pub stats: Option<StorageStatsResult>,
    /// Status of the last attempt.
    pub status: StatusRecord,
    pub last_poll: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl CacheEntry {
    pub fn is_fresh_at(&self, now: DateTime<Utc>, frequency: Duration) -> bool {
        let age = now.signed_duration_since(self.last_poll);
        match chrono::Duration::from_std(frequency) {
            Ok(frequency) => age < frequency,
            Err(_) => true,
        }
    }
}

/// Connectivity flag published by the federation's monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub key_prefix: String,
    pub connectivity_prefix: String,
    pub min_ttl: Duration,
    pub ttl_multiplier: u32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            key_prefix: "Ugrstoragestats_".to_string(),
            connectivity_prefix: "Ugrconnstats_".to_string(),
            min_ttl: Duration::from_secs(3600),
            ttl_multiplier: 3,
        }
    }
}

#[derive(Clone)]
pub struct CacheManager {
    store: Arc<dyn CacheStore>,
    settings: CacheSettings,
}

impl CacheManager {
    pub fn new(store: Arc<dyn CacheStore>, settings: CacheSettings) -> Self {
        Self { store, settings }
    }

    fn entry_key(&self, id: &str) -> String {
        format!("{}{id}", self.settings.key_prefix)
    }

    /// Fails when the backend cannot be reached at all.
    pub async fn ping(&self) -> Result<(), PollError> {
        self.store.ping().await.map_err(PollError::from)
    }

    /// `max(min_ttl, multiplier * frequency)`, at most [`MAX_TTL`].
    pub fn ttl_for(&self, frequency: Duration) -> Duration {
        let scaled = frequency.saturating_mul(self.settings.ttl_multiplier);
        scaled.max(self.settings.min_ttl).min(MAX_TTL)
    }

    pub async fn get(&self, id: &str) -> Result<Option<CacheEntry>, PollError> {
        let Some(raw) = self.store.get(&self.entry_key(id)).await? else {
            return Ok(None);
        };
        let entry = serde_json::from_str(&raw).map_err(|e| PollError::CacheIndex {
            detail: format!("entry for \"{id}\" could not be decoded: {e}"),
        })?;
        Ok(Some(entry))
    }

    /// Cache index of `id` and its contents, undecoded.
    pub async fn raw(&self, id: &str) -> (String, Result<Option<String>, PollError>) {
        let key = self.entry_key(id);
        let contents = self.store.get(&key).await.map_err(PollError::from);
        (key, contents)
    }

    pub async fn get_if_fresh(
        &self,
        id: &str,
        frequency: Duration,
    ) -> Result<Option<CacheEntry>, PollError> {
        self.get_if_fresh_at(id, frequency, Utc::now()).await
    }

    /// Cached entry for `id` when it was written less than `frequency`
    /// before `now`.
    pub async fn get_if_fresh_at(
        &self,
        id: &str,
        frequency: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>, PollError> {
        Ok(self
            .get(id)
            .await?
            .filter(|entry| entry.is_fresh_at(now, frequency)))
    }

    pub async fn put(
        &self,
        id: &str,
        stats: Option<StorageStatsResult>,
        status: &StatusRecord,
        frequency: Duration,
    ) -> Result<CacheEntry, PollError> {
        self.put_at(id, stats, status, frequency, Utc::now()).await
    }

    /// Write the outcome of one attempt made at `now`.
    ///
    /// When the attempt produced no statistics the previous entry's
    /// statistics are carried over unchanged, timestamp included.
    pub async fn put_at(
        &self,
        id: &str,
        stats: Option<StorageStatsResult>,
        status: &StatusRecord,
        frequency: Duration,
        now: DateTime<Utc>,
    ) -> Result<CacheEntry, PollError> {
        let stats = match stats {
            Some(stats) => Some(stats),
            None => match self.get(id).await {
                Ok(previous) => previous.and_then(|entry| entry.stats),
                Err(e) => {
                    warn!("[{id}] previous cache entry unreadable, not merged: {e}");
                    None
                }
            },
        };

        let ttl = self.ttl_for(frequency);
        let entry = CacheEntry {
            id: id.to_string(),
            stats,
            status: status.clone(),
            last_poll: now,
            ttl_secs: ttl.as_secs(),
        };
        let encoded = serde_json::to_string(&entry).map_err(|e| PollError::CacheIndex {
            detail: e.to_string(),
        })?;
        self.store.set(&self.entry_key(id), encoded, ttl).await?;
        debug!("[{id}] cache entry written, ttl {}s", entry.ttl_secs);
        Ok(entry)
    }

    /// Connectivity flag of a physical endpoint. Absent or unreadable
    /// flags count as online.
    pub async fn connectivity(&self, key: &PhysicalKey) -> Connectivity {
        let flag_key = format!("{}{key}", self.settings.connectivity_prefix);
        match self.store.get(&flag_key).await {
            Ok(Some(flag)) if flag.trim().eq_ignore_ascii_case("offline") => Connectivity::Offline,
            Ok(_) => Connectivity::Online,
            Err(e) => {
                warn!("connectivity flag for {key} unreadable, assuming online: {e}");
                Connectivity::Online
            }
        }
    }
}

// -- Tests --------------------------------------------------------------------
