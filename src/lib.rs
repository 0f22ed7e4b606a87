//! fedstats library: storage statistics poller for a storage federation.
//!
//! This crate polls S3, Azure and WebDAV endpoints for capacity and usage,
//! resolves quotas, classifies every failure and publishes the results
//! to the shared cache read by the federation's front-end.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

pub mod adapters;
pub mod auth;
pub mod cache;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod model;
pub mod output;
pub mod quota;
pub mod scheduler;
pub mod status;
pub mod xml;

use crate::adapters::ProtocolAdapterFactory;
use crate::cache::memcached::MemcachedStore;
use crate::cache::memory::MemoryCacheStore;
use crate::cache::{CacheManager, CacheStore};
use crate::config::{CacheConfig, Config};
use crate::scheduler::{RunReport, Scheduler, SchedulerSettings};

/// Per-invocation options coming from the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Only poll these endpoint ids (all when empty).
    pub endpoints: Vec<String>,
    /// Bypass the freshness check.
    pub force: bool,
}

/// Build the cache manager for the configured backend.
pub fn build_cache(config: &CacheConfig) -> anyhow::Result<CacheManager> {
    let store: Arc<dyn CacheStore> = match config.backend.as_str() {
        "memcached" => Arc::new(MemcachedStore::new(
            config.address.clone(),
            Duration::from_secs(config.timeout),
        )),
        "memory" => Arc::new(MemoryCacheStore::new()),
        other => anyhow::bail!("unknown cache backend \"{other}\" (memcached, memory)"),
    };
    Ok(CacheManager::new(store, config.settings()))
}

/// Validate endpoints, check the cache and poll everything once.
///
/// Fails before any polling when no endpoint survives validation or the
/// cache backend cannot be reached.
pub async fn run(
    config: &Config,
    cache: &CacheManager,
    options: &RunOptions,
) -> anyhow::Result<RunReport> {
    let specs = scheduler::select(config::load_endpoints(config), &options.endpoints);
    let valid = specs.iter().filter(|s| s.is_ok()).count();
    for rejected in specs.iter().filter_map(|s| s.as_ref().err()) {
        warn!("[{}] {}", rejected.id, rejected.error);
    }
    if valid == 0 {
        anyhow::bail!(
            "no usable endpoints loaded ({} configured, {} rejected)",
            config.endpoints.len(),
            specs.len()
        );
    }

    cache
        .ping()
        .await
        .with_context(|| format!("cache backend {} unreachable", config.cache.backend))?;

    info!("polling {valid} endpoint(s), {} rejected", specs.len() - valid);
    let scheduler = Scheduler::new(
        Arc::new(ProtocolAdapterFactory),
        cache.clone(),
        SchedulerSettings {
            workers: config.scheduler.workers,
            run_timeout: Duration::from_secs(config.scheduler.run_timeout),
            force: options.force,
        },
    );
    Ok(scheduler.run(specs).await)
}
