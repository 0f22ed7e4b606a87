//! Polling scheduler.
//!
//! One run:
//!
//! 1. group valid specs by [`PhysicalKey`] (config order preserved)
//! 2. skip groups whose connectivity flag says `Offline`
//! 3. poll every remaining group in its own task, at most `workers` at
//!    a time, all under one global deadline
//! 4. collect one [`EndpointOutcome`] per spec, in config order
//!
//! Each task builds its own adapter, so no HTTP client is ever shared
//! between tasks or reused across runs. Cache entries are written as
//! soon as a group finishes.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::adapters::{AdapterFactory, StatsAdapter};
use crate::cache::{CacheManager, Connectivity};
use crate::config::RejectedSpec;
use crate::errors::PollError;
use crate::metrics;
use crate::model::{EndpointSpec, PhysicalKey, StorageStatsResult, DEFAULT_FREQUENCY};
use crate::quota::{finalize_stats, resolve_quota, ApiQuotaLookup};
use crate::status::StatusRecord;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Maximum number of groups polled concurrently.
    pub workers: usize,
    /// Deadline for the whole run.
    pub run_timeout: Duration,
    /// Ignore cached entries and poll everything.
    pub force: bool,
}

/// Result for one endpoint spec.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointOutcome {
    pub id: String,
    /// Normalized target URL; `None` for specs rejected at load time.
    pub url: Option<String>,
    /// `S3`, `Azure`, `DAV`; `None` for specs rejected at load time.
    pub protocol: Option<&'static str>,
    pub api: Option<&'static str>,
    pub stats: Option<StorageStatsResult>,
    pub status: StatusRecord,
    /// Answered from a fresh cache entry without contacting the backend.
    pub cached: bool,
}

impl EndpointOutcome {
    fn for_spec(spec: &EndpointSpec, stats: Option<StorageStatsResult>, status: StatusRecord) -> Self {
        Self {
            id: spec.id.clone(),
            url: Some(spec.url.to_string()),
            protocol: Some(spec.backend.protocol()),
            api: Some(spec.backend.api_name()),
            stats,
            status,
            cached: false,
        }
    }
}

/// Outcomes of one run, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub outcomes: Vec<EndpointOutcome>,
}

/// Specs sharing one physical endpoint, each tagged with its config index.
struct Group {
    key: PhysicalKey,
    members: Vec<(usize, EndpointSpec)>,
}

impl Group {
    /// Smallest member frequency; drives freshness and TTL for the group.
    fn frequency(&self) -> Duration {
        self.members
            .iter()
            .map(|(_, spec)| spec.frequency)
            .min()
            .unwrap_or(DEFAULT_FREQUENCY)
    }
}

/// Keep only the specs whose id is listed, or all when `ids` is empty.
pub fn select(
    specs: Vec<Result<EndpointSpec, RejectedSpec>>,
    ids: &[String],
) -> Vec<Result<EndpointSpec, RejectedSpec>> {
    if ids.is_empty() {
        return specs;
    }
    specs
        .into_iter()
        .filter(|spec| {
            let id = match spec {
                Ok(spec) => &spec.id,
                Err(rejected) => &rejected.id,
            };
            ids.contains(id)
        })
        .collect()
}

pub struct Scheduler {
    factory: Arc<dyn AdapterFactory>,
    cache: CacheManager,
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(
        factory: Arc<dyn AdapterFactory>,
        cache: CacheManager,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            factory,
            cache,
            settings,
        }
    }

    pub async fn run(&self, specs: Vec<Result<EndpointSpec, RejectedSpec>>) -> RunReport {
        let deadline = tokio::time::Instant::now() + self.settings.run_timeout;
        let mut slots: Vec<Option<EndpointOutcome>> = vec![None; specs.len()];
        let mut groups: Vec<Group> = Vec::new();
        let mut by_key: HashMap<PhysicalKey, usize> = HashMap::new();

        for (idx, spec) in specs.into_iter().enumerate() {
            match spec {
                Ok(spec) => {
                    let key = spec.physical_key();
                    let group = *by_key.entry(key.clone()).or_insert_with(|| {
                        groups.push(Group {
                            key,
                            members: Vec::new(),
                        });
                        groups.len() - 1
                    });
                    groups[group].members.push((idx, spec));
                }
                Err(rejected) => slots[idx] = Some(self.reject(rejected).await),
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.settings.workers.max(1)));
        let mut tasks = JoinSet::new();
        let mut pending: HashMap<usize, Group> = HashMap::new();
        let mut task_groups: HashMap<tokio::task::Id, usize> = HashMap::new();

        for (gidx, group) in groups.into_iter().enumerate() {
            if self.cache.connectivity(&group.key).await == Connectivity::Offline {
                info!("{} flagged offline, skipping {} endpoint(s)", group.key, group.members.len());
                metrics::record_offline();
                for (idx, spec) in &group.members {
                    let mut status = StatusRecord::new();
                    status.mark_offline();
                    slots[*idx] = Some(EndpointOutcome::for_spec(spec, None, status));
                }
                continue;
            }

            let factory = self.factory.clone();
            let cache = self.cache.clone();
            let semaphore = semaphore.clone();
            let force = self.settings.force;
            let members = group.members.clone();
            let handle = tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (gidx, poll_group(factory.as_ref(), &cache, members, force).await)
            });
            task_groups.insert(handle.id(), gidx);
            pending.insert(gidx, group);
        }

        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((gidx, outcomes)))) => {
                    pending.remove(&gidx);
                    for (idx, outcome) in outcomes {
                        slots[idx] = Some(outcome);
                    }
                }
                Ok(Some(Err(e))) => {
                    error!("polling task failed: {e}");
                    let failed = task_groups.get(&e.id()).and_then(|gidx| pending.remove(gidx));
                    let internal = PollError::Internal {
                        detail: e.to_string(),
                    };
                    for (idx, spec) in failed.into_iter().flat_map(|group| group.members) {
                        let mut status = StatusRecord::new();
                        status.push(&internal);
                        slots[idx] = Some(EndpointOutcome::for_spec(&spec, None, status));
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "run timeout of {}s reached with {} endpoint group(s) unfinished",
                        self.settings.run_timeout.as_secs(),
                        pending.len()
                    );
                    tasks.abort_all();
                    break;
                }
            }
        }

        // Groups still pending were cut off by the run deadline.
        let timeout = PollError::RunTimeout {
            seconds: self.settings.run_timeout.as_secs(),
        };
        for group in pending.into_values() {
            for (idx, spec) in group.members {
                let mut status = StatusRecord::new();
                status.push(&timeout);
                slots[idx] = Some(EndpointOutcome::for_spec(&spec, None, status));
            }
        }

        RunReport {
            outcomes: slots.into_iter().flatten().collect(),
        }
    }

    /// Output record and cache entry for a spec that failed validation.
    async fn reject(&self, rejected: RejectedSpec) -> EndpointOutcome {
        warn!("[{}] endpoint rejected: {}", rejected.id, rejected.error);
        let mut status = StatusRecord::new();
        status.push(&rejected.error);
        if let Err(e) = self
            .cache
            .put(&rejected.id, None, &status, DEFAULT_FREQUENCY)
            .await
        {
            warn!("[{}] {e}", rejected.id);
            status.push(&e);
        }
        EndpointOutcome {
            id: rejected.id,
            url: None,
            protocol: None,
            api: None,
            stats: None,
            status,
            cached: false,
        }
    }
}

/// Poll one physical endpoint and resolve quota for each of its specs.
async fn poll_group(
    factory: &dyn AdapterFactory,
    cache: &CacheManager,
    members: Vec<(usize, EndpointSpec)>,
    force: bool,
) -> Vec<(usize, EndpointOutcome)> {
    let group = Group {
        key: members[0].1.physical_key(),
        members,
    };
    let frequency = group.frequency();

    if !force {
        if let Some(outcomes) = cached_outcomes(cache, &group, frequency).await {
            metrics::record_cache_hit();
            return outcomes;
        }
    }

    let lead = &group.members[0].1;
    let protocol = lead.backend.protocol();
    let started = Instant::now();
    debug!("[{}] polling {} ({} spec(s))", lead.id, group.key, group.members.len());

    let fetched = match factory.build(lead) {
        Ok(adapter) => match adapter.fetch_usage().await {
            Ok(usage) => Ok((adapter, usage)),
            Err(e) => Err(e),
        },
        Err(e) => Err(e),
    };

    let mut outcomes = Vec::with_capacity(group.members.len());
    match fetched {
        Ok((adapter, usage)) => {
            let adapter: &dyn StatsAdapter = adapter.as_ref();
            let mut lookup = ApiQuotaLookup::new(adapter);
            let inherited = group
                .members
                .iter()
                .find_map(|(_, spec)| spec.manual_quota);
            let now = Utc::now();

            for (idx, spec) in &group.members {
                let mut status = StatusRecord::new();
                for note in &usage.notes {
                    status.push(note);
                }
                let quota =
                    resolve_quota(spec.manual_quota, inherited, &mut lookup, &mut status).await;
                let stats =
                    finalize_stats(usage.bytes_used, usage.file_count, quota, now, &mut status);
                info!(
                    "[{}] used {} B, free {} B, quota {} B ({})",
                    spec.id,
                    stats.bytes_used,
                    stats.bytes_free,
                    quota.bytes,
                    quota.source.as_str()
                );
                outcomes.push((*idx, EndpointOutcome::for_spec(spec, Some(stats), status)));
            }
        }
        Err(e) => {
            warn!("[{}] {} failed: {e}", lead.id, group.key);
            for (idx, spec) in &group.members {
                let mut status = StatusRecord::new();
                status.push(&e);
                outcomes.push((*idx, EndpointOutcome::for_spec(spec, None, status)));
            }
        }
    }

    for (_, outcome) in &mut outcomes {
        if let Err(e) = cache
            .put(&outcome.id, outcome.stats.clone(), &outcome.status, frequency)
            .await
        {
            warn!("[{}] {e}", outcome.id);
            outcome.status.push(&e);
        }
        metrics::record_poll(protocol, outcome.status.state(), started.elapsed());
    }
    outcomes
}

/// Outcomes served from the cache, when every member has a fresh entry.
async fn cached_outcomes(
    cache: &CacheManager,
    group: &Group,
    frequency: Duration,
) -> Option<Vec<(usize, EndpointOutcome)>> {
    let mut outcomes = Vec::with_capacity(group.members.len());
    for (idx, spec) in &group.members {
        let entry = match cache.get_if_fresh(&spec.id, frequency).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!("[{}] cache read failed, polling instead: {e}", spec.id);
                return None;
            }
        };
        let mut outcome = EndpointOutcome::for_spec(spec, entry.stats, entry.status);
        outcome.cached = true;
        outcomes.push((*idx, outcome));
    }
    debug!("{} fresh in cache, not polled", group.key);
    Some(outcomes)
}

// -- Tests --------------------------------------------------------------------
