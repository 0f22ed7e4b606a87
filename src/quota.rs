//! Quota parsing and resolution.
//!
//! Resolution order for one endpoint spec:
//!
//! 1. manual quota set on the spec itself
//! 2. manual quota of another spec sharing the same physical endpoint
//! 3. quota reported by the backend API
//! 4. [`DEFAULT_QUOTA`] (1 TiB)
//!
//! Decimal units (`kb`, `mb`, `gb`, `tb`, `pb`) are powers of 1000,
//! binary units (`kib`, `mib`, `gib`, `tib`, `pib`) powers of 1024.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::adapters::StatsAdapter;
use crate::errors::PollError;
use crate::model::{QuotaSource, StorageStatsResult};
use crate::status::StatusRecord;

/// Fallback quota: 1 TiB.
pub const DEFAULT_QUOTA: u64 = 1 << 40;

/// Longest suffixes first so `mib` is not read as `b`.
const UNITS: &[(&str, u64)] = &[
    ("kib", 1 << 10),
    ("mib", 1 << 20),
    ("gib", 1 << 30),
    ("tib", 1 << 40),
    ("pib", 1 << 50),
    ("kb", 1_000),
    ("mb", 1_000_000),
    ("gb", 1_000_000_000),
    ("tb", 1_000_000_000_000),
    ("pb", 1_000_000_000_000_000),
    ("b", 1),
];

/// Parse an amount plus optional unit (`2TB`, `500 GiB`, `1.5tb`, `1024`)
/// into bytes.
pub fn parse_size(input: &str) -> Result<u64, String> {
    let trimmed = input.trim();
    let lower = trimmed.to_ascii_lowercase();
    let split = lower
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(lower.len());
    let (amount, unit) = lower.split_at(split);
    let amount = amount.trim();
    let unit = unit.trim();

    let multiplier = if unit.is_empty() {
        1
    } else {
        UNITS
            .iter()
            .find(|(suffix, _)| *suffix == unit)
            .map(|(_, m)| *m)
            .ok_or_else(|| format!("unknown size unit \"{unit}\" in \"{trimmed}\""))?
    };

    let (whole, frac) = match amount.split_once('.') {
        Some((w, f)) => (w, f),
        None => (amount, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(format!("missing amount in \"{trimmed}\""));
    }
    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if !all_digits(whole) || !all_digits(frac) || frac.len() > 18 {
        return Err(format!("malformed amount in \"{trimmed}\""));
    }

    let too_large = || format!("size \"{trimmed}\" does not fit in 64 bits");
    // all digits, so parsing only fails on overflow
    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| too_large())?
    };
    let mut bytes = whole
        .checked_mul(multiplier as u128)
        .ok_or_else(too_large)?;
    if !frac.is_empty() {
        let frac_value: u128 = frac
            .parse()
            .map_err(|_| format!("malformed amount in \"{trimmed}\""))?;
        // frac has at most 18 digits, so this product stays below 2^128
        let frac_bytes = frac_value * multiplier as u128 / 10u128.pow(frac.len() as u32);
        bytes = bytes.checked_add(frac_bytes).ok_or_else(too_large)?;
    }

    u64::try_from(bytes).map_err(|_| too_large())
}

/// Lazily fetched, memoized API quota for one physical endpoint.
///
/// Shared by every spec of a group so the adapter is asked at most once,
/// and not at all when every spec resolves through a manual quota.
pub struct ApiQuotaLookup<'a> {
    adapter: &'a dyn StatsAdapter,
    memo: Option<Result<Option<u64>, PollError>>,
}

impl<'a> ApiQuotaLookup<'a> {
    pub fn new(adapter: &'a dyn StatsAdapter) -> Self {
        Self {
            adapter,
            memo: None,
        }
    }

    async fn get(&mut self) -> Result<Option<u64>, PollError> {
        if let Some(memo) = &self.memo {
            return memo.clone();
        }
        let result = self.adapter.fetch_quota().await;
        self.memo = Some(result.clone());
        result
    }
}

/// Outcome of quota resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedQuota {
    pub bytes: u64,
    pub source: QuotaSource,
}

/// Resolve the quota of one spec in strict priority order, appending
/// any warning to `status`.
pub async fn resolve_quota(
    manual: Option<u64>,
    inherited: Option<u64>,
    api: &mut ApiQuotaLookup<'_>,
    status: &mut StatusRecord,
) -> ResolvedQuota {
    if let Some(bytes) = manual {
        return ResolvedQuota {
            bytes,
            source: QuotaSource::Manual,
        };
    }
    if let Some(bytes) = inherited {
        return ResolvedQuota {
            bytes,
            source: QuotaSource::ManualInherited,
        };
    }

    match api.get().await {
        Ok(Some(bytes)) => {
            return ResolvedQuota {
                bytes,
                source: QuotaSource::Api,
            }
        }
        Ok(None) => {
            debug!("API quota unavailable, using default");
            status.push(&PollError::NoQuotaGiven {
                default_quota: DEFAULT_QUOTA,
            });
        }
        Err(err @ PollError::BucketQuotaDisabled { .. }) => status.push(&err),
        Err(err) => {
            status.push(&err);
            status.push(&PollError::NoQuotaGiven {
                default_quota: DEFAULT_QUOTA,
            });
        }
    }

    ResolvedQuota {
        bytes: DEFAULT_QUOTA,
        source: QuotaSource::Default,
    }
}

/// Build the published snapshot, clamping negative free space to 0.
pub fn finalize_stats(
    bytes_used: u64,
    file_count: Option<u64>,
    quota: ResolvedQuota,
    timestamp: DateTime<Utc>,
    status: &mut StatusRecord,
) -> StorageStatsResult {
    let bytes_free = match quota.bytes.checked_sub(bytes_used) {
        Some(free) => free,
        None => {
            status.push(&PollError::NegativeFreeSpace {
                used: bytes_used,
                quota: quota.bytes,
            });
            0
        }
    };

    StorageStatsResult {
        bytes_used,
        bytes_free,
        quota_bytes: Some(quota.bytes),
        file_count,
        timestamp,
        quota_source: Some(quota.source),
    }
}

// -- Tests -------------------------------------------------------------------
