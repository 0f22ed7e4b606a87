//! Output records and sinks.
//!
//! Every endpoint spec of a run yields exactly one [`OutputRecord`], even
//! when it was rejected, offline or timed out. Sinks only format records.

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Serialize;
use std::fmt::Write as _;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::cache::CacheManager;
use crate::model::QuotaSource;
use crate::scheduler::{EndpointOutcome, RunReport};
use crate::status::{State, StatusEvent};
use crate::xml::{render_storage_usage_records, StorageUsageRecord};

pub const PLAINTEXT_FILE: &str = "fedstats.txt";
pub const JSON_FILE: &str = "fedstats.json";
pub const XML_FILE: &str = "fedstats.xml";

/// Selectable output sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Sink {
    Stdout,
    Plaintext,
    Json,
    /// StAR storage accounting records.
    Xml,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputRecord {
    pub id: String,
    pub url: Option<String>,
    pub protocol: Option<String>,
    pub api: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub bytes_used: Option<u64>,
    pub bytes_free: Option<u64>,
    pub quota_bytes: Option<u64>,
    pub file_count: Option<u64>,
    pub quota_source: Option<QuotaSource>,
    pub state: State,
    /// `[SEVERITY][Name][code]` of every event, comma separated.
    pub status: String,
    pub codes: Vec<String>,
    pub cached: bool,
    #[serde(skip)]
    pub debug: Vec<StatusEvent>,
    /// Read back after the run for `--debug` output.
    #[serde(skip)]
    pub cache: Option<CacheSnapshot>,
}

/// Cache index of one endpoint and what it held after the run.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSnapshot {
    pub index: String,
    /// Raw cached value, or the reason it could not be read.
    pub contents: Result<Option<String>, String>,
}

impl From<&EndpointOutcome> for OutputRecord {
    fn from(outcome: &EndpointOutcome) -> Self {
        let stats = outcome.stats.as_ref();
        OutputRecord {
            id: outcome.id.clone(),
            url: outcome.url.clone(),
            protocol: outcome.protocol.map(str::to_string),
            api: outcome.api.map(str::to_string),
            timestamp: stats.map(|s| s.timestamp),
            bytes_used: stats.map(|s| s.bytes_used),
            bytes_free: stats.map(|s| s.bytes_free),
            quota_bytes: stats.and_then(|s| s.quota_bytes),
            file_count: stats.and_then(|s| s.file_count),
            quota_source: stats.and_then(|s| s.quota_source),
            state: outcome.status.state(),
            status: outcome.status.status_line(),
            codes: outcome.status.codes(),
            cached: outcome.cached,
            debug: outcome.status.debug().to_vec(),
            cache: None,
        }
    }
}

pub fn records(report: &RunReport) -> Vec<OutputRecord> {
    report.outcomes.iter().map(OutputRecord::from).collect()
}

/// Read back the cache entry of every record.
pub async fn attach_cache_snapshots(cache: &CacheManager, records: &mut [OutputRecord]) {
    for record in records.iter_mut() {
        let (index, contents) = cache.raw(&record.id).await;
        record.cache = Some(CacheSnapshot {
            index,
            contents: contents.map_err(|e| e.to_string()),
        });
    }
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

// -- stdout ------------------------------------------------------------------

/// Human readable block per endpoint; `debug` adds the event history.
pub fn write_stdout<W: Write>(out: &mut W, records: &[OutputRecord], debug: bool) -> std::io::Result<()> {
    for r in records {
        let mut block = String::new();
        let _ = writeln!(block, "\n##### {} #####", r.id);
        let rows = [
            ("URL:", opt(r.url.as_deref())),
            ("Protocol:", opt(r.protocol.as_deref())),
            ("API:", opt(r.api.as_deref())),
            ("Time:", opt(r.timestamp.map(|t| t.to_rfc3339()))),
            ("Quota:", opt(r.quota_bytes)),
            ("Source:", opt(r.quota_source.map(|s| s.as_str()))),
            ("Bytes Used:", opt(r.bytes_used)),
            ("Bytes Free:", opt(r.bytes_free)),
            ("FileCount:", opt(r.file_count)),
            ("State:", r.state.as_str().to_string()),
            ("Status:", r.status.clone()),
        ];
        for (label, value) in rows {
            let _ = writeln!(block, "{label:12}{value}");
        }
        if r.cached {
            let _ = writeln!(block, "{:12}served from cache", "");
        }
        if let Some(snapshot) = r.cache.as_ref().filter(|_| debug) {
            let contents = match &snapshot.contents {
                Ok(Some(value)) => value.clone(),
                Ok(None) => "-".to_string(),
                Err(e) => format!("unreadable: {e}"),
            };
            let _ = writeln!(block, "\nCache:");
            let _ = writeln!(block, "{:12}{}", "Index:", snapshot.index);
            let _ = writeln!(block, "{:12}{contents}", "Contents:");
        }
        if debug && !r.debug.is_empty() {
            let _ = writeln!(block, "\nDebug:");
            for event in &r.debug {
                let _ = writeln!(block, "{:12}{} {}", "", event.tag(), event.message);
            }
        }
        out.write_all(block.as_bytes())?;
    }
    Ok(())
}

// -- plaintext ---------------------------------------------------------------

/// One line per endpoint under a header row; missing values print as `-`.
pub fn write_plaintext(dir: &Path, records: &[OutputRecord]) -> anyhow::Result<PathBuf> {
    let mut text =
        String::from("ID URL Protocol Timestamp Quota BytesUsed BytesFree FileCount State\n");
    for r in records {
        let _ = writeln!(
            text,
            "{} {} {} {} {} {} {} {} {}",
            r.id,
            opt(r.url.as_deref()),
            opt(r.protocol.as_deref()),
            opt(r.timestamp.map(|t| t.timestamp())),
            opt(r.quota_bytes),
            opt(r.bytes_used),
            opt(r.bytes_free),
            opt(r.file_count),
            r.state.as_str(),
        );
    }
    let path = dir.join(PLAINTEXT_FILE);
    std::fs::write(&path, text)?;
    Ok(path)
}

// -- json --------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct Totals {
    bytes_used: u64,
    quota_bytes: u64,
    endpoints: usize,
    endpoints_ok: usize,
}

#[derive(Debug, Serialize)]
struct JsonDocument<'a> {
    generated: DateTime<Utc>,
    totals: Totals,
    endpoints: &'a [OutputRecord],
}

pub fn write_json(dir: &Path, records: &[OutputRecord]) -> anyhow::Result<PathBuf> {
    let totals = Totals {
        bytes_used: records.iter().filter_map(|r| r.bytes_used).sum(),
        quota_bytes: records.iter().filter_map(|r| r.quota_bytes).sum(),
        endpoints: records.len(),
        endpoints_ok: records.iter().filter(|r| r.state == State::Ok).count(),
    };
    let document = JsonDocument {
        generated: Utc::now(),
        totals,
        endpoints: records,
    };
    let path = dir.join(JSON_FILE);
    std::fs::write(&path, serde_json::to_string_pretty(&document)?)?;
    Ok(path)
}

// -- StAR xml ----------------------------------------------------------------

/// StAR record for one endpoint; `None` when it has no statistics to
/// account for.
fn storage_usage_record(record: &OutputRecord) -> Option<StorageUsageRecord> {
    let used = record.bytes_used?;
    let timestamp = record.timestamp?;
    let url = Url::parse(record.url.as_deref()?).ok()?;
    let share = url.path().trim_matches('/');
    Some(StorageUsageRecord {
        record_id: format!("{}-{}", record.id, uuid::Uuid::new_v4()),
        storage_share: (!share.is_empty()).then(|| share.to_string()),
        storage_system: url.host_str()?.to_string(),
        start_time: timestamp,
        end_time: timestamp,
        file_count: record.file_count,
        capacity_used: used,
        capacity_allocated: record.quota_bytes,
    })
}

/// Accounting document with one record per endpoint that has statistics.
pub fn write_xml(dir: &Path, records: &[OutputRecord]) -> anyhow::Result<PathBuf> {
    let usage: Vec<StorageUsageRecord> = records
        .iter()
        .filter_map(|r| {
            let usage = storage_usage_record(r);
            if usage.is_none() {
                tracing::debug!("[{}] no statistics, left out of accounting records", r.id);
            }
            usage
        })
        .collect();
    let path = dir.join(XML_FILE);
    std::fs::write(&path, render_storage_usage_records(&usage, Utc::now()))?;
    Ok(path)
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::MemoryCacheStore;
    use crate::cache::CacheSettings;
    use crate::errors::PollError;
    use crate::model::{StorageStatsResult, DEFAULT_FREQUENCY};
    use std::sync::Arc;
    use crate::status::StatusRecord;
    use chrono::TimeZone;

    fn report() -> RunReport {
        let mut warn = StatusRecord::new();
        warn.push(&PollError::NoQuotaGiven {
            default_quota: 1 << 40,
        });
        let mut offline = StatusRecord::new();
        offline.mark_offline();
        RunReport {
            outcomes: vec![
                EndpointOutcome {
                    id: "east".to_string(),
                    url: Some("https://s3.example.org/bucket".to_string()),
                    protocol: Some("S3"),
                    api: Some("generic"),
                    stats: Some(StorageStatsResult {
                        bytes_used: 5_000_000_000,
                        bytes_free: (1 << 40) - 5_000_000_000,
                        quota_bytes: Some(1 << 40),
                        file_count: Some(2500),
                        timestamp: Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap(),
                        quota_source: Some(QuotaSource::Default),
                    }),
                    status: warn,
                    cached: false,
                },
                EndpointOutcome {
                    id: "down".to_string(),
                    url: Some("https://dav.example.org/data".to_string()),
                    protocol: Some("DAV"),
                    api: Some("rfc4331"),
                    stats: None,
                    status: offline,
                    cached: false,
                },
            ],
        }
    }

    #[test]
    fn test_record_from_outcome() {
        let records = records(&report());
        assert_eq!(records[0].file_count, Some(2500));
        assert_eq!(records[0].state, State::Warning);
        assert_eq!(records[0].codes, vec!["098"]);
        assert_eq!(records[1].bytes_free, None);
        assert_eq!(records[1].state, State::Offline);
    }

    #[test]
    fn test_stdout_block() {
        let mut out = Vec::new();
        write_stdout(&mut out, &records(&report()), true).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("##### east #####"));
        assert!(text.contains("FileCount:  2500"));
        assert!(text.contains("[WARNING][NoQuotaGiven][098]"));
        assert!(text.contains("State:      OFFLINE"));
        assert!(text.contains("Debug:"));
    }

    #[tokio::test]
    async fn test_debug_shows_cache_index_and_contents() {
        let store = Arc::new(MemoryCacheStore::new());
        let cache = CacheManager::new(store, CacheSettings::default());
        let report = report();
        let east = &report.outcomes[0];
        cache
            .put(&east.id, east.stats.clone(), &east.status, DEFAULT_FREQUENCY)
            .await
            .unwrap();

        let mut records = records(&report);
        attach_cache_snapshots(&cache, &mut records).await;
        let snapshot = records[0].cache.as_ref().unwrap();
        assert_eq!(snapshot.index, "Ugrstoragestats_east");
        assert!(snapshot.contents.as_ref().unwrap().is_some());
        assert_eq!(records[1].cache.as_ref().unwrap().contents, Ok(None));

        let mut out = Vec::new();
        write_stdout(&mut out, &records, true).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Index:      Ugrstoragestats_east"));
        assert!(text.contains("Contents:   {\"id\":\"east\""));
        assert!(text.contains("Index:      Ugrstoragestats_down\nContents:   -"));

        let mut out = Vec::new();
        write_stdout(&mut out, &records, false).unwrap();
        assert!(!String::from_utf8(out).unwrap().contains("Index:"));
    }

    #[test]
    fn test_plaintext_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_plaintext(dir.path(), &records(&report())).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ID URL"));
        assert_eq!(
            lines[1],
            "east https://s3.example.org/bucket S3 1792411200 1099511627776 5000000000 1094511627776 2500 WARNING"
        );
        assert_eq!(
            lines[2],
            "down https://dav.example.org/data DAV - - - - - OFFLINE"
        );
    }

    #[test]
    fn test_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_json(dir.path(), &records(&report())).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value["totals"]["bytes_used"], 5_000_000_000u64);
        assert_eq!(value["totals"]["endpoints"], 2);
        assert_eq!(value["endpoints"][0]["quota_source"], "default");
        assert_eq!(value["endpoints"][1]["state"], "OFFLINE");
        assert!(value["endpoints"][1]["bytes_used"].is_null());
    }

    #[test]
    fn test_xml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_xml(dir.path(), &records(&report())).unwrap();
        assert_eq!(path.file_name().unwrap(), XML_FILE);
        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(text.matches("<sr:StorageUsageRecord>").count(), 1);
        assert!(text.contains("sr:recordId=\"east-"));
        assert!(text.contains("<sr:StorageShare>bucket</sr:StorageShare>"));
        assert!(text.contains("<sr:StorageSystem>s3.example.org</sr:StorageSystem>"));
        assert!(text.contains("<sr:StartTime>2026-10-19T12:00:00Z</sr:StartTime>"));
        assert!(text.contains("<sr:FileCount>2500</sr:FileCount>"));
        assert!(text.contains("<sr:ResourceCapacityUsed>5000000000</sr:ResourceCapacityUsed>"));
        assert!(text.contains("<sr:ResourceCapacityAllocated>1099511627776</sr:ResourceCapacityAllocated>"));
        assert!(!text.contains("dav.example.org"));
    }
}
