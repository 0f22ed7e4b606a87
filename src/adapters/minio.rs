//! MinIO capacity gauges scraped from the Prometheus metrics endpoint.
//!
//! Metric names changed across MinIO releases, so several name sets are
//! tried in order. Samples of one gauge are summed over all label sets.

use reqwest::Url;
use std::collections::HashMap;
use tracing::debug;

use super::http::HttpSession;
use super::{AdapterFuture, QuotaMemo, RawUsage, StatsAdapter};
use crate::errors::PollError;

const METRICS_PATH: &str = "/minio/v2/metrics/cluster";

/// One generation of MinIO capacity gauge names.
struct GaugeNames {
    free: &'static str,
    total: &'static str,
    /// Absent when used space must be derived as `total - free`.
    used: Option<&'static str>,
}

const GAUGE_SETS: &[GaugeNames] = &[
    GaugeNames {
        free: "minio_cluster_capacity_usable_free_bytes",
        total: "minio_cluster_capacity_usable_total_bytes",
        used: None,
    },
    GaugeNames {
        free: "minio_node_disk_free_bytes",
        total: "minio_node_disk_total_bytes",
        used: Some("minio_node_disk_used_bytes"),
    },
    GaugeNames {
        free: "minio_disk_storage_available_bytes",
        total: "minio_disk_storage_total_bytes",
        used: Some("minio_disk_storage_used_bytes"),
    },
    GaugeNames {
        free: "disk_storage_available",
        total: "disk_storage_total",
        used: Some("disk_storage_used"),
    },
];

pub struct MinioAdapter {
    id: String,
    metrics_url: Url,
    session: HttpSession,
    quota: QuotaMemo,
}

impl MinioAdapter {
    pub fn new(id: String, url: Url, session: HttpSession) -> Self {
        let mut metrics_url = url;
        metrics_url.set_path(METRICS_PATH);
        metrics_url.set_query(None);
        Self {
            id,
            metrics_url,
            session,
            quota: QuotaMemo::default(),
        }
    }

    async fn scrape(&self) -> Result<RawUsage, PollError> {
        let body = self
            .session
            .fetch("MinIO metrics", |client| client.get(self.metrics_url.clone()))
            .await?;
        let text = String::from_utf8_lossy(&body);
        let samples = parse_exposition(&text);

        let (used, quota) = capacity(&samples).ok_or_else(|| PollError::MalformedResponse {
            api: "minio-prometheus".to_string(),
            detail: "no known capacity gauges in metrics output".to_string(),
        })?;
        debug!(id = %self.id, used, quota, "MinIO capacity gauges");

        self.quota.store(Ok(Some(quota)));
        Ok(RawUsage {
            bytes_used: used,
            file_count: None,
            notes: Vec::new(),
        })
    }
}

impl StatsAdapter for MinioAdapter {
    fn fetch_usage(&self) -> AdapterFuture<'_, RawUsage> {
        Box::pin(self.scrape())
    }

    fn fetch_quota(&self) -> AdapterFuture<'_, Option<u64>> {
        Box::pin(async move { self.quota.load() })
    }
}

/// `(used, quota)` from the first usable gauge set.
///
/// With both used and free gauges the quota is `used + free`, as for
/// RFC4331; the total gauge also counts space the backend reserves.
fn capacity(samples: &HashMap<String, f64>) -> Option<(u64, u64)> {
    GAUGE_SETS.iter().find_map(|set| {
        let gauge = |name: &str| samples.get(name).copied();
        let free = gauge(set.free);
        let (used, quota) = match (set.used.and_then(gauge), free) {
            (Some(used), Some(free)) => (used, used + free),
            (Some(used), None) => (used, gauge(set.total)?),
            (None, Some(free)) => {
                let total = gauge(set.total)?;
                (total - free, total)
            }
            (None, None) => return None,
        };
        Some((used.max(0.0).round() as u64, quota.max(0.0).round() as u64))
    })
}

/// Sum samples per metric name from Prometheus text exposition format.
fn parse_exposition(text: &str) -> HashMap<String, f64> {
    let mut sums: HashMap<String, f64> = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let name_end = line
            .find(|c: char| c == '{' || c.is_whitespace())
            .unwrap_or(line.len());
        let name = &line[..name_end];
        let rest = &line[name_end..];
        let rest = match rest.strip_prefix('{') {
            Some(labelled) => match labelled.rfind('}') {
                Some(close) => &labelled[close + 1..],
                None => continue,
            },
            None => rest,
        };
        let Some(value) = rest.split_whitespace().next().and_then(|v| v.parse::<f64>().ok())
        else {
            continue;
        };
        *sums.entry(name.to_string()).or_insert(0.0) += value;
    }
    sums
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::{s3_spec, serve};
    use crate::model::S3Api;
    use axum::routing::get;
    use axum::Router;

    async fn adapter_serving(metrics: &'static str) -> MinioAdapter {
        let router = Router::new().route(METRICS_PATH, get(move || async move { metrics }));
        let addr = serve(router).await;
        let spec = s3_spec(&format!("http://{addr}/bucket"), S3Api::MinioPrometheus);
        let session = HttpSession::new(&spec).unwrap();
        MinioAdapter::new(spec.id, spec.url, session)
    }

    #[test]
    fn test_parse_exposition() {
        let text = "# HELP x y\n# TYPE x gauge\n\
                    disk{server=\"a\",path=\"/d{1}\"} 10\n\
                    disk{server=\"b\"} 2.5e1\n\
                    plain 7 1700000000000\n\
                    broken{ 3\n";
        let samples = parse_exposition(text);
        assert_eq!(samples["disk"], 35.0);
        assert_eq!(samples["plain"], 7.0);
        assert!(!samples.contains_key("broken"));
    }

    #[tokio::test]
    async fn test_cluster_gauges() {
        let adapter = adapter_serving(
            "minio_cluster_capacity_usable_free_bytes{server=\"127.0.0.1:9000\"} 6e+09\n\
             minio_cluster_capacity_usable_total_bytes{server=\"127.0.0.1:9000\"} 1e+10\n",
        )
        .await;
        let usage = adapter.fetch_usage().await.unwrap();
        assert_eq!(usage.bytes_used, 4_000_000_000);
        assert_eq!(usage.file_count, None);
        assert_eq!(adapter.fetch_quota().await.unwrap(), Some(10_000_000_000));
    }

    #[tokio::test]
    async fn test_node_gauges_summed() {
        let adapter = adapter_serving(
            "minio_node_disk_free_bytes{disk=\"/a\"} 50\n\
             minio_node_disk_free_bytes{disk=\"/b\"} 50\n\
             minio_node_disk_total_bytes{disk=\"/a\"} 100\n\
             minio_node_disk_total_bytes{disk=\"/b\"} 100\n\
             minio_node_disk_used_bytes{disk=\"/a\"} 30\n\
             minio_node_disk_used_bytes{disk=\"/b\"} 40\n",
        )
        .await;
        let usage = adapter.fetch_usage().await.unwrap();
        assert_eq!(usage.bytes_used, 70);
        // used + free, not the 200 byte total that includes reserved space
        assert_eq!(adapter.fetch_quota().await.unwrap(), Some(170));
    }

    #[tokio::test]
    async fn test_used_without_free_falls_back_to_total() {
        let adapter = adapter_serving(
            "minio_disk_storage_total_bytes 1000
             minio_disk_storage_used_bytes 250
",
        )
        .await;
        let usage = adapter.fetch_usage().await.unwrap();
        assert_eq!(usage.bytes_used, 250);
        assert_eq!(adapter.fetch_quota().await.unwrap(), Some(1000));
    }

    #[tokio::test]
    async fn test_unknown_gauges() {
        let adapter = adapter_serving("go_goroutines 12\n").await;
        let err = adapter.fetch_usage().await.unwrap_err();
        assert_eq!(err.code(), "095");
        assert_eq!(adapter.fetch_quota().await.unwrap(), None);
    }
}
