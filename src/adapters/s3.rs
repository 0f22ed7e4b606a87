//! S3-compatible endpoints.
//!
//! Three statistics methods share this adapter:
//! - `generic`: paginated object listing, summing sizes
//! - `ceph-admin`: one call to the RGW admin API, which also carries the
//!   bucket quota
//! - `cloudwatch`: the daily `BucketSizeBytes`/`NumberOfObjects` metrics
//!
//! Requests are signed with SigV4 (or SigV2 when `s3.signature_ver` is
//! `s3`). The Ceph admin API and CloudWatch always use SigV4.

use chrono::Utc;
use reqwest::{Client, RequestBuilder, Url};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info};

use super::http::HttpSession;
use super::{AdapterFuture, QuotaMemo, RawUsage, StatsAdapter};
use crate::auth::{encode_query, sign_v2, sign_v4, Credentials};
use crate::errors::PollError;
use crate::model::{S3Api, S3Settings, SignatureVersion};
use crate::quota::DEFAULT_QUOTA;
use crate::xml::{parse_latest_datapoint, parse_list_bucket_result};

/// CloudWatch query API version.
const CLOUDWATCH_VERSION: &str = "2010-08-01";

/// S3 publishes storage metrics once a day.
const CLOUDWATCH_PERIOD_SECS: &str = "86400";

pub struct S3Adapter {
    id: String,
    settings: S3Settings,
    session: HttpSession,
    bucket: String,
    /// Scheme and authority of the service, without the bucket.
    service_root: Url,
    /// Base URL of listing requests.
    bucket_url: Url,
    quota: QuotaMemo,
}

impl S3Adapter {
    /// Resolve bucket and URLs from `url`: with path-style addressing the
    /// bucket is the last path segment, otherwise the first host label.
    pub fn new(
        id: String,
        url: Url,
        settings: S3Settings,
        session: HttpSession,
    ) -> Result<Self, PollError> {
        let invalid_url = |valid: &str| PollError::InvalidSetting {
            setting: "url".to_string(),
            value: url.to_string(),
            valid: valid.to_string(),
        };

        let mut service_root = url.clone();
        service_root.set_path("/");
        service_root.set_query(None);
        service_root.set_fragment(None);

        let (bucket, bucket_url) = if settings.path_style {
            let bucket = url
                .path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
                .map(str::to_string)
                .ok_or_else(|| invalid_url("a URL ending with the bucket name"))?;
            let mut bucket_url = service_root.clone();
            bucket_url.set_path(&format!("/{bucket}"));
            (bucket, bucket_url)
        } else {
            let host = url.host_str().unwrap_or_default().to_string();
            let (bucket, domain) = host
                .split_once('.')
                .ok_or_else(|| invalid_url("a host of the form <bucket>.<domain>"))?;
            service_root
                .set_host(Some(domain))
                .map_err(|_| invalid_url("a host of the form <bucket>.<domain>"))?;
            let mut bucket_url = url.clone();
            bucket_url.set_path("/");
            bucket_url.set_query(None);
            (bucket.to_string(), bucket_url)
        };

        Ok(Self {
            id,
            settings,
            session,
            bucket,
            service_root,
            bucket_url,
            quota: QuotaMemo::default(),
        })
    }

    #[cfg(test)]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn credentials(&self) -> Credentials<'_> {
        Credentials {
            access_key: &self.settings.access_key,
            secret_key: &self.settings.secret_key,
        }
    }

    /// Build a signed GET. `v2_resource` is only used for SigV2.
    fn signed_get(
        &self,
        client: &Client,
        url: &Url,
        v2_resource: &str,
        force_v4: bool,
    ) -> RequestBuilder {
        let headers = match (self.settings.signature, force_v4) {
            (SignatureVersion::V2, false) => {
                sign_v2("GET", v2_resource, self.credentials(), Utc::now())
            }
            _ => sign_v4(
                "GET",
                url,
                self.credentials(),
                &self.settings.region,
                "s3",
                Utc::now(),
            ),
        };
        headers
            .into_iter()
            .fold(client.get(url.clone()), |req, (name, value)| {
                req.header(name, value)
            })
    }

    /// SigV2 canonicalized resource of the listing URL.
    fn v2_resource(&self) -> String {
        if self.settings.path_style {
            self.bucket_url.path().to_string()
        } else {
            format!("/{}{}", self.bucket, self.bucket_url.path())
        }
    }

    fn malformed(&self, detail: impl Into<String>) -> PollError {
        PollError::MalformedResponse {
            api: self.settings.api.as_str().to_string(),
            detail: detail.into(),
        }
    }

    // -- generic --------------------------------------------------------------

    async fn list_objects(&self) -> Result<RawUsage, PollError> {
        let resource = format!("Bucket \"{}\"", self.bucket);
        let v2_resource = self.v2_resource();
        let mut bytes_used: u64 = 0;
        let mut file_count: u64 = 0;
        let mut continuation: Option<String> = None;
        let mut marker: Option<String> = None;
        let mut legacy = false;
        let mut pages = 0usize;

        loop {
            let mut params: Vec<(&str, &str)> = Vec::new();
            if legacy {
                params.push(("delimiter", "*"));
                if let Some(m) = &marker {
                    params.push(("marker", m.as_str()));
                }
            } else {
                params.push(("list-type", "2"));
                if let Some(token) = &continuation {
                    params.push(("continuation-token", token.as_str()));
                }
            }
            let mut url = self.bucket_url.clone();
            url.set_query(Some(&encode_query(&params)));

            let body = self
                .session
                .fetch(&resource, |client| {
                    self.signed_get(client, &url, &v2_resource, false)
                })
                .await?;
            let page = parse_list_bucket_result(&body).map_err(|e| self.malformed(e))?;
            pages += 1;

            for (key, size) in &page.objects {
                // Directory placeholders.
                if *size == 0 && key.ends_with('/') {
                    continue;
                }
                bytes_used += size;
                file_count += 1;
            }

            if !page.is_truncated {
                break;
            }
            if !legacy {
                if let Some(token) = page.next_continuation_token.clone() {
                    continuation = Some(token);
                    continue;
                }
                debug!(id = %self.id, "truncated listing without continuation token, using v1 markers");
                legacy = true;
            }
            let next = page
                .next_marker
                .clone()
                .or_else(|| page.last_key().map(str::to_string));
            match next {
                Some(next) if marker.as_deref() != Some(next.as_str()) => marker = Some(next),
                _ => return Err(self.malformed("truncated listing without a usable marker")),
            }
        }

        debug!(id = %self.id, pages, file_count, bytes_used, "bucket listing complete");
        Ok(RawUsage {
            bytes_used,
            file_count: Some(file_count),
            notes: Vec::new(),
        })
    }

    // -- ceph-admin -----------------------------------------------------------

    async fn ceph_admin(&self) -> Result<RawUsage, PollError> {
        let mut url = self.service_root.clone();
        url.set_path("/admin/bucket");
        url.set_query(Some(&encode_query(&[
            ("bucket", self.bucket.as_str()),
            ("format", "json"),
            ("stats", "True"),
        ])));

        let body = self
            .session
            .fetch(&format!("Bucket \"{}\"", self.bucket), |client| {
                self.signed_get(client, &url, "/admin/bucket", true)
            })
            .await?;
        let stats: CephBucketStats =
            serde_json::from_slice(&body).map_err(|e| self.malformed(format!("invalid JSON: {e}")))?;

        let usage = stats.usage.ok_or_else(|| PollError::MissingBucketUsage {
            detail: stats
                .code
                .clone()
                .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned()),
        })?;
        // A new bucket reports an empty usage map.
        let main = usage.get("rgw.main");
        let bytes_used = main.map_or(0, |u| u.size_utilized);
        let file_count = main.map_or(0, |u| u.num_objects);

        self.quota.store(match stats.bucket_quota {
            Some(CephQuota { enabled: true, max_size }) if max_size > 0 => Ok(Some(max_size as u64)),
            Some(CephQuota { enabled: false, .. }) => Err(PollError::BucketQuotaDisabled {
                default_quota: DEFAULT_QUOTA,
            }),
            _ => Ok(None),
        });

        Ok(RawUsage {
            bytes_used,
            file_count: Some(file_count),
            notes: Vec::new(),
        })
    }

    // -- cloudwatch -----------------------------------------------------------

    async fn cloudwatch(&self) -> Result<RawUsage, PollError> {
        let base = self.settings.cloudwatch_url.clone().unwrap_or_else(|| {
            format!("https://monitoring.{}.amazonaws.com/", self.settings.region)
        });
        let base = Url::parse(&base).map_err(|_| PollError::InvalidSetting {
            setting: "s3.cloudwatch_url".to_string(),
            value: base.clone(),
            valid: "an absolute http(s) URL".to_string(),
        })?;

        let bytes_used = self
            .cloudwatch_metric(&base, "BucketSizeBytes", "StandardStorage")
            .await?;
        let file_count = self
            .cloudwatch_metric(&base, "NumberOfObjects", "AllStorageTypes")
            .await?;

        Ok(RawUsage {
            bytes_used,
            file_count: Some(file_count),
            notes: Vec::new(),
        })
    }

    /// Latest daily average of `metric`, 0 when no datapoint exists yet.
    async fn cloudwatch_metric(
        &self,
        base: &Url,
        metric: &str,
        storage_type: &str,
    ) -> Result<u64, PollError> {
        let end = Utc::now();
        let start = end - chrono::Duration::days(2);
        let start = start.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let end = end.format("%Y-%m-%dT%H:%M:%SZ").to_string();

        let mut url = base.clone();
        url.set_query(Some(&encode_query(&[
            ("Action", "GetMetricStatistics"),
            ("Version", CLOUDWATCH_VERSION),
            ("Namespace", "AWS/S3"),
            ("MetricName", metric),
            ("Dimensions.member.1.Name", "BucketName"),
            ("Dimensions.member.1.Value", self.bucket.as_str()),
            ("Dimensions.member.2.Name", "StorageType"),
            ("Dimensions.member.2.Value", storage_type),
            ("StartTime", start.as_str()),
            ("EndTime", end.as_str()),
            ("Period", CLOUDWATCH_PERIOD_SECS),
            ("Statistics.member.1", "Average"),
        ])));

        let body = self
            .session
            .fetch(&format!("Metric \"{metric}\""), |client| {
                let headers = sign_v4(
                    "GET",
                    &url,
                    self.credentials(),
                    &self.settings.region,
                    "monitoring",
                    Utc::now(),
                );
                headers
                    .into_iter()
                    .fold(client.get(url.clone()), |req, (name, value)| {
                        req.header(name, value)
                    })
            })
            .await?;

        match parse_latest_datapoint(&body, "Average").map_err(|e| self.malformed(e))? {
            Some(value) => Ok(value.max(0.0).round() as u64),
            None => {
                info!(id = %self.id, metric, "no CloudWatch datapoints yet, reporting 0");
                Ok(0)
            }
        }
    }
}

impl StatsAdapter for S3Adapter {
    fn fetch_usage(&self) -> AdapterFuture<'_, RawUsage> {
        Box::pin(async move {
            debug!(id = %self.id, api = self.settings.api.as_str(), bucket = %self.bucket, "requesting S3 storage stats");
            match self.settings.api {
                S3Api::Generic => self.list_objects().await,
                S3Api::CephAdmin => self.ceph_admin().await,
                S3Api::Cloudwatch => self.cloudwatch().await,
                S3Api::MinioPrometheus => Err(PollError::UnsupportedApi {
                    protocol: "S3".to_string(),
                    api: self.settings.api.as_str().to_string(),
                }),
            }
        })
    }

    fn fetch_quota(&self) -> AdapterFuture<'_, Option<u64>> {
        Box::pin(async move { self.quota.load() })
    }
}

// -- Ceph admin payload -------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CephBucketStats {
    usage: Option<HashMap<String, CephUsage>>,
    bucket_quota: Option<CephQuota>,
    /// Error code returned instead of stats, e.g. `NoSuchBucket`.
    #[serde(rename = "Code")]
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CephUsage {
    #[serde(default)]
    size_utilized: u64,
    #[serde(default)]
    num_objects: u64,
}

#[derive(Debug, Deserialize)]
struct CephQuota {
    #[serde(default)]
    enabled: bool,
    /// `-1` means unlimited.
    #[serde(default)]
    max_size: i64,
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::{s3_settings, s3_spec, serve};
    use crate::model::QuotaSource;
    use crate::quota::{finalize_stats, resolve_quota, ApiQuotaLookup};
    use crate::status::{State, StatusRecord};
    use axum::extract::Query;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn adapter_for(addr: std::net::SocketAddr, api: S3Api) -> S3Adapter {
        let spec = s3_spec(&format!("http://{addr}/bucket"), api);
        let session = HttpSession::new(&spec).unwrap();
        S3Adapter::new(spec.id, spec.url, s3_settings(api), session).unwrap()
    }

    fn list_page(start: usize, count: usize, size: u64, next: Option<&str>) -> String {
        let mut xml = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <ListBucketResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\"><Name>bucket</Name>",
        );
        xml.push_str(&format!("<IsTruncated>{}</IsTruncated>", next.is_some()));
        if let Some(token) = next {
            xml.push_str(&format!("<NextContinuationToken>{token}</NextContinuationToken>"));
        }
        for i in start..start + count {
            xml.push_str(&format!(
                "<Contents><Key>obj-{i:05}</Key><Size>{size}</Size></Contents>"
            ));
        }
        xml.push_str("</ListBucketResult>");
        xml
    }

    #[tokio::test]
    async fn test_generic_two_pages_default_quota() {
        let router = Router::new().route(
            "/bucket",
            get(
                |Query(q): Query<HashMap<String, String>>, headers: HeaderMap| async move {
                    assert!(headers
                        .get("authorization")
                        .unwrap()
                        .to_str()
                        .unwrap()
                        .starts_with("AWS4-HMAC-SHA256 "));
                    assert_eq!(q.get("list-type").map(String::as_str), Some("2"));
                    match q.get("continuation-token").map(String::as_str) {
                        None => list_page(0, 1000, 2_000_000, Some("page/2+")),
                        Some("page/2+") => list_page(1000, 1500, 2_000_000, None),
                        Some(other) => panic!("unexpected token {other}"),
                    }
                },
            ),
        );
        let addr = serve(router).await;
        let adapter = adapter_for(addr, S3Api::Generic);
        assert_eq!(adapter.bucket(), "bucket");

        let usage = adapter.fetch_usage().await.unwrap();
        assert_eq!(usage.file_count, Some(2500));
        assert_eq!(usage.bytes_used, 5_000_000_000);

        let mut status = StatusRecord::new();
        let mut lookup = ApiQuotaLookup::new(&adapter);
        let quota = resolve_quota(None, None, &mut lookup, &mut status).await;
        let stats = finalize_stats(
            usage.bytes_used,
            usage.file_count,
            quota,
            Utc::now(),
            &mut status,
        );
        assert_eq!(stats.quota_bytes, Some(1_099_511_627_776));
        assert_eq!(stats.quota_source, Some(QuotaSource::Default));
        assert_eq!(stats.bytes_free, 1_099_511_627_776 - 5_000_000_000);
        assert_eq!(status.state(), State::Warning);
        assert!(status.has("NoQuotaGiven"));
    }

    #[tokio::test]
    async fn test_generic_falls_back_to_markers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let router = Router::new().route(
            "/bucket",
            get(move |Query(q): Query<HashMap<String, String>>| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    if q.contains_key("list-type") {
                        // Truncated, but no continuation token.
                        "<ListBucketResult><IsTruncated>true</IsTruncated>\
                         <Contents><Key>a</Key><Size>5</Size></Contents>\
                         <Contents><Key>dir/</Key><Size>0</Size></Contents>\
                         <Contents><Key>b</Key><Size>7</Size></Contents></ListBucketResult>"
                            .to_string()
                    } else {
                        assert_eq!(q.get("delimiter").map(String::as_str), Some("*"));
                        assert_eq!(q.get("marker").map(String::as_str), Some("b"));
                        "<ListBucketResult><IsTruncated>false</IsTruncated>\
                         <Contents><Key>c</Key><Size>11</Size></Contents></ListBucketResult>"
                            .to_string()
                    }
                }
            }),
        );
        let addr = serve(router).await;
        let usage = adapter_for(addr, S3Api::Generic).fetch_usage().await.unwrap();
        assert_eq!(usage.bytes_used, 23);
        assert_eq!(usage.file_count, Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_generic_missing_bucket() {
        let router = Router::new().route("/bucket", get(|| async { StatusCode::NOT_FOUND }));
        let addr = serve(router).await;
        let err = adapter_for(addr, S3Api::Generic)
            .fetch_usage()
            .await
            .unwrap_err();
        assert_eq!(err.code(), "404");
    }

    #[tokio::test]
    async fn test_ceph_admin_quota_enabled() {
        let router = Router::new().route(
            "/admin/bucket",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                assert_eq!(q.get("bucket").map(String::as_str), Some("bucket"));
                assert_eq!(q.get("stats").map(String::as_str), Some("True"));
                Json(serde_json::json!({
                    "bucket": "bucket",
                    "usage": {"rgw.main": {"size_utilized": 4096, "num_objects": 4}},
                    "bucket_quota": {"enabled": true, "max_size": 10240}
                }))
            }),
        );
        let addr = serve(router).await;
        let adapter = adapter_for(addr, S3Api::CephAdmin);
        let usage = adapter.fetch_usage().await.unwrap();
        assert_eq!(usage.bytes_used, 4096);
        assert_eq!(usage.file_count, Some(4));
        assert_eq!(adapter.fetch_quota().await.unwrap(), Some(10240));
    }

    #[tokio::test]
    async fn test_ceph_admin_quota_disabled_and_empty_usage() {
        let router = Router::new().route(
            "/admin/bucket",
            get(|| async {
                Json(serde_json::json!({
                    "usage": {},
                    "bucket_quota": {"enabled": false, "max_size": -1}
                }))
            }),
        );
        let addr = serve(router).await;
        let adapter = adapter_for(addr, S3Api::CephAdmin);
        let usage = adapter.fetch_usage().await.unwrap();
        assert_eq!(usage.bytes_used, 0);
        let err = adapter.fetch_quota().await.unwrap_err();
        assert_eq!(err.name(), "BucketQuotaDisabled");
    }

    #[tokio::test]
    async fn test_ceph_admin_missing_usage() {
        let router = Router::new().route(
            "/admin/bucket",
            get(|| async { Json(serde_json::json!({"Code": "NoSuchBucket"})) }),
        );
        let addr = serve(router).await;
        let err = adapter_for(addr, S3Api::CephAdmin)
            .fetch_usage()
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PollError::MissingBucketUsage {
                detail: "NoSuchBucket".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_cloudwatch_metrics() {
        let router = Router::new().route(
            "/",
            get(|Query(q): Query<HashMap<String, String>>, headers: HeaderMap| async move {
                let auth = headers.get("authorization").unwrap().to_str().unwrap();
                assert!(auth.contains("/us-east-1/monitoring/aws4_request"));
                assert_eq!(q.get("Namespace").map(String::as_str), Some("AWS/S3"));
                let datapoints = match q.get("MetricName").map(String::as_str) {
                    Some("BucketSizeBytes") => {
                        "<member><Timestamp>2026-10-18T00:00:00Z</Timestamp><Average>123456.0</Average></member>"
                    }
                    _ => "",
                };
                format!(
                    "<GetMetricStatisticsResponse><GetMetricStatisticsResult>\
                     <Datapoints>{datapoints}</Datapoints></GetMetricStatisticsResult>\
                     </GetMetricStatisticsResponse>"
                )
            }),
        );
        let addr = serve(router).await;
        let mut settings = s3_settings(S3Api::Cloudwatch);
        settings.cloudwatch_url = Some(format!("http://{addr}/"));
        let spec = s3_spec(&format!("http://{addr}/bucket"), S3Api::Cloudwatch);
        let session = HttpSession::new(&spec).unwrap();
        let adapter = S3Adapter::new(spec.id, spec.url, settings, session).unwrap();

        let usage = adapter.fetch_usage().await.unwrap();
        assert_eq!(usage.bytes_used, 123456);
        // No NumberOfObjects datapoint yet.
        assert_eq!(usage.file_count, Some(0));
    }

    #[test]
    fn test_virtual_host_bucket() {
        let mut settings = s3_settings(S3Api::Generic);
        settings.path_style = false;
        let spec = s3_spec("https://my-bucket.s3.example.org/", S3Api::Generic);
        let session = HttpSession::new(&spec).unwrap();
        let adapter = S3Adapter::new(spec.id, spec.url, settings, session).unwrap();
        assert_eq!(adapter.bucket(), "my-bucket");
        assert_eq!(adapter.service_root.as_str(), "https://s3.example.org/");
        assert_eq!(adapter.v2_resource(), "/my-bucket/");
    }

    #[test]
    fn test_path_style_requires_bucket() {
        let spec = s3_spec("https://s3.example.org/", S3Api::Generic);
        let session = HttpSession::new(&spec).unwrap();
        let err = S3Adapter::new(spec.id, spec.url, s3_settings(S3Api::Generic), session)
            .err()
            .unwrap();
        assert_eq!(err.name(), "InvalidSetting");
    }
}
