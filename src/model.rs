//! Core data model: endpoint specifications, physical endpoint keys and
//! the statistics snapshot produced by a successful poll.

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Polling frequency used when an endpoint does not set one.
pub const DEFAULT_FREQUENCY: Duration = Duration::from_secs(600);

/// Per-request connection timeout used when an endpoint does not set one.
pub const DEFAULT_CONN_TIMEOUT: Duration = Duration::from_secs(10);

/// One configured storage target. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct EndpointSpec {
    /// Identifier used by the federation and as the cache key.
    pub id: String,
    /// Normalized target URL (`s3://`/`dav://` already translated).
    pub url: Url,
    /// Protocol-specific settings.
    pub backend: Backend,
    /// Manual quota in bytes, when configured.
    pub manual_quota: Option<u64>,
    /// Minimum interval between two polls.
    pub frequency: Duration,
    /// Trust and client-certificate settings.
    pub tls: TlsSettings,
    /// Per-request timeout.
    pub conn_timeout: Duration,
}

impl EndpointSpec {
    pub fn physical_key(&self) -> PhysicalKey {
        PhysicalKey::from_url(&self.url)
    }
}

/// Tagged protocol variant selecting the adapter implementation.
#[derive(Debug, Clone)]
pub enum Backend {
    S3(S3Settings),
    Azure(AzureSettings),
    Dav(DavSettings),
}

impl Backend {
    pub fn protocol(&self) -> &'static str {
        match self {
            Backend::S3(_) => "S3",
            Backend::Azure(_) => "Azure",
            Backend::Dav(_) => "DAV",
        }
    }

    pub fn api_name(&self) -> &'static str {
        match self {
            Backend::S3(s3) => s3.api.as_str(),
            Backend::Azure(_) => "list-blobs",
            Backend::Dav(dav) => dav.api.as_str(),
        }
    }
}

/// S3 statistics method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S3Api {
    /// Paginated object listing.
    Generic,
    /// Ceph RGW admin API bucket stats.
    CephAdmin,
    /// AWS CloudWatch daily storage metrics.
    Cloudwatch,
    /// MinIO Prometheus capacity gauges.
    MinioPrometheus,
}

impl S3Api {
    pub fn as_str(&self) -> &'static str {
        match self {
            S3Api::Generic => "generic",
            S3Api::CephAdmin => "ceph-admin",
            S3Api::Cloudwatch => "cloudwatch",
            S3Api::MinioPrometheus => "minio-prometheus",
        }
    }
}

/// S3 request signing scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureVersion {
    /// Legacy HMAC-SHA1 signing (`s3`).
    V2,
    /// AWS Signature Version 4 (`s3v4`).
    V4,
}

#[derive(Debug, Clone)]
pub struct S3Settings {
    pub api: S3Api,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub signature: SignatureVersion,
    /// Path-style addressing: the bucket is the last path segment.
    pub path_style: bool,
    /// CloudWatch endpoint override.
    pub cloudwatch_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AzureSettings {
    /// Decoded storage account key.
    pub account_key: Vec<u8>,
}

/// WebDAV statistics method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DavApi {
    /// Recursive `Depth: infinity` listing.
    Generic,
    /// RFC4331 quota properties.
    Rfc4331,
}

impl DavApi {
    pub fn as_str(&self) -> &'static str {
        match self {
            DavApi::Generic => "generic",
            DavApi::Rfc4331 => "rfc4331",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DavSettings {
    pub api: DavApi,
    /// Basic auth `(user, password)`.
    pub basic_auth: Option<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct TlsSettings {
    /// Whether server certificates are verified at all.
    pub verify: bool,
    /// PEM bundle file or directory of PEM files.
    pub ca_path: Option<PathBuf>,
    /// PEM client certificate (WebDAV).
    pub client_cert: Option<PathBuf>,
    /// PKCS#8 PEM private key matching `client_cert`.
    pub client_key: Option<PathBuf>,
}

// -- Physical endpoints ------------------------------------------------------

/// Deduplication key: distinct network targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhysicalKey {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    /// Path with trailing slashes trimmed (empty for the root).
    pub path: String,
}

impl PhysicalKey {
    pub fn from_url(url: &Url) -> Self {
        PhysicalKey {
            scheme: url.scheme().to_ascii_lowercase(),
            host: url.host_str().unwrap_or_default().to_ascii_lowercase(),
            port: url.port_or_known_default().unwrap_or(0),
            path: url.path().trim_end_matches('/').to_string(),
        }
    }
}

impl fmt::Display for PhysicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}{}", self.scheme, self.host, self.port, self.path)
    }
}

// -- Results -----------------------------------------------------------------

/// Which resolution branch produced `quota_bytes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuotaSource {
    Manual,
    ManualInherited,
    Api,
    Default,
}

impl QuotaSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaSource::Manual => "manual",
            QuotaSource::ManualInherited => "manual-inherited",
            QuotaSource::Api => "api",
            QuotaSource::Default => "default",
        }
    }
}

/// Immutable snapshot of one successful poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageStatsResult {
    pub bytes_used: u64,
    pub bytes_free: u64,
    pub quota_bytes: Option<u64>,
    pub file_count: Option<u64>,
    pub timestamp: DateTime<Utc>,
    pub quota_source: Option<QuotaSource>,
}

// -- Tests -------------------------------------------------------------------
