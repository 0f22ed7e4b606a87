//! Classified polling failures.
//!
//! Every adapter, resolver and cache failure is expressed as a
//! [`PollError`] variant.  Each variant maps to a stable status name, a
//! numeric-ish code, a [`Category`] and a [`Severity`], so the scheduler
//! and cache layer never have to look at protocol-specific errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad failure classes surfaced to the cache and output records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    /// Missing or invalid endpoint setting.
    Configuration,
    /// DNS, timeout, TLS or refused connections.
    Connection,
    /// The backend answered, but not in a usable way.
    Protocol,
    /// The shared cache could not be read or written.
    CacheBackend,
    /// Bucket, container or collection does not exist.
    NotFound,
    /// The federation flagged the endpoint offline.
    Offline,
    /// Protocol/capability combination that is not implemented.
    Unsupported,
    /// Failure inside fedstats itself.
    Internal,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Configuration => "configuration",
            Category::Connection => "connection",
            Category::Protocol => "protocol",
            Category::CacheBackend => "cache-backend",
            Category::NotFound => "not-found",
            Category::Offline => "offline",
            Category::Unsupported => "unsupported",
            Category::Internal => "internal",
        }
    }
}

/// Whether a status event degrades the endpoint to WARNING or ERROR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        }
    }
}

/// Everything that can go wrong (or be worth flagging) while polling one
/// endpoint.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PollError {
    #[error("\"{setting}\" is required. Check your configuration.")]
    MissingRequiredSetting { setting: String },

    #[error("Incorrect value \"{value}\" given in setting \"{setting}\". Valid values: {valid}")]
    InvalidSetting {
        setting: String,
        value: String,
        valid: String,
    },

    #[error("Invalid schema \"{scheme}\".")]
    InvalidSchema { scheme: String },

    #[error("StorageStats method for protocol \"{protocol}\" not implemented.")]
    UnsupportedPlugin { protocol: String },

    #[error("API \"{api}\" is not supported for {protocol} endpoints.")]
    UnsupportedApi { protocol: String, api: String },

    #[error("Invalid client certificate \"{path}\": {detail}")]
    ClientCert { path: String, detail: String },

    #[error("TLS connection could not be established: {detail}")]
    Tls { detail: String },

    #[error("Backend reports {used} bytes used against a quota of {quota} bytes. Free space clamped to 0.")]
    NegativeFreeSpace { used: u64, quota: u64 },

    #[error("Unusable response from API \"{api}\": {detail}")]
    MalformedResponse { api: String, detail: String },

    #[error("WebDAV endpoint does not return RFC4331 quota properties.")]
    DavQuotaUnsupported,

    #[error(
        "RFC4331 reports quota-available-bytes as \"0\". While the endpoint could be full, \
         this could also indicate an issue with the back-end configuration or lack of support \
         returning this information. If necessary input a quota manually in the configuration."
    )]
    ZeroAvailableBytes,

    #[error("No quota obtained from API or configuration. Using default of {default_quota} bytes.")]
    NoQuotaGiven { default_quota: u64 },

    #[error("Failed to get bucket usage information: {detail}")]
    MissingBucketUsage { detail: String },

    #[error("Bucket quota is disabled. Using default of {default_quota} bytes.")]
    BucketQuotaDisabled { default_quota: u64 },

    #[error("Failed to establish a connection: {detail}")]
    Connection { detail: String },

    #[error("Access denied by the endpoint (HTTP {status}).")]
    AccessDenied { status: u16 },

    #[error("{resource} not found.")]
    NotFound { resource: String },

    #[error("Request timed out after {seconds}s.")]
    Timeout { seconds: u64 },

    #[error("Endpoint answered HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Failed to connect to the cache backend: {detail}")]
    CacheConnection { detail: String },

    #[error("Unable to read or write cache index: {detail}")]
    CacheIndex { detail: String },

    #[error("The federation has flagged this endpoint as offline.")]
    EndpointOffline,

    #[error("Run timeout of {seconds}s reached before the endpoint was polled.")]
    RunTimeout { seconds: u64 },

    #[error("Polling task failed unexpectedly: {detail}")]
    Internal { detail: String },
}

impl PollError {
    /// Stable status name, used in status strings.
    pub fn name(&self) -> &'static str {
        match self {
            PollError::MissingRequiredSetting { .. } => "MissingRequiredSetting",
            PollError::InvalidSetting { .. } => "InvalidSetting",
            PollError::InvalidSchema { .. } => "InvalidSchema",
            PollError::UnsupportedPlugin { .. } => "UnsupportedPlugin",
            PollError::UnsupportedApi { .. } => "UnsupportedApi",
            PollError::ClientCert { .. } => "ClientCertError",
            PollError::Tls { .. } => "TlsError",
            PollError::NegativeFreeSpace { .. } => "NegativeFreeSpace",
            PollError::MalformedResponse { .. } => "MalformedResponse",
            PollError::DavQuotaUnsupported => "UnsupportedMethod",
            PollError::ZeroAvailableBytes => "ZeroAvailableBytes",
            PollError::NoQuotaGiven { .. } => "NoQuotaGiven",
            PollError::MissingBucketUsage { .. } => "MissingBucketUsage",
            PollError::BucketQuotaDisabled { .. } => "BucketQuotaDisabled",
            PollError::Connection { .. } => "ConnectionError",
            PollError::AccessDenied { .. } => "AccessDenied",
            PollError::NotFound { .. } => "NotFound",
            PollError::Timeout { .. } => "Timeout",
            PollError::Http { .. } => "HttpError",
            PollError::CacheConnection { .. } => "CacheConnectionError",
            PollError::CacheIndex { .. } => "CacheIndexError",
            PollError::EndpointOffline => "EndpointOffline",
            PollError::RunTimeout { .. } => "RunTimeout",
            PollError::Internal { .. } => "InternalError",
        }
    }

    /// Status code string.
    pub fn code(&self) -> String {
        let code = match self {
            PollError::MissingRequiredSetting { .. } => "001",
            PollError::InvalidSetting { .. } => "002",
            PollError::InvalidSchema { .. } => "008",
            PollError::UnsupportedPlugin { .. } => "009",
            PollError::UnsupportedApi { .. } => "070",
            PollError::ClientCert { .. } => "091",
            PollError::Tls { .. } => "092",
            PollError::NegativeFreeSpace { .. } => "094",
            PollError::MalformedResponse { .. } => "095",
            PollError::DavQuotaUnsupported => "096",
            PollError::ZeroAvailableBytes => "097",
            PollError::NoQuotaGiven { .. } => "098",
            PollError::MissingBucketUsage { .. } => "098",
            PollError::BucketQuotaDisabled { .. } => "099",
            PollError::Connection { .. } => "400",
            PollError::AccessDenied { .. } => "403",
            PollError::NotFound { .. } => "404",
            PollError::Timeout { .. } => "408",
            PollError::Http { status, .. } => return status.to_string(),
            PollError::CacheConnection { .. } => "081",
            PollError::CacheIndex { .. } => "082",
            PollError::EndpointOffline => "503",
            PollError::RunTimeout { .. } => "504",
            PollError::Internal { .. } => "500",
        };
        code.to_string()
    }

    pub fn category(&self) -> Category {
        match self {
            PollError::MissingRequiredSetting { .. }
            | PollError::InvalidSetting { .. }
            | PollError::InvalidSchema { .. }
            | PollError::ClientCert { .. } => Category::Configuration,
            PollError::UnsupportedPlugin { .. } | PollError::UnsupportedApi { .. } => {
                Category::Unsupported
            }
            PollError::Tls { .. }
            | PollError::Connection { .. }
            | PollError::AccessDenied { .. }
            | PollError::Timeout { .. }
            | PollError::RunTimeout { .. } => Category::Connection,
            PollError::NegativeFreeSpace { .. }
            | PollError::MalformedResponse { .. }
            | PollError::DavQuotaUnsupported
            | PollError::ZeroAvailableBytes
            | PollError::NoQuotaGiven { .. }
            | PollError::MissingBucketUsage { .. }
            | PollError::BucketQuotaDisabled { .. }
            | PollError::Http { .. } => Category::Protocol,
            PollError::NotFound { .. } => Category::NotFound,
            PollError::CacheConnection { .. } | PollError::CacheIndex { .. } => {
                Category::CacheBackend
            }
            PollError::EndpointOffline => Category::Offline,
            PollError::Internal { .. } => Category::Internal,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            PollError::NegativeFreeSpace { .. }
            | PollError::ZeroAvailableBytes
            | PollError::NoQuotaGiven { .. }
            | PollError::BucketQuotaDisabled { .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

/// Errors raised by a [`crate::cache::store::CacheStore`].
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unreachable at {address}: {detail}")]
    Connection { address: String, detail: String },

    #[error("cache operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("invalid cache key \"{0}\"")]
    InvalidKey(String),

    #[error("unexpected cache reply: {0}")]
    Protocol(String),
}

impl From<CacheError> for PollError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Connection { .. } | CacheError::Timeout(_) => PollError::CacheConnection {
                detail: err.to_string(),
            },
            CacheError::InvalidKey(_) | CacheError::Protocol(_) => {
                PollError::CacheIndex {
                    detail: err.to_string(),
                }
            }
        }
    }
}

// -- Tests -------------------------------------------------------------------
