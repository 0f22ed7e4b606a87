//! Configuration loading and endpoint validation for fedstats.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each endpoint carries a flat map of plugin-style
//! settings (`s3.pub_key`, `storagestats.api`, ...) which
//! [`load_endpoints`] validates one endpoint at a time: a bad endpoint
//! becomes a [`RejectedSpec`] and never aborts the others.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use reqwest::Url;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheSettings;
use crate::errors::PollError;
use crate::model::{
    AzureSettings, Backend, DavApi, DavSettings, EndpointSpec, S3Api, S3Settings,
    SignatureVersion, TlsSettings, DEFAULT_CONN_TIMEOUT, DEFAULT_FREQUENCY,
};
use crate::quota::parse_size;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Shared cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Concurrency and run timeout.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub output: OutputConfig,

    /// Storage endpoints to poll.
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

/// Cache backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// `memcached` or `memory`.
    #[serde(default = "default_cache_backend")]
    pub backend: String,

    /// memcached `host:port`.
    #[serde(default = "default_cache_address")]
    pub address: String,

    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    #[serde(default = "default_connectivity_prefix")]
    pub connectivity_prefix: String,

    /// Minimum entry time-to-live in seconds.
    #[serde(default = "default_min_ttl")]
    pub min_ttl: u64,

    /// Entry time-to-live as a multiple of the polling frequency.
    #[serde(default = "default_ttl_multiplier")]
    pub ttl_multiplier: u32,

    /// Per-operation timeout in seconds.
    #[serde(default = "default_cache_timeout")]
    pub timeout: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_cache_backend(),
            address: default_cache_address(),
            key_prefix: default_key_prefix(),
            connectivity_prefix: default_connectivity_prefix(),
            min_ttl: default_min_ttl(),
            ttl_multiplier: default_ttl_multiplier(),
            timeout: default_cache_timeout(),
        }
    }
}

impl CacheConfig {
    pub fn settings(&self) -> CacheSettings {
        CacheSettings {
            key_prefix: self.key_prefix.clone(),
            connectivity_prefix: self.connectivity_prefix.clone(),
            min_ttl: Duration::from_secs(self.min_ttl),
            ttl_multiplier: self.ttl_multiplier,
        }
    }
}

/// Polling scheduler configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of physical endpoints polled at once.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Global run timeout in seconds.
    #[serde(default = "default_run_timeout")]
    pub run_timeout: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            run_timeout: default_run_timeout(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Append logs to this file instead of stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    /// Write Prometheus text exposition here after each run.
    #[serde(default)]
    pub textfile: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Directory for the plaintext and JSON output files.
    #[serde(default = "default_output_dir")]
    pub directory: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
        }
    }
}

/// One endpoint as written in the file, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndpointConfig {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
    /// Plugin-style settings; scalar values of any YAML type.
    #[serde(default)]
    pub settings: BTreeMap<String, serde_yaml::Value>,
}

/// An endpoint that failed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedSpec {
    /// Configured id, or `endpoint-<n>` when the id itself is missing.
    pub id: String,
    pub error: PollError,
}

// -- Defaults ----------------------------------------------------------------

fn default_cache_backend() -> String {
    "memcached".to_string()
}

fn default_cache_address() -> String {
    "127.0.0.1:11211".to_string()
}

fn default_key_prefix() -> String {
    "Ugrstoragestats_".to_string()
}

fn default_connectivity_prefix() -> String {
    "Ugrconnstats_".to_string()
}

fn default_min_ttl() -> u64 {
    3600
}

fn default_ttl_multiplier() -> u32 {
    3
}

fn default_cache_timeout() -> u64 {
    5
}

fn default_workers() -> usize {
    16
}

fn default_run_timeout() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

/// Validate every endpoint, in file order.
pub fn load_endpoints(config: &Config) -> Vec<Result<EndpointSpec, RejectedSpec>> {
    let mut seen = HashSet::new();
    config
        .endpoints
        .iter()
        .enumerate()
        .map(|(n, endpoint)| {
            let id = endpoint
                .id
                .clone()
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| format!("endpoint-{}", n + 1));
            let reject = |error| RejectedSpec {
                id: id.clone(),
                error,
            };
            let spec = EndpointSettings::new(endpoint)
                .into_spec()
                .map_err(reject)?;
            if !seen.insert(spec.id.clone()) {
                return Err(reject(PollError::InvalidSetting {
                    setting: "id".to_string(),
                    value: spec.id,
                    valid: "an id not used by another endpoint".to_string(),
                }));
            }
            Ok(spec)
        })
        .collect()
}

// -- Endpoint validation -----------------------------------------------------

struct EndpointSettings<'a> {
    endpoint: &'a EndpointConfig,
}

impl<'a> EndpointSettings<'a> {
    fn new(endpoint: &'a EndpointConfig) -> Self {
        Self { endpoint }
    }

    /// Scalar setting rendered as a trimmed string; empty counts as unset.
    fn get(&self, name: &str) -> Option<String> {
        let value = match self.endpoint.settings.get(name)? {
            serde_yaml::Value::String(s) => s.trim().to_string(),
            serde_yaml::Value::Bool(b) => b.to_string(),
            serde_yaml::Value::Number(n) => n.to_string(),
            _ => return None,
        };
        (!value.is_empty()).then_some(value)
    }

    fn require(&self, name: &str) -> Result<String, PollError> {
        self.get(name)
            .ok_or_else(|| PollError::MissingRequiredSetting {
                setting: name.to_string(),
            })
    }

    fn flag(&self, name: &str, default: bool) -> Result<bool, PollError> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(true),
                "false" | "no" | "off" | "0" => Ok(false),
                _ => Err(invalid(name, &value, "true, false")),
            },
        }
    }

    fn seconds(&self, name: &str, default: Duration) -> Result<Duration, PollError> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .ok_or_else(|| invalid(name, &value, "a positive number of seconds")),
        }
    }

    fn into_spec(self) -> Result<EndpointSpec, PollError> {
        let id = self
            .endpoint
            .id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| PollError::MissingRequiredSetting {
                setting: "id".to_string(),
            })?;
        let raw_url = self
            .endpoint
            .url
            .clone()
            .ok_or_else(|| PollError::MissingRequiredSetting {
                setting: "url".to_string(),
            })?;
        let protocol = self
            .endpoint
            .protocol
            .clone()
            .ok_or_else(|| PollError::MissingRequiredSetting {
                setting: "protocol".to_string(),
            })?
            .to_ascii_lowercase();

        let verify = self.flag("ssl_check", true)?;
        let url = normalize_url(raw_url.trim(), verify)?;
        let api = self
            .get("storagestats.api")
            .unwrap_or_else(|| "generic".to_string())
            .to_ascii_lowercase();

        let backend = match protocol.as_str() {
            "s3" => Backend::S3(self.s3_settings(&api)?),
            "azure" => Backend::Azure(self.azure_settings(&api)?),
            "webdav" | "dav" | "davs" | "http" | "https" => Backend::Dav(self.dav_settings(&api)?),
            _ => return Err(PollError::UnsupportedPlugin { protocol }),
        };

        let manual_quota = match self.get("storagestats.quota") {
            None => None,
            Some(q) if q.eq_ignore_ascii_case("api") => None,
            Some(q) => Some(parse_size(&q).map_err(|detail| {
                invalid("storagestats.quota", &q, &format!("api, or an amount and unit ({detail})"))
            })?),
        };

        let tls = TlsSettings {
            verify,
            ca_path: self.get("ca_path").map(PathBuf::from),
            client_cert: self.get("cli_certificate").map(PathBuf::from),
            client_key: self.get("cli_private_key").map(PathBuf::from),
        };

        Ok(EndpointSpec {
            id,
            url,
            backend,
            manual_quota,
            frequency: self.seconds("storagestats.frequency", DEFAULT_FREQUENCY)?,
            tls,
            conn_timeout: self.seconds("conn_timeout", DEFAULT_CONN_TIMEOUT)?,
        })
    }

    fn s3_settings(&self, api: &str) -> Result<S3Settings, PollError> {
        let api = match api {
            "generic" | "list-objects" => S3Api::Generic,
            "ceph-admin" => S3Api::CephAdmin,
            "cloudwatch" => S3Api::Cloudwatch,
            "minio-prometheus" | "minio_prometheus" => S3Api::MinioPrometheus,
            other => {
                return Err(invalid(
                    "storagestats.api",
                    other,
                    "generic, list-objects, ceph-admin, cloudwatch, minio-prometheus",
                ))
            }
        };
        let signature = match self.get("s3.signature_ver").as_deref() {
            None | Some("s3v4") => SignatureVersion::V4,
            Some("s3") => SignatureVersion::V2,
            Some(other) => return Err(invalid("s3.signature_ver", other, "s3, s3v4")),
        };
        Ok(S3Settings {
            api,
            access_key: self.require("s3.pub_key")?,
            secret_key: self.require("s3.priv_key")?,
            region: self
                .get("s3.region")
                .unwrap_or_else(|| "us-east-1".to_string()),
            signature,
            path_style: self.flag("s3.alternate", false)?,
            cloudwatch_url: self.get("s3.cloudwatch_url"),
        })
    }

    fn azure_settings(&self, api: &str) -> Result<AzureSettings, PollError> {
        match api {
            "generic" | "list-blobs" => {}
            "metrics" => {
                return Err(PollError::UnsupportedApi {
                    protocol: "azure".to_string(),
                    api: api.to_string(),
                })
            }
            other => return Err(invalid("storagestats.api", other, "generic, list-blobs")),
        }
        let key = self.require("azure.key")?;
        let account_key = BASE64_STANDARD
            .decode(key.as_bytes())
            .map_err(|_| invalid("azure.key", "<redacted>", "a base64 encoded account key"))?;
        Ok(AzureSettings { account_key })
    }

    fn dav_settings(&self, api: &str) -> Result<DavSettings, PollError> {
        let api = match api {
            "generic" | "list-files" => DavApi::Generic,
            "rfc4331" => DavApi::Rfc4331,
            other => {
                return Err(invalid(
                    "storagestats.api",
                    other,
                    "generic, list-files, rfc4331",
                ))
            }
        };
        let basic_auth = match self.get("dav.user") {
            None => None,
            Some(user) => Some((user, self.require("dav.password")?)),
        };
        Ok(DavSettings { api, basic_auth })
    }
}

fn invalid(setting: &str, value: &str, valid: &str) -> PollError {
    PollError::InvalidSetting {
        setting: setting.to_string(),
        value: value.to_string(),
        valid: valid.to_string(),
    }
}

/// Translate `s3://`, `dav://` and `davs://` into HTTP URLs.
fn normalize_url(raw: &str, verify: bool) -> Result<Url, PollError> {
    let (scheme, rest) = raw
        .split_once("://")
        .ok_or_else(|| invalid("url", raw, "<scheme>://<host>[:port]/[path]"))?;
    let scheme = match scheme.to_ascii_lowercase().as_str() {
        "s3" if verify => "https",
        "s3" => "http",
        "dav" | "http" => "http",
        "davs" | "https" => "https",
        other => {
            return Err(PollError::InvalidSchema {
                scheme: other.to_string(),
            })
        }
    };
    let url = Url::parse(&format!("{scheme}://{rest}"))
        .map_err(|e| invalid("url", raw, &format!("a valid URL ({e})")))?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("url", raw, "a URL with a host"));
    }
    Ok(url)
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
cache:
  backend: memory
  min_ttl: 1800
scheduler:
  workers: 4
endpoints:
  - id: east
    url: s3://bucket.s3.example.org
    protocol: s3
    settings:
      s3.pub_key: AKID
      s3.priv_key: SECRET
      storagestats.quota: 2TB
  - id: west
    url: s3://bucket.s3.example.org/
    protocol: s3
    settings:
      s3.pub_key: AKID
      s3.priv_key: SECRET
      storagestats.frequency: 300
  - id: blobs
    url: https://acct.blob.core.windows.net/data
    protocol: azure
    settings:
      azure.key: c2VjcmV0LWtleQ==
      storagestats.api: metrics
  - id: dav
    url: davs://dav.example.org:8443/data/
    protocol: webdav
    settings:
      storagestats.api: rfc4331
      ssl_check: false
      dav.user: alice
"#;

    fn sample() -> Config {
        serde_yaml::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.cache.backend, "memcached");
        assert_eq!(config.cache.address, "127.0.0.1:11211");
        assert_eq!(config.scheduler.workers, 16);
        assert_eq!(config.scheduler.run_timeout, 300);
        assert_eq!(config.logging.level, "info");
        assert!(config.endpoints.is_empty());
    }

    #[test]
    fn test_sample_endpoints() {
        let config = sample();
        assert_eq!(config.cache.settings().min_ttl, Duration::from_secs(1800));

        let loaded = load_endpoints(&config);
        assert_eq!(loaded.len(), 4);

        let east = loaded[0].as_ref().unwrap();
        assert_eq!(east.url.as_str(), "https://bucket.s3.example.org/");
        assert_eq!(east.manual_quota, Some(2_000_000_000_000));
        assert_eq!(east.frequency, DEFAULT_FREQUENCY);
        assert!(east.tls.verify);

        let west = loaded[1].as_ref().unwrap();
        assert_eq!(west.manual_quota, None);
        assert_eq!(west.frequency, Duration::from_secs(300));
        assert_eq!(east.physical_key(), west.physical_key());

        let blobs = loaded[2].as_ref().unwrap_err();
        assert_eq!(blobs.id, "blobs");
        assert_eq!(blobs.error.code(), "070");

        let dav = loaded[3].as_ref().unwrap_err();
        assert_eq!(
            dav.error,
            PollError::MissingRequiredSetting {
                setting: "dav.password".to_string()
            }
        );
    }

    #[test]
    fn test_missing_credentials_rejects_only_that_endpoint() {
        let config: Config = serde_yaml::from_str(
            r#"
endpoints:
  - id: broken
    url: https://s3.example.org/bucket
    protocol: s3
  - id: fine
    url: https://dav.example.org/data
    protocol: dav
"#,
        )
        .unwrap();
        let loaded = load_endpoints(&config);
        assert_eq!(loaded[0].as_ref().unwrap_err().error.code(), "001");
        assert!(loaded[1].is_ok());
    }

    #[test]
    fn test_unknown_protocol_and_schema() {
        let config: Config = serde_yaml::from_str(
            r#"
endpoints:
  - id: ftp
    url: https://ftp.example.org
    protocol: ftp
  - id: gopher
    url: gopher://old.example.org
    protocol: webdav
  - url: https://dav.example.org
    protocol: webdav
"#,
        )
        .unwrap();
        let loaded = load_endpoints(&config);
        assert_eq!(loaded[0].as_ref().unwrap_err().error.code(), "009");
        assert_eq!(loaded[1].as_ref().unwrap_err().error.code(), "008");
        let anonymous = loaded[2].as_ref().unwrap_err();
        assert_eq!(anonymous.id, "endpoint-3");
        assert_eq!(anonymous.error.code(), "001");
    }

    #[test]
    fn test_invalid_quota_and_duplicate_id() {
        let config: Config = serde_yaml::from_str(
            r#"
endpoints:
  - id: a
    url: https://dav.example.org/a
    protocol: dav
    settings:
      storagestats.quota: 12 parsecs
  - id: b
    url: https://dav.example.org/b
    protocol: dav
    settings:
      storagestats.quota: 1.5TiB
  - id: b
    url: https://dav.example.org/c
    protocol: dav
"#,
        )
        .unwrap();
        let loaded = load_endpoints(&config);
        assert_eq!(loaded[0].as_ref().unwrap_err().error.code(), "002");
        assert_eq!(loaded[1].as_ref().unwrap().manual_quota, Some(3 << 39));
        assert_eq!(loaded[2].as_ref().unwrap_err().error.name(), "InvalidSetting");
    }

    #[test]
    fn test_oversized_quota_rejects_only_that_endpoint() {
        let config: Config = serde_yaml::from_str(
            r#"
endpoints:
  - id: huge
    url: https://dav.example.org/huge
    protocol: dav
    settings:
      storagestats.quota: 99999999999999999999999999999999999999PiB
  - id: fine
    url: https://dav.example.org/fine
    protocol: dav
"#,
        )
        .unwrap();
        let loaded = load_endpoints(&config);
        let huge = loaded[0].as_ref().unwrap_err();
        assert_eq!(huge.error.code(), "002");
        assert!(huge.error.to_string().contains("64 bits"), "{}", huge.error);
        assert!(loaded[1].is_ok());
    }

    #[test]
    fn test_s3_scheme_without_verification() {
        assert_eq!(
            normalize_url("s3://minio.local:9000/bucket", false)
                .unwrap()
                .as_str(),
            "http://minio.local:9000/bucket"
        );
        assert_eq!(
            normalize_url("dav://dav.example.org/x", true).unwrap().scheme(),
            "http"
        );
    }

    #[test]
    fn test_example_config_is_valid() {
        let config: Config =
            serde_yaml::from_str(include_str!("../fedstats.example.yaml")).unwrap();
        let loaded = load_endpoints(&config);
        assert_eq!(loaded.len(), 5);
        assert!(loaded.iter().all(Result::is_ok));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.cache.backend, "memory");
        assert_eq!(config.scheduler.workers, 4);
        assert_eq!(config.endpoints.len(), 4);
    }
}
