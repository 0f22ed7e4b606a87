//! Azure Blob Storage containers.
//!
//! Usage is the sum of `Content-Length` over every blob of the container,
//! listed with the List Blobs REST call and Shared Key authorization.
//!
//! Addressing:
//!   Service:   `https://{account}.blob.core.windows.net/{container}`
//!   Emulator:  `http://127.0.0.1:10000/{account}/{container}` (IP or `localhost` host)

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::Url;
use sha2::Sha256;
use std::net::IpAddr;
use std::time::SystemTime;
use tracing::debug;

use super::http::HttpSession;
use super::{AdapterFuture, RawUsage, StatsAdapter};
use crate::auth::encode_query;
use crate::errors::PollError;
use crate::model::AzureSettings;
use crate::xml::parse_blob_list;

/// Azure REST API version used for all requests.
const AZURE_API_VERSION: &str = "2023-11-03";

/// Largest page List Blobs will return.
const MAX_RESULTS: &str = "5000";

pub struct AzureAdapter {
    id: String,
    session: HttpSession,
    account: String,
    container: String,
    key_bytes: Vec<u8>,
    /// `{scheme}://{host}[:port]/[{account}/]{container}`
    container_url: Url,
}

impl AzureAdapter {
    pub fn new(
        id: String,
        url: Url,
        settings: AzureSettings,
        session: HttpSession,
    ) -> Result<Self, PollError> {
        let invalid_url = |valid: &str| PollError::InvalidSetting {
            setting: "url".to_string(),
            value: url.to_string(),
            valid: valid.to_string(),
        };

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        let (account, container, container_path) = if is_emulator(&url) {
            match segments.as_slice() {
                [account, container, ..] => (
                    account.to_string(),
                    container.to_string(),
                    format!("/{account}/{container}"),
                ),
                _ => return Err(invalid_url("http://<host>:<port>/<account>/<container>")),
            }
        } else {
            let host = url.host_str().unwrap_or_default();
            let account = host.split('.').next().unwrap_or_default();
            match segments.first() {
                Some(container) if !account.is_empty() => (
                    account.to_string(),
                    container.to_string(),
                    format!("/{container}"),
                ),
                _ => return Err(invalid_url("https://<account>.blob.core.windows.net/<container>")),
            }
        };

        let mut container_url = url.clone();
        container_url.set_path(&container_path);
        container_url.set_query(None);

        Ok(Self {
            id,
            session,
            account,
            container,
            key_bytes: settings.account_key,
            container_url,
        })
    }

    /// `Authorization: SharedKey {account}:{signature}`
    fn authorization(&self, date: &str, params: &[(&str, &str)]) -> String {
        let resource = canonicalized_resource(&self.account, self.container_url.path(), params);
        let string_to_sign = string_to_sign("GET", date, &resource);
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.key_bytes)
            .expect("HMAC can take key of any size");
        mac.update(string_to_sign.as_bytes());
        let signature = BASE64_STANDARD.encode(mac.finalize().into_bytes());
        format!("SharedKey {}:{signature}", self.account)
    }

    async fn list_blobs(&self) -> Result<RawUsage, PollError> {
        let resource = format!("Container \"{}\"", self.container);
        let mut bytes_used: u64 = 0;
        let mut file_count: u64 = 0;
        let mut marker: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let mut params: Vec<(&str, &str)> = vec![
                ("comp", "list"),
                ("maxresults", MAX_RESULTS),
                ("restype", "container"),
            ];
            if let Some(m) = &marker {
                params.push(("marker", m.as_str()));
            }
            let mut url = self.container_url.clone();
            url.set_query(Some(&encode_query(&params)));

            let body = self
                .session
                .fetch(&resource, |client| {
                    let date = httpdate::fmt_http_date(SystemTime::now());
                    client
                        .get(url.clone())
                        .header("x-ms-date", &date)
                        .header("x-ms-version", AZURE_API_VERSION)
                        .header("Authorization", self.authorization(&date, &params))
                })
                .await?;
            let page = parse_blob_list(&body).map_err(|detail| PollError::MalformedResponse {
                api: "list-blobs".to_string(),
                detail,
            })?;
            pages += 1;

            file_count += page.sizes.len() as u64;
            bytes_used += page.sizes.iter().sum::<u64>();

            match page.next_marker {
                Some(next) if !next.is_empty() => marker = Some(next),
                _ => break,
            }
        }

        debug!(id = %self.id, pages, file_count, bytes_used, "container listing complete");
        Ok(RawUsage {
            bytes_used,
            file_count: Some(file_count),
            notes: Vec::new(),
        })
    }
}

impl StatsAdapter for AzureAdapter {
    fn fetch_usage(&self) -> AdapterFuture<'_, RawUsage> {
        Box::pin(self.list_blobs())
    }

    /// Containers carry no quota.
    fn fetch_quota(&self) -> AdapterFuture<'_, Option<u64>> {
        Box::pin(async { Ok(None) })
    }
}

fn is_emulator(url: &Url) -> bool {
    match url.host_str() {
        Some("localhost") => true,
        Some(host) => host.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>().is_ok(),
        None => false,
    }
}

/// `/{account}{path}` followed by `\nname:value` per query parameter,
/// names lower-cased and sorted.
fn canonicalized_resource(account: &str, path: &str, params: &[(&str, &str)]) -> String {
    let mut resource = format!("/{account}{path}");
    let mut sorted: Vec<(String, &str)> = params
        .iter()
        .map(|(k, v)| (k.to_lowercase(), *v))
        .collect();
    sorted.sort();
    for (k, v) in sorted {
        resource.push_str(&format!("\n{k}:{v}"));
    }
    resource
}

/// Shared Key string-to-sign for a bodyless request: every standard
/// header line empty, then the `x-ms-*` headers and the resource.
fn string_to_sign(method: &str, date: &str, resource: &str) -> String {
    let canonicalized_headers = format!("x-ms-date:{date}\nx-ms-version:{AZURE_API_VERSION}");
    format!("{method}\n\n\n\n\n\n\n\n\n\n\n\n{canonicalized_headers}\n{resource}")
}

// -- Tests --------------------------------------------------------------------
