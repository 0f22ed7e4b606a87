//! WebDAV collections.
//!
//! `rfc4331` asks for the quota properties of the collection with a single
//! `Depth: 0` PROPFIND. `generic` walks the whole tree with
//! `Depth: infinity` and sums `getcontentlength`; many servers refuse or
//! throttle that.

use reqwest::{Client, Method, RequestBuilder, Url};
use tracing::{debug, warn};

use super::http::HttpSession;
use super::{AdapterFuture, QuotaMemo, RawUsage, StatsAdapter};
use crate::errors::PollError;
use crate::model::{DavApi, DavSettings};
use crate::xml::{parse_multistatus, parse_quota_props, render_propfind};

pub struct DavAdapter {
    id: String,
    url: Url,
    settings: DavSettings,
    session: HttpSession,
    quota: QuotaMemo,
}

impl DavAdapter {
    pub fn new(id: String, url: Url, settings: DavSettings, session: HttpSession) -> Self {
        Self {
            id,
            url,
            settings,
            session,
            quota: QuotaMemo::default(),
        }
    }

    fn propfind(&self, client: &Client, depth: &str, body: &str) -> RequestBuilder {
        let method = Method::from_bytes(b"PROPFIND").expect("PROPFIND is a valid method token");
        let mut req = client
            .request(method, self.url.clone())
            .header("Depth", depth)
            .header("Content-Type", "application/xml; charset=utf-8")
            .body(body.to_string());
        if let Some((user, password)) = &self.settings.basic_auth {
            req = req.basic_auth(user, Some(password));
        }
        req
    }

    fn malformed(&self, detail: String) -> PollError {
        PollError::MalformedResponse {
            api: self.settings.api.as_str().to_string(),
            detail,
        }
    }

    async fn rfc4331(&self) -> Result<RawUsage, PollError> {
        let body = render_propfind(&["quota-available-bytes", "quota-used-bytes"]);
        let reply = self
            .session
            .fetch(&format!("Collection \"{}\"", self.url.path()), |client| {
                self.propfind(client, "0", &body)
            })
            .await?;
        let quota = parse_quota_props(&reply)
            .map_err(|e| self.malformed(e))?
            .ok_or(PollError::DavQuotaUnsupported)?;
        debug!(id = %self.id, used = quota.used, available = quota.available, "RFC4331 quota");

        let mut notes = Vec::new();
        if quota.available == 0 {
            notes.push(PollError::ZeroAvailableBytes);
        }
        self.quota
            .store(Ok(Some(quota.used.saturating_add(quota.available))));

        Ok(RawUsage {
            bytes_used: quota.used,
            file_count: None,
            notes,
        })
    }

    async fn list_files(&self) -> Result<RawUsage, PollError> {
        warn!(
            id = %self.id,
            "recursive PROPFIND with Depth: infinity is resource intensive, prefer rfc4331"
        );
        let body = render_propfind(&["resourcetype", "getcontentlength"]);
        let reply = self
            .session
            .fetch(&format!("Collection \"{}\"", self.url.path()), |client| {
                self.propfind(client, "infinity", &body)
            })
            .await?;
        let entries = parse_multistatus(&reply).map_err(|e| self.malformed(e))?;

        let files = entries.iter().filter(|e| !e.is_collection);
        let (bytes_used, file_count) = files.fold((0u64, 0u64), |(bytes, count), entry| {
            (bytes + entry.content_length.unwrap_or(0), count + 1)
        });

        Ok(RawUsage {
            bytes_used,
            file_count: Some(file_count),
            notes: Vec::new(),
        })
    }
}

impl StatsAdapter for DavAdapter {
    fn fetch_usage(&self) -> AdapterFuture<'_, RawUsage> {
        Box::pin(async move {
            match self.settings.api {
                DavApi::Rfc4331 => self.rfc4331().await,
                DavApi::Generic => self.list_files().await,
            }
        })
    }

    fn fetch_quota(&self) -> AdapterFuture<'_, Option<u64>> {
        Box::pin(async move { self.quota.load() })
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::{dav_spec, serve};
    use axum::http::{HeaderMap, Method as HttpMethod, StatusCode};
    use axum::routing::any;
    use axum::Router;

    fn quota_reply(used: &str, available: &str) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
             <D:multistatus xmlns:D=\"DAV:\"><D:response><D:href>/data/</D:href>\
             <D:propstat><D:prop>\
             <D:quota-used-bytes>{used}</D:quota-used-bytes>\
             <D:quota-available-bytes>{available}</D:quota-available-bytes>\
             </D:prop><D:status>HTTP/1.1 200 OK</D:status></D:propstat>\
             </D:response></D:multistatus>"
        )
    }

    async fn adapter_serving(api: DavApi, reply: String, auth: Option<(&str, &str)>) -> DavAdapter {
        let router = Router::new().route(
            "/data/",
            any(move |method: HttpMethod, headers: HeaderMap, body: String| {
                let reply = reply.clone();
                async move {
                    assert_eq!(method.as_str(), "PROPFIND");
                    let depth = headers.get("depth").unwrap().to_str().unwrap().to_string();
                    if body.contains("quota-used-bytes") {
                        assert_eq!(depth, "0");
                    } else {
                        assert_eq!(depth, "infinity");
                        assert!(body.contains("getcontentlength"));
                    }
                    (StatusCode::MULTI_STATUS, reply)
                }
            }),
        );
        let addr = serve(router).await;
        let spec = dav_spec(&format!("http://{addr}/data/"));
        let session = HttpSession::new(&spec).unwrap();
        let settings = DavSettings {
            api,
            basic_auth: auth.map(|(u, p)| (u.to_string(), p.to_string())),
        };
        DavAdapter::new(spec.id, spec.url, settings, session)
    }

    #[tokio::test]
    async fn test_rfc4331_quota() {
        let adapter = adapter_serving(DavApi::Rfc4331, quota_reply("400", "600"), None).await;
        let usage = adapter.fetch_usage().await.unwrap();
        assert_eq!(usage.bytes_used, 400);
        assert!(usage.notes.is_empty());
        assert_eq!(adapter.fetch_quota().await.unwrap(), Some(1000));
    }

    #[tokio::test]
    async fn test_rfc4331_zero_available_is_flagged() {
        let adapter = adapter_serving(DavApi::Rfc4331, quota_reply("512", "0"), None).await;
        let usage = adapter.fetch_usage().await.unwrap();
        assert_eq!(usage.bytes_used, 512);
        assert_eq!(usage.notes, vec![PollError::ZeroAvailableBytes]);
        assert_eq!(adapter.fetch_quota().await.unwrap(), Some(512));
    }

    #[tokio::test]
    async fn test_rfc4331_unsupported() {
        let reply = "<D:multistatus xmlns:D=\"DAV:\"><D:response><D:href>/data/</D:href>\
                     <D:propstat><D:prop><D:quota-used-bytes/><D:quota-available-bytes/></D:prop>\
                     <D:status>HTTP/1.1 404 Not Found</D:status></D:propstat></D:response></D:multistatus>";
        let adapter = adapter_serving(DavApi::Rfc4331, reply.to_string(), None).await;
        let err = adapter.fetch_usage().await.unwrap_err();
        assert_eq!(err, PollError::DavQuotaUnsupported);
        assert_eq!(err.code(), "096");
    }

    #[tokio::test]
    async fn test_generic_sums_files() {
        let reply = "<d:multistatus xmlns:d=\"DAV:\">\
            <d:response><d:href>/data/</d:href><d:propstat><d:prop>\
              <d:resourcetype><d:collection/></d:resourcetype></d:prop></d:propstat></d:response>\
            <d:response><d:href>/data/a</d:href><d:propstat><d:prop>\
              <d:resourcetype/><d:getcontentlength>100</d:getcontentlength></d:prop></d:propstat></d:response>\
            <d:response><d:href>/data/sub/b</d:href><d:propstat><d:prop>\
              <d:resourcetype/><d:getcontentlength>23</d:getcontentlength></d:prop></d:propstat></d:response>\
            </d:multistatus>";
        let adapter = adapter_serving(DavApi::Generic, reply.to_string(), None).await;
        let usage = adapter.fetch_usage().await.unwrap();
        assert_eq!(usage.bytes_used, 123);
        assert_eq!(usage.file_count, Some(2));
        assert_eq!(adapter.fetch_quota().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_basic_auth_sent() {
        let router = Router::new().route(
            "/data/",
            any(|headers: HeaderMap| async move {
                // "user:secret"
                match headers.get("authorization").and_then(|v| v.to_str().ok()) {
                    Some("Basic dXNlcjpzZWNyZXQ=") => (StatusCode::MULTI_STATUS, quota_reply("1", "1")),
                    _ => (StatusCode::UNAUTHORIZED, String::new()),
                }
            }),
        );
        let addr = serve(router).await;
        let spec = dav_spec(&format!("http://{addr}/data/"));

        let anonymous = DavAdapter::new(
            spec.id.clone(),
            spec.url.clone(),
            DavSettings {
                api: DavApi::Rfc4331,
                basic_auth: None,
            },
            HttpSession::new(&spec).unwrap(),
        );
        assert_eq!(
            anonymous.fetch_usage().await.unwrap_err(),
            PollError::AccessDenied { status: 401 }
        );

        let authed = DavAdapter::new(
            spec.id.clone(),
            spec.url.clone(),
            DavSettings {
                api: DavApi::Rfc4331,
                basic_auth: Some(("user".to_string(), "secret".to_string())),
            },
            HttpSession::new(&spec).unwrap(),
        );
        assert_eq!(authed.fetch_usage().await.unwrap().bytes_used, 1);
    }
}
