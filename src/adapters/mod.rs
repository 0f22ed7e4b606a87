//! Protocol adapters.
//!
//! The [`StatsAdapter`] trait is the single capability every backend
//! exposes to the scheduler: usage first, then (optionally) an API quota.
//! Implementations cover S3 (listing, Ceph admin, CloudWatch), MinIO's
//! Prometheus endpoint, Azure blob listing and WebDAV.
//!
//! Every failure leaves an adapter as a classified [`PollError`].

pub mod azure;
pub mod dav;
pub mod http;
pub mod minio;
pub mod s3;

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use crate::errors::PollError;
use crate::model::{Backend, EndpointSpec, S3Api};

use self::http::HttpSession;

/// Boxed future returned by adapter operations.
pub type AdapterFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, PollError>> + Send + 'a>>;

/// Raw usage figures as reported by a backend, before quota resolution.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RawUsage {
    pub bytes_used: u64,
    pub file_count: Option<u64>,
    /// Non-fatal anomalies seen while fetching (e.g. ambiguous zero quota).
    pub notes: Vec<PollError>,
}

/// Async statistics contract for one physical endpoint.
///
/// An adapter is built per polling task and never shared across tasks.
pub trait StatsAdapter: Send + Sync {
    /// Fetch used bytes (and object count where the backend knows it).
    fn fetch_usage(&self) -> AdapterFuture<'_, RawUsage>;

    /// Quota reported by the backend, `Ok(None)` when it has none.
    ///
    /// Only called after a successful [`fetch_usage`](Self::fetch_usage),
    /// and only when no manual quota applies.
    fn fetch_quota(&self) -> AdapterFuture<'_, Option<u64>>;
}

/// Builds the adapter for the first spec of a physical endpoint group.
pub trait AdapterFactory: Send + Sync + 'static {
    fn build(&self, spec: &EndpointSpec) -> Result<Box<dyn StatsAdapter>, PollError>;
}

/// Production factory: one fresh HTTP session per adapter.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProtocolAdapterFactory;

impl AdapterFactory for ProtocolAdapterFactory {
    fn build(&self, spec: &EndpointSpec) -> Result<Box<dyn StatsAdapter>, PollError> {
        let session = HttpSession::new(spec)?;
        Ok(match &spec.backend {
            Backend::S3(s3) if s3.api == S3Api::MinioPrometheus => Box::new(
                minio::MinioAdapter::new(spec.id.clone(), spec.url.clone(), session),
            ),
            Backend::S3(s3) => Box::new(s3::S3Adapter::new(
                spec.id.clone(),
                spec.url.clone(),
                s3.clone(),
                session,
            )?),
            Backend::Azure(azure) => Box::new(azure::AzureAdapter::new(
                spec.id.clone(),
                spec.url.clone(),
                azure.clone(),
                session,
            )?),
            Backend::Dav(dav) => Box::new(dav::DavAdapter::new(
                spec.id.clone(),
                spec.url.clone(),
                dav.clone(),
                session,
            )),
        })
    }
}

/// Quota learned as a side effect of the usage call.
#[derive(Debug, Default)]
pub(crate) struct QuotaMemo(Mutex<Option<Result<Option<u64>, PollError>>>);

impl QuotaMemo {
    pub(crate) fn store(&self, quota: Result<Option<u64>, PollError>) {
        *self.0.lock().expect("mutex poisoned") = Some(quota);
    }

    pub(crate) fn load(&self) -> Result<Option<u64>, PollError> {
        self.0
            .lock()
            .expect("mutex poisoned")
            .clone()
            .unwrap_or(Ok(None))
    }
}

// ── Test support ────────────────────────────────────────────────────
