//! Shared HTTP plumbing for all adapters.
//!
//! An [`HttpSession`] wraps one `reqwest::Client` configured from the
//! endpoint's trust settings. TLS validation failures against a configured
//! CA bundle are retried exactly once with the platform trust store.

use reqwest::{Certificate, Client, Identity, RequestBuilder, Response, StatusCode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::errors::PollError;
use crate::model::{Backend, EndpointSpec, TlsSettings};

/// Longest error body kept in an `HttpError` message.
const MAX_ERROR_BODY: usize = 512;

pub struct HttpSession {
    client: Client,
    tls: TlsSettings,
    timeout: Duration,
    identity: Option<Identity>,
    /// Whether a TLS failure is retried with the default trust store.
    fallback: bool,
}

impl HttpSession {
    /// Build the session for `spec`. Client certificates are only used by
    /// WebDAV endpoints; Azure never retries with the default trust store.
    pub fn new(spec: &EndpointSpec) -> Result<Self, PollError> {
        let identity = match (&spec.backend, &spec.tls.client_cert) {
            (Backend::Dav(_), Some(cert)) => {
                Some(load_identity(cert, spec.tls.client_key.as_deref())?)
            }
            _ => None,
        };
        let client = build_client(&spec.tls, spec.conn_timeout, identity.as_ref(), true)?;

        Ok(Self {
            client,
            tls: spec.tls.clone(),
            timeout: spec.conn_timeout,
            identity,
            fallback: !matches!(spec.backend, Backend::Azure(_)),
        })
    }

    /// Send the request produced by `build`.
    ///
    /// `build` is called a second time against a fallback client when the
    /// first attempt fails TLS validation with a custom CA bundle.
    pub async fn send<F>(&self, build: F) -> Result<Response, PollError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        match build(&self.client).send().await {
            Ok(resp) => Ok(resp),
            Err(err) if self.can_fall_back() && is_tls_error(&err) => {
                warn!(
                    error = %error_chain(&err),
                    "TLS validation failed with configured CA, retrying with default trust store"
                );
                let fallback = build_client(&self.tls, self.timeout, self.identity.as_ref(), false)?;
                build(&fallback).send().await.map_err(|err| {
                    if is_tls_error(&err) {
                        PollError::Tls {
                            detail: error_chain(&err),
                        }
                    } else {
                        self.map_error(&err)
                    }
                })
            }
            Err(err) => Err(self.map_error(&err)),
        }
    }

    /// Send, check the status and read the whole body.
    pub async fn fetch<F>(&self, resource: &str, build: F) -> Result<Vec<u8>, PollError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let resp = self.send(build).await?;
        let resp = check_status(resp, resource).await?;
        let body = resp.bytes().await.map_err(|err| self.map_error(&err))?;
        debug!(resource, bytes = body.len(), "endpoint reply received");
        Ok(body.to_vec())
    }

    fn can_fall_back(&self) -> bool {
        self.fallback && self.tls.verify && self.tls.ca_path.is_some()
    }

    /// Classify a transport failure.
    pub fn map_error(&self, err: &reqwest::Error) -> PollError {
        if err.is_timeout() {
            PollError::Timeout {
                seconds: self.timeout.as_secs(),
            }
        } else if is_tls_error(err) {
            PollError::Tls {
                detail: error_chain(err),
            }
        } else {
            PollError::Connection {
                detail: error_chain(err),
            }
        }
    }
}

/// Map a non-success HTTP status to a classified error.
pub async fn check_status(resp: Response, resource: &str) -> Result<Response, PollError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    Err(match status {
        StatusCode::NOT_FOUND => PollError::NotFound {
            resource: resource.to_string(),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PollError::AccessDenied {
            status: status.as_u16(),
        },
        _ => {
            let mut body = resp.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            PollError::Http {
                status: status.as_u16(),
                body,
            }
        }
    })
}

// -- Client construction ------------------------------------------------------

fn build_client(
    tls: &TlsSettings,
    timeout: Duration,
    identity: Option<&Identity>,
    use_custom_ca: bool,
) -> Result<Client, PollError> {
    let mut builder = Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout);

    if !tls.verify {
        builder = builder.danger_accept_invalid_certs(true);
    } else if use_custom_ca {
        if let Some(ca_path) = &tls.ca_path {
            for cert in load_ca_bundle(ca_path)? {
                builder = builder.add_root_certificate(cert);
            }
            builder = builder.tls_built_in_root_certs(false);
        }
    }
    if let Some(identity) = identity {
        builder = builder.identity(identity.clone());
    }

    builder.build().map_err(|err| PollError::Connection {
        detail: format!("failed to build HTTP client: {}", error_chain(&err)),
    })
}

/// Read a PEM bundle file, or every `.pem`/`.crt`/`.cer` file of a
/// directory.
fn load_ca_bundle(path: &Path) -> Result<Vec<Certificate>, PollError> {
    let invalid = |detail: String| {
        warn!(ca_path = %path.display(), "{detail}");
        PollError::InvalidSetting {
            setting: "ca_path".to_string(),
            value: path.display().to_string(),
            valid: "a PEM file or a directory of PEM files".to_string(),
        }
    };

    let files: Vec<PathBuf> = if path.is_dir() {
        let mut files: Vec<PathBuf> = std::fs::read_dir(path)
            .map_err(|e| invalid(format!("cannot read CA directory: {e}")))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("pem") | Some("crt") | Some("cer")
                )
            })
            .collect();
        files.sort();
        files
    } else {
        vec![path.to_path_buf()]
    };

    let mut certs = Vec::new();
    for file in &files {
        let pem = std::fs::read(file)
            .map_err(|e| invalid(format!("cannot read {}: {e}", file.display())))?;
        let bundle = Certificate::from_pem_bundle(&pem)
            .map_err(|e| invalid(format!("invalid PEM in {}: {e}", file.display())))?;
        certs.extend(bundle);
    }
    if certs.is_empty() {
        return Err(invalid("no certificates found".to_string()));
    }
    Ok(certs)
}

/// Client identity from a PEM certificate and a PKCS#8 PEM key. Without a
/// separate key file the certificate file must contain both.
fn load_identity(cert: &Path, key: Option<&Path>) -> Result<Identity, PollError> {
    let client_cert_error = |path: &Path, detail: String| PollError::ClientCert {
        path: path.display().to_string(),
        detail,
    };
    let cert_pem = std::fs::read(cert).map_err(|e| client_cert_error(cert, e.to_string()))?;
    let key_pem = match key {
        Some(key) => std::fs::read(key).map_err(|e| client_cert_error(key, e.to_string()))?,
        None => cert_pem.clone(),
    };
    Identity::from_pkcs8_pem(&cert_pem, &key_pem)
        .map_err(|e| client_cert_error(cert, error_chain(&e)))
}

// -- Error helpers ------------------------------------------------------------

/// `err: source: source...`
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ")
}

/// TLS failures surface as connect errors whose sources come from the TLS
/// backend. Only the sources are searched: the top-level message carries
/// the request URL, which may itself contain `ssl` or `tls`.
fn is_tls_error(err: &reqwest::Error) -> bool {
    if !err.is_connect() {
        return false;
    }
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        let text = inner.to_string().to_ascii_lowercase();
        if ["certificate", "tls", "ssl", "handshake"]
            .iter()
            .any(|needle| text.contains(needle))
        {
            return true;
        }
        source = inner.source();
    }
    false
}

// -- Tests --------------------------------------------------------------------
