//! Outbound request signing for S3-compatible endpoints.
//!
//! Two schemes are supported:
//! - AWS Signature Version 4 (`AWS4-HMAC-SHA256`), used for S3 and the
//!   CloudWatch query API
//! - legacy Signature Version 2 (`AWS AccessKey:Signature`, HMAC-SHA1)
//!
//! Both return the headers to attach; callers build the final URL with
//! [`encode_query`] so the query string on the wire is already canonical.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Url;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::time::SystemTime;

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

/// SHA-256 of the empty string. Every signed request here is a bodyless GET
/// (or a PROPFIND, which is never SigV4-signed).
pub const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Credentials and scope for one signing call.
#[derive(Debug, Clone, Copy)]
pub struct Credentials<'a> {
    pub access_key: &'a str,
    pub secret_key: &'a str,
}

// ── Query building ──────────────────────────────────────────────────

/// Encode query parameters in canonical form: names and values
/// S3-URI-encoded, sorted by name then value, joined with `&`.
pub fn encode_query(params: &[(&str, &str)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (s3_uri_encode(k, true), s3_uri_encode(v, true)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

// ── Signature Version 4 ─────────────────────────────────────────────

/// Sign a bodyless request with SigV4 and return the headers to send:
/// `x-amz-date`, `x-amz-content-sha256` and `authorization`.
pub fn sign_v4(
    method: &str,
    url: &Url,
    creds: Credentials<'_>,
    region: &str,
    service: &str,
    now: DateTime<Utc>,
) -> Vec<(String, String)> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();

    let headers = vec![
        ("host".to_string(), host_header(url)),
        ("x-amz-content-sha256".to_string(), EMPTY_SHA256.to_string()),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    let signed_headers = "host;x-amz-content-sha256;x-amz-date";

    let canonical_request = build_canonical_request(
        method,
        url.path(),
        url.query().unwrap_or(""),
        &headers,
        signed_headers,
        EMPTY_SHA256,
    );
    let credential_scope = format!("{date_stamp}/{region}/{service}/aws4_request");
    let string_to_sign = build_string_to_sign(&amz_date, &credential_scope, &canonical_request);
    let signing_key = derive_signing_key(creds.secret_key, &date_stamp, region, service);
    let signature = compute_signature(&signing_key, &string_to_sign);

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
        creds.access_key
    );

    vec![
        ("x-amz-date".to_string(), amz_date),
        ("x-amz-content-sha256".to_string(), EMPTY_SHA256.to_string()),
        ("authorization".to_string(), authorization),
    ]
}

/// Build the canonical request.
///
/// ```text
/// HTTPMethod + '\n' +
/// CanonicalURI + '\n' +
/// CanonicalQueryString + '\n' +
/// CanonicalHeaders + '\n' +
/// SignedHeaders + '\n' +
/// HashedPayload
/// ```
pub fn build_canonical_request(
    method: &str,
    uri: &str,
    query_string: &str,
    headers: &[(String, String)],
    signed_headers_str: &str,
    payload_hash: &str,
) -> String {
    // S3 signs the path exactly as sent, no normalization.
    let canonical_uri = if uri.is_empty() { "/" } else { uri };
    let canonical_query = build_canonical_query_string(query_string);

    let mut canonical_headers = String::new();
    for name in signed_headers_str.split(';') {
        if let Some((hname, hval)) = headers.iter().find(|(n, _)| n == name) {
            canonical_headers.push_str(hname);
            canonical_headers.push(':');
            canonical_headers.push_str(&collapse_whitespace(hval));
            canonical_headers.push('\n');
        }
    }

    format!(
        "{method}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n{signed_headers_str}\n{payload_hash}"
    )
}

/// Canonicalize a raw query string: decode each pair, re-encode with S3
/// rules, sort. Parameters without a value get an empty one (`acl=`).
pub fn build_canonical_query_string(query_string: &str) -> String {
    if query_string.is_empty() {
        return String::new();
    }

    let mut params: Vec<(String, String)> = query_string
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (k, v) = part.split_once('=').unwrap_or((part, ""));
            (
                s3_uri_encode(&percent_decode(k), true),
                s3_uri_encode(&percent_decode(v), true),
            )
        })
        .collect();
    params.sort();

    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// ```text
/// AWS4-HMAC-SHA256 + '\n' +
/// Timestamp + '\n' +
/// CredentialScope + '\n' +
/// HexEncode(SHA256(CanonicalRequest))
/// ```
pub fn build_string_to_sign(
    timestamp: &str,
    credential_scope: &str,
    canonical_request: &str,
) -> String {
    let hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    format!("AWS4-HMAC-SHA256\n{timestamp}\n{credential_scope}\n{hash}")
}

/// ```text
/// kDate    = HMAC-SHA256("AWS4" + secret, dateStamp)
/// kRegion  = HMAC-SHA256(kDate, region)
/// kService = HMAC-SHA256(kRegion, service)
/// kSigning = HMAC-SHA256(kService, "aws4_request")
/// ```
pub fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Vec<u8> {
    let k_secret = format!("AWS4{secret_key}");
    let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// HexEncode(HMAC-SHA256(SigningKey, StringToSign)).
pub fn compute_signature(signing_key: &[u8], string_to_sign: &str) -> String {
    hex::encode(hmac_sha256(signing_key, string_to_sign.as_bytes()))
}

// ── Signature Version 2 ─────────────────────────────────────────────

/// Sign a bodyless request with SigV2 and return the `date` and
/// `authorization` headers.
///
/// `resource` is the canonicalized resource, e.g. `/bucket/` or
/// `/admin/bucket`.
pub fn sign_v2(
    method: &str,
    resource: &str,
    creds: Credentials<'_>,
    now: DateTime<Utc>,
) -> Vec<(String, String)> {
    let date = httpdate::fmt_http_date(SystemTime::from(now));
    let string_to_sign = build_string_to_sign_v2(method, &date, resource);
    let mut mac =
        HmacSha1::new_from_slice(creds.secret_key.as_bytes()).expect("HMAC can take key of any size");
    mac.update(string_to_sign.as_bytes());
    let signature = BASE64_STANDARD.encode(mac.finalize().into_bytes());

    vec![
        ("date".to_string(), date),
        (
            "authorization".to_string(),
            format!("AWS {}:{signature}", creds.access_key),
        ),
    ]
}

/// `VERB\nContent-MD5\nContent-Type\nDate\nCanonicalizedResource`, with the
/// MD5 and type lines empty for bodyless requests.
pub fn build_string_to_sign_v2(method: &str, date: &str, resource: &str) -> String {
    format!("{method}\n\n\n{date}\n{resource}")
}

// ── URI encoding ────────────────────────────────────────────────────

/// S3-compatible URI encoding: unreserved characters (`A-Za-z0-9-_.~`) kept,
/// everything else percent-encoded with uppercase hex. `/` is kept only
/// when `encode_slash` is false.
pub fn s3_uri_encode(input: &str, encode_slash: bool) -> String {
    let mut encoded = String::with_capacity(input.len() * 2);
    for byte in input.bytes() {
        let ch = byte as char;
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '~') {
            encoded.push(ch);
        } else if ch == '/' && !encode_slash {
            encoded.push('/');
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

// ── Helpers ─────────────────────────────────────────────────────────

/// `host[:port]`, with the port omitted when it is the scheme default.
fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn percent_decode(s: &str) -> String {
    percent_encoding::percent_decode_str(s)
        .decode_utf8_lossy()
        .into_owned()
}

// ── Tests ───────────────────────────────────────────────────────────
