//! XML payloads exchanged with storage backends.
//!
//! Parsers for S3 `ListBucketResult` (v1 and v2), Azure
//! `EnumerationResults`, WebDAV `multistatus` and CloudWatch
//! `GetMetricStatisticsResponse`, plus the PROPFIND request bodies and
//! the StAR storage accounting document.
//! Parsers return `Err(String)` describing the problem; adapters wrap it in
//! a `MalformedResponse` error.

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;

// ── Event walker ────────────────────────────────────────────────────

/// One step of a document walk. The slice is the stack of local element
/// names from the root down to the current element.
enum Node<'a> {
    Open(&'a [String]),
    Text(&'a [String], &'a str),
    Close(&'a [String]),
}

/// Walk `body`, stripping namespace prefixes from element names.
fn walk(body: &[u8], mut visit: impl FnMut(Node<'_>)) -> Result<(), String> {
    let mut reader = Reader::from_reader(body);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut stack: Vec<String> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                stack.push(local_name(e.name().as_ref()));
                visit(Node::Open(&stack));
            }
            Ok(Event::Empty(ref e)) => {
                stack.push(local_name(e.name().as_ref()));
                visit(Node::Open(&stack));
                visit(Node::Close(&stack));
                stack.pop();
            }
            Ok(Event::Text(ref e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| format!("invalid text content: {err}"))?;
                visit(Node::Text(&stack, &text));
            }
            Ok(Event::CData(ref e)) => {
                let text = String::from_utf8_lossy(e).into_owned();
                visit(Node::Text(&stack, &text));
            }
            Ok(Event::End(_)) => {
                visit(Node::Close(&stack));
                stack.pop();
            }
            Ok(Event::Eof) => break,
            Err(err) => {
                return Err(format!(
                    "XML error at position {}: {err}",
                    reader.buffer_position()
                ))
            }
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(format!("unexpected end of document inside <{}>", stack.join("/")));
    }
    Ok(())
}

/// `D:href` -> `href`
fn local_name(raw: &[u8]) -> String {
    let name = String::from_utf8_lossy(raw);
    name.rsplit(':').next().unwrap_or(&name).to_string()
}

fn ends_with(path: &[String], suffix: &[&str]) -> bool {
    path.len() >= suffix.len()
        && path[path.len() - suffix.len()..]
            .iter()
            .zip(suffix)
            .all(|(a, b)| a == b)
}

fn root_is(path: &[String], name: &str) -> bool {
    path.len() == 1 && path[0] == name
}

fn parse_u64(field: &str, text: &str) -> Result<u64, String> {
    text.trim()
        .parse::<u64>()
        .map_err(|_| format!("{field} is not an unsigned integer: \"{text}\""))
}

// ── ListBucketResult ────────────────────────────────────────────────

/// One page of an S3 object listing (v1 or v2).
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ListPage {
    /// `(key, size)` for every `<Contents>` entry.
    pub objects: Vec<(String, u64)>,
    pub is_truncated: bool,
    /// v2 continuation.
    pub next_continuation_token: Option<String>,
    /// v1 continuation. Only returned by some servers.
    pub next_marker: Option<String>,
}

impl ListPage {
    pub fn last_key(&self) -> Option<&str> {
        self.objects.last().map(|(k, _)| k.as_str())
    }
}

pub fn parse_list_bucket_result(body: &[u8]) -> Result<ListPage, String> {
    let mut page = ListPage::default();
    let mut seen_root = false;
    let mut key = String::new();
    let mut size: Option<u64> = None;
    let mut error: Option<String> = None;

    walk(body, |node| match node {
        Node::Open(path) => {
            if root_is(path, "ListBucketResult") {
                seen_root = true;
            } else if ends_with(path, &["ListBucketResult", "Contents"]) {
                key.clear();
                size = None;
            }
        }
        Node::Text(path, text) => {
            if ends_with(path, &["Contents", "Key"]) {
                key = text.to_string();
            } else if ends_with(path, &["Contents", "Size"]) {
                match parse_u64("Size", text) {
                    Ok(v) => size = Some(v),
                    Err(e) => error = error.take().or(Some(e)),
                }
            } else if ends_with(path, &["ListBucketResult", "IsTruncated"]) {
                page.is_truncated = text.eq_ignore_ascii_case("true");
            } else if ends_with(path, &["ListBucketResult", "NextContinuationToken"]) {
                page.next_continuation_token = Some(text.to_string());
            } else if ends_with(path, &["ListBucketResult", "NextMarker"]) {
                page.next_marker = Some(text.to_string());
            }
        }
        Node::Close(path) => {
            if ends_with(path, &["ListBucketResult", "Contents"]) {
                match size {
                    Some(s) => page.objects.push((std::mem::take(&mut key), s)),
                    None => {
                        error = error
                            .take()
                            .or_else(|| Some(format!("object \"{key}\" has no Size")))
                    }
                }
            }
        }
    })?;

    if let Some(e) = error {
        return Err(e);
    }
    if !seen_root {
        return Err("missing <ListBucketResult> root element".to_string());
    }
    Ok(page)
}

// ── Azure EnumerationResults ────────────────────────────────────────

/// One page of an Azure List Blobs response.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BlobPage {
    /// `Content-Length` of every blob on the page.
    pub sizes: Vec<u64>,
    pub next_marker: Option<String>,
}

pub fn parse_blob_list(body: &[u8]) -> Result<BlobPage, String> {
    let mut page = BlobPage::default();
    let mut seen_root = false;
    let mut error: Option<String> = None;

    walk(body, |node| match node {
        Node::Open(path) => seen_root |= root_is(path, "EnumerationResults"),
        Node::Text(path, text) => {
            if ends_with(path, &["Blob", "Properties", "Content-Length"]) {
                match parse_u64("Content-Length", text) {
                    Ok(v) => page.sizes.push(v),
                    Err(e) => error = error.take().or(Some(e)),
                }
            } else if ends_with(path, &["EnumerationResults", "NextMarker"]) {
                page.next_marker = Some(text.to_string());
            }
        }
        Node::Close(_) => {}
    })?;

    if let Some(e) = error {
        return Err(e);
    }
    if !seen_root {
        return Err("missing <EnumerationResults> root element".to_string());
    }
    Ok(page)
}

// ── WebDAV multistatus ──────────────────────────────────────────────

/// One `<response>` of a recursive PROPFIND.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DavEntry {
    pub href: String,
    pub is_collection: bool,
    pub content_length: Option<u64>,
}

pub fn parse_multistatus(body: &[u8]) -> Result<Vec<DavEntry>, String> {
    let mut entries = Vec::new();
    let mut current = DavEntry::default();
    let mut seen_root = false;
    let mut error: Option<String> = None;

    walk(body, |node| match node {
        Node::Open(path) => {
            if root_is(path, "multistatus") {
                seen_root = true;
            } else if ends_with(path, &["multistatus", "response"]) {
                current = DavEntry::default();
            } else if ends_with(path, &["prop", "resourcetype", "collection"]) {
                current.is_collection = true;
            }
        }
        Node::Text(path, text) => {
            if ends_with(path, &["response", "href"]) {
                current.href = text.to_string();
            } else if ends_with(path, &["prop", "getcontentlength"]) {
                match parse_u64("getcontentlength", text) {
                    Ok(v) => current.content_length = Some(v),
                    Err(e) => error = error.take().or(Some(e)),
                }
            }
        }
        Node::Close(path) => {
            if ends_with(path, &["multistatus", "response"]) {
                entries.push(std::mem::take(&mut current));
            }
        }
    })?;

    if let Some(e) = error {
        return Err(e);
    }
    if !seen_root {
        return Err("missing <multistatus> root element".to_string());
    }
    Ok(entries)
}

/// RFC4331 quota properties of the polled collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DavQuota {
    pub used: u64,
    pub available: u64,
}

/// Extract `quota-used-bytes` and `quota-available-bytes` from the first
/// `<response>`. Returns `Ok(None)` when either property is absent or
/// empty (servers list unsupported properties under a 404 propstat).
pub fn parse_quota_props(body: &[u8]) -> Result<Option<DavQuota>, String> {
    let mut used: Option<u64> = None;
    let mut available: Option<u64> = None;
    let mut responses = 0usize;
    let mut seen_root = false;
    let mut error: Option<String> = None;

    walk(body, |node| match node {
        Node::Open(path) => {
            if root_is(path, "multistatus") {
                seen_root = true;
            } else if ends_with(path, &["multistatus", "response"]) {
                responses += 1;
            }
        }
        Node::Text(path, text) if responses == 1 => {
            let parsed = if ends_with(path, &["prop", "quota-used-bytes"]) {
                Some((&mut used, parse_u64("quota-used-bytes", text)))
            } else if ends_with(path, &["prop", "quota-available-bytes"]) {
                Some((&mut available, parse_u64("quota-available-bytes", text)))
            } else {
                None
            };
            match parsed {
                Some((slot, Ok(v))) => *slot = Some(v),
                Some((_, Err(e))) => error = error.take().or(Some(e)),
                None => {}
            }
        }
        _ => {}
    })?;

    if let Some(e) = error {
        return Err(e);
    }
    if !seen_root {
        return Err("missing <multistatus> root element".to_string());
    }
    Ok(match (used, available) {
        (Some(used), Some(available)) => Some(DavQuota { used, available }),
        _ => None,
    })
}

/// PROPFIND body asking for `props` in the `DAV:` namespace.
///
/// ```xml
/// <?xml version="1.0" encoding="UTF-8"?>
/// <D:propfind xmlns:D="DAV:">
///   <D:prop><D:quota-available-bytes/><D:quota-used-bytes/></D:prop>
/// </D:propfind>
/// ```
pub fn render_propfind(props: &[&str]) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .expect("xml decl");
    let root = BytesStart::new("D:propfind").with_attributes([("xmlns:D", "DAV:")]);
    writer.write_event(Event::Start(root)).expect("start propfind");
    writer
        .write_event(Event::Start(BytesStart::new("D:prop")))
        .expect("start prop");
    for prop in props {
        writer
            .write_event(Event::Empty(BytesStart::new(format!("D:{prop}"))))
            .expect("prop");
    }
    writer
        .write_event(Event::End(BytesEnd::new("D:prop")))
        .expect("end prop");
    writer
        .write_event(Event::End(BytesEnd::new("D:propfind")))
        .expect("end propfind");

    String::from_utf8(writer.into_inner().into_inner()).expect("valid utf-8")
}

// ── StAR storage accounting ─────────────────────────────────────────

/// EMI StAR storage record namespace.
pub const STAR_NAMESPACE: &str = "http://eu-emi.eu/namespaces/2011/02/storagerecord";

/// One `<sr:StorageUsageRecord>`.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageUsageRecord {
    pub record_id: String,
    pub storage_share: Option<String>,
    pub storage_system: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub file_count: Option<u64>,
    pub capacity_used: u64,
    pub capacity_allocated: Option<u64>,
}

fn star_time(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Render a `<sr:StorageUsageRecords>` document.
///
/// ```xml
/// <sr:StorageUsageRecords xmlns:sr="http://eu-emi.eu/namespaces/2011/02/storagerecord">
///   <sr:StorageUsageRecord>
///     <sr:RecordIdentity sr:createTime="2026-10-19T12:00:00Z" sr:recordId="east-..."/>
///     <sr:StorageShare>bucket</sr:StorageShare>
///     <sr:StorageSystem>s3.example.org</sr:StorageSystem>
///     <sr:StartTime>2026-10-19T12:00:00Z</sr:StartTime>
///     <sr:EndTime>2026-10-19T12:00:00Z</sr:EndTime>
///     <sr:FileCount>2500</sr:FileCount>
///     <sr:ResourceCapacityUsed>5000000000</sr:ResourceCapacityUsed>
///     <sr:ResourceCapacityAllocated>1099511627776</sr:ResourceCapacityAllocated>
///   </sr:StorageUsageRecord>
/// </sr:StorageUsageRecords>
/// ```
pub fn render_storage_usage_records(records: &[StorageUsageRecord], created: DateTime<Utc>) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let created = star_time(&created);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .expect("xml decl");
    let root = BytesStart::new("sr:StorageUsageRecords").with_attributes([("xmlns:sr", STAR_NAMESPACE)]);
    writer.write_event(Event::Start(root)).expect("start records");

    for record in records {
        writer
            .write_event(Event::Start(BytesStart::new("sr:StorageUsageRecord")))
            .expect("start record");
        let identity = BytesStart::new("sr:RecordIdentity").with_attributes([
            ("sr:createTime", created.as_str()),
            ("sr:recordId", record.record_id.as_str()),
        ]);
        writer.write_event(Event::Empty(identity)).expect("record identity");

        if let Some(share) = &record.storage_share {
            write_text_element(&mut writer, "sr:StorageShare", share);
        }
        write_text_element(&mut writer, "sr:StorageSystem", &record.storage_system);
        write_text_element(&mut writer, "sr:StartTime", &star_time(&record.start_time));
        write_text_element(&mut writer, "sr:EndTime", &star_time(&record.end_time));
        if let Some(count) = record.file_count {
            write_text_element(&mut writer, "sr:FileCount", &count.to_string());
        }
        write_text_element(&mut writer, "sr:ResourceCapacityUsed", &record.capacity_used.to_string());
        if let Some(allocated) = record.capacity_allocated {
            write_text_element(&mut writer, "sr:ResourceCapacityAllocated", &allocated.to_string());
        }

        writer
            .write_event(Event::End(BytesEnd::new("sr:StorageUsageRecord")))
            .expect("end record");
    }

    writer
        .write_event(Event::End(BytesEnd::new("sr:StorageUsageRecords")))
        .expect("end records");

    String::from_utf8(writer.into_inner().into_inner()).expect("valid utf-8")
}

/// Write a `<tag>text</tag>` element.
fn write_text_element(writer: &mut Writer<Cursor<Vec<u8>>>, tag: &str, text: &str) {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .expect("start tag");
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .expect("text");
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .expect("end tag");
}

// ── CloudWatch GetMetricStatistics ──────────────────────────────────

/// Value of the most recent datapoint for `statistic` (e.g. `Average`),
/// or `None` when the response carries no datapoints.
pub fn parse_latest_datapoint(body: &[u8], statistic: &str) -> Result<Option<f64>, String> {
    let mut latest: Option<(String, f64)> = None;
    let mut timestamp = String::new();
    let mut value: Option<f64> = None;
    let mut seen_root = false;
    let mut error: Option<String> = None;

    walk(body, |node| match node {
        Node::Open(path) => {
            if root_is(path, "GetMetricStatisticsResponse") {
                seen_root = true;
            } else if ends_with(path, &["Datapoints", "member"]) {
                timestamp.clear();
                value = None;
            }
        }
        Node::Text(path, text) => {
            if ends_with(path, &["Datapoints", "member", "Timestamp"]) {
                timestamp = text.to_string();
            } else if ends_with(path, &["Datapoints", "member", statistic]) {
                match text.trim().parse::<f64>() {
                    Ok(v) => value = Some(v),
                    Err(_) => {
                        error = error
                            .take()
                            .or_else(|| Some(format!("{statistic} is not a number: \"{text}\"")))
                    }
                }
            }
        }
        Node::Close(path) => {
            if ends_with(path, &["Datapoints", "member"]) {
                if let Some(v) = value {
                    // ISO-8601 UTC timestamps order lexically.
                    if latest.as_ref().map_or(true, |(ts, _)| timestamp > *ts) {
                        latest = Some((timestamp.clone(), v));
                    }
                }
            }
        }
    })?;

    if let Some(e) = error {
        return Err(e);
    }
    if !seen_root {
        return Err("missing <GetMetricStatisticsResponse> root element".to_string());
    }
    Ok(latest.map(|(_, v)| v))
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_v2_page() {
        let body = br#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>bucket</Name>
  <KeyCount>3</KeyCount>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>tok+1/=</NextContinuationToken>
  <Contents><Key>a.txt</Key><Size>10</Size></Contents>
  <Contents><Key>dir/</Key><Size>0</Size></Contents>
  <Contents><Key>dir/b&amp;c</Key><Size>32</Size></Contents>
</ListBucketResult>"#;
        let page = parse_list_bucket_result(body).unwrap();
        assert!(page.is_truncated);
        assert_eq!(page.next_continuation_token.as_deref(), Some("tok+1/="));
        assert_eq!(page.objects.len(), 3);
        assert_eq!(page.objects[2], ("dir/b&c".to_string(), 32));
        assert_eq!(page.last_key(), Some("dir/b&c"));
    }

    #[test]
    fn test_list_v1_marker() {
        let body = br#"<ListBucketResult><IsTruncated>false</IsTruncated>
            <NextMarker>zzz</NextMarker></ListBucketResult>"#;
        let page = parse_list_bucket_result(body).unwrap();
        assert!(!page.is_truncated);
        assert!(page.objects.is_empty());
        assert_eq!(page.next_marker.as_deref(), Some("zzz"));
    }

    #[test]
    fn test_list_rejects_garbage() {
        assert!(parse_list_bucket_result(b"<Error><Code>x</Code></Error>").is_err());
        assert!(parse_list_bucket_result(b"not xml at all <<<").is_err());
        let bad_size = b"<ListBucketResult><Contents><Key>k</Key><Size>-1</Size></Contents></ListBucketResult>";
        assert!(parse_list_bucket_result(bad_size).is_err());
    }

    #[test]
    fn test_blob_list() {
        let body = br#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults ServiceEndpoint="https://acct.blob.core.windows.net/" ContainerName="c">
  <Blobs>
    <Blob><Name>a</Name><Properties><Content-Length>100</Content-Length></Properties></Blob>
    <Blob><Name>b</Name><Properties><Content-Length>23</Content-Length></Properties></Blob>
  </Blobs>
  <NextMarker>2!abc</NextMarker>
</EnumerationResults>"#;
        let page = parse_blob_list(body).unwrap();
        assert_eq!(page.sizes, vec![100, 23]);
        assert_eq!(page.next_marker.as_deref(), Some("2!abc"));
    }

    #[test]
    fn test_blob_list_last_page() {
        let body = b"<EnumerationResults><Blobs/><NextMarker/></EnumerationResults>";
        let page = parse_blob_list(body).unwrap();
        assert!(page.sizes.is_empty());
        assert_eq!(page.next_marker, None);
    }

    #[test]
    fn test_multistatus_entries() {
        let body = br#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:">
  <d:response><d:href>/data/</d:href>
    <d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop>
    <d:status>HTTP/1.1 200 OK</d:status></d:propstat></d:response>
  <d:response><d:href>/data/f1</d:href>
    <d:propstat><d:prop><d:resourcetype/><d:getcontentlength>700</d:getcontentlength></d:prop>
    <d:status>HTTP/1.1 200 OK</d:status></d:propstat></d:response>
</d:multistatus>"#;
        let entries = parse_multistatus(body).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_collection);
        assert_eq!(entries[0].content_length, None);
        assert!(!entries[1].is_collection);
        assert_eq!(entries[1].content_length, Some(700));
        assert_eq!(entries[1].href, "/data/f1");
    }

    #[test]
    fn test_quota_props() {
        let body = br#"<D:multistatus xmlns:D="DAV:"><D:response><D:href>/data/</D:href>
  <D:propstat><D:prop>
    <D:quota-used-bytes>400</D:quota-used-bytes>
    <D:quota-available-bytes>600</D:quota-available-bytes>
  </D:prop><D:status>HTTP/1.1 200 OK</D:status></D:propstat>
</D:response></D:multistatus>"#;
        let quota = parse_quota_props(body).unwrap().unwrap();
        assert_eq!(quota, DavQuota { used: 400, available: 600 });
    }

    #[test]
    fn test_quota_props_missing() {
        let body = br#"<D:multistatus xmlns:D="DAV:"><D:response><D:href>/data/</D:href>
  <D:propstat><D:prop><D:quota-used-bytes/><D:quota-available-bytes/></D:prop>
  <D:status>HTTP/1.1 404 Not Found</D:status></D:propstat>
</D:response></D:multistatus>"#;
        assert_eq!(parse_quota_props(body).unwrap(), None);
    }

    #[test]
    fn test_render_propfind() {
        let body = render_propfind(&["quota-available-bytes", "quota-used-bytes"]);
        assert!(body.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(body.contains("<D:propfind xmlns:D=\"DAV:\">"));
        assert!(body.contains("<D:quota-available-bytes/>"));
        assert!(body.contains("<D:quota-used-bytes/>"));
    }

    #[test]
    fn test_render_storage_usage_records() {
        use chrono::TimeZone;
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        let records = vec![
            StorageUsageRecord {
                record_id: "east-1".to_string(),
                storage_share: Some("a&b".to_string()),
                storage_system: "s3.example.org".to_string(),
                start_time: at,
                end_time: at,
                file_count: Some(7),
                capacity_used: 100,
                capacity_allocated: Some(1000),
            },
            StorageUsageRecord {
                record_id: "dav-2".to_string(),
                storage_share: None,
                storage_system: "dav.example.org".to_string(),
                start_time: at,
                end_time: at,
                file_count: None,
                capacity_used: 5,
                capacity_allocated: None,
            },
        ];
        let body = render_storage_usage_records(&records, at);
        assert!(body.contains(&format!("<sr:StorageUsageRecords xmlns:sr=\"{STAR_NAMESPACE}\">")));
        assert!(body.contains(
            "<sr:RecordIdentity sr:createTime=\"2026-10-19T12:00:00Z\" sr:recordId=\"east-1\"/>"
        ));
        assert!(body.contains("<sr:StorageShare>a&amp;b</sr:StorageShare>"));
        assert!(body.contains("<sr:StartTime>2026-10-19T12:00:00Z</sr:StartTime>"));
        assert!(body.contains("<sr:FileCount>7</sr:FileCount>"));
        assert!(body.contains("<sr:ResourceCapacityAllocated>1000</sr:ResourceCapacityAllocated>"));
        assert_eq!(body.matches("<sr:StorageUsageRecord>").count(), 2);
        assert_eq!(body.matches("<sr:FileCount>").count(), 1);
        assert_eq!(body.matches("<sr:StorageShare>").count(), 1);
        assert!(body.ends_with("</sr:StorageUsageRecords>"));
    }

    #[test]
    fn test_cloudwatch_latest() {
        let body = br#"<GetMetricStatisticsResponse xmlns="http://monitoring.amazonaws.com/doc/2010-08-01/">
  <GetMetricStatisticsResult>
    <Datapoints>
      <member><Timestamp>2026-10-17T00:00:00Z</Timestamp><Average>100.0</Average><Unit>Bytes</Unit></member>
      <member><Timestamp>2026-10-18T00:00:00Z</Timestamp><Average>250.0</Average><Unit>Bytes</Unit></member>
    </Datapoints>
    <Label>BucketSizeBytes</Label>
  </GetMetricStatisticsResult>
</GetMetricStatisticsResponse>"#;
        assert_eq!(parse_latest_datapoint(body, "Average").unwrap(), Some(250.0));
    }

    #[test]
    fn test_cloudwatch_no_datapoints() {
        let body = b"<GetMetricStatisticsResponse><GetMetricStatisticsResult><Datapoints/></GetMetricStatisticsResult></GetMetricStatisticsResponse>";
        assert_eq!(parse_latest_datapoint(body, "Average").unwrap(), None);
    }
}
