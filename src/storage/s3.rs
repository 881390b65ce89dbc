//! S3-compatible object store
//!
//! Path-style requests (`<endpoint>/<bucket>/<key>`) signed with AWS
//! Signature Version 4, which AWS S3, Backblaze B2 and MinIO all accept.
//!
//! ```text
//!   ObjectStore call
//!        │
//!        ▼
//!   canonical request ──► string to sign ──► HMAC chain ──► Authorization
//!        │
//!        ▼
//!   reqwest ──► endpoint
//! ```
//!
//! Downloads are streamed; uploads are buffered so the payload hash can be
//! signed (stream artifacts are a few hundred kilobytes).

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{header, Method, Url};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;

use super::object_store::{ObjectInfo, ObjectReader, ObjectStore};
use crate::config::StorageConfig;

type HmacSha256 = Hmac<Sha256>;

/// Everything except the unreserved characters of RFC 3986
const URI_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// SHA-256 of an empty body
pub const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";

// ============================================================================
// Signing
// ============================================================================

/// URI-encode each path segment, keeping the slashes
pub fn canonical_uri(path: &str) -> String {
    path.split('/')
        .map(|segment| utf8_percent_encode(segment, URI_ENCODE).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Encode and sort query parameters
pub fn canonical_query(params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| {
            (
                utf8_percent_encode(k, URI_ENCODE).to_string(),
                utf8_percent_encode(v, URI_ENCODE).to_string(),
            )
        })
        .collect();
    encoded.sort();

    encoded
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac(key: &[u8], data: &str) -> Result<Vec<u8>> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| anyhow!("invalid signing key: {e}"))?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// AWS Signature Version 4 request signer
#[derive(Clone)]
pub struct SigV4Signer {
    access_key_id: String,
    secret_access_key: String,
    region: String,
}

impl std::fmt::Debug for SigV4Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigV4Signer")
            .field("access_key_id", &self.access_key_id)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl SigV4Signer {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            region: region.into(),
        }
    }

    /// Compute the `Authorization` header value
    ///
    /// `headers` must contain every header to be signed, including `host`,
    /// `x-amz-date` and `x-amz-content-sha256`.
    pub fn authorization(
        &self,
        method: &str,
        path: &str,
        query: &[(String, String)],
        headers: &[(String, String)],
        payload_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<String> {
        let mut headers: Vec<(String, String)> = headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.trim().to_string()))
            .collect();
        headers.sort();

        let canonical_headers: String = headers
            .iter()
            .map(|(name, value)| format!("{name}:{value}\n"))
            .collect();
        let signed_headers = headers
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let canonical_request = format!(
            "{method}\n{}\n{}\n{canonical_headers}\n{signed_headers}\n{payload_hash}",
            canonical_uri(path),
            canonical_query(query),
        );

        let date = at.format("%Y%m%d").to_string();
        let scope = format!("{date}/{}/{SERVICE}/aws4_request", self.region);
        let string_to_sign = format!(
            "{ALGORITHM}\n{}\n{scope}\n{}",
            at.format("%Y%m%dT%H%M%SZ"),
            sha256_hex(canonical_request.as_bytes()),
        );

        let k_date = hmac(format!("AWS4{}", self.secret_access_key).as_bytes(), &date)?;
        let k_region = hmac(&k_date, &self.region)?;
        let k_service = hmac(&k_region, SERVICE)?;
        let k_signing = hmac(&k_service, "aws4_request")?;
        let signature = hex::encode(hmac(&k_signing, &string_to_sign)?);

        Ok(format!(
            "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            self.access_key_id
        ))
    }
}

// ============================================================================
// Listing
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ListBucketResult {
    contents: Vec<ListEntry>,
    is_truncated: bool,
    next_continuation_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ListEntry {
    key: String,
    size: u64,
    last_modified: Option<String>,
}

/// One page of a ListObjectsV2 response
#[derive(Debug, Default, PartialEq)]
pub struct ListPage {
    pub objects: Vec<ObjectInfo>,
    /// Token for the next page, if the listing was truncated
    pub next_token: Option<String>,
}

/// Parse a ListObjectsV2 XML document
pub fn parse_list_page(xml: &str) -> Result<ListPage> {
    let result: ListBucketResult =
        quick_xml::de::from_str(xml).context("Malformed ListObjectsV2 response")?;

    let objects = result
        .contents
        .into_iter()
        .map(|entry| ObjectInfo {
            key: entry.key,
            size: entry.size,
            last_modified: entry
                .last_modified
                .as_deref()
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.with_timezone(&Utc)),
        })
        .collect();

    let next_token = if result.is_truncated {
        result.next_continuation_token
    } else {
        None
    };

    Ok(ListPage {
        objects,
        next_token,
    })
}

// ============================================================================
// Store
// ============================================================================

/// Object store speaking the S3 REST API
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: reqwest::Client,
    /// `scheme://host[:port]`
    origin: String,
    host: String,
    /// Path prefix of the endpoint, without trailing slash
    base_path: String,
    signer: SigV4Signer,
}

impl S3ObjectStore {
    pub fn new(endpoint: &str, signer: SigV4Signer) -> Result<Self> {
        let url = Url::parse(endpoint).with_context(|| format!("Invalid endpoint '{endpoint}'"))?;
        let host_name = url
            .host_str()
            .ok_or_else(|| anyhow!("endpoint '{endpoint}' has no host"))?;
        let host = match url.port() {
            Some(port) => format!("{host_name}:{port}"),
            None => host_name.to_string(),
        };

        let client = reqwest::Client::builder()
            .user_agent(concat!("onair/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            origin: format!("{}://{host}", url.scheme()),
            host,
            base_path: url.path().trim_end_matches('/').to_string(),
            signer,
        })
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        Self::new(
            &config.endpoint,
            SigV4Signer::new(
                &config.access_key_id,
                &config.secret_access_key,
                &config.region,
            ),
        )
    }

    fn path(&self, bucket: &str, key: Option<&str>) -> String {
        match key {
            Some(key) => format!("{}/{bucket}/{key}", self.base_path),
            None => format!("{}/{bucket}", self.base_path),
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Vec<u8>,
        extra_headers: &[(header::HeaderName, &str)],
    ) -> Result<reqwest::Response> {
        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = if body.is_empty() {
            EMPTY_PAYLOAD_SHA256.to_string()
        } else {
            sha256_hex(&body)
        };

        let signed = [
            ("host".to_string(), self.host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        let authorization = self.signer.authorization(
            method.as_str(),
            path,
            query,
            &signed,
            &payload_hash,
            now,
        )?;

        let mut url = format!("{}{}", self.origin, canonical_uri(path));
        if !query.is_empty() {
            url.push('?');
            url.push_str(&canonical_query(query));
        }

        let mut request = self
            .client
            .request(method.clone(), &url)
            .header("x-amz-date", amz_date)
            .header("x-amz-content-sha256", payload_hash)
            .header(header::AUTHORIZATION, authorization);
        for (name, value) in extra_headers {
            request = request.header(name.clone(), *value);
        }
        if !body.is_empty() || method == Method::PUT {
            request = request.body(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("{method} {path} failed"))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let detail = response.text().await.unwrap_or_default();
        let detail: String = detail.chars().take(200).collect();
        Err(anyhow!("{method} {path} returned {status}: {detail}"))
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<&str>,
        max_keys: Option<usize>,
    ) -> Result<ListPage> {
        let mut query = vec![
            ("list-type".to_string(), "2".to_string()),
            ("prefix".to_string(), prefix.to_string()),
        ];
        if let Some(token) = token {
            query.push(("continuation-token".to_string(), token.to_string()));
        }
        if let Some(max) = max_keys {
            query.push(("max-keys".to_string(), max.to_string()));
        }

        let response = self
            .send(Method::GET, &self.path(bucket, None), &query, Vec::new(), &[])
            .await?;
        let xml = response.text().await.context("Failed to read listing")?;
        parse_list_page(&xml)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let mut objects = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let page = self.list_page(bucket, prefix, token.as_deref(), None).await?;
            objects.extend(page.objects);
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<ObjectReader> {
        let path = self.path(bucket, Some(key));
        let response = match self.send(Method::GET, &path, &[], Vec::new(), &[]).await {
            Ok(response) => response,
            Err(e) => return Err(e.context(format!("Failed to open object {bucket}/{key}"))),
        };

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::new(StreamReader::new(Box::pin(stream))))
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        mut body: ObjectReader,
        content_type: &str,
        cache_control: &str,
    ) -> Result<()> {
        let mut buf = Vec::new();
        body.read_to_end(&mut buf)
            .await
            .with_context(|| format!("Failed to read upload body for {bucket}/{key}"))?;

        let mut headers = vec![(header::CONTENT_TYPE, content_type)];
        if !cache_control.is_empty() {
            headers.push((header::CACHE_CONTROL, cache_control));
        }

        self.send(Method::PUT, &self.path(bucket, Some(key)), &[], buf, &headers)
            .await
            .with_context(|| format!("Failed to upload object {bucket}/{key}"))?;
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        match self
            .send(Method::DELETE, &self.path(bucket, Some(key)), &[], Vec::new(), &[])
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => Err(e.context(format!("Failed to delete object {bucket}/{key}"))),
        }
    }

    async fn exists(&self, bucket: &str, prefix: &str) -> Result<bool> {
        let page = self.list_page(bucket, prefix, None, Some(1)).await?;
        Ok(!page.objects.is_empty())
    }
}
