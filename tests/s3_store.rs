//! Integration tests for the S3-compatible object store using wiremock
//!
//! These tests check the REST calls the store issues against a mock
//! endpoint: signed uploads with distribution headers, streamed downloads,
//! paginated listings and error propagation.

use onair::storage::{ObjectStore, S3ObjectStore, SigV4Signer, StorageClient};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use wiremock::matchers::{body_bytes, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn store(server: &MockServer) -> S3ObjectStore {
    S3ObjectStore::new(
        &server.uri(),
        SigV4Signer::new("minio", "minio-secret", "us-east-1"),
    )
    .unwrap()
}

fn listing(keys: &[(&str, u64)], next: Option<&str>) -> String {
    let contents: String = keys
        .iter()
        .map(|(key, size)| {
            format!(
                "<Contents><Key>{key}</Key><LastModified>2025-03-07T12:00:00.000Z</LastModified><Size>{size}</Size></Contents>"
            )
        })
        .collect();
    let (truncated, token) = match next {
        Some(token) => (
            "true",
            format!("<NextContinuationToken>{token}</NextContinuationToken>"),
        ),
        None => ("false", String::new()),
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/"><Name>prod</Name><IsTruncated>{truncated}</IsTruncated>{token}{contents}</ListBucketResult>"#
    )
}

/// Uploads carry a signature, the payload hash and distribution headers
#[tokio::test]
async fn test_put_sends_signed_request_with_headers() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/stream/segment_00001.ts"))
        .and(header("content-type", "video/MP2T"))
        .and(header("cache-control", "public, max-age=86400"))
        .and(header(
            "x-amz-content-sha256",
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824",
        ))
        .and(header_exists("x-amz-date"))
        .and(header_exists("authorization"))
        .and(body_bytes(b"hello".to_vec()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = StorageClient::new(Arc::new(store(&server)), "prod", "stream");
    let result = client
        .publish_bytes(
            "segment_00001.ts",
            b"hello".to_vec(),
            "video/MP2T",
            "public, max-age=86400",
        )
        .await;

    assert!(result.is_ok(), "Upload should succeed: {:?}", result.err());
}

/// The authorization header names the credential scope and signed headers
#[tokio::test]
async fn test_authorization_header_format() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/stream/old.ts"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    store(&server).delete("stream", "old.ts").await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let auth = requests[0]
        .headers
        .get("authorization")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=minio/"));
    assert!(auth.contains("/us-east-1/s3/aws4_request"));
    assert!(auth.contains("SignedHeaders=host;x-amz-content-sha256;x-amz-date"));
}

/// Downloads stream the object body
#[tokio::test]
async fn test_get_streams_body() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/prod/music/a.mp3"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ID3 audio bytes".to_vec()))
        .mount(&server)
        .await;

    let mut reader = store(&server).get("prod", "music/a.mp3").await.unwrap();
    let mut body = Vec::new();
    reader.read_to_end(&mut body).await.unwrap();

    assert_eq!(body, b"ID3 audio bytes");
}

/// A missing object is an error, not an empty stream
#[tokio::test]
async fn test_get_missing_object_fails() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/prod/music/gone.mp3"))
        .respond_with(ResponseTemplate::new(404).set_body_string("<Error><Code>NoSuchKey</Code></Error>"))
        .mount(&server)
        .await;

    let result = store(&server).get("prod", "music/gone.mp3").await;
    let err = result.err().expect("404 should fail");
    assert!(format!("{err:#}").contains("404"));
}

/// Listings follow continuation tokens and come back sorted by key
#[tokio::test]
async fn test_list_follows_continuation_tokens() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/prod"))
        .and(query_param("list-type", "2"))
        .and(query_param("continuation-token", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing(&[("music/a.mp3", 10)], None)))
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/prod"))
        .and(query_param("list-type", "2"))
        .and(query_param("prefix", "music/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(listing(&[("music/c.mp3", 30), ("music/b.mp3", 20)], Some("page-2"))),
        )
        .mount(&server)
        .await;

    let objects = store(&server).list("prod", "music/").await.unwrap();
    let keys: Vec<&str> = objects.iter().map(|o| o.key.as_str()).collect();

    assert_eq!(keys, vec!["music/a.mp3", "music/b.mp3", "music/c.mp3"]);
    assert_eq!(objects[1].size, 20);
    assert!(objects[0].last_modified.is_some());
}

/// Existence checks ask for a single key
#[tokio::test]
async fn test_exists_uses_single_key_listing() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/prod"))
        .and(query_param("prefix", "music/techno/"))
        .and(query_param("max-keys", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing(&[("music/techno/x.mp3", 1)], None)))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/prod"))
        .and(query_param("prefix", "music/jazz/"))
        .and(query_param("max-keys", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing(&[], None)))
        .mount(&server)
        .await;

    let store = store(&server);
    assert!(store.exists("prod", "music/techno/").await.unwrap());
    assert!(!store.exists("prod", "music/jazz/").await.unwrap());
}

/// Server errors on upload surface to the caller
#[tokio::test]
async fn test_put_server_error_fails() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/stream/playlist.m3u8"))
        .respond_with(ResponseTemplate::new(500).set_body_string("InternalError"))
        .mount(&server)
        .await;

    let client = StorageClient::new(Arc::new(store(&server)), "prod", "stream");
    let result = client
        .publish_bytes("playlist.m3u8", b"#EXTM3U\n".to_vec(), "application/vnd.apple.mpegurl", "no-cache")
        .await;

    let err = result.err().expect("500 should fail");
    assert!(format!("{err:#}").contains("500"));
}
