//! Upstream client for the vehicle-position feed.

mod client;
mod basic;
pub mod auth;

pub use client::HttpClient;
pub use basic::BasicClient;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use tracing::debug;

use crate::error::FeedError;

pub const PROTOBUF_CONTENT_TYPE: &str = "application/x-google-protobuf";

/// Issues one GET for `url` and returns the body.
///
/// Transport failures are [`FeedError::Network`]; any non-2xx answer is
/// [`FeedError::Upstream`]. No retries.
pub async fn fetch_bytes<C: HttpClient + ?Sized>(client: &C, url: &str) -> Result<Bytes, FeedError> {
    let parsed = url
        .parse::<reqwest::Url>()
        .map_err(|e| FeedError::Network(format!("invalid url '{url}': {e}")))?;
    let mut req = reqwest::Request::new(reqwest::Method::GET, parsed);
    req.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(PROTOBUF_CONTENT_TYPE));

    let resp = client
        .execute(req)
        .await
        .map_err(|e| FeedError::Network(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(FeedError::Upstream {
            status: status.as_u16(),
        });
    }

    let body = resp
        .bytes()
        .await
        .map_err(|e| FeedError::Network(e.to_string()))?;
    debug!(bytes = body.len(), "Feed bytes received");
    Ok(body)
}

/// Source of raw feed payloads consumed by the snapshot cache.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self) -> Result<Bytes, FeedError>;
}

/// The vehicle-position feed at a fixed URL, reached through `client`.
pub struct VehiclePositionFeed<C> {
    client: C,
    url: String,
}

impl<C: HttpClient> VehiclePositionFeed<C> {
    pub fn new(client: C, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl<C: HttpClient> FeedSource for VehiclePositionFeed<C> {
    #[tracing::instrument(skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> Result<Bytes, FeedError> {
        fetch_bytes(&self.client, &self.url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Answers every request with a fixed status and body, recording headers.
    struct Canned {
        status: u16,
        body: Vec<u8>,
        seen: Mutex<Vec<reqwest::header::HeaderMap>>,
    }

    impl Canned {
        fn new(status: u16, body: &[u8]) -> Self {
            Self {
                status,
                body: body.to_vec(),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl HttpClient for Canned {
        async fn execute(&self, req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
            self.seen.lock().unwrap().push(req.headers().clone());
            let resp = axum::http::Response::builder()
                .status(self.status)
                .body(self.body.clone())
                .unwrap();
            Ok(reqwest::Response::from(resp))
        }
    }

    #[tokio::test]
    async fn test_fetch_returns_body_on_success() {
        let client = Canned::new(200, b"payload");
        let body = fetch_bytes(&client, "http://localhost/feed").await.unwrap();
        assert_eq!(&body[..], b"payload");
    }

    #[tokio::test]
    async fn test_fetch_sets_protobuf_content_type() {
        let client = Canned::new(200, b"");
        fetch_bytes(&client, "http://localhost/feed").await.unwrap();

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen[0].get(CONTENT_TYPE).unwrap(), PROTOBUF_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_non_success_status_is_upstream_error() {
        for status in [401, 403, 404, 500, 503] {
            let client = Canned::new(status, b"denied");
            let err = fetch_bytes(&client, "http://localhost/feed").await.unwrap_err();
            assert_eq!(err, FeedError::Upstream { status });
        }
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let client = BasicClient::new(Some(std::time::Duration::from_secs(2))).unwrap();
        // Port 9 (discard) on localhost is closed in test environments.
        let err = fetch_bytes(&client, "http://127.0.0.1:9/feed").await.unwrap_err();
        assert!(matches!(err, FeedError::Network(_)));
    }

    #[tokio::test]
    async fn test_invalid_url_is_network_error() {
        let client = Canned::new(200, b"");
        let err = fetch_bytes(&client, "not a url").await.unwrap_err();
        assert!(matches!(err, FeedError::Network(_)));
    }

    #[tokio::test]
    async fn test_vehicle_position_feed_fetches_its_url() {
        let feed = VehiclePositionFeed::new(Canned::new(200, b"abc"), "http://localhost/vp");
        assert_eq!(feed.url(), "http://localhost/vp");
        assert_eq!(&feed.fetch().await.unwrap()[..], b"abc");
    }
}
