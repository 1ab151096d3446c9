//! HTTP surface: pull, server-sent events and WebSocket delivery of the
//! vehicle-position snapshot.

pub mod pull;
pub mod sse;
pub mod ws;

use axum::Router;
use axum::http::header::{CONTENT_TYPE, HeaderName, REFERER};
use axum::http::Method;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::cache::SnapshotCache;

pub const GEOJSON_PATH: &str = "/sydneytrainsnearme.geojson";
pub const SSE_PATH: &str = "/sydneytrainsnearme.sse";
pub const WS_PATH: &str = "/sydneytrainsnearme.ws";

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub cache: SnapshotCache,
    /// Accept WebSocket upgrades from any origin. On by default so third-party
    /// map clients can connect; this is not an access control.
    pub allow_any_origin: bool,
    /// Cancelled on shutdown; every push connection runs on a child token.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(cache: SnapshotCache) -> Self {
        Self {
            cache,
            allow_any_origin: true,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_allow_any_origin(mut self, allow: bool) -> Self {
        self.allow_any_origin = allow;
        self
    }
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::POST,
            Method::PUT,
            Method::OPTIONS,
        ])
        .allow_headers([
            HeaderName::from_static("x-requested-with"),
            CONTENT_TYPE,
            HeaderName::from_static("username"),
            HeaderName::from_static("password"),
            REFERER,
        ])
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(GEOJSON_PATH, get(pull::vehicle_positions))
        .route(SSE_PATH, get(sse::vehicle_positions))
        .route(WS_PATH, get(ws::vehicle_positions))
        .layer(cors())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves until `shutdown` resolves, then cancels every open push connection
/// and waits for in-flight responses to finish.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let token = state.shutdown.clone();
    info!(addr = %listener.local_addr()?, "Listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("Shutting down, closing push connections");
            token.cancel();
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FeedError;
    use crate::fetch::FeedSource;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Arc;

    struct Empty;

    #[async_trait]
    impl FeedSource for Empty {
        async fn fetch(&self) -> Result<Bytes, FeedError> {
            Ok(Bytes::new())
        }
    }

    #[tokio::test]
    async fn test_serves_geojson_over_tcp_with_cors() {
        let state = AppState::new(SnapshotCache::new(Arc::new(Empty)));
        let shutdown = state.shutdown.clone();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn({
            let shutdown = shutdown.clone();
            serve(listener, state, async move { shutdown.cancelled().await })
        });

        let resp = reqwest::Client::new()
            .get(format!("http://{addr}{GEOJSON_PATH}"))
            .header("Origin", "https://maps.example.com")
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
        assert_eq!(
            resp.text().await.unwrap(),
            r#"{"type":"FeatureCollection","features":[]}"#
        );

        shutdown.cancel();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_preflight_allows_configured_methods() {
        let state = AppState::new(SnapshotCache::new(Arc::new(Empty)));
        let shutdown = state.shutdown.clone();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn({
            let shutdown = shutdown.clone();
            serve(listener, state, async move { shutdown.cancelled().await })
        });

        let resp = reqwest::Client::new()
            .request(reqwest::Method::OPTIONS, format!("http://{addr}{SSE_PATH}"))
            .header("Origin", "https://maps.example.com")
            .header("Access-Control-Request-Method", "GET")
            .header("Access-Control-Request-Headers", "x-requested-with")
            .send()
            .await
            .unwrap();

        assert!(resp.status().is_success());
        let methods = resp
            .headers()
            .get("access-control-allow-methods")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        for method in ["GET", "HEAD", "POST", "PUT", "OPTIONS"] {
            assert!(methods.contains(method), "{method} missing from {methods}");
        }

        shutdown.cancel();
        server.await.unwrap().unwrap();
    }
}
