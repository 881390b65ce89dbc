//! Helper HTTP server
//!
//! A small side channel for operators and players; the stream itself is
//! served from the stream bucket.
//!
//! - `GET /` - status line naming the public stream URL
//! - `GET /listen` - 302 to the public manifest
//! - `GET /now-playing` - latest beacon as JSON
//! - `GET /_metrics` - Prometheus text exposition

use std::future::Future;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower_http::trace::TraceLayer;

use crate::metrics;
use crate::streaming::NowPlayingBoard;

// ============================================================================
// App State
// ============================================================================

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub board: NowPlayingBoard,
    /// Public URL of the stream manifest
    pub stream_url: String,
}

impl AppState {
    pub fn new(board: NowPlayingBoard, public_base_url: &str, manifest_name: &str) -> Self {
        Self {
            board,
            stream_url: format!("{}/{}", public_base_url.trim_end_matches('/'), manifest_name),
        }
    }
}

// ============================================================================
// Router
// ============================================================================

/// Build the router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/listen", get(listen))
        .route("/now-playing", get(now_playing))
        .route("/_metrics", get(prometheus_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    tracing::info!(%addr, "Helper server listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Helper server error")?;

    tracing::info!("Helper server stopped");
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

async fn status(State(state): State<AppState>) -> String {
    format!("Radio Live. Stream: {}", state.stream_url)
}

async fn listen(State(state): State<AppState>) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, state.stream_url)]).into_response()
}

async fn now_playing(State(state): State<AppState>) -> Response {
    match state.board.current() {
        Some(beacon) => Json(beacon).into_response(),
        None => (StatusCode::NOT_FOUND, "Nothing on air yet").into_response(),
    }
}

async fn prometheus_metrics() -> Response {
    match metrics::encode_metrics() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NowPlaying, Track};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> AppState {
        AppState::new(NowPlayingBoard::new(), "https://cdn.example.com/live/", "stream.m3u8")
    }

    async fn get(router: Router, uri: &str) -> Response {
        router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_status_names_stream_url() {
        let response = get(create_router(state()), "/").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_text(response).await,
            "Radio Live. Stream: https://cdn.example.com/live/stream.m3u8"
        );
    }

    #[tokio::test]
    async fn test_listen_redirects() {
        let response = get(create_router(state()), "/listen").await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://cdn.example.com/live/stream.m3u8"
        );
    }

    #[tokio::test]
    async fn test_now_playing() {
        let state = state();
        let router = create_router(state.clone());
        assert_eq!(
            get(router.clone(), "/now-playing").await.status(),
            StatusCode::NOT_FOUND
        );

        let track = Track {
            artist: "Artist".to_string(),
            title: "Song".to_string(),
            ..Default::default()
        };
        state
            .board
            .set(NowPlaying::new(&track, "Night Shift", chrono::Utc::now()));

        let response = get(router, "/now-playing").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("Night Shift"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let _ = metrics::init_metrics();
        metrics::record_track_played();

        let response = get(create_router(state()), "/_metrics").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("onair_tracks_played_total"));
    }
}
