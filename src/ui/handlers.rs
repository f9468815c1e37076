//! HTTP API handlers

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::coordinator::StatusSnapshot;
use crate::ui::server::AppState;

/// API response wrapper
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Current relay status
pub async fn get_status(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<StatusSnapshot>>) {
    match state.hub.status().await {
        Ok(snapshot) => (StatusCode::OK, Json(ApiResponse::ok(snapshot))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::coordinator::Coordinator;
    use crate::hub::Hub;
    use crate::live::DisabledSink;
    use crate::ui::WebServer;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn call(server: &WebServer, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = server
            .router()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or_default())
    }

    fn server_with_hub() -> (WebServer, crate::hub::HubHandle) {
        let config = AppConfig::default();
        let coordinator = Coordinator::new(&config, Box::new(DisabledSink));
        let (hub, _task) = Hub::spawn(coordinator, 16, Duration::from_millis(10));
        (WebServer::new(&config, hub.clone()), hub)
    }

    #[tokio::test]
    async fn status_reports_idle_relay() {
        let (server, _hub) = server_with_hub();

        let (status, body) = call(&server, "/api/status").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["connections"], 0);
        assert!(body["data"]["current_broadcaster"].is_null());
        assert_eq!(body["data"]["relay"]["chunks_relayed"], 0);
    }

    #[tokio::test]
    async fn status_after_hub_shutdown_is_unavailable() {
        let (server, hub) = server_with_hub();
        hub.shutdown().await.unwrap();
        // Let the hub task drain its mailbox
        while hub.status().await.is_ok() {
            tokio::task::yield_now().await;
        }

        let (status, body) = call(&server, "/api/status").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn live_route_serves_playlist() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.m3u8"), "#EXTM3U\n").unwrap();

        let mut config = AppConfig::default();
        config.live.output_dir = dir.path().to_path_buf();
        let coordinator = Coordinator::new(&config, Box::new(DisabledSink));
        let (hub, _task) = Hub::spawn(coordinator, 16, Duration::from_millis(10));
        let server = WebServer::new(&config, hub);

        let response = server
            .router()
            .oneshot(
                Request::builder()
                    .uri("/live/index.m3u8")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"#EXTM3U\n");
    }
}
