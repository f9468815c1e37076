//! HTTP and WebSocket server

use axum::{routing::get, Router};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::hub::HubHandle;
use crate::ui::{handlers, websocket};

/// Shared state for every request
pub struct AppState {
    pub hub: HubHandle,
    pub outbox_capacity: usize,
}

pub struct WebServer {
    bind_address: String,
    static_dir: PathBuf,
    live_dir: Option<PathBuf>,
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(config: &AppConfig, hub: HubHandle) -> Self {
        Self {
            bind_address: config.bind_address(),
            static_dir: config.server.static_dir.clone(),
            live_dir: config
                .live
                .enabled
                .then(|| config.live.output_dir.clone()),
            state: Arc::new(AppState {
                hub,
                outbox_capacity: config.server.outbox_capacity,
            }),
        }
    }

    /// Build the router.
    ///
    /// | Path | Description |
    /// |------|-------------|
    /// | `/ws` | Client WebSocket |
    /// | `/api/status` | JSON status snapshot |
    /// | `/live/*` | HLS playlist and segments |
    /// | `/*` | Static client files |
    pub fn router(&self) -> Router {
        let mut app = Router::new()
            .route("/ws", get(websocket::ws_handler))
            .route("/api/status", get(handlers::get_status));

        if let Some(dir) = &self.live_dir {
            app = app.nest_service("/live", ServeDir::new(dir));
        }

        app.fallback_service(ServeDir::new(&self.static_dir))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(&self.bind_address).await?;
        tracing::info!("Listening on http://{}", listener.local_addr()?);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
