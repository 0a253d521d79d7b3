use axum::routing::{get, post};
use axum::Router;
use queryflow_common::ServerConfig;
use queryflow_orchestrator::Pipeline;
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

pub struct ApiServer {
    state: AppState,
    config: ServerConfig,
}

impl ApiServer {
    pub fn new(pipeline: Arc<Pipeline>, config: ServerConfig) -> Self {
        Self {
            state: AppState { pipeline },
            config,
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/query", post(crate::routes::query::query_stream))
            .route("/plan", post(crate::routes::plan::plan_stream))
            .route("/health", get(crate::routes::health))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        info!("Starting queryflow server on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", e);
        return;
    }
    info!("Ctrl+C received, shutting down");
}
