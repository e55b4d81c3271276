//! API server for geochain

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::dispatch::JobService;

use super::routes::{
    area_stats_async, area_stats_sync, area_stats_univar_async, area_stats_univar_sync,
    get_resource, health_check, AppState,
};

const STATS_PREFIX: &str =
    "/projects/:project/datasets/:group/strds/:strds/timestamp/:timestamp";

/// Build the application router around a job service
pub fn router(service: JobService) -> Router {
    let state = Arc::new(AppState { service });

    Router::new()
        .route("/health", get(health_check))
        .route(
            &format!("{}/area_stats_sync", STATS_PREFIX),
            post(area_stats_sync),
        )
        .route(
            &format!("{}/area_stats_async", STATS_PREFIX),
            post(area_stats_async),
        )
        .route(
            &format!("{}/area_stats_univar_sync", STATS_PREFIX),
            post(area_stats_univar_sync),
        )
        .route(
            &format!("{}/area_stats_univar_async", STATS_PREFIX),
            post(area_stats_univar_async),
        )
        .route("/resources/:job_id", get(get_resource))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// API server
pub struct ApiServer {
    config: ServerConfig,
    service: JobService,
}

impl ApiServer {
    pub fn new(config: ServerConfig, service: JobService) -> Self {
        Self { config, service }
    }

    /// Start the API server
    pub async fn start(self) -> Result<()> {
        let app = router(self.service);

        let addr = self.config.addr();
        info!("Starting API server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
