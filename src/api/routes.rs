//! API routes for the geochain server

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::dispatch::JobService;
use crate::job::{JobKind, JobRequest, ProcessingResponse};

/// Application state
pub struct AppState {
    pub service: JobService,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Path of the statistics endpoints
#[derive(Debug, Deserialize)]
pub struct StatsPath {
    pub project: String,
    pub group: String,
    pub strds: String,
    pub timestamp: String,
}

impl StatsPath {
    fn into_request(self, geometry: String) -> JobRequest {
        JobRequest {
            project: self.project,
            dataset_group: self.group,
            dataset: self.strds,
            timestamp: self.timestamp,
            geometry,
        }
    }
}

#[derive(Clone, Copy)]
enum Mode {
    Sync,
    Async,
}

/// The payload's `http_code` doubles as the HTTP status
fn respond(response: ProcessingResponse) -> Response {
    let status =
        StatusCode::from_u16(response.http_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response)).into_response()
}

async fn area_stats(
    state: Arc<AppState>,
    kind: JobKind,
    mode: Mode,
    path: StatsPath,
    geometry: String,
) -> Response {
    let request = path.into_request(geometry);
    let response = match mode {
        Mode::Sync => state.service.submit_sync(kind, request).await,
        Mode::Async => match state.service.submit_async(kind, request).await {
            Ok(accepted) => accepted,
            Err(rejected) => rejected,
        },
    };
    respond(response)
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn area_stats_sync(
    State(state): State<Arc<AppState>>,
    Path(path): Path<StatsPath>,
    geometry: String,
) -> Response {
    area_stats(state, JobKind::Categorical, Mode::Sync, path, geometry).await
}

pub async fn area_stats_async(
    State(state): State<Arc<AppState>>,
    Path(path): Path<StatsPath>,
    geometry: String,
) -> Response {
    area_stats(state, JobKind::Categorical, Mode::Async, path, geometry).await
}

pub async fn area_stats_univar_sync(
    State(state): State<Arc<AppState>>,
    Path(path): Path<StatsPath>,
    geometry: String,
) -> Response {
    area_stats(state, JobKind::Univariate, Mode::Sync, path, geometry).await
}

pub async fn area_stats_univar_async(
    State(state): State<Arc<AppState>>,
    Path(path): Path<StatsPath>,
    geometry: String,
) -> Response {
    area_stats(state, JobKind::Univariate, Mode::Async, path, geometry).await
}

/// Polling endpoint for asynchronous jobs
pub async fn get_resource(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Response, StatusCode> {
    state
        .service
        .poll(&job_id)
        .await
        .map(respond)
        .ok_or(StatusCode::NOT_FOUND)
}
