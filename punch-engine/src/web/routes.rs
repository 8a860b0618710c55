//! HTTP route handlers.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tracing::{info, warn};

use super::dto::*;
use super::state::AppState;
use crate::domain::StationId;
use crate::pipeline::{Disposition, PipelineError};
use crate::resolver::DirectoryError;
use crate::status::StationStatus;
use crate::transport::SessionCommand;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stations", get(list_stations))
        .route("/stations/:id", get(get_station))
        .route(
            "/stations/:id/backup",
            post(start_backup).delete(cancel_backup),
        )
        .route("/pending", get(list_pending))
        .route("/pending/:id/assign", post(assign_pending))
        .route("/pending/:id/retry", post(retry_pending))
        .with_state(state)
}

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

async fn list_stations(State(state): State<AppState>) -> Json<StationsResponse> {
    let board = state.status.borrow();
    Json(StationsResponse {
        stations: board.stations.values().cloned().collect(),
        engine: board.engine,
        dropped_frames: board.dropped_frames(),
    })
}

async fn get_station(
    State(state): State<AppState>,
    Path(id): Path<u16>,
) -> Result<Json<StationStatus>, AppError> {
    state
        .status
        .borrow()
        .station(StationId(id))
        .cloned()
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("station {id} not configured")))
}

async fn list_pending(State(state): State<AppState>) -> Result<Json<PendingResponse>, AppError> {
    let pending = state.pipeline.pending().await?;
    Ok(Json(PendingResponse {
        pending: pending.into_iter().map(PendingView::from).collect(),
    }))
}

async fn assign_pending(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<AssignRequest>,
) -> Result<Json<Disposition>, AppError> {
    info!(pending = id, run = %request.run_id, "operator assignment");
    Ok(Json(state.pipeline.assign(id, request.run_id).await?))
}

async fn retry_pending(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Disposition>, AppError> {
    Ok(Json(state.pipeline.retry(id).await?))
}

async fn start_backup(
    State(state): State<AppState>,
    Path(id): Path<u16>,
) -> Result<(StatusCode, Json<BackupResponse>), AppError> {
    command(&state, StationId(id), SessionCommand::DownloadBackup, "download").await
}

async fn cancel_backup(
    State(state): State<AppState>,
    Path(id): Path<u16>,
) -> Result<(StatusCode, Json<BackupResponse>), AppError> {
    command(&state, StationId(id), SessionCommand::CancelBackup, "cancel").await
}

async fn command(
    state: &AppState,
    station: StationId,
    command: SessionCommand,
    requested: &'static str,
) -> Result<(StatusCode, Json<BackupResponse>), AppError> {
    let handle = state
        .stations
        .get(&station)
        .ok_or_else(|| AppError::NotFound(format!("station {station} not configured")))?;
    if !handle.send(command).await {
        return Err(AppError::Unavailable(format!(
            "station {station} session has ended"
        )));
    }
    info!(station = %station, ?command, "backup command sent");
    Ok((
        StatusCode::ACCEPTED,
        Json(BackupResponse { station, requested }),
    ))
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    Unavailable(String),
    Internal(String),
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::UnknownPending(_) | PipelineError::Directory(DirectoryError::UnknownRun(_)) => {
                AppError::NotFound(err.to_string())
            }
            PipelineError::Directory(DirectoryError::Unavailable(_)) | PipelineError::Stopped => {
                AppError::Unavailable(err.to_string())
            }
            PipelineError::Directory(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Internal(msg) => {
                warn!(error = %msg, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
