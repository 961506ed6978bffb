use std::sync::Arc;

use axum::{Extension, Json, extract::State, http::StatusCode};
use castellan_auth::Session;
use castellan_updater::SwapReport;
use tracing::{info, warn};

use crate::http::errors::ApiError;
use crate::models::UpdateStatus;
use crate::state::ApiState;

pub(crate) async fn update_status(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<UpdateStatus>, ApiError> {
    let installed = state.updater.installed().await?;
    // An unreachable feed still leaves the installed version worth showing.
    let available = match state.updater.check_latest().await {
        Ok(release) => release,
        Err(err) => {
            warn!(error = ?err, "release feed check failed");
            None
        }
    };
    Ok(Json(UpdateStatus {
        installed,
        available,
    }))
}

pub(crate) async fn apply_update(
    State(state): State<Arc<ApiState>>,
    Extension(session): Extension<Session>,
) -> Result<(StatusCode, Json<SwapReport>), ApiError> {
    let release = state
        .updater
        .check_latest()
        .await?
        .ok_or_else(|| ApiError::conflict("no newer release is published"))?;
    info!(actor = %session.username, version = %release.version, "update requested");
    let report = state.updater.apply(&release).await?;
    Ok((StatusCode::ACCEPTED, Json(report)))
}

pub(crate) async fn rollback_update(
    State(state): State<Arc<ApiState>>,
    Extension(session): Extension<Session>,
) -> Result<(StatusCode, Json<SwapReport>), ApiError> {
    info!(actor = %session.username, "update rollback requested");
    let report = state.updater.rollback().await?;
    Ok((StatusCode::ACCEPTED, Json(report)))
}
