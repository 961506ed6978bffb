use std::sync::Arc;

use axum::{Extension, Json, extract::State};
use castellan_auth::Session;
use castellan_control::{CycleReport, ServiceStatus, StreamInfo, ViewerMetrics};
use tracing::info;

use crate::http::errors::ApiError;
use crate::state::ApiState;

pub(crate) async fn service_status(State(state): State<Arc<ApiState>>) -> Json<ServiceStatus> {
    Json(state.controller().status())
}

pub(crate) async fn start_service(
    State(state): State<Arc<ApiState>>,
    Extension(session): Extension<Session>,
) -> Result<Json<CycleReport>, ApiError> {
    info!(actor = %session.username, "operator start");
    Ok(Json(state.controller().start().await?))
}

pub(crate) async fn stop_service(
    State(state): State<Arc<ApiState>>,
    Extension(session): Extension<Session>,
) -> Result<Json<CycleReport>, ApiError> {
    info!(actor = %session.username, "operator stop");
    Ok(Json(state.controller().stop().await?))
}

pub(crate) async fn restart_service(
    State(state): State<Arc<ApiState>>,
    Extension(session): Extension<Session>,
) -> Result<Json<CycleReport>, ApiError> {
    info!(actor = %session.username, "operator restart");
    Ok(Json(state.controller().request_restart().await?))
}

pub(crate) async fn list_streams(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<StreamInfo>>, ApiError> {
    Ok(Json(state.streams.streams().await?))
}

pub(crate) async fn viewer_metrics(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<ViewerMetrics>, ApiError> {
    Ok(Json(state.streams.viewer_metrics().await?))
}
