//! Streaming credential handlers. These commit through the registry and leave
//! the restart to the operator, who sees it as `restart_pending`.

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode};
use castellan_config::{AnonymousAccess, CommitReceipt, ConfigError, StreamingUser, UserSelector};
use castellan_events::Event;

use crate::http::errors::ApiError;
use crate::models::{AccessToggle, StreamingUserChange, StreamingUserEdit};
use crate::state::ApiState;

pub(crate) async fn list_streaming_users(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<StreamingUser>>, ApiError> {
    Ok(Json(state.registry.enumerate().await?))
}

pub(crate) async fn add_streaming_user(
    State(state): State<Arc<ApiState>>,
    Json(user): Json<StreamingUser>,
) -> Result<(StatusCode, Json<StreamingUserChange>), ApiError> {
    let receipt = state
        .registry
        .add(user)
        .await
        .map_err(|err| rejected(&state, err))?;
    Ok((StatusCode::CREATED, Json(change(&state, receipt))))
}

pub(crate) async fn edit_streaming_user(
    State(state): State<Arc<ApiState>>,
    Json(edit): Json<StreamingUserEdit>,
) -> Result<Json<StreamingUserChange>, ApiError> {
    let receipt = state
        .registry
        .edit(edit.selector, edit.user)
        .await
        .map_err(|err| rejected(&state, err))?;
    Ok(Json(change(&state, receipt)))
}

pub(crate) async fn delete_streaming_user(
    State(state): State<Arc<ApiState>>,
    Json(selector): Json<UserSelector>,
) -> Result<Json<StreamingUserChange>, ApiError> {
    let receipt = state
        .registry
        .delete(selector)
        .await
        .map_err(|err| rejected(&state, err))?;
    Ok(Json(change(&state, receipt)))
}

pub(crate) async fn anonymous_access(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<AnonymousAccess>, ApiError> {
    Ok(Json(state.registry.access().await?))
}

pub(crate) async fn set_public_access(
    State(state): State<Arc<ApiState>>,
    Json(toggle): Json<AccessToggle>,
) -> Result<Json<StreamingUserChange>, ApiError> {
    let receipt = state
        .registry
        .set_public_access(toggle.enabled)
        .await
        .map_err(|err| rejected(&state, err))?;
    Ok(Json(change(&state, receipt)))
}

pub(crate) async fn set_test_stream_viewer(
    State(state): State<Arc<ApiState>>,
    Json(toggle): Json<AccessToggle>,
) -> Result<Json<StreamingUserChange>, ApiError> {
    let receipt = state
        .registry
        .set_test_stream_viewer(toggle.enabled)
        .await
        .map_err(|err| rejected(&state, err))?;
    Ok(Json(change(&state, receipt)))
}

fn rejected(state: &ApiState, err: ConfigError) -> ApiError {
    if err.is_validation() {
        state.metrics.inc_config_validation_failure();
    }
    err.into()
}

fn change(state: &ApiState, receipt: CommitReceipt) -> StreamingUserChange {
    state.metrics.inc_config_commit(receipt.kind.as_str());
    state.events.publish(Event::ConfigCommitted {
        revision: receipt.revision,
        backup: receipt.backup.to_string(),
        kind: receipt.kind.as_str().to_string(),
    });
    StreamingUserChange {
        receipt,
        restart_pending: state.controller().restart_pending(),
    }
}
