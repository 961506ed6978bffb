//! Media server document handlers: structured view and patch, raw text,
//! validation, and backups.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use castellan_config::{BackupInfo, ConfigStore, ConfigView, StructuredPatch};
use castellan_control::ChangeOutcome;
use tracing::info;

use crate::http::errors::ApiError;
use crate::models::{BackupCreated, RawDocument, RawText, ValidationReport};
use crate::state::ApiState;

pub(crate) async fn get_config(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<ConfigView>, ApiError> {
    let document = state.store().read().await?;
    Ok(Json(document.view()?))
}

pub(crate) async fn patch_config(
    State(state): State<Arc<ApiState>>,
    Json(patch): Json<StructuredPatch>,
) -> Result<Json<ChangeOutcome>, ApiError> {
    Ok(Json(state.changes.apply_structured(patch).await?))
}

pub(crate) async fn get_raw_config(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<RawDocument>, ApiError> {
    let store = state.store();
    let revision = store.revision();
    let text = store.read_text().await?;
    Ok(Json(RawDocument { revision, text }))
}

pub(crate) async fn put_raw_config(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<RawText>,
) -> Result<Json<ChangeOutcome>, ApiError> {
    Ok(Json(state.changes.apply_raw(body.text).await?))
}

/// Check a candidate text without committing it.
pub(crate) async fn validate_config(
    Json(body): Json<RawText>,
) -> Result<Json<ValidationReport>, ApiError> {
    ConfigStore::validate_raw(&body.text)?;
    Ok(Json(ValidationReport { valid: true }))
}

pub(crate) async fn list_backups(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<BackupInfo>>, ApiError> {
    Ok(Json(state.store().list_backups().await?))
}

pub(crate) async fn create_backup(
    State(state): State<Arc<ApiState>>,
) -> Result<(StatusCode, Json<BackupCreated>), ApiError> {
    let id = state.store().snapshot_backup().await?;
    info!(backup = %id, "manual backup taken");
    Ok((
        StatusCode::CREATED,
        Json(BackupCreated { id: id.to_string() }),
    ))
}

pub(crate) async fn restore_backup(
    State(state): State<Arc<ApiState>>,
    Path(name): Path<String>,
) -> Result<Json<ChangeOutcome>, ApiError> {
    let id = state.store().backups().parse_id(&name)?;
    Ok(Json(state.changes.restore(id).await?))
}
