use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};
use castellan_config::{Protocol, ProtocolPatch, ProtocolSetting, StructuredPatch};
use castellan_control::{ChangeOutcome, ReconcileReport};

use crate::http::errors::ApiError;
use crate::models::ProtocolUpdate;
use crate::state::ApiState;

pub(crate) async fn list_protocols(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<ProtocolSetting>>, ApiError> {
    let document = state.store().read().await?;
    Ok(Json(document.protocols()?))
}

pub(crate) async fn patch_protocol(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(update): Json<ProtocolUpdate>,
) -> Result<Json<ChangeOutcome>, ApiError> {
    let protocol = Protocol::parse(&id)
        .ok_or_else(|| ApiError::not_found(format!("unknown protocol '{id}'")))?;
    if update.enabled.is_none() && update.port.is_none() && update.encryption.is_none() {
        return Err(ApiError::bad_request("no protocol fields to change"));
    }
    let patch = StructuredPatch::Protocol(ProtocolPatch {
        protocol,
        enabled: update.enabled,
        port: update.port,
        encryption: update.encryption,
    });
    Ok(Json(state.changes.apply_structured(patch).await?))
}

pub(crate) async fn reconcile_firewall(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<ReconcileReport>, ApiError> {
    Ok(Json(state.changes.reconcile_firewall().await?))
}
