use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use castellan_auth::{AdminAccount, Role, Session};
use tracing::info;

use crate::http::errors::ApiError;
use crate::models::{NewAccount, RoleGrant};
use crate::state::ApiState;

pub(crate) async fn list_accounts(State(state): State<Arc<ApiState>>) -> Json<Vec<AdminAccount>> {
    Json(state.directory.list_users().await)
}

pub(crate) async fn create_account(
    State(state): State<Arc<ApiState>>,
    Extension(session): Extension<Session>,
    Json(account): Json<NewAccount>,
) -> Result<(StatusCode, Json<AdminAccount>), ApiError> {
    let created = state
        .directory
        .create(&account.username, &account.password, account.role)
        .await?;
    info!(actor = %session.username, username = %created.username, "account created");
    Ok((StatusCode::CREATED, Json(created)))
}

pub(crate) async fn delete_account(
    State(state): State<Arc<ApiState>>,
    Extension(session): Extension<Session>,
    Path(username): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.directory.delete(&session.username, &username).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn approve_account(
    State(state): State<Arc<ApiState>>,
    Path(username): Path<String>,
    grant: Option<Json<RoleGrant>>,
) -> Result<Json<AdminAccount>, ApiError> {
    let role = grant
        .and_then(|Json(grant)| grant.role)
        .unwrap_or(Role::Viewer);
    Ok(Json(state.directory.approve(&username, role).await?))
}

pub(crate) async fn deny_account(
    State(state): State<Arc<ApiState>>,
    Path(username): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.directory.deny(&username).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn set_account_role(
    State(state): State<Arc<ApiState>>,
    Path(username): Path<String>,
    Json(grant): Json<RoleGrant>,
) -> Result<Json<AdminAccount>, ApiError> {
    let role = grant
        .role
        .ok_or_else(|| ApiError::bad_request("role is required"))?;
    Ok(Json(state.directory.set_role(&username, role).await?))
}
