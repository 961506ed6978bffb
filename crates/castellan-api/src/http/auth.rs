//! Session middleware and the login, registration and password handlers.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::State,
    http::{Request, StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use castellan_auth::{AdminAccount, AuthError, Session};
use castellan_events::Event;
use tracing::{debug, info};

use crate::http::constants::{BEARER_PREFIX, SESSION_QUERY_KEY};
use crate::http::errors::ApiError;
use crate::models::{Credentials, PasswordChange};
use crate::state::ApiState;

/// Resolve the caller's session and attach it to the request.
pub(crate) async fn require_session(
    State(state): State<Arc<ApiState>>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let session = resolve_session(&state, &req)?;
    req.extensions_mut().insert(session);
    Ok(next.run(req).await)
}

/// As [`require_session`], and reject callers without the administrator role.
pub(crate) async fn require_admin(
    State(state): State<Arc<ApiState>>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let session = resolve_session(&state, &req)?;
    if !session.is_admin() {
        debug!(username = %session.username, path = %req.uri().path(), "viewer denied");
        return Err(ApiError::forbidden("administrator role required"));
    }
    req.extensions_mut().insert(session);
    Ok(next.run(req).await)
}

fn resolve_session(state: &ApiState, req: &Request<axum::body::Body>) -> Result<Session, ApiError> {
    let token = extract_token(req)
        .ok_or_else(|| ApiError::unauthorized("missing bearer token or session parameter"))?;
    Ok(state.directory.session(&token)?)
}

pub(crate) fn extract_token(req: &Request<axum::body::Body>) -> Option<String> {
    let header_value = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(value) = header_value {
        return Some(value.to_string());
    }

    // EventSource cannot set headers, so SSE clients pass the token in the query.
    if let Some(query) = req.uri().query() {
        for pair in query.split('&') {
            if let Some(value) = pair
                .strip_prefix(SESSION_QUERY_KEY)
                .and_then(|rest| rest.strip_prefix('='))
                && !value.is_empty()
            {
                return Some(value.to_string());
            }
        }
    }
    None
}

pub(crate) async fn login(
    State(state): State<Arc<ApiState>>,
    Json(credentials): Json<Credentials>,
) -> Result<Json<Session>, ApiError> {
    let session = state
        .directory
        .authenticate(&credentials.username, &credentials.password)
        .await?;
    info!(username = %session.username, role = session.role.as_str(), "login");
    Ok(Json(session))
}

pub(crate) async fn register(
    State(state): State<Arc<ApiState>>,
    Json(credentials): Json<Credentials>,
) -> Result<(StatusCode, Json<AdminAccount>), ApiError> {
    let account = state
        .directory
        .register(&credentials.username, &credentials.password)
        .await?;
    state.events.publish(Event::RegistrationPending {
        username: account.username.clone(),
    });
    Ok((StatusCode::ACCEPTED, Json(account)))
}

pub(crate) async fn logout(
    State(state): State<Arc<ApiState>>,
    Extension(session): Extension<Session>,
) -> StatusCode {
    state.directory.logout(&session.token);
    StatusCode::NO_CONTENT
}

pub(crate) async fn change_password(
    State(state): State<Arc<ApiState>>,
    Extension(session): Extension<Session>,
    Json(change): Json<PasswordChange>,
) -> Result<StatusCode, ApiError> {
    match state
        .directory
        .change_password(&session.username, &change.current, &change.new)
        .await
    {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        // A wrong current password must not read as a lost session.
        Err(AuthError::InvalidCredentials) => {
            Err(ApiError::bad_request("current password is incorrect"))
        }
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(uri: &str, bearer: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = bearer {
            builder = builder.header(AUTHORIZATION, format!("{BEARER_PREFIX}{token}"));
        }
        builder.body(Body::empty()).unwrap_or_default()
    }

    #[test]
    fn bearer_header_wins_over_query() {
        let req = request("/v1/events?session=from-query", Some("from-header"));
        assert_eq!(extract_token(&req).as_deref(), Some("from-header"));
    }

    #[test]
    fn session_query_is_accepted() {
        let req = request("/v1/logs?foo=1&session=abc", None);
        assert_eq!(extract_token(&req).as_deref(), Some("abc"));
    }

    #[test]
    fn lookalike_query_keys_are_ignored() {
        let req = request("/v1/logs?sessionx=abc&session=", None);
        assert_eq!(extract_token(&req), None);
    }
}
