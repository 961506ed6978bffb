//! Router construction and server host for the API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    Router,
    http::{
        HeaderName, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    middleware,
    routing::{delete, get, patch, post, put},
};
use castellan_telemetry::build_sha;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{Span, info, warn};

use crate::http::accounts::{
    approve_account, create_account, delete_account, deny_account, list_accounts,
    set_account_role,
};
use crate::http::auth::{change_password, login, logout, register, require_admin, require_session};
use crate::http::config::{
    create_backup, get_config, get_raw_config, list_backups, patch_config, put_raw_config,
    restore_backup, validate_config,
};
use crate::http::constants::{HEADER_LAST_EVENT_ID, HEADER_REQUEST_ID};
use crate::http::health::{health, metrics};
use crate::http::logs::stream_logs;
use crate::http::protocols::{list_protocols, patch_protocol, reconcile_firewall};
use crate::http::recordings::{
    delete_recording, download_recording, list_recordings, recordings_usage,
};
use crate::http::service::{
    list_streams, restart_service, service_status, start_service, stop_service, viewer_metrics,
};
use crate::http::sse::stream_events;
use crate::http::streaming_users::{
    add_streaming_user, anonymous_access, delete_streaming_user, edit_streaming_user,
    list_streaming_users, set_public_access, set_test_stream_viewer,
};
use crate::http::telemetry::HttpMetricsLayer;
use crate::http::update::{apply_update, rollback_update, update_status};
use crate::state::ApiState;

/// Axum router wrapper that hosts the Castellan API.
pub struct ApiServer {
    router: Router,
}

impl ApiServer {
    /// Build the router over shared state.
    #[must_use]
    pub fn new(state: Arc<ApiState>) -> Self {
        let cors_layer = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([
                CONTENT_TYPE,
                AUTHORIZATION,
                HeaderName::from_static(HEADER_LAST_EVENT_ID),
            ]);
        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|request: &Request<_>| {
                let method = request.method().clone();
                let uri_path = request.uri().path();
                let request_id = request
                    .headers()
                    .get(HEADER_REQUEST_ID)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("")
                    .to_string();

                tracing::info_span!(
                    "http.request",
                    method = %method,
                    route = %uri_path,
                    request_id = %request_id,
                    build_sha = %build_sha(),
                    status_code = tracing::field::Empty,
                    latency_ms = tracing::field::Empty
                )
            })
            .on_request(|_request: &Request<_>, _span: &Span| {})
            .on_response(
                |response: &axum::response::Response, latency: Duration, span: &Span| {
                    let status = response.status().as_u16();
                    span.record("status_code", status);
                    let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
                    span.record("latency_ms", latency_ms);
                },
            );
        let layered = ServiceBuilder::new()
            .layer(castellan_telemetry::propagate_request_id_layer())
            .layer(castellan_telemetry::set_request_id_layer())
            .layer(trace_layer)
            .layer(HttpMetricsLayer::new(state.metrics.clone()));

        let router = Self::public_routes()
            .merge(Self::session_routes(&state))
            .merge(Self::admin_routes(&state))
            .layer(cors_layer)
            .route_layer(layered)
            .with_state(state);

        Self { router }
    }

    fn public_routes() -> Router<Arc<ApiState>> {
        Router::new()
            .route("/health", get(health))
            .route("/metrics", get(metrics))
            .route("/v1/auth/login", post(login))
            .route("/v1/auth/register", post(register))
    }

    /// Routes open to any signed-in account.
    fn session_routes(state: &Arc<ApiState>) -> Router<Arc<ApiState>> {
        Router::new()
            .route("/v1/auth/logout", post(logout))
            .route("/v1/auth/password", post(change_password))
            .route("/v1/config/validate", post(validate_config))
            .route("/v1/protocols", get(list_protocols))
            .route("/v1/service", get(service_status))
            .route("/v1/streams", get(list_streams))
            .route("/v1/streams/metrics", get(viewer_metrics))
            .route("/v1/recordings", get(list_recordings))
            .route("/v1/recordings/usage", get(recordings_usage))
            .route("/v1/recordings/files/{*name}", get(download_recording))
            .route("/v1/logs", get(stream_logs))
            .route("/v1/events", get(stream_events))
            .route_layer(middleware::from_fn_with_state(
                state.clone(),
                require_session,
            ))
    }

    /// Routes that change managed state or reveal secrets.
    fn admin_routes(state: &Arc<ApiState>) -> Router<Arc<ApiState>> {
        Router::new()
            .route("/v1/admin/users", get(list_accounts).post(create_account))
            .route("/v1/admin/users/{name}", delete(delete_account))
            .route("/v1/admin/users/{name}/approve", post(approve_account))
            .route("/v1/admin/users/{name}/deny", post(deny_account))
            .route("/v1/admin/users/{name}/role", post(set_account_role))
            .route("/v1/config", get(get_config).patch(patch_config))
            .route("/v1/config/raw", get(get_raw_config).put(put_raw_config))
            .route("/v1/config/backups", get(list_backups).post(create_backup))
            .route("/v1/config/backups/{name}/restore", post(restore_backup))
            .route("/v1/protocols/{id}", patch(patch_protocol))
            .route("/v1/firewall/reconcile", post(reconcile_firewall))
            .route(
                "/v1/streaming-users",
                get(list_streaming_users)
                    .post(add_streaming_user)
                    .put(edit_streaming_user)
                    .delete(delete_streaming_user),
            )
            .route("/v1/streaming-users/access", get(anonymous_access))
            .route("/v1/streaming-users/public-access", put(set_public_access))
            .route(
                "/v1/streaming-users/test-stream-viewer",
                put(set_test_stream_viewer),
            )
            .route("/v1/recordings/files/{*name}", delete(delete_recording))
            .route("/v1/service/start", post(start_service))
            .route("/v1/service/stop", post(stop_service))
            .route("/v1/service/restart", post(restart_service))
            .route("/v1/update", get(update_status))
            .route("/v1/update/apply", post(apply_update))
            .route("/v1/update/rollback", post(rollback_update))
            .route_layer(middleware::from_fn_with_state(state.clone(), require_admin))
    }

    /// Serve the API on the provided address until Ctrl-C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if binding the listener or serving requests fails.
    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        info!("Starting API on {}", addr);
        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }

    /// The assembled router, for embedding or in-process requests.
    #[must_use]
    pub fn into_router(self) -> Router {
        self.router
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
