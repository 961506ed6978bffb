//! Live log streaming endpoint.
//!
//! # Design
//! - One tail process per connected client; dropping the response body drops
//!   the subscription, which kills the tail.
//! - Emit keep-alive frames to keep proxies from closing idle streams.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{self, Sse},
};
use futures_util::{Stream, StreamExt};

use crate::http::constants::SSE_KEEP_ALIVE_SECS;
use crate::http::errors::ApiError;
use crate::state::ApiState;

pub(crate) async fn stream_logs(
    State(state): State<Arc<ApiState>>,
) -> Result<Sse<impl Stream<Item = Result<sse::Event, Infallible>> + Send>, ApiError> {
    let subscription = state.logs.subscribe()?;
    let stream = build_log_stream(subscription);

    Ok(Sse::new(stream).keep_alive(
        sse::KeepAlive::new()
            .interval(Duration::from_secs(SSE_KEEP_ALIVE_SECS))
            .text("keep-alive"),
    ))
}

fn build_log_stream(
    lines: impl Stream<Item = String> + Send,
) -> impl Stream<Item = Result<sse::Event, Infallible>> + Send {
    lines.map(|line| Ok(sse::Event::default().event("log").data(line)))
}
