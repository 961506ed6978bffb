//! Recording browser: listing with retention, download, delete, disk usage.

use std::io;
use std::sync::Arc;

use async_stream::try_stream;
use axum::{
    Extension, Json,
    body::{Body, Bytes},
    extract::{Path, State},
    http::{
        HeaderValue,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use castellan_auth::Session;
use castellan_control::{Recording, RecordingUsage};
use futures_util::Stream;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{error, info};

use crate::http::errors::ApiError;
use crate::models::RecordingDeleted;
use crate::state::ApiState;

const CHUNK_BYTES: usize = 64 * 1024;

pub(crate) async fn list_recordings(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<Recording>>, ApiError> {
    Ok(Json(state.recordings.list().await?))
}

pub(crate) async fn recordings_usage(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<RecordingUsage>, ApiError> {
    Ok(Json(state.recordings.usage().await?))
}

pub(crate) async fn download_recording(
    State(state): State<Arc<ApiState>>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let path = state.recordings.locate(&name).await?;
    let file = File::open(&path).await.map_err(|err| {
        error!(error = %err, path = %path.display(), "recording could not be opened");
        ApiError::internal("recording could not be opened")
    })?;
    let len = file.metadata().await.ok().map(|metadata| metadata.len());

    let mut response = Body::from_stream(chunks(file)).into_response();
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(media_type(&name)));
    let file_name = name.rsplit('/').next().unwrap_or(&name).replace('"', "_");
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{file_name}\"")) {
        headers.insert(CONTENT_DISPOSITION, value);
    }
    if let Some(len) = len {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
    }
    Ok(response)
}

pub(crate) async fn delete_recording(
    State(state): State<Arc<ApiState>>,
    Extension(session): Extension<Session>,
    Path(name): Path<String>,
) -> Result<Json<RecordingDeleted>, ApiError> {
    let freed_bytes = state.recordings.delete(&name).await?;
    info!(actor = %session.username, recording = %name, "recording removed by operator");
    Ok(Json(RecordingDeleted { name, freed_bytes }))
}

fn chunks(mut file: File) -> impl Stream<Item = io::Result<Bytes>> + Send {
    try_stream! {
        let mut buffer = vec![0_u8; CHUNK_BYTES];
        loop {
            let read = file.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            yield Bytes::copy_from_slice(&buffer[..read]);
        }
    }
}

fn media_type(name: &str) -> &'static str {
    if name.ends_with(".mp4") {
        "video/mp4"
    } else if name.ends_with(".ts") {
        "video/mp2t"
    } else {
        "application/octet-stream"
    }
}
