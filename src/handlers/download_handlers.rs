//! One-time download and manual cleanup.

use crate::{
    errors::AppError,
    models::artifact::{ArtifactId, ArtifactPayload},
    services::{artifact_store::RedeemError, expiry_sweeper::sweep_expired},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use serde::Serialize;
use std::{fmt::Write, io::ErrorKind};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub message: String,
    pub removed: usize,
    pub active: usize,
}

/// `GET /download/{file_id}` — stream a converted file, once.
///
/// The artifact is removed a grace period after the stream is handed to the
/// client; the open file handle keeps the bytes readable until then.
pub async fn download_artifact(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Response, AppError> {
    if state.lifecycle.sweep_on_download {
        sweep_expired(&state.store, state.lifecycle.artifact_ttl).await;
    }

    let id: ArtifactId = raw_id
        .parse()
        .map_err(|_| RedeemError::NotFound(raw_id.clone()))?;
    let payload = state.store.redeem(&id).await?;

    let file = match File::open(&payload.file_path).await {
        Ok(file) => file,
        Err(err) => {
            warn!(%id, "artifact file unreadable: {}", err);
            if let Err(remove_err) = state.store.remove(&id).await {
                warn!(%id, "failed to delete artifact storage: {}", remove_err);
            }
            return Err(if err.kind() == ErrorKind::NotFound {
                AppError::bare(StatusCode::NOT_FOUND)
            } else {
                AppError::internal(format!("could not open artifact: {}", err))
            });
        }
    };
    let len = file.metadata().await.ok().map(|m| m.len());

    state.cleanup.schedule(id);
    info!(
        id = %payload.id,
        "serving {}, removal in {:?}",
        payload.declared_name,
        state.cleanup.grace()
    );

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    *response.status_mut() = StatusCode::OK;
    set_download_headers(response.headers_mut(), &payload, len);
    Ok(response)
}

/// `GET /cleanup` — sweep now and report what is left.
pub async fn manual_cleanup(State(state): State<AppState>) -> Json<CleanupResponse> {
    let removed = sweep_expired(&state.store, state.lifecycle.artifact_ttl).await;
    let active = state.store.active_count().await;
    Json(CleanupResponse {
        message: format!("Cleanup completed. Active files: {}", active),
        removed,
        active,
    })
}

fn set_download_headers(headers: &mut HeaderMap, payload: &ArtifactPayload, len: Option<u64>) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&payload.media_kind)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    if let Some(len) = len {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }

    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&content_disposition(&payload.declared_name))
            .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );
}

/// `attachment` with a quoted ASCII `filename`. Names that do not survive
/// that as-is also get an RFC 5987 `filename*` carrying the UTF-8 bytes.
fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| match c {
            ' ' => c,
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() => c,
            _ => '_',
        })
        .collect();
    if fallback == name {
        return format!("attachment; filename=\"{}\"", fallback);
    }

    let mut encoded = String::with_capacity(name.len() * 3);
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
            encoded.push(char::from(byte));
        } else {
            let _ = write!(encoded, "%{:02X}", byte);
        }
    }
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback, encoded
    )
}
