//! Info, health & readiness handlers.
//!
//! - GET /        -> service info and supported conversions
//! - GET /health  -> simple liveness
//! - GET /readyz  -> readiness that checks scratch disk I/O

use crate::{
    models::conversion::{Conversion, FileKind},
    services::artifact_store::StoreStats,
    state::AppState,
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use tokio::fs;
use uuid::Uuid;

/// `GET /`
pub async fn root() -> impl IntoResponse {
    let conversions = FileKind::ALL
        .into_iter()
        .flat_map(|source| {
            FileKind::ALL
                .into_iter()
                .filter_map(move |target| Conversion::new(source, target).ok())
        })
        .map(|c| c.to_string())
        .collect();

    Json(InfoResponse {
        message: "PNG2PDF API is running".into(),
        status: "ok".into(),
        conversions,
    })
}

/// `GET /health`
///
/// Very small liveness check. This endpoint should be cheap and never
/// perform I/O.
pub async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".into(),
            service: "png2pdf-api".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Performs a best-effort write/read/delete against the scratch root and
/// reports the artifact registry counts. HTTP 200 when the disk check
/// passes, HTTP 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let tmp_path = state
        .scratch_root
        .join(format!(".readyz-{}", Uuid::new_v4()));
    let disk = match fs::write(&tmp_path, b"readyz").await {
        Ok(_) => match fs::read(&tmp_path).await {
            Ok(bytes) if bytes == b"readyz" => match fs::remove_file(&tmp_path).await {
                Ok(_) => CheckStatus::ok(),
                Err(e) => CheckStatus {
                    ok: true,
                    error: Some(format!("could not remove tmp file: {}", e)),
                },
            },
            Ok(_) => {
                let _ = fs::remove_file(&tmp_path).await;
                CheckStatus::failed("file content mismatch".into())
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp_path).await;
                CheckStatus::failed(format!("could not read tmp file: {}", e))
            }
        },
        Err(e) => CheckStatus::failed(format!("could not write tmp file: {}", e)),
    };

    let status = if disk.ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ReadyResponse {
        status: if disk.ok { "ok".into() } else { "error".into() },
        disk,
        artifacts: state.store.stats().await,
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct InfoResponse {
    message: String,
    status: String,
    conversions: Vec<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    service: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    disk: CheckStatus,
    artifacts: StoreStats,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}
