//! HTTP handlers for conversion uploads.
//!
//! Each request gets its own scratch directory. On success the directory is
//! handed to the artifact store together with the converted file; on any
//! failure it is deleted before the error is returned, so a failed request
//! never leaves anything behind.

use crate::{
    errors::AppError,
    models::{
        artifact::ArtifactLocation,
        conversion::{Conversion, ConversionParseError, FileKind},
    },
    state::AppState,
};
use anyhow::Context;
use axum::{
    Json,
    extract::{Multipart, Path, State, multipart::MultipartError},
};
use bytes::Bytes;
use serde::Serialize;
use std::path::{Path as FsPath, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tokio::{fs, task};
use tracing::{info, warn};

/// Prefix of every per-request scratch directory under the scratch root.
pub const SCRATCH_PREFIX: &str = "convert-";

/// Multipart field carrying the uploaded file.
const FILE_FIELD: &str = "file";

/// Reasons an upload is refused before any conversion work starts.
#[derive(Debug, Error)]
pub enum ConvertRequestError {
    #[error("missing multipart field `file`")]
    MissingFile,
    #[error("uploaded file has no filename")]
    MissingFilename,
    #[error("File must be {expected}")]
    WrongExtension { expected: FileKind },
    #[error(transparent)]
    Conversion(#[from] ConversionParseError),
    #[error(transparent)]
    Multipart(#[from] MultipartError),
}

#[derive(Debug, Serialize)]
pub struct ConvertResponse {
    pub file_id: String,
    pub filename: String,
    pub message: String,
}

/// An uploaded file and the name the client gave it.
struct Upload {
    filename: String,
    bytes: Bytes,
}

/// `POST /convert/{source}-to-{target}`
pub async fn convert(
    State(state): State<AppState>,
    Path(conversion): Path<String>,
    multipart: Multipart,
) -> Result<Json<ConvertResponse>, AppError> {
    let conversion: Conversion = conversion.parse().map_err(ConvertRequestError::from)?;
    convert_upload(&state, conversion, multipart).await
}

/// `POST /png2pdf`
pub async fn png_to_pdf(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ConvertResponse>, AppError> {
    convert_upload(&state, Conversion::PNG_TO_PDF, multipart).await
}

/// `POST /pdf2png`
pub async fn pdf_to_png(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ConvertResponse>, AppError> {
    convert_upload(&state, Conversion::PDF_TO_PNG, multipart).await
}

async fn convert_upload(
    state: &AppState,
    conversion: Conversion,
    mut multipart: Multipart,
) -> Result<Json<ConvertResponse>, AppError> {
    let upload = read_upload(&mut multipart).await?;
    if !conversion.source.matches_filename(&upload.filename) {
        return Err(ConvertRequestError::WrongExtension {
            expected: conversion.source,
        }
        .into());
    }
    info!(
        "{}: {} ({} bytes)",
        conversion,
        upload.filename,
        upload.bytes.len()
    );

    let root = state.scratch_root.clone();
    let scratch = task::spawn_blocking(move || {
        tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(root)
    })
    .await
    .context("scratch directory task failed")?
    .context("creating scratch directory")?;

    let file_path = match produce(state, conversion, &upload, scratch.path()).await {
        Ok(path) => path,
        Err(err) => {
            warn!("{} failed for {}: {}", conversion, upload.filename, err);
            discard_scratch(scratch).await;
            return Err(err);
        }
    };

    // The guard stays armed until the store owns the directory, so a request
    // dropped while waiting on the registry still cleans up after itself.
    let filename = conversion.output_filename(&upload.filename);
    let location = ArtifactLocation {
        scratch_dir: scratch.path().to_path_buf(),
        file_path,
    };
    let id = state
        .store
        .register(location, filename.clone(), conversion.target.media_type())
        .await;
    let _ = scratch.keep();
    info!(%id, "{} created", filename);

    Ok(Json(ConvertResponse {
        file_id: id.to_string(),
        filename,
        message: format!(
            "File converted successfully. Use /download/{} to download.",
            id
        ),
    }))
}

/// Store the upload, run the converter off the async runtime and store its
/// output. Returns the path of the converted file.
async fn produce(
    state: &AppState,
    conversion: Conversion,
    upload: &Upload,
    dir: &FsPath,
) -> Result<PathBuf, AppError> {
    let input_path = dir.join(format!("input.{}", conversion.source.extension()));
    fs::write(&input_path, &upload.bytes)
        .await
        .context("writing upload to scratch directory")?;

    let converter = state.converter.clone();
    let input = upload.bytes.clone();
    let output = task::spawn_blocking(move || converter.convert(&input, conversion))
        .await
        .map_err(|e| AppError::internal(format!("Conversion task panicked: {}", e)))??;

    let output_path = dir.join(format!("converted.{}", conversion.target.extension()));
    fs::write(&output_path, &output)
        .await
        .context("writing converted file to scratch directory")?;
    Ok(output_path)
}

/// Delete a scratch directory on the blocking pool, logging any failure.
async fn discard_scratch(scratch: TempDir) {
    let path = scratch.path().to_path_buf();
    let result = task::spawn_blocking(move || scratch.close()).await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(
            "failed to delete scratch directory {}: {}",
            path.display(),
            err
        ),
        Err(err) => warn!(
            "scratch cleanup task for {} failed: {}",
            path.display(),
            err
        ),
    }
}

/// Pull the `file` field out of a multipart body.
async fn read_upload(multipart: &mut Multipart) -> Result<Upload, ConvertRequestError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .filter(|name| !name.is_empty())
            .ok_or(ConvertRequestError::MissingFilename)?;
        let bytes = field.bytes().await?;
        return Ok(Upload { filename, bytes });
    }
    Err(ConvertRequestError::MissingFile)
}
