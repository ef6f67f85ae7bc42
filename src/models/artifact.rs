//! Represents a converted file awaiting its single download.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, str::FromStr};
use tokio::time::Instant;
use uuid::Uuid;

/// Opaque capability used to redeem an artifact.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ArtifactId(Uuid);

impl ArtifactId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ArtifactId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ArtifactId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle position of an artifact.
///
/// `Removed` is terminal. Removed artifacts no longer live in the store; the
/// state is only observed on the values handed back by removal operations.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactState {
    Available,
    Consumed,
    Removed,
}

/// Where an artifact's bytes live on disk.
///
/// `scratch_dir` is owned by the artifact: removing the artifact deletes the
/// whole directory, including the upload that produced `file_path`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactLocation {
    pub scratch_dir: PathBuf,
    pub file_path: PathBuf,
}

/// A converted file tracked by the artifact store.
#[derive(Clone, Debug)]
pub struct Artifact {
    /// Identifier handed to the client.
    pub id: ArtifactId,

    /// Backing storage.
    pub location: ArtifactLocation,

    /// Filename suggested to the downloader.
    pub declared_name: String,

    /// MIME type of the converted bytes.
    pub media_kind: String,

    pub state: ArtifactState,

    /// Monotonic registration time; drives expiry.
    pub created_at: Instant,

    /// Wall-clock registration time, for logs and diagnostics.
    pub registered_at: DateTime<Utc>,
}

impl Artifact {
    /// Descriptor returned to a successful redeemer.
    pub fn payload(&self) -> ArtifactPayload {
        ArtifactPayload {
            id: self.id,
            file_path: self.location.file_path.clone(),
            declared_name: self.declared_name.clone(),
            media_kind: self.media_kind.clone(),
        }
    }
}

/// What a download needs to stream an artifact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactPayload {
    pub id: ArtifactId,
    pub file_path: PathBuf,
    pub declared_name: String,
    pub media_kind: String,
}
