//! Shared state handed to every handler.

use crate::{
    config::LifecycleConfig,
    services::{
        artifact_store::ArtifactStore, cleanup_scheduler::CleanupScheduler, converter::Converter,
    },
};
use std::{path::PathBuf, sync::Arc};

#[derive(Clone)]
pub struct AppState {
    pub store: ArtifactStore,
    pub converter: Arc<dyn Converter>,
    pub cleanup: CleanupScheduler,
    pub lifecycle: LifecycleConfig,

    /// Root under which each conversion gets its own scratch directory.
    pub scratch_root: PathBuf,
}
