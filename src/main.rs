use anyhow::{Context, Result};
use axum::{Router, extract::DefaultBodyLimit};
use std::{io::ErrorKind, path::Path, sync::Arc};
use tokio::{fs, net::TcpListener};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use handlers::convert_handlers::SCRATCH_PREFIX;
use services::{
    artifact_store::ArtifactStore, cleanup_scheduler::CleanupScheduler,
    converter::PdfiumConverter, expiry_sweeper,
};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config ---
    let cfg = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting png-pdf-converter with config: {:?}", cfg);

    // --- Ensure scratch directory exists and is empty of stale work ---
    fs::create_dir_all(&cfg.scratch_dir)
        .await
        .with_context(|| format!("creating scratch directory {}", cfg.scratch_dir.display()))?;
    let stale = remove_stale_scratch(&cfg.scratch_dir).await?;
    if stale > 0 {
        tracing::info!("Removed {} stale scratch directories", stale);
    }

    // --- Initialize lifecycle services ---
    let shutdown = CancellationToken::new();
    let store = ArtifactStore::new(cfg.lifecycle.artifact_ttl);
    let (cleanup, cleanup_task) = CleanupScheduler::spawn(
        store.clone(),
        cfg.lifecycle.download_grace,
        shutdown.clone(),
    );
    let sweeper_task = cfg.lifecycle.sweep_interval.map(|every| {
        expiry_sweeper::spawn_periodic(
            store.clone(),
            cfg.lifecycle.artifact_ttl,
            every,
            shutdown.clone(),
        )
    });

    let state = AppState {
        store: store.clone(),
        converter: Arc::new(PdfiumConverter::new(cfg.pdfium_lib_dir.clone())),
        cleanup,
        lifecycle: cfg.lifecycle,
        scratch_root: cfg.scratch_dir.clone(),
    };

    // --- Build router ---
    let app: Router = routes::routes::routes()
        .layer(DefaultBodyLimit::max(cfg.max_upload_bytes))
        .with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // --- Tear down: stop background tasks, then drop everything left ---
    shutdown.cancel();
    if let Err(err) = cleanup_task.await {
        tracing::warn!("cleanup scheduler ended abnormally: {}", err);
    }
    if let Some(task) = sweeper_task {
        if let Err(err) = task.await {
            tracing::warn!("periodic sweeper ended abnormally: {}", err);
        }
    }
    let purged = store.purge().await;
    tracing::info!("Shutdown complete; purged {} artifact(s)", purged);

    Ok(())
}

/// Resolve on Ctrl-C, or when something else cancels `shutdown`.
async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(err) = res {
                tracing::warn!("failed to listen for Ctrl-C: {}", err);
                shutdown.cancelled().await;
            }
        }
        _ = shutdown.cancelled() => {}
    }
    tracing::info!("Shutdown signal received");
}

/// Delete scratch directories left behind by a previous process. Nothing
/// survives a restart, so none of them can still be redeemed.
async fn remove_stale_scratch(root: &Path) -> Result<usize> {
    let mut removed = 0;
    let mut entries = fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        let is_scratch = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(SCRATCH_PREFIX));
        if !is_scratch || !entry.file_type().await?.is_dir() {
            continue;
        }
        match services::artifact_store::discard_storage(&entry.path()).await {
            Ok(()) => removed += 1,
            Err(err) => tracing::warn!(
                "failed to remove stale scratch directory {}: {}",
                entry.path().display(),
                err
            ),
        }
    }
    Ok(removed)
}
