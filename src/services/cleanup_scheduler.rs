//! Deferred removal of downloaded artifacts.
//!
//! A downloaded artifact is `Consumed`, which the expiry sweep ignores. Its
//! storage is reclaimed here instead, a grace period after the download
//! started so an in-flight response can finish reading the file. One
//! background task owns a [`DelayQueue`]; handlers only enqueue ids.

use crate::{models::artifact::ArtifactId, services::artifact_store::ArtifactStore};
use futures::StreamExt;
use std::time::Duration;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::{sync::CancellationToken, time::DelayQueue};
use tracing::{debug, warn};

/// Handle used by request handlers to schedule removals.
#[derive(Clone)]
pub struct CleanupScheduler {
    tx: mpsc::UnboundedSender<ArtifactId>,
    grace: Duration,
}

impl CleanupScheduler {
    /// Start the scheduler task. It runs until `shutdown` fires; removals
    /// still pending at that point are left to the shutdown purge.
    pub fn spawn(
        store: ArtifactStore,
        grace: Duration,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(store, grace, rx, shutdown));
        (Self { tx, grace }, task)
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Remove `id` from the store once the grace period elapses.
    /// Fire-and-forget; firing for an id already gone is a no-op.
    pub fn schedule(&self, id: ArtifactId) {
        if self.tx.send(id).is_err() {
            warn!(%id, "cleanup scheduler stopped; artifact left for shutdown purge");
        }
    }
}

async fn run(
    store: ArtifactStore,
    grace: Duration,
    mut rx: mpsc::UnboundedReceiver<ArtifactId>,
    shutdown: CancellationToken,
) {
    let mut queue: DelayQueue<ArtifactId> = DelayQueue::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("cleanup scheduler stopping with {} pending removal(s)", queue.len());
                break;
            }
            Some(id) = rx.recv() => {
                queue.insert(id, grace);
            }
            Some(expired) = queue.next() => {
                let id = expired.into_inner();
                match store.remove(&id).await {
                    Ok(Some(_)) => debug!(%id, "removed downloaded artifact"),
                    Ok(None) => debug!(%id, "artifact already removed"),
                    Err(err) => warn!(%id, "failed to delete downloaded artifact storage: {}", err),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::artifact::{ArtifactLocation, ArtifactState};
    use tokio::{fs, time};

    #[tokio::test(start_paused = true)]
    async fn removes_consumed_artifact_after_grace_period() {
        let root = tempfile::tempdir().unwrap();
        let scratch_dir = root.path().join("c");
        fs::create_dir_all(&scratch_dir).await.unwrap();
        let file_path = scratch_dir.join("converted.pdf");
        fs::write(&file_path, b"%PDF").await.unwrap();

        let store = ArtifactStore::new(Duration::from_secs(600));
        let id = store
            .register(
                ArtifactLocation {
                    scratch_dir: scratch_dir.clone(),
                    file_path,
                },
                "c.pdf",
                "application/pdf",
            )
            .await;
        store.redeem(&id).await.unwrap();

        let shutdown = CancellationToken::new();
        let (scheduler, task) =
            CleanupScheduler::spawn(store.clone(), Duration::from_secs(30), shutdown.clone());
        scheduler.schedule(id);

        time::sleep(Duration::from_secs(29)).await;
        assert_eq!(store.state_of(&id).await, Some(ArtifactState::Consumed));
        assert!(scratch_dir.exists());

        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.state_of(&id).await, None);
        assert!(!scratch_dir.exists());

        // A second removal for the same id is harmless.
        assert!(store.remove(&id).await.unwrap().is_none());

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_for_unknown_id_is_a_no_op() {
        let store = ArtifactStore::new(Duration::from_secs(600));
        let shutdown = CancellationToken::new();
        let (scheduler, task) =
            CleanupScheduler::spawn(store.clone(), Duration::from_secs(30), shutdown.clone());

        scheduler.schedule(ArtifactId::new());
        time::sleep(Duration::from_secs(31)).await;
        assert_eq!(store.active_count().await, 0);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn schedule_after_shutdown_does_not_panic() {
        let shutdown = CancellationToken::new();
        let store = ArtifactStore::new(Duration::from_secs(600));
        let (scheduler, task) =
            CleanupScheduler::spawn(store, Duration::from_secs(30), shutdown.clone());
        shutdown.cancel();
        task.await.unwrap();

        scheduler.schedule(ArtifactId::new());
        assert_eq!(scheduler.grace(), Duration::from_secs(30));
    }
}
