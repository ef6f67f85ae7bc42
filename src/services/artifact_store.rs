//! src/services/artifact_store.rs
//!
//! ArtifactStore — the authoritative in-memory registry of converted files.
//! Every lifecycle transition (register, redeem, sweep, remove) runs under a
//! single mutex so two redeemers can never both win the same id. Disk I/O is
//! performed after the lock is released; entries are unlinked from the map
//! first, so a concurrent lookup never sees an artifact whose bytes are being
//! deleted.

use crate::models::artifact::{
    Artifact, ArtifactId, ArtifactLocation, ArtifactPayload, ArtifactState,
};
use chrono::Utc;
use serde::Serialize;
use std::{
    collections::{HashMap, hash_map::Entry},
    io::{self, ErrorKind},
    path::Path,
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::{fs, sync::Mutex, time::Instant};
use tracing::{debug, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RedeemError {
    #[error("artifact `{0}` not found or expired")]
    NotFound(String),
    #[error("artifact `{0}` already downloaded")]
    Gone(ArtifactId),
}

/// Snapshot of the registry, by lifecycle state.
#[derive(Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub available: usize,
    pub consumed: usize,
}

/// Shared handle to the artifact registry. Cloning is cheap; all clones see
/// the same entries.
#[derive(Clone)]
pub struct ArtifactStore {
    entries: Arc<Mutex<HashMap<ArtifactId, Artifact>>>,
    /// Age past which an `Available` artifact can no longer be redeemed.
    ttl: Duration,
}

impl ArtifactStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::default(),
            ttl,
        }
    }

    /// Track a freshly converted file as `Available` and return its id.
    pub async fn register(
        &self,
        location: ArtifactLocation,
        declared_name: impl Into<String>,
        media_kind: impl Into<String>,
    ) -> ArtifactId {
        let declared_name = declared_name.into();
        let media_kind = media_kind.into();
        let mut entries = self.entries.lock().await;

        // v4 collisions are not expected; retry keeps ids unique regardless.
        let slot = loop {
            if let Entry::Vacant(slot) = entries.entry(ArtifactId::new()) {
                break slot;
            }
        };
        let id = *slot.key();
        debug!(%id, name = %declared_name, "registered artifact");
        slot.insert(Artifact {
            id,
            location,
            declared_name,
            media_kind,
            state: ArtifactState::Available,
            created_at: Instant::now(),
            registered_at: Utc::now(),
        });
        id
    }

    /// Exchange an id for its payload, exactly once.
    ///
    /// The lookup and the `Available -> Consumed` transition happen under one
    /// lock acquisition. An artifact older than the store's TTL is treated as
    /// unknown and removed on the spot, whether or not a sweep has run yet.
    /// Other failures leave the entry untouched.
    pub async fn redeem(&self, id: &ArtifactId) -> Result<ArtifactPayload, RedeemError> {
        let expired = {
            let mut entries = self.entries.lock().await;
            let artifact = entries
                .get_mut(id)
                .ok_or_else(|| RedeemError::NotFound(id.to_string()))?;

            if artifact.state != ArtifactState::Available {
                return Err(RedeemError::Gone(*id));
            }
            if !is_expired(artifact, Instant::now(), self.ttl) {
                artifact.state = ArtifactState::Consumed;
                return Ok(artifact.payload());
            }
            entries.remove(id).map(mark_removed)
        };

        if let Some(artifact) = expired {
            if let Err(err) = discard_storage(&artifact.location.scratch_dir).await {
                warn!(
                    id = %artifact.id,
                    path = %artifact.location.scratch_dir.display(),
                    "failed to delete expired artifact storage: {}",
                    err
                );
            } else {
                debug!(id = %artifact.id, "expired artifact removed at redeem");
            }
        }
        Err(RedeemError::NotFound(id.to_string()))
    }

    /// Remove every `Available` artifact older than `max_age`, storage
    /// included. Consumed artifacts belong to the deferred cleanup path and
    /// are left alone.
    ///
    /// Deletion is best-effort: a failure is logged and the sweep moves on.
    /// Returns the number of entries removed.
    pub async fn sweep(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<Artifact> = {
            let mut entries = self.entries.lock().await;
            let ids: Vec<ArtifactId> = entries
                .values()
                .filter(|a| a.state == ArtifactState::Available && is_expired(a, now, max_age))
                .map(|a| a.id)
                .collect();
            ids.iter()
                .filter_map(|id| entries.remove(id))
                .map(mark_removed)
                .collect()
        };

        for artifact in &expired {
            if let Err(err) = discard_storage(&artifact.location.scratch_dir).await {
                warn!(
                    id = %artifact.id,
                    path = %artifact.location.scratch_dir.display(),
                    "failed to delete expired artifact storage: {}",
                    err
                );
            } else {
                debug!(
                    id = %artifact.id,
                    registered_at = %artifact.registered_at,
                    "expired artifact removed"
                );
            }
        }

        expired.len()
    }

    /// Hard-delete an artifact regardless of state.
    ///
    /// Idempotent: returns `Ok(None)` when the id is unknown. The entry is
    /// removed even if deleting its storage fails; the I/O error is returned
    /// for the caller to log.
    pub async fn remove(&self, id: &ArtifactId) -> io::Result<Option<Artifact>> {
        let removed = self.entries.lock().await.remove(id).map(mark_removed);
        match removed {
            Some(artifact) => {
                discard_storage(&artifact.location.scratch_dir).await?;
                Ok(Some(artifact))
            }
            None => Ok(None),
        }
    }

    /// Remove every artifact, whatever its state. Used at shutdown, when no
    /// download can still be in flight.
    pub async fn purge(&self) -> usize {
        let drained: Vec<Artifact> = self
            .entries
            .lock()
            .await
            .drain()
            .map(|(_, a)| mark_removed(a))
            .collect();

        for artifact in &drained {
            if let Err(err) = discard_storage(&artifact.location.scratch_dir).await {
                warn!(
                    id = %artifact.id,
                    path = %artifact.location.scratch_dir.display(),
                    "failed to delete artifact storage during purge: {}",
                    err
                );
            }
        }
        drained.len()
    }

    pub async fn active_count(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn stats(&self) -> StoreStats {
        let entries = self.entries.lock().await;
        entries
            .values()
            .fold(StoreStats::default(), |mut stats, a| {
                match a.state {
                    ArtifactState::Available => stats.available += 1,
                    ArtifactState::Consumed => stats.consumed += 1,
                    ArtifactState::Removed => {}
                }
                stats
            })
    }

    /// Current state of an id, `None` once removed or never registered.
    #[cfg(test)]
    pub async fn state_of(&self, id: &ArtifactId) -> Option<ArtifactState> {
        self.entries.lock().await.get(id).map(|a| a.state)
    }
}

/// Strictly older than `max_age`; an artifact exactly `max_age` old survives.
fn is_expired(artifact: &Artifact, now: Instant, max_age: Duration) -> bool {
    now.saturating_duration_since(artifact.created_at) > max_age
}

fn mark_removed(mut artifact: Artifact) -> Artifact {
    artifact.state = ArtifactState::Removed;
    artifact
}

/// Delete a scratch directory. A path that is already gone counts as deleted.
pub async fn discard_storage(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const TEN_MINUTES: Duration = Duration::from_secs(600);

    /// Create a scratch directory holding one converted file.
    async fn scratch(root: &TempDir, name: &str) -> ArtifactLocation {
        let scratch_dir = root.path().join(name);
        fs::create_dir_all(&scratch_dir).await.unwrap();
        let file_path = scratch_dir.join("converted.pdf");
        fs::write(&file_path, b"%PDF-1.7").await.unwrap();
        ArtifactLocation {
            scratch_dir,
            file_path,
        }
    }

    async fn register(store: &ArtifactStore, root: &TempDir, name: &str) -> (ArtifactId, PathBuf) {
        let location = scratch(root, name).await;
        let dir = location.scratch_dir.clone();
        let id = store
            .register(location, format!("{name}.pdf"), "application/pdf")
            .await;
        (id, dir)
    }

    #[tokio::test]
    async fn first_redeem_succeeds_and_second_is_gone() {
        let root = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(TEN_MINUTES);
        let (id, dir) = register(&store, &root, "b").await;

        let payload = store.redeem(&id).await.unwrap();
        assert_eq!(payload.id, id);
        assert_eq!(payload.declared_name, "b.pdf");
        assert_eq!(payload.media_kind, "application/pdf");
        assert_eq!(payload.file_path, dir.join("converted.pdf"));
        assert_eq!(store.state_of(&id).await, Some(ArtifactState::Consumed));

        assert_eq!(store.redeem(&id).await, Err(RedeemError::Gone(id)));
        assert_eq!(store.state_of(&id).await, Some(ArtifactState::Consumed));
    }

    #[tokio::test]
    async fn redeem_unknown_id_is_not_found() {
        let store = ArtifactStore::new(TEN_MINUTES);
        let id = ArtifactId::new();
        assert_eq!(
            store.redeem(&id).await,
            Err(RedeemError::NotFound(id.to_string()))
        );
        assert_eq!(store.active_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_only_expired_available_artifacts() {
        let root = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(TEN_MINUTES);
        let (old, old_dir) = register(&store, &root, "a").await;
        let (consumed, consumed_dir) = register(&store, &root, "c").await;
        store.redeem(&consumed).await.unwrap();

        tokio::time::advance(Duration::from_secs(9 * 60)).await;
        let (young, young_dir) = register(&store, &root, "y").await;
        assert_eq!(store.sweep(TEN_MINUTES).await, 0);

        tokio::time::advance(Duration::from_secs(2 * 60)).await;
        assert_eq!(store.sweep(TEN_MINUTES).await, 1);

        assert_eq!(store.state_of(&old).await, None);
        assert!(!old_dir.exists());
        assert_eq!(
            store.redeem(&old).await,
            Err(RedeemError::NotFound(old.to_string()))
        );

        assert_eq!(store.state_of(&young).await, Some(ArtifactState::Available));
        assert!(young_dir.exists());
        assert_eq!(store.state_of(&consumed).await, Some(ArtifactState::Consumed));
        assert!(consumed_dir.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_at_exact_max_age_keeps_artifact() {
        let root = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(TEN_MINUTES);
        let (id, _) = register(&store, &root, "edge").await;

        tokio::time::advance(TEN_MINUTES).await;
        assert_eq!(store.sweep(TEN_MINUTES).await, 0);
        assert_eq!(store.state_of(&id).await, Some(ArtifactState::Available));
        assert!(store.redeem(&id).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn redeem_past_ttl_is_not_found_without_a_sweep() {
        let root = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(TEN_MINUTES);
        let (id, dir) = register(&store, &root, "late").await;

        tokio::time::advance(TEN_MINUTES + Duration::from_secs(1)).await;
        assert_eq!(
            store.redeem(&id).await,
            Err(RedeemError::NotFound(id.to_string()))
        );
        assert_eq!(store.state_of(&id).await, None);
        assert!(!dir.exists());

        // Nothing left for a later sweep to find.
        assert_eq!(store.sweep(TEN_MINUTES).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_continues_past_failed_deletion() {
        let root = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(TEN_MINUTES);

        // A regular file where the scratch directory should be makes
        // `remove_dir_all` fail with something other than NotFound.
        let not_a_dir = root.path().join("plain-file");
        fs::write(&not_a_dir, b"x").await.unwrap();
        let broken = store
            .register(
                ArtifactLocation {
                    scratch_dir: not_a_dir.clone(),
                    file_path: not_a_dir.clone(),
                },
                "broken.pdf",
                "application/pdf",
            )
            .await;
        let (good, good_dir) = register(&store, &root, "good").await;

        tokio::time::advance(TEN_MINUTES + Duration::from_secs(1)).await;
        assert_eq!(store.sweep(TEN_MINUTES).await, 2);

        assert_eq!(store.state_of(&broken).await, None);
        assert_eq!(store.state_of(&good).await, None);
        assert!(!good_dir.exists());
        assert!(not_a_dir.exists());
        assert_eq!(store.active_count().await, 0);
    }

    #[tokio::test]
    async fn remove_is_idempotent_and_deletes_storage() {
        let root = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(TEN_MINUTES);
        let (id, dir) = register(&store, &root, "r").await;
        store.redeem(&id).await.unwrap();

        let removed = store.remove(&id).await.unwrap().unwrap();
        assert_eq!(removed.state, ArtifactState::Removed);
        assert!(!dir.exists());

        assert!(store.remove(&id).await.unwrap().is_none());
        assert_eq!(
            store.redeem(&id).await,
            Err(RedeemError::NotFound(id.to_string()))
        );
    }

    #[tokio::test]
    async fn remove_tolerates_storage_already_gone() {
        let root = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(TEN_MINUTES);
        let (id, dir) = register(&store, &root, "gone").await;
        fs::remove_dir_all(&dir).await.unwrap();

        assert!(store.remove(&id).await.unwrap().is_some());
        assert_eq!(store.active_count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_redeems_yield_exactly_one_success() {
        let root = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(TEN_MINUTES);
        let (id, _) = register(&store, &root, "race").await;

        let attempts = 32;
        let handles: Vec<_> = (0..attempts)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.redeem(&id).await })
            })
            .collect();

        let mut successes = 0;
        let mut gone = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(RedeemError::Gone(_)) => gone += 1,
                Err(other) => panic!("unexpected redeem failure: {other}"),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(gone, attempts - 1);
    }

    #[tokio::test]
    async fn stats_and_purge_cover_every_state() {
        let root = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(TEN_MINUTES);
        let (_, a) = register(&store, &root, "one").await;
        let (consumed, b) = register(&store, &root, "two").await;
        store.redeem(&consumed).await.unwrap();

        let stats = store.stats().await;
        assert_eq!(
            stats,
            StoreStats {
                available: 1,
                consumed: 1
            }
        );

        assert_eq!(store.purge().await, 2);
        assert_eq!(store.active_count().await, 0);
        assert!(!a.exists());
        assert!(!b.exists());
    }
}
