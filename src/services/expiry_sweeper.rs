//! Expiry sweeping for artifacts nobody downloaded.
//!
//! Two triggers share one code path: the eager sweep a download performs
//! before redeeming, and an optional periodic background task.

use crate::services::artifact_store::ArtifactStore;
use std::time::Duration;
use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Remove `Available` artifacts older than `max_age`; returns how many went.
pub async fn sweep_expired(store: &ArtifactStore, max_age: Duration) -> usize {
    let removed = store.sweep(max_age).await;
    if removed > 0 {
        info!("swept {} expired artifact(s)", removed);
    } else {
        debug!("sweep found nothing to expire");
    }
    removed
}

/// Run [`sweep_expired`] every `every` until `shutdown` fires.
pub fn spawn_periodic(
    store: ArtifactStore,
    max_age: Duration,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; nothing can be expired yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("periodic sweeper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    sweep_expired(&store, max_age).await;
                }
            }
        }
    })
}
