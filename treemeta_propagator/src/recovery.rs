//! Finishing batches abandoned by crashed or failed rounds.
//!
//! Ownership of a batch is only its directory name, so a round that died
//! leaves either a plain changes directory (died while debouncing) or a
//! `.processing` one (died while applying). Both are picked up once they
//! are older than the grace period and re-applied with the tree size
//! recomputed from the children.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use treemeta_core::paths;

use crate::{
    asynchronous::Inner,
    claim::{self, CHANGES_ROOT, PROCESSING_SUFFIX},
};

impl Inner {
    /// The watchdog loop. The first scan runs immediately.
    pub(crate) async fn watch(self: Arc<Self>) {
        tracing::info!(
            interval = ?self.options.watchdog_interval,
            grace = ?self.options.stale_grace_period,
            "propagation watchdog started"
        );
        loop {
            tracing::debug!("scanning for stale .processing dirs");
            self.recover_stale(self.options.stale_grace_period).await;
            tokio::time::sleep(self.options.watchdog_interval).await;
        }
    }

    pub(crate) async fn recover_stale(self: &Arc<Self>, grace: Duration) -> usize {
        let prefixes = match self.store.list_dir(CHANGES_ROOT).await {
            Ok(prefixes) => prefixes,
            Err(err) if err.is_not_found() => return 0,
            Err(err) => {
                tracing::error!("failed to list changes: {err}");
                return 0;
            }
        };

        let now = SystemTime::now();
        let mut recovered = 0;
        for prefix in prefixes {
            let prefix_dir = paths::join(CHANGES_ROOT, &prefix);
            let Ok(names) = self.store.list_dir(&prefix_dir).await else {
                continue;
            };
            for name in names {
                let path = paths::join(&prefix_dir, &name);
                let Ok(meta) = self.store.stat(&path).await else {
                    continue;
                };
                // recover all dirs that seem to have been stuck
                let age = now.duration_since(meta.modified).unwrap_or_default();
                if !meta.is_dir() || age < grace {
                    continue;
                }
                let Some((space_id, node_id)) = claim::parse_changes_dir_name(&name) else {
                    tracing::error!(dir = %path, "encountered invalid changes dir");
                    continue;
                };
                let inner = self.clone();
                self.spawn(async move {
                    inner.recover(path, space_id, node_id).await;
                });
                recovered += 1;
            }
        }
        recovered
    }

    async fn recover(self: Arc<Self>, path: String, space_id: String, node_id: String) {
        if !path.ends_with(PROCESSING_SUFFIX) {
            // claim the plain dir first
            match claim::try_claim(self.store.as_ref(), &path).await {
                Ok(true) => {}
                Ok(false) => return,
                Err(err) => {
                    tracing::error!(dir = %path, "failed to claim stale changes dir: {err}");
                    return;
                }
            }
        }
        let processing = claim::processing_dir(&space_id, &node_id);
        tracing::debug!(dir = %processing, "propagating stale .processing dir");
        // a fresh mtime keeps concurrent scans away
        if let Err(err) = self.store.touch(&processing).await {
            tracing::warn!(dir = %processing, "could not touch .processing dir: {err}");
        }
        self.process(&space_id, &node_id, true).await;
    }
}
