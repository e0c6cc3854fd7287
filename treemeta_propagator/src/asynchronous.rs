use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::{sync::watch, task::JoinHandle};
use treemeta_core::{Change, Node, NodeAccessor, Result, Store, paths};

use crate::{
    Propagator, accounting,
    claim::{self, CHANGE_SUFFIX, ClaimOutcome},
    options::{Accounting, AsyncOptions},
};

/// Upper bound on attempts to deposit one change file.
const MAX_CHANGE_WRITE_RETRIES: usize = 500;

/// Counts background tasks so callers can wait for quiescence.
#[derive(Debug)]
struct InFlight {
    count: watch::Sender<usize>,
}

struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.count.send_modify(|count| *count -= 1);
    }
}

impl InFlight {
    fn new() -> Self {
        Self {
            count: watch::Sender::new(0),
        }
    }

    fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.send_modify(|count| *count += 1);
        InFlightGuard(self.clone())
    }

    async fn wait_idle(&self) {
        let mut rx = self.count.subscribe();
        // the sender lives as long as `self`
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

/// How an apply round ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RoundOutcome {
    /// Attributes were written and the batch deleted.
    Applied,
    /// The node is gone or opted out; the batch was discarded.
    Skipped,
    /// An error aborted the round; the `.processing` batch is left for
    /// the watchdog.
    Failed,
}

#[derive(Debug)]
pub(crate) struct Inner {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) nodes: Arc<dyn NodeAccessor>,
    pub(crate) accounting: Accounting,
    pub(crate) options: AsyncOptions,
    in_flight: Arc<InFlight>,
}

impl Inner {
    /// Runs `future` as a tracked background task.
    pub(crate) fn spawn<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let guard = self.in_flight.enter();
        tokio::spawn(async move {
            let _guard = guard;
            future.await;
        });
    }

    /// Deposits `change` for `node_id` and, if this call created the
    /// changes directory, debounces and processes the batch.
    fn queue_propagation(
        self: Arc<Self>,
        space_id: String,
        node_id: String,
        change: Change,
    ) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let dir = claim::changes_dir(&space_id, &node_id);
            let bytes = match change.to_bytes() {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::error!(%space_id, %node_id, "failed to encode change: {err}");
                    return;
                }
            };
            let change_path = paths::join(
                &dir,
                &format!("{}{CHANGE_SUFFIX}", uuid::Uuid::new_v4().simple()),
            );

            let mut outcome = match claim::create_or_join(self.store.as_ref(), &dir).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::error!(%space_id, %node_id, "failed to create changes dir: {err}");
                    return;
                }
            };

            let mut written = false;
            for attempt in 0..=MAX_CHANGE_WRITE_RETRIES {
                match self.store.write_in_dir(&change_path, bytes.clone()).await {
                    Ok(()) => {
                        written = true;
                        break;
                    }
                    Err(err) => {
                        // the directory was claimed between create and write
                        tracing::debug!(%space_id, %node_id, attempt, "failed to write change (retrying): {err}");
                        match claim::create_or_join(self.store.as_ref(), &dir).await {
                            Ok(next) => outcome = next,
                            Err(err) => {
                                tracing::error!(%space_id, %node_id, "failed to create changes dir: {err}");
                                return;
                            }
                        }
                    }
                }
            }
            if !written {
                tracing::error!(%space_id, %node_id, size_diff = change.size_diff, "failed to write change to disk");
                return;
            }
            if outcome == ClaimOutcome::Deposited {
                return;
            }

            tokio::time::sleep(self.options.propagation_delay).await;
            tracing::debug!(%space_id, %node_id, "propagating");
            match claim::try_claim(self.store.as_ref(), &dir).await {
                Ok(true) => self.process(&space_id, &node_id, false).await,
                // already processed, or a running round will pick it up
                Ok(false) => {}
                Err(err) => {
                    tracing::error!(%space_id, %node_id, "failed to claim changes dir: {err}");
                }
            }
        })
    }

    /// Applies a claimed batch, then keeps claiming batches that arrived
    /// for the same node in the meantime.
    pub(crate) async fn process(
        self: &Arc<Self>,
        space_id: &str,
        node_id: &str,
        recalc_tree_size: bool,
    ) {
        let dir = claim::changes_dir(space_id, node_id);
        let mut recalc_tree_size = recalc_tree_size;
        loop {
            if self.apply_round(space_id, node_id, recalc_tree_size).await == RoundOutcome::Failed {
                return;
            }
            recalc_tree_size = false;

            match self.store.exists(&dir).await {
                Ok(true) => {}
                Ok(false) => return,
                Err(err) => {
                    tracing::error!(space_id, node_id, "failed to check for new changes: {err}");
                    return;
                }
            }
            tracing::info!(space_id, node_id, "found a new changes dir, starting next propagation");
            tokio::time::sleep(self.options.propagation_delay).await;
            match claim::try_claim(self.store.as_ref(), &dir).await {
                Ok(true) => {}
                Ok(false) => return,
                Err(err) => {
                    tracing::error!(space_id, node_id, "failed to claim changes dir: {err}");
                    return;
                }
            }
        }
    }

    async fn cleanup(&self, processing: &str) {
        if let Err(err) = self.store.delete_all(processing).await {
            tracing::error!(processing, "could not remove .processing dir: {err}");
        }
    }

    /// Folds the claimed batch of `node_id` into its attributes.
    pub(crate) async fn apply_round(
        self: &Arc<Self>,
        space_id: &str,
        node_id: &str,
        recalc_tree_size: bool,
    ) -> RoundOutcome {
        let processing = claim::processing_dir(space_id, node_id);

        let names = match self.store.list_dir(&processing).await {
            Ok(names) => names,
            Err(err) => {
                tracing::error!(space_id, node_id, "could not list .processing dir: {err}");
                return RoundOutcome::Failed;
            }
        };

        let mut pc = Change::empty();
        let mut records = 0usize;
        for name in names.iter().filter(|name| name.ends_with(CHANGE_SUFFIX)) {
            let bytes = match self.store.read(&paths::join(&processing, name)).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::error!(space_id, node_id, change = %name, "could not read change: {err}");
                    return RoundOutcome::Failed;
                }
            };
            match Change::from_bytes(&bytes) {
                Ok(change) => {
                    pc.merge(&change);
                    records += 1;
                }
                Err(err) if recalc_tree_size => {
                    tracing::warn!(space_id, node_id, change = %name, "skipping undecodable change: {err}");
                }
                Err(err) => {
                    tracing::error!(space_id, node_id, change = %name, "could not decode change: {err}");
                    return RoundOutcome::Failed;
                }
            }
        }
        if records == 0 && !recalc_tree_size {
            tracing::debug!(space_id, node_id, "empty batch, nothing to propagate");
            self.cleanup(&processing).await;
            return RoundOutcome::Skipped;
        }

        // lock the node before reading its tree size or tree time
        let lock_path = self
            .store
            .lock_path(&self.nodes.internal_path(space_id, node_id));
        let mut guard = match self.store.lock(&lock_path).await {
            Ok(guard) => guard,
            Err(err) => {
                tracing::error!(space_id, node_id, %lock_path, "propagation failed, could not lock node: {err}");
                return RoundOutcome::Failed;
            }
        };

        let node = match self.nodes.read_node(space_id, node_id).await {
            Ok(node) => node,
            Err(err) => {
                tracing::error!(space_id, node_id, "propagation failed, could not read node: {err}");
                return RoundOutcome::Failed;
            }
        };
        if !node.exists {
            tracing::debug!(space_id, node_id, "node does not exist anymore, not propagating");
            drop(guard);
            self.cleanup(&processing).await;
            return RoundOutcome::Skipped;
        }
        if !node.has_propagation {
            tracing::debug!(space_id, node_id, "propagation disabled on node, not propagating");
            drop(guard);
            self.cleanup(&processing).await;
            return RoundOutcome::Skipped;
        }

        let attrs = match accounting::next_attributes(
            self.nodes.as_ref(),
            &node,
            self.accounting,
            &pc,
            recalc_tree_size,
        )
        .await
        {
            Ok(attrs) => attrs,
            Err(err) => {
                tracing::error!(space_id, node_id, "could not compute attributes: {err}");
                return RoundOutcome::Failed;
            }
        };
        if let Err(err) = self.nodes.set_attrs(&node, &attrs, false).await {
            tracing::error!(space_id, node_id, "failed to update attributes of node: {err}");
            return RoundOutcome::Failed;
        }
        if let Err(err) = guard.release() {
            tracing::error!(space_id, node_id, "failed to release node lock: {err}");
        }

        tracing::info!(space_id, node_id, size_diff = pc.size_diff, records, "propagation done, cleaning up");
        self.cleanup(&processing).await;

        if !node.is_space_root {
            if let Some(parent_id) = node.parent_id.clone() {
                let next = self.clone().queue_propagation(space_id.to_string(), parent_id, pc);
                self.spawn(next);
            }
        }
        RoundOutcome::Applied
    }
}

/// Batches changes per node in the store and applies them on background
/// tasks.
///
/// `propagate` returns once the work is spawned. A watchdog task, started
/// with the propagator, finishes batches abandoned by crashed rounds.
/// Construction must happen inside a Tokio runtime.
#[derive(Debug)]
pub struct AsyncPropagator {
    inner: Arc<Inner>,
    watchdog: Option<JoinHandle<()>>,
}

impl AsyncPropagator {
    pub fn new(
        store: Arc<dyn Store>,
        nodes: Arc<dyn NodeAccessor>,
        accounting: Accounting,
        options: AsyncOptions,
    ) -> Self {
        let inner = Arc::new(Inner {
            store,
            nodes,
            accounting,
            options,
            in_flight: Arc::new(InFlight::new()),
        });
        tracing::info!("async propagator starting up...");
        let watchdog = if accounting.is_disabled() {
            tracing::debug!("propagation disabled, not starting the watchdog");
            None
        } else {
            Some(tokio::spawn(inner.clone().watch()))
        };
        Self { inner, watchdog }
    }

    /// Scans for abandoned batches once and spawns their recovery.
    /// Returns how many batches were picked up.
    pub async fn recover_stale(&self, grace: std::time::Duration) -> usize {
        self.inner.recover_stale(grace).await
    }

    fn stop_watchdog(&self) {
        if let Some(watchdog) = &self.watchdog {
            watchdog.abort();
        }
    }
}

impl Drop for AsyncPropagator {
    fn drop(&mut self) {
        self.stop_watchdog();
    }
}

#[async_trait]
impl Propagator for AsyncPropagator {
    async fn propagate(&self, node: &Node, size_diff: i64) -> Result<()> {
        if self.inner.accounting.skips(size_diff) {
            tracing::debug!(node_id = %node.id, "propagation disabled or nothing to propagate");
            return Ok(());
        }
        let Some(parent_id) = node.parent_id.clone() else {
            tracing::debug!(node_id = %node.id, "space root has no parent, nothing to propagate");
            return Ok(());
        };
        tracing::debug!(
            space_id = %node.space_id,
            node_id = %node.id,
            %parent_id,
            size_diff,
            "queueing propagation"
        );
        // a sync time of now, the node's own mtime may not have moved
        let change = Change::now(size_diff);
        let next = self
            .inner
            .clone()
            .queue_propagation(node.space_id.clone(), parent_id, change);
        self.inner.spawn(next);
        Ok(())
    }

    async fn settle(&self) {
        self.inner.in_flight.wait_idle().await;
    }

    async fn shutdown(&self) {
        self.stop_watchdog();
        self.settle().await;
    }
}
