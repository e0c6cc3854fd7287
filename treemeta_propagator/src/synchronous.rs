use std::sync::Arc;

use async_trait::async_trait;
use treemeta_core::{Change, Error, Node, NodeAccessor, Result, Store};

use crate::{Propagator, accounting, options::Accounting};

/// Walks the ancestors of a changed node and updates each of them before
/// returning.
///
/// Each hop holds the ancestor's lock for its read-modify-write only.
#[derive(Debug, Clone)]
pub struct SyncPropagator {
    store: Arc<dyn Store>,
    nodes: Arc<dyn NodeAccessor>,
    accounting: Accounting,
}

impl SyncPropagator {
    pub fn new(store: Arc<dyn Store>, nodes: Arc<dyn NodeAccessor>, accounting: Accounting) -> Self {
        Self {
            store,
            nodes,
            accounting,
        }
    }

    /// Applies `change` to one ancestor. Returns `None` when propagation
    /// must stop there.
    async fn update_ancestor(
        &self,
        space_id: &str,
        node_id: &str,
        change: &Change,
    ) -> Result<Option<Node>> {
        let lock_path = self
            .store
            .lock_path(&self.nodes.internal_path(space_id, node_id));
        let mut guard = self.store.lock(&lock_path).await?;

        let node = self.nodes.read_node(space_id, node_id).await?;
        if !node.exists {
            return Err(Error::NotFound(format!("node {space_id}:{node_id}")));
        }
        if !node.has_propagation {
            tracing::debug!(space_id, node_id, "propagation disabled on ancestor, stopping");
            return Ok(None);
        }

        let attrs =
            accounting::next_attributes(self.nodes.as_ref(), &node, self.accounting, change, false)
                .await?;
        self.nodes.set_attrs(&node, &attrs, false).await?;
        guard.release()?;
        Ok(Some(node))
    }
}

#[async_trait]
impl Propagator for SyncPropagator {
    async fn propagate(&self, node: &Node, size_diff: i64) -> Result<()> {
        if self.accounting.skips(size_diff) {
            tracing::debug!(node_id = %node.id, "propagation disabled or nothing to propagate");
            return Ok(());
        }

        // one sync time for the whole walk
        let change = Change::now(size_diff);
        let mut current = node.clone();
        while !current.is_space_root {
            let parent_id = current.parent_id.clone().ok_or_else(|| {
                Error::NotFound(format!("parent of {}:{}", current.space_id, current.id))
            })?;
            match self
                .update_ancestor(&current.space_id, &parent_id, &change)
                .await?
            {
                Some(parent) => current = parent,
                None => return Ok(()),
            }
        }
        tracing::debug!(space_id = %node.space_id, node_id = %node.id, size_diff, "propagation done");
        Ok(())
    }
}
