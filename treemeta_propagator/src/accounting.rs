//! Rules for folding a [`Change`] into a node's aggregate attributes.
//!
//! Shared by both strategies; the synchronous walk passes one change per
//! ancestor, asynchronous rounds pass the aggregate of a whole batch.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use treemeta_core::{Attributes, Change, Node, NodeAccessor, Result};

use crate::options::Accounting;

/// Computes the attribute update for `node`. The caller holds the node
/// lock.
///
/// With `recalc_tree_size` the size is recomputed from the children
/// instead of being adjusted by `change.size_diff`.
pub(crate) async fn next_attributes(
    nodes: &dyn NodeAccessor,
    node: &Node,
    accounting: Accounting,
    change: &Change,
    recalc_tree_size: bool,
) -> Result<Attributes> {
    let mut attrs = Attributes::default();

    if accounting.tree_time {
        attrs.tree_mtime = next_tree_mtime(nodes, node, change.sync_time).await;
        attrs.clear_tmp_etag = true;
    }

    if accounting.tree_size && (change.size_diff != 0 || recalc_tree_size) {
        let new_size = match nodes.tree_size(node).await {
            Err(err) if !recalc_tree_size && !err.is_attr_unset() => return Err(err),
            Ok(size) if !recalc_tree_size => apply_size_diff(node, size, change.size_diff),
            _ => {
                tracing::warn!(
                    space_id = %node.space_id,
                    node_id = %node.id,
                    "treesize attribute unset or untrusted, falling back to calculating the treesize"
                );
                calculate_tree_size(nodes, node).await?
            }
        };
        tracing::debug!(node_id = %node.id, new_size, "updated treesize of node");
        attrs.tree_size = Some(new_size);
    }

    Ok(attrs)
}

/// The tree mtime only ever moves forward.
async fn next_tree_mtime(
    nodes: &dyn NodeAccessor,
    node: &Node,
    sync_time: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if sync_time == DateTime::<Utc>::MIN_UTC {
        return None;
    }
    match nodes.tree_mtime(node).await {
        Err(err) => {
            // missing attribute, or invalid format, overwrite
            tracing::debug!(node_id = %node.id, "could not read tmtime attribute, overwriting: {err}");
            Some(sync_time)
        }
        Ok(tmtime) if tmtime < sync_time => {
            tracing::debug!(
                node_id = %node.id,
                %tmtime,
                stime = %sync_time,
                "tmtime is older than stime, updating"
            );
            Some(sync_time)
        }
        Ok(tmtime) => {
            tracing::debug!(
                node_id = %node.id,
                %tmtime,
                stime = %sync_time,
                "tmtime is younger than stime, not updating"
            );
            None
        }
    }
}

/// Adds a signed diff to a size, clamping at zero.
pub(crate) fn apply_size_diff(node: &Node, tree_size: u64, size_diff: i64) -> u64 {
    if size_diff >= 0 {
        return tree_size.saturating_add(size_diff.unsigned_abs());
    }
    let decrease = size_diff.unsigned_abs();
    if decrease > tree_size {
        tracing::error!(
            space_id = %node.space_id,
            node_id = %node.id,
            tree_size,
            size_diff,
            "updated treesize would be negative, resetting to 0"
        );
        return 0;
    }
    tree_size - decrease
}

/// Sums the sizes of a directory's children: blob sizes for files, tree
/// sizes for directories. Directories without a tree size are computed
/// recursively. Unreadable entries are skipped.
pub fn calculate_tree_size<'a>(
    nodes: &'a dyn NodeAccessor,
    node: &'a Node,
) -> BoxFuture<'a, Result<u64>> {
    Box::pin(async move {
        let mut size = 0u64;
        for child in nodes.children(node).await? {
            let child_size = if child.is_dir() {
                match nodes.tree_size(&child).await {
                    Ok(size) => size,
                    Err(err) if err.is_attr_unset() => calculate_tree_size(nodes, &child).await?,
                    Err(err) => {
                        tracing::error!(child_id = %child.id, "could not read treesize of child: {err}");
                        continue;
                    }
                }
            } else {
                child.blob_size
            };
            size = size.saturating_add(child_size);
        }
        Ok(size)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> Node {
        Node::missing("space", "node")
    }

    #[test]
    fn size_diff_is_applied() {
        assert_eq!(apply_size_diff(&node(), 10, 5), 15);
        assert_eq!(apply_size_diff(&node(), 10, -4), 6);
        assert_eq!(apply_size_diff(&node(), 10, -10), 0);
    }

    #[test]
    fn negative_overflow_clamps_to_zero() {
        assert_eq!(apply_size_diff(&node(), 3, -7), 0);
        assert_eq!(apply_size_diff(&node(), 0, i64::MIN), 0);
    }

    #[test]
    fn positive_overflow_saturates() {
        assert_eq!(apply_size_diff(&node(), u64::MAX - 1, 5), u64::MAX);
    }
}
