//! A node tree persisted in a [`Store`].
//!
//! Layout, for a node `n` in space `s`:
//!
//! - `spaces/{pathify(s)}/nodes/{pathify(n)}.cbor` holds the node record
//! - `spaces/{pathify(s)}/nodes/{pathify(n)}` is, for directories, a
//!   directory of name symlinks pointing at the children's node paths
//! - `spaces/{pathify(s)}/nodes/{pathify(n)}.lock` guards the record
//!
//! Creating, resizing or deleting nodes does not propagate anything by
//! itself; hosts hand the returned size diff to a propagator.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use minicbor::{Decode, Encode};

use crate::{
    Store, change,
    error::{Error, Result},
    node::{Attributes, Node, NodeAccessor, NodeKind, TREE_MTIME_ATTR, TREE_SIZE_ATTR},
    paths,
};

const NODES_SEGMENT: &str = "nodes";

#[derive(Encode, Decode, Clone, Debug, Default)]
#[cbor(map)]
struct NodeRecord {
    #[n(0)]
    name: String,
    #[n(1)]
    parent_id: Option<String>,
    #[n(2)]
    is_dir: bool,
    #[n(3)]
    blob_size: u64,
    #[n(4)]
    tree_size: Option<u64>,
    #[n(5)]
    tree_mtime: Option<String>,
    #[n(6)]
    propagation: bool,
    #[n(7)]
    space_root: bool,
    #[n(8)]
    tmp_etag: Option<String>,
}

impl NodeRecord {
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        minicbor::decode(bytes).map_err(|e| Error::decode("node record", e))
    }

    fn to_bytes(&self) -> Result<Bytes> {
        let bytes = minicbor::to_vec(self).map_err(|e| Error::decode("node record", e))?;
        Ok(Bytes::from(bytes))
    }

    fn to_node(&self, space_id: &str, id: &str) -> Node {
        Node {
            space_id: space_id.to_string(),
            id: id.to_string(),
            parent_id: self.parent_id.clone(),
            name: self.name.clone(),
            kind: if self.is_dir {
                NodeKind::Directory
            } else {
                NodeKind::File
            },
            blob_size: self.blob_size,
            exists: true,
            is_space_root: self.space_root,
            has_propagation: self.propagation,
        }
    }
}

pub fn format_tree_mtime(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn parse_tree_mtime(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::decode(TREE_MTIME_ATTR, e))
}

/// Reference [`NodeAccessor`] keeping nodes as records in a [`Store`].
#[derive(Debug, Clone)]
pub struct StoreTree {
    store: Arc<dyn Store>,
}

impl StoreTree {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    fn space_root(space_id: &str) -> String {
        paths::join("spaces", &paths::pathify(space_id, 1, 2))
    }

    fn record_path(&self, space_id: &str, node_id: &str) -> String {
        format!("{}.cbor", self.internal_path(space_id, node_id))
    }

    fn node_id_from_path(path: &str) -> Option<String> {
        let (_, tail) = path.split_once(&format!("/{NODES_SEGMENT}/"))?;
        Some(tail.replace('/', ""))
    }

    async fn read_record(&self, space_id: &str, node_id: &str) -> Result<NodeRecord> {
        let bytes = self.store.read(&self.record_path(space_id, node_id)).await?;
        NodeRecord::from_bytes(&bytes)
    }

    async fn write_record(&self, space_id: &str, node_id: &str, record: &NodeRecord) -> Result<()> {
        self.store
            .write(&self.record_path(space_id, node_id), record.to_bytes()?)
            .await
    }

    /// Read-modify-write of a node record under its lock.
    async fn update_record<F>(&self, node: &Node, acquire_lock: bool, f: F) -> Result<NodeRecord>
    where
        F: FnOnce(&mut NodeRecord) + Send,
    {
        let mut guard = if acquire_lock {
            let lock_path = self
                .store
                .lock_path(&self.internal_path(&node.space_id, &node.id));
            Some(self.store.lock(&lock_path).await?)
        } else {
            None
        };
        let mut record = self.read_record(&node.space_id, &node.id).await?;
        f(&mut record);
        self.write_record(&node.space_id, &node.id, &record).await?;
        if let Some(guard) = guard.as_mut() {
            guard.release()?;
        }
        Ok(record)
    }

    /// Creates the root directory of a space. The root's node id is the
    /// space id.
    pub async fn create_space(&self, space_id: &str) -> Result<Node> {
        let record_path = self.record_path(space_id, space_id);
        if self.store.exists(&record_path).await? {
            return Err(Error::AlreadyExists(format!("space {space_id}")));
        }
        let record = NodeRecord {
            name: String::new(),
            parent_id: None,
            is_dir: true,
            propagation: true,
            space_root: true,
            ..Default::default()
        };
        self.write_record(space_id, space_id, &record).await?;
        self.store
            .create_dir(&self.internal_path(space_id, space_id))
            .await?;
        Ok(record.to_node(space_id, space_id))
    }

    async fn create_child(&self, parent: &Node, name: &str, record: NodeRecord) -> Result<Node> {
        if !parent.is_dir() {
            return Err(Error::NotFound(format!("directory {}:{}", parent.space_id, parent.id)));
        }
        let id = uuid::Uuid::new_v4().simple().to_string();
        let space_id = &parent.space_id;
        self.write_record(space_id, &id, &record).await?;
        if record.is_dir {
            self.store.create_dir(&self.internal_path(space_id, &id)).await?;
        }
        let link = paths::join(&self.internal_path(space_id, &parent.id), name);
        if let Err(err) = self
            .store
            .create_symlink(&self.internal_path(space_id, &id), &link)
            .await
        {
            let _ = self.store.delete(&self.record_path(space_id, &id)).await;
            if record.is_dir {
                let _ = self.store.delete_all(&self.internal_path(space_id, &id)).await;
            }
            return Err(err);
        }
        Ok(record.to_node(space_id, &id))
    }

    pub async fn create_dir(&self, parent: &Node, name: &str) -> Result<Node> {
        let record = NodeRecord {
            name: name.to_string(),
            parent_id: Some(parent.id.clone()),
            is_dir: true,
            propagation: true,
            ..Default::default()
        };
        self.create_child(parent, name, record).await
    }

    pub async fn create_file(&self, parent: &Node, name: &str, size: u64) -> Result<Node> {
        let record = NodeRecord {
            name: name.to_string(),
            parent_id: Some(parent.id.clone()),
            is_dir: false,
            blob_size: size,
            propagation: true,
            ..Default::default()
        };
        self.create_child(parent, name, record).await
    }

    /// Resolves a child by name.
    pub async fn lookup_child(&self, parent: &Node, name: &str) -> Result<Node> {
        let link = paths::join(&self.internal_path(&parent.space_id, &parent.id), name);
        let target = self.store.resolve_symlink(&link).await?;
        let id = Self::node_id_from_path(&target)
            .ok_or_else(|| Error::decode("child link", format!("unexpected target {target}")))?;
        self.read_node(&parent.space_id, &id).await
    }

    /// Replaces a file's content size and returns the size diff to
    /// propagate.
    pub async fn set_blob_size(&self, node: &Node, size: u64) -> Result<i64> {
        let mut old = 0;
        self.update_record(node, true, |record| {
            old = record.blob_size;
            record.blob_size = size;
        })
        .await?;
        Ok(change::size_diff(old, size))
    }

    /// Enables or disables propagation through a node.
    pub async fn set_propagation(&self, node: &Node, enabled: bool) -> Result<()> {
        self.update_record(node, true, |record| record.propagation = enabled)
            .await?;
        Ok(())
    }

    /// Unlinks a file or an empty directory and returns the size diff to
    /// propagate (the negated blob size or tree size).
    pub async fn delete_node(&self, node: &Node) -> Result<i64> {
        let parent_id = node
            .parent_id
            .as_deref()
            .ok_or_else(|| Error::NotFound(format!("parent of space root {}", node.space_id)))?;
        let record = self.read_record(&node.space_id, &node.id).await?;
        let internal = self.internal_path(&node.space_id, &node.id);
        if record.is_dir && !self.store.remove_dir(&internal).await? {
            return Err(Error::AlreadyExists(format!("children of {}", node.id)));
        }
        let link = paths::join(&self.internal_path(&node.space_id, parent_id), &record.name);
        self.store.delete(&link).await?;
        self.store
            .delete(&self.record_path(&node.space_id, &node.id))
            .await?;
        let size = if record.is_dir {
            record.tree_size.unwrap_or(0)
        } else {
            record.blob_size
        };
        Ok(change::size_diff(size, 0))
    }

    /// Returns the node's etag, deriving and caching it when the cached
    /// value was invalidated by propagation.
    pub async fn etag(&self, node: &Node) -> Result<String> {
        let record = self.read_record(&node.space_id, &node.id).await?;
        if let Some(etag) = record.tmp_etag {
            return Ok(etag);
        }
        let mut hasher = blake3::Hasher::new();
        hasher.update(node.id.as_bytes());
        if let Some(t) = &record.tree_mtime {
            hasher.update(t.as_bytes());
        }
        let etag = format!("\"{}\"", &hasher.finalize().to_hex()[..32]);
        let cached = etag.clone();
        self.update_record(node, true, move |record| record.tmp_etag = Some(cached))
            .await?;
        Ok(etag)
    }
}

#[async_trait]
impl NodeAccessor for StoreTree {
    async fn read_node(&self, space_id: &str, node_id: &str) -> Result<Node> {
        match self.read_record(space_id, node_id).await {
            Ok(record) => Ok(record.to_node(space_id, node_id)),
            Err(err) if err.is_not_found() => Ok(Node::missing(space_id, node_id)),
            Err(err) => Err(err),
        }
    }

    fn internal_path(&self, space_id: &str, node_id: &str) -> String {
        format!(
            "{}/{NODES_SEGMENT}/{}",
            Self::space_root(space_id),
            paths::pathify(node_id, 4, 2)
        )
    }

    async fn tree_size(&self, node: &Node) -> Result<u64> {
        self.read_record(&node.space_id, &node.id)
            .await?
            .tree_size
            .ok_or(Error::AttrUnset(TREE_SIZE_ATTR))
    }

    async fn tree_mtime(&self, node: &Node) -> Result<DateTime<Utc>> {
        match self.read_record(&node.space_id, &node.id).await?.tree_mtime {
            Some(s) => parse_tree_mtime(&s),
            None => Err(Error::AttrUnset(TREE_MTIME_ATTR)),
        }
    }

    async fn set_attrs(&self, node: &Node, attrs: &Attributes, acquire_lock: bool) -> Result<()> {
        if attrs.is_empty() {
            return Ok(());
        }
        let attrs = attrs.clone();
        self.update_record(node, acquire_lock, move |record| {
            if let Some(size) = attrs.tree_size {
                record.tree_size = Some(size);
            }
            if let Some(t) = &attrs.tree_mtime {
                record.tree_mtime = Some(format_tree_mtime(t));
            }
            if attrs.clear_tmp_etag {
                record.tmp_etag = None;
            }
        })
        .await?;
        Ok(())
    }

    async fn children(&self, node: &Node) -> Result<Vec<Node>> {
        let dir = self.internal_path(&node.space_id, &node.id);
        let names = self.store.list_dir(&dir).await?;
        let mut children = Vec::with_capacity(names.len());
        for name in names {
            let link = paths::join(&dir, &name);
            let target = match self.store.resolve_symlink(&link).await {
                Ok(target) => target,
                Err(err) => {
                    tracing::error!(%link, "could not resolve child entry symlink: {err}");
                    continue;
                }
            };
            let Some(id) = Self::node_id_from_path(&target) else {
                tracing::error!(%link, %target, "child entry points outside the node tree");
                continue;
            };
            let child = match self.read_node(&node.space_id, &id).await {
                Ok(child) => child,
                Err(err) => {
                    tracing::error!(%link, node_id = %id, "could not read child node: {err}");
                    continue;
                }
            };
            if child.exists {
                children.push(child);
            }
        }
        Ok(children)
    }
}
