//! The node model consumed by propagation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

pub const TREE_SIZE_ATTR: &str = "treesize";
pub const TREE_MTIME_ATTR: &str = "tmtime";
pub const BLOB_SIZE_ATTR: &str = "blobsize";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

/// A file or directory entry, identified by `(space_id, id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub space_id: String,
    pub id: String,
    /// `None` only for space roots.
    pub parent_id: Option<String>,
    pub name: String,
    pub kind: NodeKind,
    /// Size of the file content. Zero for directories.
    pub blob_size: u64,
    pub exists: bool,
    pub is_space_root: bool,
    /// Whether ancestors of this node should receive aggregate updates
    /// through it. An explicit opt-out stops propagation.
    pub has_propagation: bool,
}

impl Node {
    /// Placeholder for an id that resolved to nothing.
    pub fn missing(space_id: &str, id: &str) -> Self {
        Self {
            space_id: space_id.to_string(),
            id: id.to_string(),
            parent_id: None,
            name: String::new(),
            kind: NodeKind::File,
            blob_size: 0,
            exists: false,
            is_space_root: false,
            has_propagation: false,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }
}

/// A partial attribute update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    pub tree_size: Option<u64>,
    pub tree_mtime: Option<DateTime<Utc>>,
    /// Drops the cached, derived etag so it is recomputed on next read.
    pub clear_tmp_etag: bool,
}

impl Attributes {
    pub fn is_empty(&self) -> bool {
        self.tree_size.is_none() && self.tree_mtime.is_none() && !self.clear_tmp_etag
    }
}

/// Read and write access to nodes and their attributes.
///
/// Attribute getters fail with [`Error::AttrUnset`] when the attribute was
/// never written, which is distinct from a zero value.
#[async_trait]
pub trait NodeAccessor: std::fmt::Debug + Send + Sync + 'static {
    /// Reads a node. A node that does not exist is returned with
    /// `exists == false` rather than as an error.
    async fn read_node(&self, space_id: &str, node_id: &str) -> Result<Node>;

    async fn parent(&self, node: &Node) -> Result<Node> {
        match &node.parent_id {
            Some(parent_id) => self.read_node(&node.space_id, parent_id).await,
            None => Err(Error::NotFound(format!(
                "parent of {}:{}",
                node.space_id, node.id
            ))),
        }
    }

    /// The storage path of the node's metadata. Lock paths derive from it.
    fn internal_path(&self, space_id: &str, node_id: &str) -> String;

    async fn tree_size(&self, node: &Node) -> Result<u64>;

    async fn tree_mtime(&self, node: &Node) -> Result<DateTime<Utc>>;

    /// Merges `attrs` into the node's attributes. Callers already holding
    /// the node lock pass `acquire_lock = false`.
    async fn set_attrs(&self, node: &Node, attrs: &Attributes, acquire_lock: bool) -> Result<()>;

    /// The existing direct children of a directory.
    async fn children(&self, node: &Node) -> Result<Vec<Node>>;
}
