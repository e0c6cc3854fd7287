//! Tree metadata for a hierarchical store.
//!
//! [`MetadataService`] wires a configured [`Store`] to the reference
//! [`StoreTree`], a tree size/mtime [`Propagator`] and an [`Indexer`].

use std::sync::Arc;

use anyhow::Context;
use treemeta_core::{Attributes, Node, NodeAccessor, Store, StoreTree, change};
use treemeta_index::Indexer;
use treemeta_propagator::{Propagator, new_propagator};
use treemeta_store_local::LocalStore;
use treemeta_store_memory::MemoryStore;

pub mod config;

pub use config::{IndexConfig, MetaConfig, StoreConfig};
pub use treemeta_core as core;
pub use treemeta_index as index;
pub use treemeta_propagator as propagator;

pub fn create_store(config: StoreConfig) -> anyhow::Result<Arc<dyn Store>> {
    let store: Arc<dyn Store> = match config {
        StoreConfig::Local(config) => {
            std::fs::create_dir_all(&config.base_path)
                .with_context(|| format!("failed to create store root {}", config.base_path))?;
            Arc::new(LocalStore::create(config))
        }
        StoreConfig::Memory => Arc::new(MemoryStore::new()),
    };
    Ok(store)
}

#[derive(Debug)]
pub struct MetadataService {
    store: Arc<dyn Store>,
    tree: Arc<StoreTree>,
    propagator: Arc<dyn Propagator>,
    indexer: Arc<Indexer>,
}

impl MetadataService {
    /// Opens the configured store. Must run inside a tokio runtime, the
    /// asynchronous propagator starts its watchdog right away.
    pub fn open(config: &MetaConfig) -> anyhow::Result<Self> {
        let store = create_store(config.store.clone())?;
        Ok(Self::with_store(store, config))
    }

    pub fn with_store(store: Arc<dyn Store>, config: &MetaConfig) -> Self {
        let tree = Arc::new(StoreTree::new(store.clone()));
        let propagator = new_propagator(&config.propagation, store.clone(), tree.clone());
        let indexer = Arc::new(Indexer::new(store.clone(), config.index.backend.clone()));
        tracing::info!(
            strategy = ?config.propagation.strategy,
            index_backend = %config.index.backend,
            "metadata service opened"
        );
        Self {
            store,
            tree,
            propagator,
            indexer,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn tree(&self) -> &Arc<StoreTree> {
        &self.tree
    }

    pub fn propagator(&self) -> &Arc<dyn Propagator> {
        &self.propagator
    }

    pub fn indexer(&self) -> &Arc<Indexer> {
        &self.indexer
    }

    /// Creates a space whose root starts with a tree size of 0.
    pub async fn create_space(&self, space_id: &str) -> treemeta_core::Result<Node> {
        let root = self.tree.create_space(space_id).await?;
        self.init_tree_size(&root).await?;
        Ok(root)
    }

    /// Creates a directory whose tree size starts at 0, so later changes
    /// below it apply incrementally instead of triggering a recalculation.
    pub async fn create_dir(&self, parent: &Node, name: &str) -> treemeta_core::Result<Node> {
        let dir = self.tree.create_dir(parent, name).await?;
        self.init_tree_size(&dir).await?;
        Ok(dir)
    }

    async fn init_tree_size(&self, dir: &Node) -> treemeta_core::Result<()> {
        let attrs = Attributes {
            tree_size: Some(0),
            ..Default::default()
        };
        self.tree.set_attrs(dir, &attrs, true).await
    }

    /// Creates a file and propagates its size to the ancestors.
    pub async fn create_file(
        &self,
        parent: &Node,
        name: &str,
        size: u64,
    ) -> treemeta_core::Result<Node> {
        let node = self.tree.create_file(parent, name, size).await?;
        self.propagator
            .propagate(&node, change::size_diff(0, size))
            .await?;
        Ok(node)
    }

    /// Changes a file's size and propagates the difference.
    pub async fn resize_file(&self, node: &Node, size: u64) -> treemeta_core::Result<()> {
        let diff = self.tree.set_blob_size(node, size).await?;
        self.propagator.propagate(node, diff).await
    }

    /// Deletes a file or an empty directory and propagates the removal.
    pub async fn delete(&self, node: &Node) -> treemeta_core::Result<()> {
        let diff = self.tree.delete_node(node).await?;
        self.propagator.propagate(node, diff).await
    }

    /// Waits for background propagation and stops the watchdog.
    pub async fn shutdown(&self) {
        self.propagator.shutdown().await;
        tracing::info!("metadata service stopped");
    }
}
