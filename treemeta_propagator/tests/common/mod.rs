#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tempfile::TempDir;
use treemeta_core::{Attributes, Change, Node, NodeAccessor, Store, StoreTree};
use treemeta_propagator::AsyncOptions;
use treemeta_store_local::LocalStore;
use treemeta_store_memory::MemoryStore;

pub const SPACE: &str = "5pace0001";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

#[derive(Debug, Clone, Copy)]
pub enum Backend {
    Memory,
    Local,
}

pub struct Fixture {
    pub store: Arc<dyn Store>,
    pub tree: Arc<StoreTree>,
    pub root: Node,
    dir: Option<TempDir>,
}

/// R has children A (file, 10) and B (dir); B has child C (file, 5).
/// No tree size is set anywhere.
pub struct Scenario {
    pub a: Node,
    pub b: Node,
    pub c: Node,
}

impl Fixture {
    pub async fn new(backend: Backend) -> Self {
        init_tracing();
        let (store, dir): (Arc<dyn Store>, _) = match backend {
            Backend::Memory => (Arc::new(MemoryStore::new()), None),
            Backend::Local => {
                let dir = tempfile::tempdir().unwrap();
                (Arc::new(LocalStore::new(dir.path())), Some(dir))
            }
        };
        Self::with_store(store, dir, true).await
    }

    /// Reopens the same store, as a restarted process would.
    pub async fn reopen(self) -> Self {
        let Fixture { store, dir, .. } = self;
        Self::with_store(store, dir, false).await
    }

    async fn with_store(store: Arc<dyn Store>, dir: Option<TempDir>, create: bool) -> Self {
        let tree = Arc::new(StoreTree::new(store.clone()));
        let root = if create {
            tree.create_space(SPACE).await.unwrap()
        } else {
            tree.read_node(SPACE, SPACE).await.unwrap()
        };
        Self {
            store,
            tree,
            root,
            dir,
        }
    }

    pub fn nodes(&self) -> Arc<dyn NodeAccessor> {
        self.tree.clone()
    }

    pub async fn scenario(&self) -> Scenario {
        let a = self.tree.create_file(&self.root, "A", 10).await.unwrap();
        let b = self.tree.create_dir(&self.root, "B").await.unwrap();
        let c = self.tree.create_file(&b, "C", 5).await.unwrap();
        Scenario { a, b, c }
    }

    /// The tree size, `None` while unset.
    pub async fn size(&self, node: &Node) -> Option<u64> {
        match self.tree.tree_size(node).await {
            Ok(size) => Some(size),
            Err(err) if err.is_attr_unset() => None,
            Err(err) => panic!("reading treesize failed: {err}"),
        }
    }

    pub async fn mtime(&self, node: &Node) -> Option<DateTime<Utc>> {
        match self.tree.tree_mtime(node).await {
            Ok(t) => Some(t),
            Err(err) if err.is_attr_unset() => None,
            Err(err) => panic!("reading tmtime failed: {err}"),
        }
    }

    pub async fn set_size(&self, node: &Node, size: u64) {
        let attrs = Attributes {
            tree_size: Some(size),
            ..Default::default()
        };
        self.tree.set_attrs(node, &attrs, true).await.unwrap();
    }

    pub async fn set_mtime(&self, node: &Node, t: DateTime<Utc>) {
        let attrs = Attributes {
            tree_mtime: Some(t),
            ..Default::default()
        };
        self.tree.set_attrs(node, &attrs, true).await.unwrap();
    }

    pub fn changes_dir(&self, node: &Node) -> String {
        format!("changes/{}/{}:{}", &SPACE[..2], SPACE, node.id)
    }

    /// Leaves a batch behind the way a crashed round would.
    pub async fn leave_batch(&self, dir: &str, changes: &[i64]) {
        self.store.create_dir(dir).await.unwrap();
        for (i, size_diff) in changes.iter().enumerate() {
            let bytes = Change::now(*size_diff).to_bytes().unwrap();
            self.store
                .write(&format!("{dir}/crashed{i}.cbor"), bytes)
                .await
                .unwrap();
        }
    }

    /// Whether any changes directory is left for the space.
    pub async fn pending_batches(&self) -> Vec<String> {
        match self.store.list_dir(&format!("changes/{}", &SPACE[..2])).await {
            Ok(names) => names,
            Err(err) if err.is_not_found() => vec![],
            Err(err) => panic!("listing changes failed: {err}"),
        }
    }
}

pub fn fast_options() -> AsyncOptions {
    AsyncOptions {
        propagation_delay: Duration::from_millis(20),
        ..Default::default()
    }
}

/// Polls `check` until it holds or five seconds passed.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..250 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
