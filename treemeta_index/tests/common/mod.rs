#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;
use treemeta_core::Store;
use treemeta_store_local::LocalStore;
use treemeta_store_memory::MemoryStore;

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

/// A store plus the temporary directory backing it, if any.
pub struct TestStore {
    pub store: Arc<dyn Store>,
    _dir: Option<TempDir>,
}

impl TestStore {
    pub fn new(backend: Backend) -> Self {
        init_tracing();
        match backend {
            Backend::Memory => Self {
                store: Arc::new(MemoryStore::new()),
                _dir: None,
            },
            Backend::Local => {
                let dir = tempfile::tempdir().unwrap();
                Self {
                    store: Arc::new(LocalStore::new(dir.path())),
                    _dir: Some(dir),
                }
            }
        }
    }
}
