use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use treemeta_index::DEFAULT_BACKEND;
use treemeta_propagator::PropagatorConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MetaConfig {
    pub store: StoreConfig,
    pub propagation: PropagatorConfig,
    pub index: IndexConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum StoreConfig {
    Local(treemeta_store_local::LocalStoreConfig),
    #[default]
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IndexConfig {
    /// Indexes live under `index.{backend}` in the store.
    pub backend: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
        }
    }
}

impl MetaConfig {
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("invalid treemeta config")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("in {}", path.display()))
    }
}
