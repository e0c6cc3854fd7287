use std::sync::Arc;

use async_trait::async_trait;
use treemeta_core::Store;

use crate::{
    Index,
    error::IndexResult,
    layout::Layout,
    options::{IndexKind, IndexOptions},
};

/// `{root}/{value}` → `{entity_dir}/{id}`. A value belongs to at most one id.
#[derive(Debug)]
pub struct UniqueIndex {
    layout: Layout,
}

impl UniqueIndex {
    pub fn new(store: Arc<dyn Store>, options: IndexOptions) -> Self {
        Self {
            layout: Layout::new(store, options, IndexKind::Unique),
        }
    }
}

#[async_trait]
impl Index for UniqueIndex {
    async fn init(&self) -> IndexResult<()> {
        self.layout.init().await
    }

    async fn lookup(&self, value: &str) -> IndexResult<Vec<String>> {
        let value = self.layout.normalize(value)?;
        self.layout.lookup_link(&value).await
    }

    async fn lookup_many(&self, values: &[String]) -> IndexResult<Vec<String>> {
        let values = values
            .iter()
            .map(|v| self.layout.normalize(v))
            .collect::<IndexResult<Vec<_>>>()?;
        self.layout.lookup_links(&values).await
    }

    async fn add(&self, id: &str, value: &str) -> IndexResult<String> {
        let value = self.layout.normalize(value)?;
        let link = self.layout.link(id, &value).await?;
        tracing::debug!(index = self.layout.root(), id, %value, "indexed");
        Ok(link)
    }

    async fn remove(&self, _id: &str, value: &str) -> IndexResult<()> {
        let value = self.layout.normalize(value)?;
        self.layout.unlink(&value).await
    }

    async fn update(&self, id: &str, old_value: &str, new_value: &str) -> IndexResult<()> {
        self.remove(id, old_value).await?;
        self.add(id, new_value).await?;
        Ok(())
    }

    async fn search(&self, pattern: &str) -> IndexResult<Vec<String>> {
        self.layout.search_links(pattern).await
    }

    async fn delete_index(&self) -> IndexResult<()> {
        self.layout.delete().await
    }

    fn kind(&self) -> IndexKind {
        self.layout.kind()
    }

    fn options(&self) -> &IndexOptions {
        &self.layout.options
    }

    fn root(&self) -> &str {
        self.layout.root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use treemeta_store_memory::MemoryStore;

    async fn index(case_insensitive: bool) -> UniqueIndex {
        let options = IndexOptions::new("User", "Mail", "users").case_insensitive(case_insensitive);
        let idx = UniqueIndex::new(Arc::new(MemoryStore::new()), options);
        idx.init().await.unwrap();
        idx
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let idx = index(false).await;
        idx.init().await.unwrap();
    }

    #[tokio::test]
    async fn add_returns_the_link_path() {
        let idx = index(false).await;
        let link = idx.add("u1", "a@example.org").await.unwrap();
        assert_eq!(link, "index.disk/unique.User.Mail/a@example.org");
        assert_eq!(idx.lookup("a@example.org").await.unwrap(), vec!["u1"]);
    }

    #[tokio::test]
    async fn remove_missing_is_not_found() {
        let idx = index(false).await;
        let err = idx.remove("u1", "nobody").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn update_moves_the_value() {
        let idx = index(false).await;
        idx.add("u1", "old").await.unwrap();
        idx.update("u1", "old", "new").await.unwrap();
        assert!(idx.lookup("old").await.unwrap_err().is_not_found());
        assert_eq!(idx.lookup("new").await.unwrap(), vec!["u1"]);
    }

    #[tokio::test]
    async fn case_insensitive_values_fold() {
        let idx = index(true).await;
        idx.add("u1", "Alice").await.unwrap();
        assert_eq!(idx.lookup("ALICE").await.unwrap(), vec!["u1"]);
        assert!(idx.add("u2", "alice").await.unwrap_err().is_already_exists());
        idx.remove("u1", "aLiCe").await.unwrap();
    }

    #[tokio::test]
    async fn lookup_many_skips_missing_values() {
        let idx = index(false).await;
        idx.add("u1", "a").await.unwrap();
        idx.add("u2", "b").await.unwrap();
        let ids = idx
            .lookup_many(&["a".into(), "zzz".into(), "b".into()])
            .await
            .unwrap();
        assert_eq!(ids, vec!["u1", "u2"]);

        let err = idx.lookup_many(&["zzz".into()]).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
