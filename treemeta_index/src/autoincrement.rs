use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use treemeta_core::Store;

use crate::{
    Index,
    error::{IndexError, IndexResult},
    layout::Layout,
    options::{Bound, IndexKind, IndexOptions},
};

/// Unique by name, but `add(id, "")` picks the next free number.
///
/// Numbers come from the highest numeric entry on disk, never below the
/// highest number this process handed out, and never below the lower bound.
#[derive(Debug)]
pub struct AutoincrementIndex {
    layout: Layout,
    bound: Bound,
    /// Highest number assigned by this process, `None` before the first.
    last: Mutex<Option<u64>>,
}

const MAX_ATTEMPTS: usize = 100;

impl AutoincrementIndex {
    pub fn new(store: Arc<dyn Store>, options: IndexOptions) -> Self {
        let bound = options.bound.unwrap_or_default();
        Self {
            layout: Layout::new(store, options, IndexKind::Autoincrement),
            bound,
            last: Mutex::new(None),
        }
    }

    async fn highest_on_disk(&self) -> IndexResult<Option<u64>> {
        Ok(self
            .layout
            .list(self.layout.root())
            .await?
            .iter()
            .filter_map(|name| name.parse::<u64>().ok())
            .max())
    }

    async fn assign(&self, id: &str) -> IndexResult<String> {
        let mut last = self.last.lock().await;
        for _ in 0..MAX_ATTEMPTS {
            let highest = self.highest_on_disk().await?.max(*last);
            let next = match highest {
                Some(n) => n.saturating_add(1).max(self.bound.lower),
                None => self.bound.lower,
            };
            if let Some(upper) = self.bound.upper {
                if next > upper {
                    return Err(IndexError::BoundExhausted {
                        type_name: self.layout.options.type_name.clone(),
                        index_by: self.layout.options.index_by.clone(),
                        upper,
                    });
                }
            }
            match self.layout.link(id, &next.to_string()).await {
                Ok(link) => {
                    *last = Some(next);
                    tracing::debug!(index = self.layout.root(), id, next, "assigned");
                    return Ok(link);
                }
                // another process took the number, look again
                Err(err) if err.is_already_exists() => {
                    *last = Some(next);
                }
                Err(err) => return Err(err),
            }
        }
        Err(self.layout.already_exists(id))
    }
}

#[async_trait]
impl Index for AutoincrementIndex {
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
        if value.is_empty() {
            return self.assign(id).await;
        }
        let value = self.layout.normalize(value)?;
        self.layout.link(id, &value).await
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
        self.layout.delete().await?;
        *self.last.lock().await = None;
        Ok(())
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
    use treemeta_core::paths;
    use treemeta_store_memory::MemoryStore;

    async fn index(bound: Option<Bound>) -> (Arc<MemoryStore>, AutoincrementIndex) {
        let store = Arc::new(MemoryStore::new());
        let mut options = IndexOptions::new("User", "UidNumber", "users");
        options.bound = bound;
        let idx = AutoincrementIndex::new(store.clone(), options);
        idx.init().await.unwrap();
        (store, idx)
    }

    fn number(link: &str) -> u64 {
        paths::file_name(link).parse().unwrap()
    }

    #[tokio::test]
    async fn starts_at_the_lower_bound() {
        let (_, idx) = index(Some(Bound::new(1000, 2000))).await;
        assert_eq!(number(&idx.add("u1", "").await.unwrap()), 1000);
        assert_eq!(number(&idx.add("u2", "").await.unwrap()), 1001);
        assert_eq!(idx.lookup("1001").await.unwrap(), vec!["u2"]);
    }

    #[tokio::test]
    async fn explicit_values_below_the_bound_are_skipped_over() {
        let (_, idx) = index(Some(Bound::new(1000, 2000))).await;
        idx.add("u1", "5").await.unwrap();
        assert_eq!(number(&idx.add("u2", "").await.unwrap()), 1000);
    }

    #[tokio::test]
    async fn upper_bound_is_enforced() {
        let (_, idx) = index(Some(Bound::new(1, 2))).await;
        idx.add("u1", "").await.unwrap();
        idx.add("u2", "").await.unwrap();
        let err = idx.add("u3", "").await.unwrap_err();
        assert!(matches!(err, IndexError::BoundExhausted { upper: 2, .. }));
    }

    #[tokio::test]
    async fn removed_numbers_are_not_reused() {
        let (_, idx) = index(None).await;
        idx.add("u0", "").await.unwrap();
        let link = idx.add("u1", "").await.unwrap();
        idx.remove("u1", paths::file_name(&link)).await.unwrap();
        assert_eq!(number(&idx.add("u2", "").await.unwrap()), number(&link) + 1);
    }

    #[tokio::test]
    async fn numbers_taken_elsewhere_are_skipped() {
        let (store, idx) = index(None).await;
        idx.add("u0", "").await.unwrap();
        // another process linked the next number behind our back
        store
            .create_symlink("users/other", &format!("{}/1", idx.root()))
            .await
            .unwrap();
        assert_eq!(number(&idx.add("u1", "").await.unwrap()), 2);
    }

    #[tokio::test]
    async fn delete_index_starts_over() {
        let (_, idx) = index(Some(Bound::new(10, 20))).await;
        idx.add("u0", "").await.unwrap();
        idx.add("u1", "").await.unwrap();
        idx.delete_index().await.unwrap();
        idx.init().await.unwrap();
        assert_eq!(number(&idx.add("u2", "").await.unwrap()), 10);
    }
}
