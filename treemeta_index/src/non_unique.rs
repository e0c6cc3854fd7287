use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use treemeta_core::{Store, paths};

use crate::{
    Index,
    error::IndexResult,
    layout::{Layout, check_name, push_unique},
    options::{IndexKind, IndexOptions},
};

/// `{root}/{value}/{id}` → `{entity_dir}/{id}`. Many ids may share a value;
/// a value directory disappears with its last entry.
#[derive(Debug)]
pub struct NonUniqueIndex {
    layout: Layout,
}

impl NonUniqueIndex {
    pub fn new(store: Arc<dyn Store>, options: IndexOptions) -> Self {
        Self {
            layout: Layout::new(store, options, IndexKind::NonUnique),
        }
    }

    async fn ids_under(&self, value: &str) -> IndexResult<Vec<String>> {
        self.layout.list(&self.layout.entry(value)).await
    }
}

#[async_trait]
impl Index for NonUniqueIndex {
    async fn init(&self) -> IndexResult<()> {
        self.layout.init().await
    }

    async fn lookup(&self, value: &str) -> IndexResult<Vec<String>> {
        let value = self.layout.normalize(value)?;
        let mut ids = self.ids_under(&value).await?;
        if ids.is_empty() {
            return Err(self.layout.not_found(vec![value]));
        }
        ids.sort();
        Ok(ids)
    }

    async fn lookup_many(&self, values: &[String]) -> IndexResult<Vec<String>> {
        let present: HashSet<String> = self
            .layout
            .list(self.layout.root())
            .await?
            .into_iter()
            .collect();
        let mut ids = Vec::new();
        for value in values {
            let value = self.layout.normalize(value)?;
            if !present.contains(&value) {
                continue;
            }
            let mut found = self.ids_under(&value).await?;
            found.sort();
            for id in found {
                push_unique(&mut ids, id);
            }
        }
        if ids.is_empty() {
            return Err(self.layout.not_found(values.to_vec()));
        }
        Ok(ids)
    }

    async fn add(&self, id: &str, value: &str) -> IndexResult<String> {
        let value = self.layout.normalize(value)?;
        check_name(id)?;
        // create_symlink creates the value directory when it is missing
        let link = paths::join(&self.layout.entry(&value), id);
        match self
            .layout
            .store
            .create_symlink(&self.layout.entity_path(id), &link)
            .await
        {
            Ok(()) => {
                tracing::debug!(index = self.layout.root(), id, %value, "indexed");
                Ok(link)
            }
            Err(err) if err.is_already_exists() => Err(self.layout.already_exists(&value)),
            Err(err) => Err(err.into()),
        }
    }

    async fn remove(&self, id: &str, value: &str) -> IndexResult<()> {
        let value = self.layout.normalize(value)?;
        check_name(id)?;
        let dir = self.layout.entry(&value);
        match self.layout.store.delete(&paths::join(&dir, id)).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => return Err(self.layout.not_found(vec![value])),
            Err(err) => return Err(err.into()),
        }
        // a concurrent add keeps the directory alive
        match self.layout.store.remove_dir(&dir).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn update(&self, id: &str, old_value: &str, new_value: &str) -> IndexResult<()> {
        self.remove(id, old_value).await?;
        self.add(id, new_value).await?;
        Ok(())
    }

    async fn search(&self, pattern: &str) -> IndexResult<Vec<String>> {
        let mut ids = Vec::new();
        for value in self.layout.matching(pattern).await? {
            let mut found = self.ids_under(&value).await?;
            found.sort();
            for id in found {
                push_unique(&mut ids, id);
            }
        }
        if ids.is_empty() {
            return Err(self.layout.not_found(vec![pattern.to_string()]));
        }
        Ok(ids)
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
