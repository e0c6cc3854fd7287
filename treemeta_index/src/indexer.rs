//! Entity-level operations over all indexes configured for a type.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use treemeta_core::{Store, paths};

use crate::{
    Index, new_index,
    error::{IndexError, IndexResult},
    options::{IndexKind, IndexOptions},
};

/// An entity whose fields can be indexed.
pub trait Indexable: Send + Sync {
    /// Groups entities; indexes are configured per type name.
    fn type_name(&self) -> &str;

    /// String value of a field, `None` when the entity has no such field.
    /// An empty string means "no value".
    fn field(&self, name: &str) -> Option<String>;
}

/// A field name and a value to look for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: String,
}

impl Field {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// The value an entity ended up indexed under, e.g. an assigned number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexAddResult {
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone)]
struct TypeIndexes {
    pk_field: String,
    by_field: BTreeMap<String, Vec<Arc<dyn Index>>>,
}

impl TypeIndexes {
    fn all(&self) -> impl Iterator<Item = (&str, &Arc<dyn Index>)> {
        self.by_field
            .iter()
            .flat_map(|(field, indexes)| indexes.iter().map(move |idx| (field.as_str(), idx)))
    }
}

/// Read/write locks created on first use of a name.
#[derive(Debug, Default)]
struct NamedLocks(DashMap<String, Arc<RwLock<()>>>);

impl NamedLocks {
    fn get(&self, name: &str) -> Arc<RwLock<()>> {
        self.0.entry(name.to_string()).or_default().clone()
    }

    async fn read(&self, name: &str) -> OwnedRwLockReadGuard<()> {
        self.get(name).read_owned().await
    }

    async fn write(&self, name: &str) -> OwnedRwLockWriteGuard<()> {
        self.get(name).write_owned().await
    }
}

/// Configures and queries many indexes per entity type.
///
/// Writers of one type are serialized; readers share.
#[derive(Debug)]
pub struct Indexer {
    store: Arc<dyn Store>,
    backend: String,
    types: DashMap<String, TypeIndexes>,
    locks: NamedLocks,
}

impl Indexer {
    pub fn new(store: Arc<dyn Store>, backend: impl Into<String>) -> Self {
        Self {
            store,
            backend: backend.into(),
            types: DashMap::new(),
            locks: NamedLocks::default(),
        }
    }

    /// Adds an index of `kind` on `options.index_by` and initializes it.
    ///
    /// `pk_field` names the field holding entity ids. The first index
    /// configured for a type decides it.
    pub async fn add_index(
        &self,
        kind: IndexKind,
        pk_field: &str,
        options: IndexOptions,
    ) -> IndexResult<Arc<dyn Index>> {
        let options = options.with_backend(self.backend.clone());
        let type_name = options.type_name.clone();
        let index_by = options.index_by.clone();
        let idx = new_index(kind, self.store.clone(), options);

        let _guard = self.locks.write(&type_name).await;
        self.types
            .entry(type_name.clone())
            .or_insert_with(|| TypeIndexes {
                pk_field: pk_field.to_string(),
                by_field: BTreeMap::new(),
            })
            .by_field
            .entry(index_by.clone())
            .or_default()
            .push(idx.clone());
        idx.init().await?;
        tracing::debug!(%type_name, %index_by, %kind, root = idx.root(), "index added");
        Ok(idx)
    }

    fn indexes(&self, type_name: &str) -> Option<TypeIndexes> {
        self.types.get(type_name).map(|t| t.value().clone())
    }

    fn value_of(entity: &dyn Indexable, field: &str) -> IndexResult<String> {
        entity.field(field).ok_or_else(|| IndexError::UnknownField {
            type_name: entity.type_name().to_string(),
            field: field.to_string(),
        })
    }

    /// Indexes `entity` in every index of its type.
    ///
    /// Empty values are not indexed, except by autoincrement indexes where
    /// they ask for a number to be assigned. Stops at the first failure
    /// without undoing earlier adds.
    pub async fn add(&self, entity: &dyn Indexable) -> IndexResult<Vec<IndexAddResult>> {
        let type_name = entity.type_name();
        let _guard = self.locks.write(type_name).await;
        let Some(indexes) = self.indexes(type_name) else {
            return Ok(Vec::new());
        };
        let pk = Self::value_of(entity, &indexes.pk_field)?;

        let mut results = Vec::new();
        for (field, idx) in indexes.all() {
            let value = Self::value_of(entity, field)?;
            if value.is_empty() && idx.kind() != IndexKind::Autoincrement {
                continue;
            }
            let link = idx.add(&pk, &value).await?;
            results.push(IndexAddResult {
                field: field.to_string(),
                value: Self::indexed_value(idx.kind(), &link).to_string(),
            });
        }
        Ok(results)
    }

    /// The value stored under a link: the entry name for unique and
    /// autoincrement indexes, the value directory for non-unique ones.
    fn indexed_value(kind: IndexKind, link: &str) -> &str {
        match kind {
            IndexKind::NonUnique => paths::file_name(paths::parent(link)),
            IndexKind::Unique | IndexKind::Autoincrement => paths::file_name(link),
        }
    }

    /// Ids of entities matching any of `fields`, sorted and deduplicated.
    /// Misses in single indexes are not errors.
    pub async fn find_by(&self, type_name: &str, fields: &[Field]) -> IndexResult<Vec<String>> {
        let _guard = self.locks.read(type_name).await;
        let Some(indexes) = self.indexes(type_name) else {
            return Ok(Vec::new());
        };

        let mut by_name: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for field in fields {
            by_name
                .entry(field.name.as_str())
                .or_default()
                .push(field.value.clone());
        }

        let mut ids = BTreeSet::new();
        for (name, values) in by_name {
            for idx in indexes.by_field.get(name).into_iter().flatten() {
                match idx.lookup_many(&values).await {
                    Ok(found) => ids.extend(found),
                    Err(err) if err.is_not_found() => continue,
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(ids.into_iter().collect())
    }

    /// Ids of entities whose `field` matches the shell glob `pattern`.
    pub async fn find_by_partial(
        &self,
        type_name: &str,
        field: &str,
        pattern: &str,
    ) -> IndexResult<Vec<String>> {
        let _guard = self.locks.read(type_name).await;
        let Some(indexes) = self.indexes(type_name) else {
            return Ok(Vec::new());
        };

        let mut ids = BTreeSet::new();
        for idx in indexes.by_field.get(field).into_iter().flatten() {
            match idx.search(pattern).await {
                Ok(found) => ids.extend(found),
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(ids.into_iter().collect())
    }

    /// Moves the index entries of an entity from its `from` to its `to`
    /// field values. The id is taken from `from`.
    pub async fn update(&self, from: &dyn Indexable, to: &dyn Indexable) -> IndexResult<()> {
        if from.type_name() != to.type_name() {
            return Err(IndexError::TypeMismatch {
                from: from.type_name().to_string(),
                to: to.type_name().to_string(),
            });
        }
        let type_name = from.type_name();
        let _guard = self.locks.write(type_name).await;
        let Some(indexes) = self.indexes(type_name) else {
            return Ok(());
        };
        let pk = Self::value_of(from, &indexes.pk_field)?;

        for (field, idx) in indexes.all() {
            let old = Self::value_of(from, field)?;
            let new = Self::value_of(to, field)?;
            if old == new {
                continue;
            }
            if old.is_empty() {
                idx.add(&pk, &new).await?;
            } else if new.is_empty() {
                idx.remove(&pk, &old).await?;
            } else {
                idx.update(&pk, &old, &new).await?;
            }
        }
        Ok(())
    }

    /// Removes `entity` from every index of its type.
    pub async fn delete(&self, entity: &dyn Indexable) -> IndexResult<()> {
        let type_name = entity.type_name();
        let _guard = self.locks.write(type_name).await;
        let Some(indexes) = self.indexes(type_name) else {
            return Ok(());
        };
        let pk = Self::value_of(entity, &indexes.pk_field)?;

        for (field, idx) in indexes.all() {
            let value = Self::value_of(entity, field)?;
            if value.is_empty() {
                continue;
            }
            idx.remove(&pk, &value).await?;
        }
        Ok(())
    }

    /// Deletes every index from the store and forgets its configuration.
    pub async fn reset(&self) -> IndexResult<()> {
        let type_names: Vec<String> = self.types.iter().map(|t| t.key().clone()).collect();
        for type_name in type_names {
            let _guard = self.locks.write(&type_name).await;
            let Some(indexes) = self.indexes(&type_name) else {
                continue;
            };
            for (_, idx) in indexes.all() {
                idx.delete_index().await?;
            }
            self.types.remove(&type_name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use treemeta_store_memory::MemoryStore;

    struct Group {
        id: &'static str,
        name: &'static str,
    }

    impl Indexable for Group {
        fn type_name(&self) -> &str {
            "Group"
        }

        fn field(&self, name: &str) -> Option<String> {
            match name {
                "Id" => Some(self.id.to_string()),
                "Name" => Some(self.name.to_string()),
                _ => None,
            }
        }
    }

    #[tokio::test]
    async fn unknown_types_are_empty() {
        let indexer = Indexer::new(Arc::new(MemoryStore::new()), "disk");
        let g = Group { id: "g1", name: "staff" };
        assert!(indexer.add(&g).await.unwrap().is_empty());
        assert!(indexer.find_by("Group", &[Field::new("Name", "staff")]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_fields_are_reported() {
        let indexer = Indexer::new(Arc::new(MemoryStore::new()), "disk");
        indexer
            .add_index(IndexKind::Unique, "Id", IndexOptions::new("Group", "Mail", "groups"))
            .await
            .unwrap();
        let err = indexer.add(&Group { id: "g1", name: "staff" }).await.unwrap_err();
        assert!(matches!(err, IndexError::UnknownField { field, .. } if field == "Mail"));
    }

    #[tokio::test]
    async fn indexes_live_under_the_backend_root() {
        let store = Arc::new(MemoryStore::new());
        let indexer = Indexer::new(store.clone(), "cs3");
        let idx = indexer
            .add_index(IndexKind::Unique, "Id", IndexOptions::new("Group", "Name", "groups"))
            .await
            .unwrap();
        assert_eq!(idx.root(), "index.cs3/unique.Group.Name");
        assert!(store.exists("index.cs3/unique.Group.Name").await.unwrap());
    }
}
