//! Secondary indexes kept as symlinks in a [`treemeta_core::Store`].
//!
//! Each index maps the values of one entity field to entity ids. Three
//! layouts are available:
//!
//! - [`UniqueIndex`]: `{root}/{value}` links to the entity.
//! - [`NonUniqueIndex`]: `{root}/{value}/{id}` links to the entity.
//! - [`AutoincrementIndex`]: like unique, but assigns numbers on demand.
//!
//! [`Indexer`] keeps many indexes per entity type and applies entity-level
//! changes to all of them.

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use treemeta_core::Store;

mod autoincrement;
mod error;
mod indexer;
mod layout;
mod non_unique;
mod options;
mod unique;

pub use autoincrement::AutoincrementIndex;
pub use error::{IndexError, IndexResult};
pub use indexer::{Field, IndexAddResult, Indexable, Indexer};
pub use non_unique::NonUniqueIndex;
pub use options::{Bound, DEFAULT_BACKEND, IndexKind, IndexOptions};
pub use unique::UniqueIndex;

/// Operations every index layout supports.
///
/// Lookups and searches that match nothing fail with
/// [`IndexError::NotFound`].
#[async_trait]
pub trait Index: Debug + Send + Sync {
    /// Creates the index root. Safe to call on an existing index.
    async fn init(&self) -> IndexResult<()>;

    /// Ids indexed under `value`.
    async fn lookup(&self, value: &str) -> IndexResult<Vec<String>>;

    /// Ids indexed under any of `values`, from a single listing of the
    /// index root. Missing values are skipped as long as one matches.
    async fn lookup_many(&self, values: &[String]) -> IndexResult<Vec<String>>;

    /// Indexes `id` under `value` and returns the path of the new link.
    async fn add(&self, id: &str, value: &str) -> IndexResult<String>;

    async fn remove(&self, id: &str, value: &str) -> IndexResult<()>;

    /// Remove followed by add. Not atomic.
    async fn update(&self, id: &str, old_value: &str, new_value: &str) -> IndexResult<()>;

    /// Ids under every value matching the shell glob `pattern`.
    async fn search(&self, pattern: &str) -> IndexResult<Vec<String>>;

    /// Removes the index and everything in it.
    async fn delete_index(&self) -> IndexResult<()>;

    fn kind(&self) -> IndexKind;

    fn options(&self) -> &IndexOptions;

    /// Store directory holding the index entries.
    fn root(&self) -> &str;

    fn type_name(&self) -> &str {
        &self.options().type_name
    }

    fn index_by(&self) -> &str {
        &self.options().index_by
    }
}

/// Builds an index of the given layout. It still needs [`Index::init`].
pub fn new_index(kind: IndexKind, store: Arc<dyn Store>, options: IndexOptions) -> Arc<dyn Index> {
    match kind {
        IndexKind::Unique => Arc::new(UniqueIndex::new(store, options)),
        IndexKind::NonUnique => Arc::new(NonUniqueIndex::new(store, options)),
        IndexKind::Autoincrement => Arc::new(AutoincrementIndex::new(store, options)),
    }
}
