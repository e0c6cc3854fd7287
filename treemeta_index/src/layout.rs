//! Placement of an index inside the store and the symlink operations the
//! strategies share.
//!
//! An index lives at `index.{backend}/{kind}.{type_name}.{index_by}`. Every
//! symlink in it points at `{entity_dir}/{id}`, so the id of a hit is the
//! last component of the link target.

use std::{collections::HashSet, sync::Arc};

use glob::Pattern;
use treemeta_core::{Store, paths};

use crate::{
    error::{IndexError, IndexResult},
    options::{IndexKind, IndexOptions},
};

#[derive(Debug)]
pub(crate) struct Layout {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) options: IndexOptions,
    kind: IndexKind,
    root: String,
}

impl Layout {
    pub(crate) fn new(store: Arc<dyn Store>, options: IndexOptions, kind: IndexKind) -> Self {
        let root = format!(
            "index.{}/{}.{}.{}",
            options.backend, kind, options.type_name, options.index_by
        );
        Self {
            store,
            options,
            kind,
            root,
        }
    }

    pub(crate) fn kind(&self) -> IndexKind {
        self.kind
    }

    pub(crate) fn root(&self) -> &str {
        &self.root
    }

    pub(crate) fn entry(&self, name: &str) -> String {
        paths::join(&self.root, name)
    }

    pub(crate) fn entity_path(&self, id: &str) -> String {
        paths::join(&self.options.entity_dir, id)
    }

    fn folds_case(&self) -> bool {
        self.options.case_insensitive && self.kind != IndexKind::Autoincrement
    }

    /// Turns a value into the entry name it is stored under.
    pub(crate) fn normalize(&self, value: &str) -> IndexResult<String> {
        check_name(value)?;
        if self.folds_case() {
            Ok(value.to_lowercase())
        } else {
            Ok(value.to_string())
        }
    }

    pub(crate) fn pattern(&self, pattern: &str) -> IndexResult<Pattern> {
        let folded;
        let pattern = if self.folds_case() {
            folded = pattern.to_lowercase();
            folded.as_str()
        } else {
            pattern
        };
        Pattern::new(pattern).map_err(|err| IndexError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: err.msg.to_string(),
        })
    }

    pub(crate) fn not_found(&self, values: Vec<String>) -> IndexError {
        IndexError::NotFound {
            type_name: self.options.type_name.clone(),
            index_by: self.options.index_by.clone(),
            values,
        }
    }

    pub(crate) fn already_exists(&self, value: &str) -> IndexError {
        IndexError::AlreadyExists {
            type_name: self.options.type_name.clone(),
            index_by: self.options.index_by.clone(),
            value: value.to_string(),
        }
    }

    pub(crate) async fn init(&self) -> IndexResult<()> {
        match self.store.create_dir(&self.root).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_already_exists() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub(crate) async fn delete(&self) -> IndexResult<()> {
        self.store.delete_all(&self.root).await?;
        Ok(())
    }

    /// Directory listing where a missing directory reads as empty.
    pub(crate) async fn list(&self, path: &str) -> IndexResult<Vec<String>> {
        match self.store.list_dir(path).await {
            Ok(names) => Ok(names),
            Err(err) if err.is_not_found() => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    pub(crate) async fn resolve_id(&self, link: &str) -> IndexResult<String> {
        let target = self.store.resolve_symlink(link).await?;
        Ok(paths::file_name(&target).to_string())
    }

    /// Creates `{root}/{name}` pointing at the entity.
    pub(crate) async fn link(&self, id: &str, name: &str) -> IndexResult<String> {
        check_name(id)?;
        let link = self.entry(name);
        match self.store.create_symlink(&self.entity_path(id), &link).await {
            Ok(()) => Ok(link),
            Err(err) if err.is_already_exists() => Err(self.already_exists(name)),
            Err(err) => Err(err.into()),
        }
    }

    pub(crate) async fn unlink(&self, name: &str) -> IndexResult<()> {
        match self.store.delete(&self.entry(name)).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Err(self.not_found(vec![name.to_string()])),
            Err(err) => Err(err.into()),
        }
    }

    pub(crate) async fn lookup_link(&self, name: &str) -> IndexResult<Vec<String>> {
        match self.resolve_id(&self.entry(name)).await {
            Ok(id) => Ok(vec![id]),
            Err(IndexError::Store(err)) if err.is_not_found() => {
                Err(self.not_found(vec![name.to_string()]))
            }
            Err(err) => Err(err),
        }
    }

    /// Looks up many names against a single listing of the root.
    pub(crate) async fn lookup_links(&self, names: &[String]) -> IndexResult<Vec<String>> {
        let present: HashSet<String> = self.list(&self.root).await?.into_iter().collect();
        let mut ids = Vec::new();
        for name in names {
            if present.contains(name) {
                push_unique(&mut ids, self.resolve_id(&self.entry(name)).await?);
            }
        }
        if ids.is_empty() {
            return Err(self.not_found(names.to_vec()));
        }
        Ok(ids)
    }

    /// Names directly under the root matching `pattern`.
    pub(crate) async fn matching(&self, pattern: &str) -> IndexResult<Vec<String>> {
        let glob = self.pattern(pattern)?;
        let mut names: Vec<String> = self
            .list(&self.root)
            .await?
            .into_iter()
            .filter(|name| glob.matches(name))
            .collect();
        names.sort();
        Ok(names)
    }

    pub(crate) async fn search_links(&self, pattern: &str) -> IndexResult<Vec<String>> {
        let mut ids = Vec::new();
        for name in self.matching(pattern).await? {
            push_unique(&mut ids, self.resolve_id(&self.entry(&name)).await?);
        }
        if ids.is_empty() {
            return Err(self.not_found(vec![pattern.to_string()]));
        }
        Ok(ids)
    }
}

/// Values and ids become single path components.
pub(crate) fn check_name(name: &str) -> IndexResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(IndexError::InvalidValue(name.to_string()));
    }
    Ok(())
}

pub(crate) fn push_unique(ids: &mut Vec<String>, id: String) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}
