use async_trait::async_trait;
use bytes::Bytes;
use std::time::SystemTime;

use crate::error::{Error, Result};

pub type StoreResult<T> = Result<T>;

/// What a path points at. Symlinks are reported as such, never followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMeta {
    pub kind: EntryKind,
    pub modified: SystemTime,
}

impl EntryMeta {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }
}

/// Path-addressable storage with the primitives the metadata layer uses
/// for coordination: atomic rename, create-if-absent directories and
/// symlinks, and advisory per-path locks.
///
/// Paths are relative, `/`-separated and must not contain `..`.
/// Symlink targets are store paths as well.
#[async_trait]
pub trait Store: std::fmt::Debug + Send + Sync + 'static {
    /// Reads a whole file.
    async fn read(&self, path: &str) -> StoreResult<Bytes>;

    /// Replaces the file at `path`, creating missing parent directories.
    /// Readers see either the old or the new content, never a mix.
    async fn write(&self, path: &str, bytes: Bytes) -> StoreResult<()>;

    /// Like [`Store::write`], but fails with [`Error::NotFound`] instead of
    /// creating the parent directory when it is missing.
    async fn write_in_dir(&self, path: &str, bytes: Bytes) -> StoreResult<()>;

    /// Whether an entry is present at `path`. Dangling symlinks count.
    async fn exists(&self, path: &str) -> StoreResult<bool>;

    /// Metadata of the entry itself (symlinks are not followed).
    async fn stat(&self, path: &str) -> StoreResult<EntryMeta>;

    /// Bumps the modification time of an entry to now.
    async fn touch(&self, path: &str) -> StoreResult<()>;

    /// Names of the direct children of a directory, in no particular order.
    async fn list_dir(&self, path: &str) -> StoreResult<Vec<String>>;

    /// Creates a directory, creating missing parents first.
    ///
    /// Fails with [`Error::AlreadyExists`] when the directory itself is
    /// already present, so callers can tell "created" from "found".
    async fn create_dir(&self, path: &str) -> StoreResult<()>;

    /// Atomically moves a file, symlink or directory.
    ///
    /// Fails with [`Error::NotFound`] when `old_path` is missing and with
    /// [`Error::AlreadyExists`] when `new_path` is taken.
    async fn rename(&self, old_path: &str, new_path: &str) -> StoreResult<()>;

    /// Creates `link` pointing at `target`, creating missing parents of
    /// `link`. Atomic if absent: fails with [`Error::AlreadyExists`] when
    /// `link` exists.
    async fn create_symlink(&self, target: &str, link: &str) -> StoreResult<()>;

    /// Returns the store path a symlink points at.
    async fn resolve_symlink(&self, link: &str) -> StoreResult<String>;

    /// Deletes a file or symlink.
    async fn delete(&self, path: &str) -> StoreResult<()>;

    /// Removes an empty directory. Returns `false` and leaves it alone when
    /// it still has entries.
    async fn remove_dir(&self, path: &str) -> StoreResult<bool>;

    /// Recursively deletes a directory tree. Missing paths are not an error.
    async fn delete_all(&self, path: &str) -> StoreResult<()>;

    /// Deterministic lockfile path guarding the metadata of `node_path`.
    fn lock_path(&self, node_path: &str) -> String {
        format!("{node_path}.lock")
    }

    /// Blocks until the exclusive advisory lock at `lock_path` is held.
    async fn lock(&self, lock_path: &str) -> StoreResult<LockGuard>;
}

/// A lock held on behalf of a [`LockGuard`].
pub trait HeldLock: Send {
    fn unlock(self: Box<Self>) -> std::io::Result<()>;
}

/// Exclusive lock on a store path.
///
/// Released on drop. [`LockGuard::release`] releases early and may be
/// called any number of times.
pub struct LockGuard {
    path: String,
    held: Option<Box<dyn HeldLock>>,
}

impl LockGuard {
    pub fn new(path: impl Into<String>, held: impl HeldLock + 'static) -> Self {
        Self {
            path: path.into(),
            held: Some(Box::new(held)),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.held.is_some()
    }

    pub fn release(&mut self) -> StoreResult<()> {
        match self.held.take() {
            Some(held) => held.unlock().map_err(|source| Error::LockFailure {
                path: self.path.clone(),
                source,
            }),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("path", &self.path)
            .field("held", &self.held.is_some())
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            tracing::warn!("failed to release lock on drop: {err}");
        }
    }
}
