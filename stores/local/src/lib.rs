use bytes::Bytes;
use fs4::fs_std::FileExt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use treemeta_core::{
    Error, HeldLock, LockGuard, paths,
    store::{EntryKind, EntryMeta, StoreResult},
};

/// Prefix of in-flight temporary files. They are hidden from listings.
const TEMP_PREFIX: &str = ".treemeta-";
const TEMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct LocalStoreConfig {
    pub base_path: String,
}

/// A [`treemeta_core::Store`] rooted at a local directory.
///
/// Locks are `flock`-style advisory locks on lockfiles, so they exclude
/// other processes sharing the same directory as well.
#[derive(Debug, Clone)]
pub struct LocalStore {
    base_path: PathBuf,
}

struct FileLock(std::fs::File);

impl HeldLock for FileLock {
    fn unlock(self: Box<Self>) -> io::Result<()> {
        FileExt::unlock(&self.0)
    }
}

fn map_io(err: io::Error, path: &str) -> Error {
    match err.kind() {
        io::ErrorKind::NotFound => Error::NotFound(path.to_string()),
        io::ErrorKind::AlreadyExists | io::ErrorKind::DirectoryNotEmpty => {
            Error::AlreadyExists(path.to_string())
        }
        _ => Error::Io(err),
    }
}

fn join_error(err: tokio::task::JoinError) -> Error {
    Error::Io(io::Error::other(err))
}

fn is_temp_name(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX)
}

impl LocalStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        LocalStore {
            base_path: base_path.into(),
        }
    }

    pub fn create(config: LocalStoreConfig) -> Self {
        Self::new(config.base_path)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn resolve_path(&self, path: &str) -> StoreResult<PathBuf> {
        paths::validate(path)?;
        Ok(self.base_path.join(path))
    }

    async fn entry_meta(&self, path: &str) -> StoreResult<Option<std::fs::Metadata>> {
        let full_path = self.resolve_path(path)?;
        match tokio::fs::symlink_metadata(&full_path).await {
            Ok(meta) => Ok(Some(meta)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes to a temporary file next to the target and renames it into
    /// place.
    async fn write_atomic(&self, path: &str, bytes: Bytes, create_parents: bool) -> StoreResult<()> {
        let full_path = self.resolve_path(path)?;
        let owned = path.to_string();
        tokio::task::spawn_blocking(move || -> StoreResult<()> {
            let parent_dir = full_path.parent().ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "Could not find parent directory")
            })?;
            if create_parents {
                std::fs::create_dir_all(parent_dir)?;
            }
            let mut temp_file = tempfile::Builder::new()
                .prefix(TEMP_PREFIX)
                .suffix(TEMP_SUFFIX)
                .tempfile_in(parent_dir)
                .map_err(|e| map_io(e, paths::parent(&owned)))?;
            temp_file.write_all(&bytes)?;
            temp_file.as_file().sync_all()?;
            temp_file
                .persist(&full_path)
                .map_err(|e| map_io(e.error, &owned))?;
            Ok(())
        })
        .await
        .map_err(join_error)?
    }

    async fn create_parents(&self, full_path: &Path) -> StoreResult<()> {
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl treemeta_core::Store for LocalStore {
    async fn read(&self, path: &str) -> StoreResult<Bytes> {
        let full_path = self.resolve_path(path)?;
        let bytes = tokio::fs::read(&full_path)
            .await
            .map_err(|e| map_io(e, path))?;
        Ok(Bytes::from(bytes))
    }

    async fn write(&self, path: &str, bytes: Bytes) -> StoreResult<()> {
        self.write_atomic(path, bytes, true).await
    }

    async fn write_in_dir(&self, path: &str, bytes: Bytes) -> StoreResult<()> {
        self.write_atomic(path, bytes, false).await
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        Ok(self.entry_meta(path).await?.is_some())
    }

    async fn stat(&self, path: &str) -> StoreResult<EntryMeta> {
        let meta = self
            .entry_meta(path)
            .await?
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        let file_type = meta.file_type();
        let kind = if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Dir
        } else {
            EntryKind::File
        };
        Ok(EntryMeta {
            kind,
            modified: meta.modified()?,
        })
    }

    async fn touch(&self, path: &str) -> StoreResult<()> {
        let full_path = self.resolve_path(path)?;
        let owned = path.to_string();
        tokio::task::spawn_blocking(move || -> StoreResult<()> {
            let file = std::fs::File::open(&full_path).map_err(|e| map_io(e, &owned))?;
            file.set_modified(SystemTime::now())?;
            Ok(())
        })
        .await
        .map_err(join_error)?
    }

    async fn list_dir(&self, path: &str) -> StoreResult<Vec<String>> {
        let full_path = self.resolve_path(path)?;
        let mut entries = tokio::fs::read_dir(&full_path)
            .await
            .map_err(|e| map_io(e, path))?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_temp_name(&name) {
                names.push(name);
            }
        }
        Ok(names)
    }

    async fn create_dir(&self, path: &str) -> StoreResult<()> {
        let full_path = self.resolve_path(path)?;
        self.create_parents(&full_path).await?;
        tokio::fs::create_dir(&full_path)
            .await
            .map_err(|e| map_io(e, path))
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> StoreResult<()> {
        let old_full_path = self.resolve_path(old_path)?;
        let new_full_path = self.resolve_path(new_path)?;

        if self.entry_meta(old_path).await?.is_none() {
            return Err(Error::NotFound(old_path.to_string()));
        }
        // rename(2) silently replaces files and empty directories
        if self.entry_meta(new_path).await?.is_some() {
            return Err(Error::AlreadyExists(new_path.to_string()));
        }
        self.create_parents(&new_full_path).await?;

        tokio::fs::rename(&old_full_path, &new_full_path)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => Error::NotFound(old_path.to_string()),
                _ => map_io(e, new_path),
            })
    }

    async fn create_symlink(&self, target: &str, link: &str) -> StoreResult<()> {
        paths::validate(target)?;
        let link_full_path = self.resolve_path(link)?;
        self.create_parents(&link_full_path).await?;
        let relative = paths::relative_link_target(link, target);
        tokio::fs::symlink(&relative, &link_full_path)
            .await
            .map_err(|e| map_io(e, link))
    }

    async fn resolve_symlink(&self, link: &str) -> StoreResult<String> {
        let link_full_path = self.resolve_path(link)?;
        let raw = tokio::fs::read_link(&link_full_path)
            .await
            .map_err(|e| map_io(e, link))?;
        if raw.is_absolute() {
            let relative = raw
                .strip_prefix(&self.base_path)
                .map_err(|_| Error::InvalidPath(raw.to_string_lossy().into_owned()))?;
            return Ok(relative.to_string_lossy().into_owned());
        }
        paths::resolve_link_target(link, &raw.to_string_lossy())
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        let full_path = self.resolve_path(path)?;
        tokio::fs::remove_file(&full_path)
            .await
            .map_err(|e| map_io(e, path))
    }

    async fn remove_dir(&self, path: &str) -> StoreResult<bool> {
        let full_path = self.resolve_path(path)?;
        match tokio::fs::remove_dir(&full_path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::DirectoryNotEmpty => Ok(false),
            Err(e) => Err(map_io(e, path)),
        }
    }

    async fn delete_all(&self, path: &str) -> StoreResult<()> {
        let full_path = self.resolve_path(path)?;
        let result = match self.entry_meta(path).await? {
            None => return Ok(()),
            Some(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&full_path).await,
            Some(_) => tokio::fs::remove_file(&full_path).await,
        };
        match result {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn lock(&self, lock_path: &str) -> StoreResult<LockGuard> {
        let full_path = self.resolve_path(lock_path)?;
        let file = tokio::task::spawn_blocking(move || -> io::Result<std::fs::File> {
            if let Some(parent) = full_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&full_path)?;
            file.lock_exclusive()?;
            Ok(file)
        })
        .await
        .map_err(join_error)?
        .map_err(|source| Error::LockFailure {
            path: lock_path.to_string(),
            source,
        })?;
        tracing::trace!(lock_path, "acquired file lock");
        Ok(LockGuard::new(lock_path, FileLock(file)))
    }
}
