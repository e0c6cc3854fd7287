use bytes::Bytes;
use dashmap::DashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;
use treemeta_core::{
    Error, HeldLock, LockGuard, paths,
    store::{EntryKind, EntryMeta, StoreResult},
};

/// Symlink chains longer than this are treated as loops.
const MAX_SYMLINK_HOPS: usize = 40;

#[derive(Debug, Clone)]
enum Data {
    File(Bytes),
    Dir,
    Symlink(String),
}

#[derive(Debug, Clone)]
struct Entry {
    data: Data,
    modified: SystemTime,
}

impl Entry {
    fn new(data: Data) -> Self {
        Self {
            data,
            modified: SystemTime::now(),
        }
    }

    fn kind(&self) -> EntryKind {
        match self.data {
            Data::File(_) => EntryKind::File,
            Data::Dir => EntryKind::Dir,
            Data::Symlink(_) => EntryKind::Symlink,
        }
    }
}

type LockMap = DashMap<String, Arc<tokio::sync::Mutex<()>>>;

struct MemoryLock {
    guard: tokio::sync::OwnedMutexGuard<()>,
    path: String,
    locks: Arc<LockMap>,
}

impl HeldLock for MemoryLock {
    fn unlock(self: Box<Self>) -> io::Result<()> {
        let MemoryLock { guard, path, locks } = *self;
        let mutex = Arc::clone(tokio::sync::OwnedMutexGuard::mutex(&guard));
        drop(guard);
        // only the map and `mutex` left: nobody is waiting
        locks.remove_if(&path, |_, m| Arc::ptr_eq(m, &mutex) && Arc::strong_count(m) == 2);
        Ok(())
    }
}

/// A [`treemeta_core::Store`] keeping everything in process memory.
///
/// Directories are explicit entries. Operations touching more than one
/// entry (parent creation, rename, recursive delete) are serialized, so a
/// directory rename is atomic for concurrent writers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    structure: Mutex<()>,
    locks: Arc<LockMap>,
}

fn not_a_dir(path: &str) -> Error {
    Error::Io(io::Error::other(format!("{path} is not a directory")))
}

impl MemoryStore {
    /// Creates a new, empty `MemoryStore`.
    pub fn new() -> Self {
        Self::default()
    }

    fn serialized(&self) -> MutexGuard<'_, ()> {
        self.structure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn get(&self, path: &str) -> Option<Entry> {
        self.entries.get(path).map(|e| e.value().clone())
    }

    /// Adding or removing an entry updates the directory's mtime, as on a
    /// POSIX filesystem.
    fn bump_parent(&self, path: &str) {
        if let Some(mut parent) = self.entries.get_mut(paths::parent(path)) {
            parent.modified = SystemTime::now();
        }
    }

    fn has_children(&self, path: &str) -> bool {
        let prefix = format!("{path}/");
        self.entries.iter().any(|e| e.key().starts_with(&prefix))
    }

    /// Creates every missing ancestor directory of `path`.
    fn ensure_parents(&self, path: &str) -> StoreResult<()> {
        let parent = paths::parent(path);
        if parent.is_empty() {
            return Ok(());
        }
        let mut prefix = String::with_capacity(parent.len());
        for component in parent.split('/') {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(component);
            match self.get(&prefix).map(|e| e.data) {
                None => {
                    self.entries.insert(prefix.clone(), Entry::new(Data::Dir));
                }
                Some(Data::Dir) => {}
                Some(_) => return Err(not_a_dir(&prefix)),
            }
        }
        Ok(())
    }

    /// Follows symlinks until a non-link entry is reached.
    fn follow(&self, path: &str) -> StoreResult<(String, Entry)> {
        let mut current = path.to_string();
        for _ in 0..MAX_SYMLINK_HOPS {
            let entry = self
                .get(&current)
                .ok_or_else(|| Error::NotFound(current.clone()))?;
            if let Data::Symlink(target) = &entry.data {
                current = target.clone();
                continue;
            }
            return Ok((current, entry));
        }
        Err(Error::Io(io::Error::other(format!(
            "too many levels of symbolic links at {path}"
        ))))
    }
}

#[async_trait::async_trait]
impl treemeta_core::Store for MemoryStore {
    async fn read(&self, path: &str) -> StoreResult<Bytes> {
        paths::validate(path)?;
        match self.follow(path)? {
            (_, Entry { data: Data::File(bytes), .. }) => Ok(bytes),
            (resolved, _) => Err(Error::Io(io::Error::other(format!(
                "{resolved} is a directory"
            )))),
        }
    }

    async fn write(&self, path: &str, bytes: Bytes) -> StoreResult<()> {
        paths::validate(path)?;
        let _serialized = self.serialized();
        self.ensure_parents(path)?;
        if let Some(Data::Dir) = self.get(path).map(|e| e.data) {
            return Err(Error::Io(io::Error::other(format!("{path} is a directory"))));
        }
        self.entries
            .insert(path.to_string(), Entry::new(Data::File(bytes)));
        self.bump_parent(path);
        Ok(())
    }

    async fn write_in_dir(&self, path: &str, bytes: Bytes) -> StoreResult<()> {
        paths::validate(path)?;
        let _serialized = self.serialized();
        let parent = paths::parent(path);
        if !parent.is_empty() {
            match self.get(parent).map(|e| e.data) {
                Some(Data::Dir) => {}
                Some(_) => return Err(not_a_dir(parent)),
                None => return Err(Error::NotFound(parent.to_string())),
            }
        }
        if let Some(Data::Dir) = self.get(path).map(|e| e.data) {
            return Err(Error::Io(io::Error::other(format!("{path} is a directory"))));
        }
        self.entries
            .insert(path.to_string(), Entry::new(Data::File(bytes)));
        self.bump_parent(path);
        Ok(())
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        paths::validate(path)?;
        Ok(self.entries.contains_key(path))
    }

    async fn stat(&self, path: &str) -> StoreResult<EntryMeta> {
        paths::validate(path)?;
        let entry = self
            .get(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        Ok(EntryMeta {
            kind: entry.kind(),
            modified: entry.modified,
        })
    }

    async fn touch(&self, path: &str) -> StoreResult<()> {
        paths::validate(path)?;
        let mut entry = self
            .entries
            .get_mut(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        entry.modified = SystemTime::now();
        Ok(())
    }

    async fn list_dir(&self, path: &str) -> StoreResult<Vec<String>> {
        paths::validate(path)?;
        match self.get(path).map(|e| e.data) {
            Some(Data::Dir) => {}
            Some(_) => return Err(not_a_dir(path)),
            None => return Err(Error::NotFound(path.to_string())),
        }
        let prefix = format!("{path}/");
        Ok(self
            .entries
            .iter()
            .filter_map(|e| {
                let rest = e.key().strip_prefix(&prefix)?;
                (!rest.contains('/')).then(|| rest.to_string())
            })
            .collect())
    }

    async fn create_dir(&self, path: &str) -> StoreResult<()> {
        paths::validate(path)?;
        let _serialized = self.serialized();
        if self.entries.contains_key(path) {
            return Err(Error::AlreadyExists(path.to_string()));
        }
        self.ensure_parents(path)?;
        self.entries.insert(path.to_string(), Entry::new(Data::Dir));
        self.bump_parent(path);
        Ok(())
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> StoreResult<()> {
        paths::validate(old_path)?;
        paths::validate(new_path)?;
        let _serialized = self.serialized();
        if !self.entries.contains_key(old_path) {
            return Err(Error::NotFound(old_path.to_string()));
        }
        if self.entries.contains_key(new_path) {
            return Err(Error::AlreadyExists(new_path.to_string()));
        }
        let old_prefix = format!("{old_path}/");
        if new_path.starts_with(&old_prefix) {
            return Err(Error::Io(io::Error::other(format!(
                "cannot move {old_path} into itself"
            ))));
        }
        self.ensure_parents(new_path)?;

        let moved: Vec<String> = self
            .entries
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| k == old_path || k.starts_with(&old_prefix))
            .collect();
        for key in moved {
            if let Some((_, entry)) = self.entries.remove(&key) {
                let new_key = format!("{new_path}{}", &key[old_path.len()..]);
                self.entries.insert(new_key, entry);
            }
        }
        self.bump_parent(old_path);
        self.bump_parent(new_path);
        Ok(())
    }

    async fn create_symlink(&self, target: &str, link: &str) -> StoreResult<()> {
        paths::validate(target)?;
        paths::validate(link)?;
        let _serialized = self.serialized();
        if self.entries.contains_key(link) {
            return Err(Error::AlreadyExists(link.to_string()));
        }
        self.ensure_parents(link)?;
        self.entries
            .insert(link.to_string(), Entry::new(Data::Symlink(target.to_string())));
        self.bump_parent(link);
        Ok(())
    }

    async fn resolve_symlink(&self, link: &str) -> StoreResult<String> {
        paths::validate(link)?;
        match self.get(link).map(|e| e.data) {
            Some(Data::Symlink(target)) => Ok(target),
            Some(_) => Err(Error::Io(io::Error::other(format!(
                "{link} is not a symlink"
            )))),
            None => Err(Error::NotFound(link.to_string())),
        }
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        paths::validate(path)?;
        let _serialized = self.serialized();
        match self.get(path).map(|e| e.data) {
            Some(Data::Dir) => Err(Error::Io(io::Error::other(format!(
                "{path} is a directory"
            )))),
            Some(_) => {
                self.entries.remove(path);
                self.bump_parent(path);
                Ok(())
            }
            None => Err(Error::NotFound(path.to_string())),
        }
    }

    async fn remove_dir(&self, path: &str) -> StoreResult<bool> {
        paths::validate(path)?;
        let _serialized = self.serialized();
        match self.get(path).map(|e| e.data) {
            Some(Data::Dir) => {}
            Some(_) => return Err(not_a_dir(path)),
            None => return Err(Error::NotFound(path.to_string())),
        }
        if self.has_children(path) {
            return Ok(false);
        }
        self.entries.remove(path);
        self.bump_parent(path);
        Ok(true)
    }

    async fn delete_all(&self, path: &str) -> StoreResult<()> {
        paths::validate(path)?;
        let _serialized = self.serialized();
        let prefix = format!("{path}/");
        self.entries
            .retain(|k, _| k != path && !k.starts_with(&prefix));
        self.bump_parent(path);
        Ok(())
    }

    async fn lock(&self, lock_path: &str) -> StoreResult<LockGuard> {
        paths::validate(lock_path)?;
        let mutex = Arc::clone(self.locks.entry(lock_path.to_string()).or_default().value());
        let guard = mutex.lock_owned().await;
        Ok(LockGuard::new(
            lock_path,
            MemoryLock {
                guard,
                path: lock_path.to_string(),
                locks: Arc::clone(&self.locks),
            },
        ))
    }
}
