//! Test utilities for `Store` implementations.
//!
//! This module provides a conformance suite that can be run against any
//! `Store` implementation to verify the coordination primitives the
//! propagation and index layers rely on.
//!
//! # Usage
//!
//! In your store crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! treemeta_core = { workspace = true, features = ["testutil"] }
//! ```
//!
//! In your test file:
//!
//! ```ignore
//! use treemeta_core::testutil::StoreTests;
//!
//! #[tokio::test]
//! async fn test_my_store() {
//!     let store = MyStore::new(...);
//!     StoreTests::new(&store).run_all().await.unwrap();
//! }
//! ```

use crate::Error;
use crate::store::{EntryKind, Store, StoreResult};
use bytes::Bytes;
use rand::Rng;
use std::collections::HashSet;

/// Test suite for `Store` implementations.
pub struct StoreTests<'a, S> {
    store: &'a S,
    /// Prefix for test files to avoid conflicts
    prefix: String,
}

impl<'a, S: Store> StoreTests<'a, S> {
    /// Create a new test suite for the given store.
    pub fn new(store: &'a S) -> Self {
        let prefix = format!("_test_{}/", rand::rng().random::<u32>());
        Self { store, prefix }
    }

    /// Create a new test suite with a custom prefix.
    pub fn with_prefix(store: &'a S, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn path(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Run all tests.
    pub async fn run_all(&self) -> StoreResult<()> {
        self.test_write_read().await?;
        self.test_overwrite().await?;
        self.test_write_in_dir().await?;
        self.test_exists_and_stat().await?;
        self.test_create_dir().await?;
        self.test_list_dir().await?;
        self.test_rename().await?;
        self.test_rename_dir().await?;
        self.test_symlinks().await?;
        self.test_delete().await?;
        self.test_remove_dir().await?;
        self.test_touch().await?;
        self.test_lock().await?;

        // Cleanup
        self.cleanup().await?;

        Ok(())
    }

    /// Test basic write and read, including parent creation.
    pub async fn test_write_read(&self) -> StoreResult<()> {
        let path = self.path("deep/nested/bytes_test.bin");
        let data = Bytes::from_static(b"hello, world!");

        self.store.write(&path, data.clone()).await?;

        let retrieved = self.store.read(&path).await?;
        assert_eq!(retrieved, data, "retrieved data should match original");

        let missing = self.store.read(&self.path("missing.bin")).await;
        assert!(
            matches!(missing, Err(Error::NotFound(_))),
            "reading a missing file should be NotFound"
        );

        Ok(())
    }

    /// Test overwriting existing files.
    pub async fn test_overwrite(&self) -> StoreResult<()> {
        let path = self.path("overwrite_test.bin");

        self.store
            .write(&path, Bytes::from_static(b"original content"))
            .await?;
        self.store
            .write(&path, Bytes::from_static(b"new"))
            .await?;

        let retrieved = self.store.read(&path).await?;
        assert_eq!(retrieved.as_ref(), b"new", "overwritten content should be new");

        Ok(())
    }

    /// Test that `write_in_dir` never recreates a vanished directory.
    pub async fn test_write_in_dir(&self) -> StoreResult<()> {
        let dir = self.path("deposit");
        let file = format!("{dir}/change.cbor");

        let missing = self
            .store
            .write_in_dir(&file, Bytes::from_static(b"c"))
            .await;
        assert!(
            matches!(missing, Err(Error::NotFound(_))),
            "write_in_dir into a missing directory should be NotFound"
        );
        assert!(!self.store.exists(&dir).await?);

        self.store.create_dir(&dir).await?;
        self.store
            .write_in_dir(&file, Bytes::from_static(b"c"))
            .await?;
        assert_eq!(self.store.list_dir(&dir).await?, vec!["change.cbor".to_string()]);

        Ok(())
    }

    /// Test exists and stat.
    pub async fn test_exists_and_stat(&self) -> StoreResult<()> {
        let path = self.path("exists_test.bin");

        assert!(
            !self.store.exists(&path).await?,
            "file should not exist before creation"
        );
        self.store.write(&path, Bytes::from_static(b"test")).await?;
        assert!(
            self.store.exists(&path).await?,
            "file should exist after creation"
        );

        let meta = self.store.stat(&path).await?;
        assert_eq!(meta.kind, EntryKind::File);

        Ok(())
    }

    /// Test that directory creation distinguishes created from found.
    pub async fn test_create_dir(&self) -> StoreResult<()> {
        let path = self.path("mk/a/b");

        self.store.create_dir(&path).await?;
        assert!(self.store.stat(&path).await?.is_dir());

        let again = self.store.create_dir(&path).await;
        assert!(
            matches!(again, Err(Error::AlreadyExists(_))),
            "second create_dir should report AlreadyExists"
        );

        Ok(())
    }

    /// Test listing direct children.
    pub async fn test_list_dir(&self) -> StoreResult<()> {
        let dir = self.path("list");
        for file in ["a.bin", "b.bin", "sub/c.bin"] {
            self.store
                .write(&format!("{dir}/{file}"), Bytes::from_static(b"list test"))
                .await?;
        }

        let found: HashSet<String> = self.store.list_dir(&dir).await?.into_iter().collect();
        let expected: HashSet<String> = ["a.bin", "b.bin", "sub"].iter().map(|s| s.to_string()).collect();
        assert_eq!(found, expected, "list_dir should return direct children only");

        let missing = self.store.list_dir(&self.path("nope")).await;
        assert!(matches!(missing, Err(Error::NotFound(_))));

        Ok(())
    }

    /// Test rename of files and its failure modes.
    pub async fn test_rename(&self) -> StoreResult<()> {
        let old_path = self.path("rename_old.bin");
        let new_path = self.path("rename_new.bin");

        self.store
            .write(&old_path, Bytes::from_static(b"rename me"))
            .await?;
        self.store.rename(&old_path, &new_path).await?;

        assert!(
            !self.store.exists(&old_path).await?,
            "old path should not exist after rename"
        );
        let content = self.store.read(&new_path).await?;
        assert_eq!(content.as_ref(), b"rename me");

        let gone = self.store.rename(&old_path, &new_path).await;
        assert!(
            matches!(gone, Err(Error::NotFound(_))),
            "renaming a missing source should be NotFound"
        );

        self.store
            .write(&old_path, Bytes::from_static(b"again"))
            .await?;
        let taken = self.store.rename(&old_path, &new_path).await;
        assert!(
            matches!(taken, Err(Error::AlreadyExists(_))),
            "renaming onto an existing target should be AlreadyExists"
        );

        Ok(())
    }

    /// Test that directories move with their content and never merge.
    pub async fn test_rename_dir(&self) -> StoreResult<()> {
        let dir = self.path("batch");
        let processing = self.path("batch.processing");

        self.store
            .write(&format!("{dir}/1.cbor"), Bytes::from_static(b"1"))
            .await?;
        self.store.rename(&dir, &processing).await?;
        assert!(!self.store.exists(&dir).await?);
        assert_eq!(self.store.list_dir(&processing).await?, vec!["1.cbor".to_string()]);

        self.store
            .write(&format!("{dir}/2.cbor"), Bytes::from_static(b"2"))
            .await?;
        let taken = self.store.rename(&dir, &processing).await;
        assert!(
            matches!(taken, Err(Error::AlreadyExists(_))),
            "a directory rename must not merge into an existing target"
        );

        Ok(())
    }

    /// Test symlink creation, exclusivity and resolution.
    pub async fn test_symlinks(&self) -> StoreResult<()> {
        let target = self.path("entities/42");
        let link = self.path("index/unique.User.mail/a@b.c");

        self.store.write(&target, Bytes::from_static(b"{}")).await?;
        self.store.create_symlink(&target, &link).await?;

        assert_eq!(self.store.resolve_symlink(&link).await?, target);
        assert_eq!(self.store.stat(&link).await?.kind, EntryKind::Symlink);

        let dup = self.store.create_symlink(&target, &link).await;
        assert!(
            matches!(dup, Err(Error::AlreadyExists(_))),
            "creating an existing symlink should be AlreadyExists"
        );

        // dangling links are still links
        let dangling = self.path("index/dangling");
        self.store
            .create_symlink(&self.path("entities/none"), &dangling)
            .await?;
        assert_eq!(
            self.store.resolve_symlink(&dangling).await?,
            self.path("entities/none")
        );

        Ok(())
    }

    /// Test file and symlink deletion.
    pub async fn test_delete(&self) -> StoreResult<()> {
        let path = self.path("delete_test.bin");

        self.store
            .write(&path, Bytes::from_static(b"to be deleted"))
            .await?;
        self.store.delete(&path).await?;
        assert!(
            !self.store.exists(&path).await?,
            "file should not exist after delete"
        );

        let again = self.store.delete(&path).await;
        assert!(matches!(again, Err(Error::NotFound(_))));

        Ok(())
    }

    /// Test that only empty directories are removed.
    pub async fn test_remove_dir(&self) -> StoreResult<()> {
        let dir = self.path("rmdir");
        let file = format!("{dir}/entry");

        self.store.write(&file, Bytes::from_static(b"x")).await?;
        assert!(
            !self.store.remove_dir(&dir).await?,
            "a non-empty directory must be kept"
        );
        assert!(self.store.exists(&file).await?);

        self.store.delete(&file).await?;
        assert!(self.store.remove_dir(&dir).await?);
        assert!(!self.store.exists(&dir).await?);

        self.store.write(&file, Bytes::from_static(b"x")).await?;
        self.store.delete_all(&dir).await?;
        assert!(!self.store.exists(&dir).await?);
        // deleting a missing tree is fine
        self.store.delete_all(&dir).await?;

        Ok(())
    }

    /// Test that touch moves the modification time forward.
    pub async fn test_touch(&self) -> StoreResult<()> {
        let dir = self.path("touched");
        self.store.create_dir(&dir).await?;
        let before = self.store.stat(&dir).await?.modified;

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        self.store.touch(&dir).await?;

        let after = self.store.stat(&dir).await?.modified;
        assert!(after > before, "touch should bump the modification time");

        Ok(())
    }

    /// Test that locks exclude each other and release is idempotent.
    pub async fn test_lock(&self) -> StoreResult<()> {
        let lock_path = self.store.lock_path(&self.path("locked_node"));

        let mut guard = self.store.lock(&lock_path).await?;
        let contended = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            self.store.lock(&lock_path),
        )
        .await;
        assert!(contended.is_err(), "a held lock must block other lockers");

        guard.release()?;
        guard.release()?;

        let mut second = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            self.store.lock(&lock_path),
        )
        .await
        .expect("released lock should be acquirable")?;
        second.release()?;

        Ok(())
    }

    /// Clean up test files.
    pub async fn cleanup(&self) -> StoreResult<()> {
        self.store
            .delete_all(self.prefix.trim_end_matches('/'))
            .await
    }
}
