use std::sync::Arc;

use chrono::{TimeZone, Utc};
use bytes::Bytes;
use treemeta_core::{Attributes, Error, NodeAccessor, Store, StoreTree, paths};
use treemeta_store_memory::MemoryStore;

fn tree() -> StoreTree {
    StoreTree::new(Arc::new(MemoryStore::new()))
}

#[tokio::test]
async fn create_lookup_and_list() {
    let tree = tree();
    let root = tree.create_space("a1b2c3").await.unwrap();
    assert!(root.is_space_root);
    assert!(root.has_propagation);
    assert_eq!(root.id, "a1b2c3");

    let docs = tree.create_dir(&root, "docs").await.unwrap();
    let file = tree.create_file(&docs, "report.pdf", 42).await.unwrap();

    let found = tree.lookup_child(&docs, "report.pdf").await.unwrap();
    assert_eq!(found.id, file.id);
    assert_eq!(found.blob_size, 42);
    assert_eq!(found.parent_id.as_deref(), Some(docs.id.as_str()));

    let children = tree.children(&root).await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].name, "docs");
    assert!(children[0].is_dir());

    let parent = tree.parent(&file).await.unwrap();
    assert_eq!(parent.id, docs.id);
    assert!(tree.parent(&root).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn duplicate_names_and_spaces_are_rejected() {
    let tree = tree();
    let root = tree.create_space("space1").await.unwrap();
    tree.create_file(&root, "a", 1).await.unwrap();
    assert!(tree.create_file(&root, "a", 2).await.unwrap_err().is_already_exists());
    assert!(tree.create_space("space1").await.unwrap_err().is_already_exists());
    // the failed create left no orphan behind
    assert_eq!(tree.children(&root).await.unwrap().len(), 1);
}

#[tokio::test]
async fn attributes_start_unset_and_merge() {
    let tree = tree();
    let root = tree.create_space("space1").await.unwrap();
    assert!(matches!(tree.tree_size(&root).await, Err(Error::AttrUnset(_))));
    assert!(tree.tree_mtime(&root).await.unwrap_err().is_attr_unset());

    let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    tree.set_attrs(
        &root,
        &Attributes {
            tree_size: Some(10),
            ..Default::default()
        },
        true,
    )
    .await
    .unwrap();
    tree.set_attrs(
        &root,
        &Attributes {
            tree_mtime: Some(t),
            ..Default::default()
        },
        true,
    )
    .await
    .unwrap();

    assert_eq!(tree.tree_size(&root).await.unwrap(), 10);
    assert_eq!(tree.tree_mtime(&root).await.unwrap(), t);
}

#[tokio::test]
async fn etag_is_cached_until_cleared() {
    let tree = tree();
    let root = tree.create_space("space1").await.unwrap();

    let first = tree.etag(&root).await.unwrap();
    assert!(first.starts_with('"') && first.ends_with('"'));
    assert_eq!(tree.etag(&root).await.unwrap(), first);

    let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    tree.set_attrs(
        &root,
        &Attributes {
            tree_mtime: Some(t),
            clear_tmp_etag: true,
            ..Default::default()
        },
        true,
    )
    .await
    .unwrap();
    assert_ne!(tree.etag(&root).await.unwrap(), first);
}

#[tokio::test]
async fn resize_and_delete_report_diffs() {
    let tree = tree();
    let root = tree.create_space("space1").await.unwrap();
    let dir = tree.create_dir(&root, "d").await.unwrap();
    let file = tree.create_file(&dir, "f", 10).await.unwrap();

    assert_eq!(tree.set_blob_size(&file, 4).await.unwrap(), -6);
    assert!(tree.delete_node(&dir).await.unwrap_err().is_already_exists());
    assert_eq!(tree.delete_node(&file).await.unwrap(), -4);
    assert_eq!(tree.delete_node(&dir).await.unwrap(), 0);
    assert!(tree.delete_node(&root).await.unwrap_err().is_not_found());

    assert!(!tree.read_node("space1", &file.id).await.unwrap().exists);
    assert!(tree.children(&root).await.unwrap().is_empty());
}

#[tokio::test]
async fn huge_sizes_saturate_diffs() {
    let tree = tree();
    let root = tree.create_space("space1").await.unwrap();
    let file = tree.create_file(&root, "f", 0).await.unwrap();
    assert_eq!(tree.set_blob_size(&file, u64::MAX).await.unwrap(), i64::MAX);
    assert_eq!(tree.set_blob_size(&file, 1).await.unwrap(), i64::MIN);
    tree.set_blob_size(&file, u64::MAX).await.unwrap();
    assert_eq!(tree.delete_node(&file).await.unwrap(), i64::MIN);
}

#[tokio::test]
async fn unreadable_children_are_skipped() {
    let store = Arc::new(MemoryStore::new());
    let tree = StoreTree::new(store.clone());
    let root = tree.create_space("space1").await.unwrap();
    let good = tree.create_file(&root, "good", 1).await.unwrap();
    let bad = tree.create_file(&root, "bad", 2).await.unwrap();

    let record = format!(
        "spaces/{}/nodes/{}.cbor",
        paths::pathify("space1", 1, 2),
        paths::pathify(&bad.id, 4, 2)
    );
    store
        .write(&record, Bytes::from_static(b"\xff\x00garbage"))
        .await
        .unwrap();

    let children = tree.children(&root).await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id, good.id);
}

#[tokio::test]
async fn propagation_flag_is_persisted() {
    let tree = tree();
    let root = tree.create_space("space1").await.unwrap();
    let dir = tree.create_dir(&root, "d").await.unwrap();
    tree.set_propagation(&dir, false).await.unwrap();
    assert!(!tree.read_node("space1", &dir.id).await.unwrap().has_propagation);
}
