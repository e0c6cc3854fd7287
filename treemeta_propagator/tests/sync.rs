mod common;

use chrono::{TimeZone, Utc};
use common::{Backend, Fixture};
use rstest::rstest;
use treemeta_propagator::{Accounting, Propagator, SyncPropagator};

fn propagator(fx: &Fixture) -> SyncPropagator {
    SyncPropagator::new(fx.store.clone(), fx.nodes(), Accounting::enabled())
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::local(Backend::Local)]
#[tokio::test]
async fn unset_sizes_are_recalculated(#[case] backend: Backend) {
    let fx = Fixture::new(backend).await;
    let s = fx.scenario().await;
    let p = propagator(&fx);

    let d = fx.tree.create_file(&s.b, "D", 7).await.unwrap();
    p.propagate(&d, 7).await.unwrap();

    assert_eq!(fx.size(&s.b).await, Some(12));
    assert_eq!(fx.size(&fx.root).await, Some(22));
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::local(Backend::Local)]
#[tokio::test]
async fn sizes_are_adjusted_incrementally(#[case] backend: Backend) {
    let fx = Fixture::new(backend).await;
    let s = fx.scenario().await;
    fx.set_size(&s.b, 5).await;
    fx.set_size(&fx.root, 15).await;
    let p = propagator(&fx);

    let diff = fx.tree.set_blob_size(&s.c, 9).await.unwrap();
    p.propagate(&s.c, diff).await.unwrap();
    assert_eq!(fx.size(&s.b).await, Some(9));
    assert_eq!(fx.size(&fx.root).await, Some(19));

    let diff = fx.tree.delete_node(&s.a).await.unwrap();
    p.propagate(&s.a, diff).await.unwrap();
    assert_eq!(fx.size(&s.b).await, Some(9));
    assert_eq!(fx.size(&fx.root).await, Some(9));
}

#[tokio::test]
async fn opt_out_stops_the_walk() {
    let fx = Fixture::new(Backend::Memory).await;
    let x = fx.tree.create_dir(&fx.root, "X").await.unwrap();
    let y = fx.tree.create_dir(&x, "Y").await.unwrap();
    fx.tree.set_propagation(&x, false).await.unwrap();
    let p = propagator(&fx);

    let f = fx.tree.create_file(&y, "f", 5).await.unwrap();
    p.propagate(&f, 5).await.unwrap();

    assert_eq!(fx.size(&y).await, Some(5));
    assert!(fx.mtime(&y).await.is_some());
    // neither the opted-out node nor anything above it was touched
    assert_eq!(fx.size(&x).await, None);
    assert_eq!(fx.mtime(&x).await, None);
    assert_eq!(fx.size(&fx.root).await, None);
    assert_eq!(fx.mtime(&fx.root).await, None);
}

#[tokio::test]
async fn tree_mtime_never_moves_backward() {
    let fx = Fixture::new(Backend::Memory).await;
    let s = fx.scenario().await;
    let future = Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap();
    fx.set_mtime(&fx.root, future).await;
    let p = propagator(&fx);

    let before = Utc::now();
    p.propagate(&s.c, 0).await.unwrap();

    assert_eq!(fx.mtime(&fx.root).await, Some(future));
    let b_mtime = fx.mtime(&s.b).await.unwrap();
    assert!(b_mtime >= before && b_mtime <= Utc::now());
    // a zero diff touches no sizes
    assert_eq!(fx.size(&s.b).await, None);
}

#[tokio::test]
async fn one_sync_time_for_the_whole_walk() {
    let fx = Fixture::new(Backend::Memory).await;
    let s = fx.scenario().await;
    let p = propagator(&fx);

    p.propagate(&s.c, 1).await.unwrap();
    assert_eq!(fx.mtime(&s.b).await, fx.mtime(&fx.root).await);
}

#[tokio::test]
async fn negative_overflow_clamps_to_zero() {
    let fx = Fixture::new(Backend::Memory).await;
    let s = fx.scenario().await;
    fx.set_size(&s.b, 3).await;
    fx.set_size(&fx.root, 100).await;
    let p = propagator(&fx);

    p.propagate(&s.c, -10).await.unwrap();

    assert_eq!(fx.size(&s.b).await, Some(0));
    assert_eq!(fx.size(&fx.root).await, Some(90));
}

#[tokio::test]
async fn disabled_accounting_is_a_noop() {
    let fx = Fixture::new(Backend::Memory).await;
    let s = fx.scenario().await;
    let p = SyncPropagator::new(
        fx.store.clone(),
        fx.nodes(),
        Accounting {
            tree_size: false,
            tree_time: false,
        },
    );

    p.propagate(&s.c, 5).await.unwrap();
    assert_eq!(fx.size(&s.b).await, None);
    assert_eq!(fx.mtime(&s.b).await, None);
}

#[tokio::test]
async fn time_only_accounting_leaves_sizes_alone() {
    let fx = Fixture::new(Backend::Memory).await;
    let s = fx.scenario().await;
    let p = SyncPropagator::new(
        fx.store.clone(),
        fx.nodes(),
        Accounting {
            tree_size: false,
            tree_time: true,
        },
    );

    p.propagate(&s.c, 5).await.unwrap();
    assert_eq!(fx.size(&s.b).await, None);
    assert!(fx.mtime(&fx.root).await.is_some());
}

#[tokio::test]
async fn propagation_invalidates_the_etag() {
    let fx = Fixture::new(Backend::Memory).await;
    let s = fx.scenario().await;
    let p = propagator(&fx);

    let before = fx.tree.etag(&fx.root).await.unwrap();
    p.propagate(&s.c, 1).await.unwrap();
    assert_ne!(fx.tree.etag(&fx.root).await.unwrap(), before);
}

#[tokio::test]
async fn missing_ancestor_is_an_error() {
    let fx = Fixture::new(Backend::Memory).await;
    let s = fx.scenario().await;
    let p = propagator(&fx);

    let mut orphan = s.c.clone();
    orphan.parent_id = Some("does-not-exist".into());
    let err = p.propagate(&orphan, 1).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn space_root_has_nothing_to_propagate() {
    let fx = Fixture::new(Backend::Memory).await;
    let p = propagator(&fx);
    p.propagate(&fx.root, 5).await.unwrap();
    assert_eq!(fx.size(&fx.root).await, None);
}
