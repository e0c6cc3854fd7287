mod common;

use std::time::Duration;

use bytes::Bytes;
use common::{Backend, Fixture, eventually, fast_options};
use rstest::rstest;
use treemeta_propagator::{Accounting, AsyncOptions, AsyncPropagator, Propagator};

fn propagator(fx: &Fixture) -> AsyncPropagator {
    AsyncPropagator::new(fx.store.clone(), fx.nodes(), Accounting::enabled(), fast_options())
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::local(Backend::Local)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn crash_before_apply_is_finished(#[case] backend: Backend) {
    let fx = Fixture::new(backend).await;
    let s = fx.scenario().await;
    fx.set_size(&s.b, 5).await;
    fx.set_size(&fx.root, 15).await;

    // a round for B died after claiming its batch
    fx.tree.create_file(&s.b, "D", 7).await.unwrap();
    let processing = format!("{}.processing", fx.changes_dir(&s.b));
    fx.leave_batch(&processing, &[7]).await;

    let fx = fx.reopen().await;
    let p = propagator(&fx);
    assert_eq!(p.recover_stale(Duration::ZERO).await, 1);
    p.settle().await;

    assert_eq!(fx.size(&s.b).await, Some(12));
    assert_eq!(fx.size(&fx.root).await, Some(22));
    assert!(fx.pending_batches().await.is_empty());
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::local(Backend::Local)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn crash_after_apply_is_not_counted_twice(#[case] backend: Backend) {
    let fx = Fixture::new(backend).await;
    let s = fx.scenario().await;
    fx.set_size(&fx.root, 15).await;

    // the round wrote B's new size but died before deleting its batch
    fx.tree.create_file(&s.b, "D", 7).await.unwrap();
    fx.set_size(&s.b, 12).await;
    let processing = format!("{}.processing", fx.changes_dir(&s.b));
    fx.leave_batch(&processing, &[3, 4]).await;

    let fx = fx.reopen().await;
    let p = propagator(&fx);
    p.recover_stale(Duration::ZERO).await;
    p.settle().await;

    assert_eq!(fx.size(&s.b).await, Some(12));
    assert_eq!(fx.size(&fx.root).await, Some(22));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abandoned_debounce_is_claimed() {
    let fx = Fixture::new(Backend::Memory).await;
    let s = fx.scenario().await;
    fx.set_size(&s.b, 5).await;
    fx.set_size(&fx.root, 15).await;

    // the claimant died while debouncing, the batch was never renamed
    fx.tree.create_file(&s.b, "D", 2).await.unwrap();
    fx.leave_batch(&fx.changes_dir(&s.b), &[2]).await;

    let p = propagator(&fx);
    assert_eq!(p.recover_stale(Duration::ZERO).await, 1);
    p.settle().await;

    assert_eq!(fx.size(&s.b).await, Some(7));
    assert_eq!(fx.size(&fx.root).await, Some(17));
    assert!(fx.pending_batches().await.is_empty());
}

#[tokio::test]
async fn fresh_batches_are_left_alone() {
    let fx = Fixture::new(Backend::Memory).await;
    let s = fx.scenario().await;
    let processing = format!("{}.processing", fx.changes_dir(&s.b));
    fx.leave_batch(&processing, &[1]).await;

    let p = propagator(&fx);
    assert_eq!(p.recover_stale(Duration::from_secs(3600)).await, 0);
    p.settle().await;
    assert_eq!(fx.pending_batches().await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_dirs_and_corrupt_changes_are_skipped() {
    let fx = Fixture::new(Backend::Memory).await;
    let s = fx.scenario().await;
    fx.set_size(&s.b, 5).await;
    fx.set_size(&fx.root, 15).await;

    let prefix = format!("changes/{}", &common::SPACE[..2]);
    fx.store.create_dir(&format!("{prefix}/garbage")).await.unwrap();

    fx.tree.create_file(&s.b, "D", 1).await.unwrap();
    let processing = format!("{}.processing", fx.changes_dir(&s.b));
    fx.leave_batch(&processing, &[1]).await;
    fx.store
        .write(&format!("{processing}/torn.cbor"), Bytes::from_static(b"\xff\x00"))
        .await
        .unwrap();

    let p = propagator(&fx);
    assert_eq!(p.recover_stale(Duration::ZERO).await, 1);
    p.settle().await;

    assert_eq!(fx.size(&s.b).await, Some(6));
    assert_eq!(fx.size(&fx.root).await, Some(16));
    assert_eq!(fx.pending_batches().await, vec!["garbage".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn watchdog_scans_on_startup() {
    let fx = Fixture::new(Backend::Memory).await;
    let s = fx.scenario().await;
    fx.set_size(&s.b, 5).await;
    fx.set_size(&fx.root, 15).await;
    fx.tree.create_file(&s.b, "D", 7).await.unwrap();
    let processing = format!("{}.processing", fx.changes_dir(&s.b));
    fx.leave_batch(&processing, &[7]).await;

    let p = AsyncPropagator::new(
        fx.store.clone(),
        fx.nodes(),
        Accounting::enabled(),
        AsyncOptions {
            stale_grace_period: Duration::ZERO,
            watchdog_interval: Duration::from_secs(3600),
            ..fast_options()
        },
    );

    let fx_ref = &fx;
    let converged = eventually(|| async move { fx_ref.size(&fx_ref.root).await == Some(22) }).await;
    assert!(converged, "the watchdog should have finished the batch");
    p.shutdown().await;
    assert_eq!(fx.size(&s.b).await, Some(12));
}
