//! Propagation of aggregate directory metadata.
//!
//! When a file changes, every ancestor directory up to the space root has
//! to reflect it in its tree size and tree mtime. Two strategies exist:
//!
//! - [`SyncPropagator`] walks the ancestors before returning
//! - [`AsyncPropagator`] deposits the change in the store and returns;
//!   background rounds batch and apply changes per node, and a watchdog
//!   finishes rounds abandoned by a crash
//!
//! Both fold changes commutatively (sizes add up, times take the maximum),
//! so the final aggregate does not depend on arrival order.

use std::sync::Arc;

use async_trait::async_trait;
use treemeta_core::{Node, NodeAccessor, Result, Store};

pub mod accounting;
mod asynchronous;
pub mod claim;
pub mod options;
mod recovery;
mod synchronous;

pub use accounting::calculate_tree_size;
pub use asynchronous::AsyncPropagator;
pub use claim::ClaimOutcome;
pub use options::{Accounting, AsyncOptions, PropagatorConfig, Strategy};
pub use synchronous::SyncPropagator;

#[async_trait]
pub trait Propagator: std::fmt::Debug + Send + Sync {
    /// Brings the aggregates of `node`'s ancestors up to date after its
    /// size changed by `size_diff`.
    ///
    /// Errors are best-effort status: the synchronous strategy returns the
    /// failure of its walk, the asynchronous one only logs it.
    async fn propagate(&self, node: &Node, size_diff: i64) -> Result<()>;

    /// Resolves once background work spawned so far has finished.
    async fn settle(&self) {}

    /// Stops background work and waits for running rounds.
    async fn shutdown(&self) {}
}

/// Builds the propagator selected by `config`.
///
/// The asynchronous strategy starts its watchdog immediately, so this must
/// be called inside a Tokio runtime.
pub fn new_propagator(
    config: &PropagatorConfig,
    store: Arc<dyn Store>,
    nodes: Arc<dyn NodeAccessor>,
) -> Arc<dyn Propagator> {
    match config.strategy {
        Strategy::Sync => Arc::new(SyncPropagator::new(store, nodes, config.accounting())),
        Strategy::Async => Arc::new(AsyncPropagator::new(
            store,
            nodes,
            config.accounting(),
            config.async_options(),
        )),
    }
}
