//! Core treemeta types and traits.
//!
//! This crate defines what the metadata consistency layer consumes and
//! persists:
//!
//! - the storage abstraction ([`Store`]): small files, directories,
//!   symlinks, atomic rename and advisory locks, all addressed by relative
//!   paths
//! - the node model ([`Node`], [`NodeAccessor`]) used by propagation
//! - the [`Change`] record queued by asynchronous propagation
//! - the error taxonomy shared by every crate ([`Error`])
//!
//! [`tree::StoreTree`] is a reference node accessor persisting nodes in any
//! [`Store`]; hosts with their own node layer implement [`NodeAccessor`]
//! instead.

pub mod change;
pub mod error;
pub mod node;
pub mod paths;
pub mod store;
pub mod tree;

// Test utilities (behind feature flag)
#[cfg(feature = "testutil")]
pub mod testutil;

pub use change::Change;
pub use error::{Error, Result};
pub use node::{Attributes, Node, NodeAccessor, NodeKind};
pub use store::{EntryKind, EntryMeta, HeldLock, LockGuard, Store, StoreResult};
pub use tree::StoreTree;
