//! Batch ownership expressed through directory creation and rename.
//!
//! Pending changes for a node live in `changes/{space[..2]}/{space}:{node}/`.
//! Whoever creates that directory is responsible for triggering a round;
//! whoever renames it to `….processing` owns the batch inside.

use treemeta_core::{Result, Store, paths};

pub(crate) const CHANGES_ROOT: &str = "changes";
pub(crate) const PROCESSING_SUFFIX: &str = ".processing";
pub(crate) const CHANGE_SUFFIX: &str = ".cbor";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This call created the changes directory and must trigger the round.
    Claimed,
    /// The directory was already there; the change was only deposited.
    Deposited,
}

pub(crate) fn changes_dir(space_id: &str, node_id: &str) -> String {
    let prefix = space_id.get(..2).unwrap_or(space_id);
    paths::join(
        &paths::join(CHANGES_ROOT, prefix),
        &format!("{space_id}:{node_id}"),
    )
}

pub(crate) fn processing_dir(space_id: &str, node_id: &str) -> String {
    format!("{}{PROCESSING_SUFFIX}", changes_dir(space_id, node_id))
}

/// Splits a changes directory name into `(space_id, node_id)`.
pub(crate) fn parse_changes_dir_name(name: &str) -> Option<(String, String)> {
    let name = name.strip_suffix(PROCESSING_SUFFIX).unwrap_or(name);
    let (space_id, node_id) = name.split_once(':')?;
    if space_id.is_empty() || node_id.is_empty() {
        return None;
    }
    Some((space_id.to_string(), node_id.to_string()))
}

/// Creates the changes directory if absent.
pub(crate) async fn create_or_join(store: &dyn Store, dir: &str) -> Result<ClaimOutcome> {
    match store.create_dir(dir).await {
        Ok(()) => Ok(ClaimOutcome::Claimed),
        Err(err) if err.is_already_exists() => Ok(ClaimOutcome::Deposited),
        Err(err) => Err(err),
    }
}

/// Takes exclusive ownership of the batch in `dir` by renaming it to its
/// `.processing` name.
///
/// `false` means the batch is gone (already processed) or a previous round
/// still owns the `.processing` name and will pick the batch up itself.
pub async fn try_claim(store: &dyn Store, dir: &str) -> Result<bool> {
    match store.rename(dir, &format!("{dir}{PROCESSING_SUFFIX}")).await {
        Ok(()) => Ok(true),
        Err(err) if err.is_not_found() || err.is_already_exists() => Ok(false),
        Err(err) => Err(err),
    }
}
