use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::IndexError;

/// Selects the symlink layout of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// One symlink per value; a value maps to exactly one id.
    Unique,
    /// One directory per value holding a symlink per id.
    NonUnique,
    /// Unique, with numbers assigned when no value is given.
    Autoincrement,
}

impl IndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Unique => "unique",
            IndexKind::NonUnique => "non_unique",
            IndexKind::Autoincrement => "autoincrement",
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexKind {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unique" => Ok(IndexKind::Unique),
            "non_unique" => Ok(IndexKind::NonUnique),
            "autoincrement" => Ok(IndexKind::Autoincrement),
            other => Err(IndexError::InvalidKind(other.to_string())),
        }
    }
}

/// Range of numbers an autoincrement index may hand out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bound {
    /// First number assigned in an empty index.
    pub lower: u64,
    /// Highest number that may be assigned, unlimited when `None`.
    pub upper: Option<u64>,
}

impl Bound {
    pub fn new(lower: u64, upper: u64) -> Self {
        Self {
            lower,
            upper: Some(upper),
        }
    }
}

/// Everything needed to place and name one index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexOptions {
    /// Entity type the index belongs to, e.g. `User`.
    pub type_name: String,
    /// Field whose values are indexed.
    pub index_by: String,
    /// Directory holding the entities; symlinks point at `{entity_dir}/{id}`.
    pub entity_dir: String,
    /// Names the `index.{backend}` directory all indexes live under.
    pub backend: String,
    /// Lower-cases values of unique and non-unique indexes.
    pub case_insensitive: bool,
    pub bound: Option<Bound>,
}

impl IndexOptions {
    pub fn new(
        type_name: impl Into<String>,
        index_by: impl Into<String>,
        entity_dir: impl Into<String>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            index_by: index_by.into(),
            entity_dir: entity_dir.into(),
            backend: DEFAULT_BACKEND.to_string(),
            case_insensitive: false,
            bound: None,
        }
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = backend.into();
        self
    }

    pub fn case_insensitive(mut self, yes: bool) -> Self {
        self.case_insensitive = yes;
        self
    }

    pub fn with_bound(mut self, bound: Bound) -> Self {
        self.bound = Some(bound);
        self
    }
}

pub const DEFAULT_BACKEND: &str = "disk";
