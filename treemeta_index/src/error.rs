use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    /// A lookup or search matched nothing.
    #[error("{type_name}.{index_by}: no entry for {values:?}")]
    NotFound {
        type_name: String,
        index_by: String,
        values: Vec<String>,
    },

    /// The value is already taken in a unique or autoincrement index, or
    /// the id is already listed under a non-unique value.
    #[error("{type_name}.{index_by}: {value} is already indexed")]
    AlreadyExists {
        type_name: String,
        index_by: String,
        value: String,
    },

    /// Every number of an autoincrement index's bound is in use.
    #[error("{type_name}.{index_by}: no number left up to {upper}")]
    BoundExhausted {
        type_name: String,
        index_by: String,
        upper: u64,
    },

    #[error("invalid search pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Values become path names, so they must be usable as one.
    #[error("invalid index value '{0}'")]
    InvalidValue(String),

    #[error("invalid index type: {0}")]
    InvalidKind(String),

    #[error("{type_name} has no field {field}")]
    UnknownField { type_name: String, field: String },

    #[error("update types do not match: from {from} to {to}")]
    TypeMismatch { from: String, to: String },

    #[error(transparent)]
    Store(#[from] treemeta_core::Error),
}

impl IndexError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, IndexError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, IndexError::AlreadyExists { .. })
    }
}

pub type IndexResult<T> = Result<T, IndexError>;
