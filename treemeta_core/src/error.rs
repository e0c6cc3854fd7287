use thiserror::Error;

/// Errors raised by stores, node accessors and the layers built on them.
#[derive(Debug, Error)]
pub enum Error {
    /// The path or node does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The target of a create or rename is already taken.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// An attribute was never written. Recoverable: callers recompute it.
    #[error("attribute {0} is not set")]
    AttrUnset(&'static str),

    /// A node lock could not be acquired or released.
    #[error("could not lock {path}: {source}")]
    LockFailure {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A persisted record could not be decoded.
    #[error("could not decode {what}: {reason}")]
    Decode { what: String, reason: String },

    #[error("invalid path: '{0}'. Must be a relative path without '..'")]
    InvalidPath(String),

    #[error("storage i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists(_))
    }

    /// Mirrors the "attribute missing" check callers use to fall back to
    /// recomputation.
    pub fn is_attr_unset(&self) -> bool {
        matches!(self, Error::AttrUnset(_))
    }

    pub fn decode(what: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Decode {
            what: what.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_helpers() {
        assert!(Error::NotFound("a".into()).is_not_found());
        assert!(Error::AlreadyExists("a".into()).is_already_exists());
        assert!(Error::AttrUnset("treesize").is_attr_unset());
        assert!(!Error::Io(std::io::Error::other("x")).is_attr_unset());
    }

    #[test]
    fn lock_failure_names_the_path() {
        let err = Error::LockFailure {
            path: "spaces/ab/node.lock".into(),
            source: std::io::Error::other("busy"),
        };
        assert_eq!(err.to_string(), "could not lock spaces/ab/node.lock: busy");
    }
}
