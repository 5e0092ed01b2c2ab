//! Error types returned by trie operations.

use thiserror::Error;

/// Errors surfaced to callers.
///
/// Inconsistent optimistic reads and lock contention are never reported here;
/// they are retried internally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A configuration value or key is outside its accepted range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A node could not be placed within the displacement bound, or its
    /// `(primary, tag)` family has no free color left.
    #[error("capacity exceeded: {reason}")]
    CapacityExceeded { reason: &'static str },

    /// `insert` was called for a key that is already present.
    #[error("key already exists")]
    KeyExists,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}
