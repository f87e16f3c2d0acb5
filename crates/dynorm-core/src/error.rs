//! Core error types.

use thiserror::Error;

use crate::store::StoreError;

/// Engine errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A single-object retrieval matched nothing.
    #[error("{model} matching query does not exist")]
    NotFound {
        /// Model that was queried.
        model: String,
    },

    /// A single-object retrieval matched more than one item.
    #[error("expected a single {model}, query returned {count}")]
    MultipleResults {
        /// Model that was queried.
        model: String,
        /// Number of matching items.
        count: usize,
    },

    /// A value was rejected before any store call.
    #[error("validation error: {0}")]
    Validation(String),

    /// The request cannot be executed under the current configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The model is not registered in the catalog.
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// Store failure after the retry policy was exhausted.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    /// Whether this is a [`Error::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Whether the underlying store reported throttling.
    pub fn is_throttled(&self) -> bool {
        matches!(self, Error::Store(StoreError::Throttled { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_is_not_rewrapped() {
        let err: Error = StoreError::Throttled {
            operation: "batch_get_item",
        }
        .into();
        assert!(err.is_throttled());
        assert_eq!(err.to_string(), "request throttled during batch_get_item");
    }

    #[test]
    fn test_not_found_message() {
        let err = Error::NotFound {
            model: "Author".into(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Author matching query does not exist");
    }
}
