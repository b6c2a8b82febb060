//! The error taxonomy shared by every module.
//!
//! Each variant maps to one of the error classes named in the service's
//! error-handling design: datastore unavailability, missing records,
//! duplicate creation, migration failure, authentication failure and
//! input validation. The API layer (`crate::api`) maps these to HTTP
//! status codes; everything below the API layer returns `Result<T>`.

use thiserror::Error;

/// The result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The datastore cluster could not be reached or a query failed against
    /// a reachable cluster.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A record that was required to exist was absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// A create operation targeted a record that already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A schema migration script failed to apply.
    #[error("migration failed: {0}")]
    MigrationFailed(String),

    /// A password, session key, or parent-user key check failed.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Malformed input: an unparsable `parentuser` string, an unknown hash
    /// algorithm name, etc.
    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for errors that represent the datastore itself being down,
    /// as opposed to a well-formed response the datastore gave us.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_unavailable_display() {
        let err = Error::StoreUnavailable("cluster unreachable".into());
        assert_eq!(err.to_string(), "store unavailable: cluster unreachable");
        assert!(err.is_store_unavailable());
    }

    #[test]
    fn not_found_is_not_store_unavailable() {
        let err = Error::NotFound("user alice@example.net".into());
        assert!(!err.is_store_unavailable());
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
