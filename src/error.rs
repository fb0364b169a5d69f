//! Error types for the note lifecycle core
//!
//! All errors use thiserror for structured error handling.
//! Store errors carry a transient/terminal classification that drives
//! the retry policy; everything else is a local error and is never retried.

use thiserror::Error;

/// Failure reported by a document store collaborator.
///
/// `Transient` errors are eligible for retry with backoff; `Terminal`
/// errors are surfaced immediately. `Missing` maps to [`Error::NotFound`]
/// at the lifecycle boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("document not found: {0}")]
    Missing(String),

    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("store failure: {0}")]
    Terminal(String),
}

impl StoreError {
    /// Whether the retry policy may re-attempt the operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }

    /// Classify a raw backend message as transient or terminal.
    ///
    /// Offline, unavailable, network and deadline-exceeded conditions are
    /// the only ones worth retrying; anything else burns no retry budget.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();

        let transient = lower.contains("offline")
            || lower.contains("unavailable")
            || lower.contains("network")
            || lower.contains("deadline-exceeded")
            || lower.contains("timed out");

        if transient {
            StoreError::Transient(message)
        } else {
            StoreError::Terminal(message)
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("no authenticated session")]
    Unauthenticated,

    /// Also covers authorization failures: a note owned by another user is
    /// reported as not found so callers cannot probe for its existence.
    #[error("note not found: {0}")]
    NotFound(String),

    #[error("operation not allowed in current state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Missing(id) => Error::NotFound(id),
            other => Error::Store(other),
        }
    }
}

/// Stable machine-readable error label, used in bulk-operation reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Unauthenticated,
    NotFound,
    InvalidState,
    TransientStore,
    TerminalStore,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Unauthenticated => ErrorKind::Unauthenticated,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::InvalidState(_) => ErrorKind::InvalidState,
            Error::Store(e) if e.is_transient() => ErrorKind::TransientStore,
            Error::Store(_) => ErrorKind::TerminalStore,
        }
    }
}

impl serde::Serialize for Error {
    // Fully qualified: the crate-local `Result` alias below shadows the
    // prelude one.
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_detects_transient_conditions() {
        assert!(StoreError::classify("client is offline").is_transient());
        assert!(StoreError::classify("backend UNAVAILABLE").is_transient());
        assert!(StoreError::classify("network error").is_transient());
        assert!(StoreError::classify("deadline-exceeded").is_transient());
        assert!(!StoreError::classify("permission denied").is_transient());
        assert!(!StoreError::classify("malformed document").is_transient());
    }

    #[test]
    fn errors_serialize_as_their_message() {
        let err = Error::NotFound("abc".to_string());
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            serde_json::json!("note not found: abc")
        );

        let err = Error::Validation("a note needs a title or a body".to_string());
        assert_eq!(
            serde_json::to_string(&err).unwrap(),
            "\"validation failed: a note needs a title or a body\""
        );
    }

    #[test]
    fn missing_maps_to_not_found() {
        let err: Error = StoreError::Missing("abc".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err: Error = StoreError::Transient("offline".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::TransientStore);

        let err: Error = StoreError::Terminal("denied".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::TerminalStore);
    }
}
