//! Error types for the Folio engine.
//!
//! Every fallible operation returns [`Result`]. Expected failures (bad input,
//! unknown ids, integrity violations) are values, never panics; only pipeline
//! misconfiguration panics.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of an error, stable across the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed or invalid input, schema or reference-integrity violation.
    BadRequest,
    /// Unknown id or version.
    NotFound,
    /// Id collision.
    Conflict,
    /// The session lacks the auth key of the entity.
    NotAuthorized,
    /// Unexpected or infrastructure failure.
    Generic,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::BadRequest => write!(f, "BadRequest"),
            ErrorKind::NotFound => write!(f, "NotFound"),
            ErrorKind::Conflict => write!(f, "Conflict"),
            ErrorKind::NotAuthorized => write!(f, "NotAuthorized"),
            ErrorKind::Generic => write!(f, "Generic"),
        }
    }
}

/// An error returned by the engine.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct Error {
    /// What kind of failure this is
    #[serde(rename = "error")]
    pub kind: ErrorKind,
    /// Human readable message, prefixed with the offending path where relevant
    pub message: String,
}

impl Error {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn not_authorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotAuthorized, message)
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Generic, message)
    }

    /// Prefix the message with a path, e.g. `entity(<id>)`.
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.message = format!("{prefix}: {}", self.message);
        self
    }

    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::bad_request(format!("invalid JSON: {err}"))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
