//! Error types for mke-client
//!
//! Every failure is surfaced to the caller unmodified: the client performs
//! no retries and no silent recovery. A driver script is expected to catch
//! [`Error::Remote`] / [`Error::DataIntegrity`] and move its session to
//! `FAILED` or `FAULTY` before terminating.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// mke-client error types
#[derive(Error, Debug)]
pub enum Error {
    /// No usable dbserver base URI (explicit value or `DBSERVER_URI`)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Caller input rejected before any request was sent
    #[error("Validation error: {0}")]
    Validation(String),

    /// The dbserver answered with a non-success status code
    #[error("Remote error: HTTP {status}: {body}")]
    Remote {
        /// HTTP status code returned by the server
        status: u16,
        /// Response body, verbatim
        body: String,
    },

    /// A server row or response is missing required fields or holds
    /// malformed values (schema drift, corrupt data)
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    /// The transport could not complete the request at all
    #[error("Transport error: {0}")]
    Transport(String),

    /// IO error (reading upload sources)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// HTTP status code for [`Error::Remote`], `None` for every other kind.
    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }
}
