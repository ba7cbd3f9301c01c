//! Request/response transport used by remote sessions
//!
//! Sessions never open sockets themselves. They speak to the dbserver
//! through the minimal [`Transport`] capability: `GET`, `PATCH` with a JSON
//! body, and `POST` with an optional JSON body plus optional multipart
//! file parts. Any HTTP client can be adapted to it; [`MemoryServer`]
//! emulates the dbserver in-process.
//!
//! A transport only reports transport-level failures as errors. Non-success
//! status codes come back as a normal [`HttpResponse`] so that each caller
//! applies its own acceptance rule (exactly 200 for reads, `< 300` for
//! writes).

mod memory;

pub use memory::{MemoryServer, RecordedRequest};

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{Error, Result};

/// One multipart file part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    /// Form field name, i.e. the device/aux key (`ACU`, `RFC`, ...).
    pub key: String,
    /// File name reported to the server.
    pub file_name: String,
    /// File content.
    pub bytes: Vec<u8>,
}

impl FilePart {
    /// Create a new file part.
    #[must_use]
    pub fn new(key: impl Into<String>, file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            file_name: file_name.into(),
            bytes,
        }
    }
}

/// Status code and body text of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body, verbatim.
    pub body: String,
}

impl HttpResponse {
    /// Create a response.
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Create a response with a JSON body.
    #[must_use]
    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status, body.to_string())
    }

    /// Whether the status code is in `200..300`.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Convert into [`Error::Remote`], keeping status and body.
    #[must_use]
    pub fn into_error(self) -> Error {
        Error::Remote {
            status: self.status,
            body: self.body,
        }
    }

    /// Decode the body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DataIntegrity`] if the body does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|e| {
            Error::DataIntegrity(format!("unexpected response body ({e}): {}", self.body))
        })
    }
}

/// Minimal HTTP capability consumed by sessions.
pub trait Transport {
    /// `GET url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if no response was received.
    fn get(&self, url: &str) -> Result<HttpResponse>;

    /// `PATCH url` with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if no response was received.
    fn patch(&self, url: &str, body: &Value) -> Result<HttpResponse>;

    /// `POST url` with an optional JSON body and optional multipart parts.
    ///
    /// When `files` is non-empty the request is multipart and the JSON body
    /// travels alongside the parts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if no response was received.
    fn post(&self, url: &str, body: Option<&Value>, files: &[FilePart]) -> Result<HttpResponse>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn get(&self, url: &str) -> Result<HttpResponse> {
        (**self).get(url)
    }

    fn patch(&self, url: &str, body: &Value) -> Result<HttpResponse> {
        (**self).patch(url, body)
    }

    fn post(&self, url: &str, body: Option<&Value>, files: &[FilePart]) -> Result<HttpResponse> {
        (**self).post(url, body, files)
    }
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn get(&self, url: &str) -> Result<HttpResponse> {
        (**self).get(url)
    }

    fn patch(&self, url: &str, body: &Value) -> Result<HttpResponse> {
        (**self).patch(url, body)
    }

    fn post(&self, url: &str, body: Option<&Value>, files: &[FilePart]) -> Result<HttpResponse> {
        (**self).post(url, body, files)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn get(&self, url: &str) -> Result<HttpResponse> {
        (**self).get(url)
    }

    fn patch(&self, url: &str, body: &Value) -> Result<HttpResponse> {
        (**self).patch(url, body)
    }

    fn post(&self, url: &str, body: Option<&Value>, files: &[FilePart]) -> Result<HttpResponse> {
        (**self).post(url, body, files)
    }
}
