//! Client configuration
//!
//! The only setting is the dbserver base URI. It is resolved once, when a
//! session is constructed: an explicit value wins, otherwise the
//! `DBSERVER_URI` environment variable is consulted through an injected
//! lookup so tests never touch the process environment.
//!
//! ```rust
//! use mke_client::Config;
//!
//! let config = Config::from_lookup(|key| {
//!     (key == "DBSERVER_URI").then(|| "http://localhost:8080/".to_string())
//! });
//! assert_eq!(config.resolve_base_uri().unwrap(), "http://localhost:8080");
//!
//! assert!(Config::default().resolve_base_uri().is_err());
//! ```

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Environment variable holding the default dbserver base URI.
pub const DBSERVER_URI_ENV: &str = "DBSERVER_URI";

/// Connection settings for remote sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    base_uri: Option<String>,
}

impl Config {
    /// Configuration with an explicit base URI.
    #[must_use]
    pub fn new(base_uri: impl Into<String>) -> Self {
        Self {
            base_uri: Some(base_uri.into()),
        }
    }

    /// Configuration taken from the process environment (`DBSERVER_URI`).
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Configuration taken from an arbitrary environment lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            base_uri: lookup(DBSERVER_URI_ENV),
        }
    }

    /// Override the base URI; `None` keeps the current value.
    #[must_use]
    pub fn with_base_uri(mut self, base_uri: Option<impl Into<String>>) -> Self {
        if let Some(uri) = base_uri {
            self.base_uri = Some(uri.into());
        }
        self
    }

    /// The configured base URI, unvalidated.
    #[must_use]
    pub fn base_uri(&self) -> Option<&str> {
        self.base_uri.as_deref()
    }

    /// Resolve the base URI, without a trailing `/`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if no URI is configured or it is blank.
    pub fn resolve_base_uri(&self) -> Result<String> {
        let uri = self
            .base_uri
            .as_deref()
            .map(str::trim)
            .map(|uri| uri.trim_end_matches('/'))
            .filter(|uri| !uri.is_empty())
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "need to give a valid URI for a DB connection (explicitly or via {DBSERVER_URI_ENV})"
                ))
            })?;
        Ok(uri.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_uri() {
        let config = Config::new("http://db:8080");
        assert_eq!(config.resolve_base_uri().unwrap(), "http://db:8080");
    }

    #[test]
    fn test_lookup_only_reads_dbserver_uri() {
        let config = Config::from_lookup(|key| Some(format!("http://{key}")));
        assert_eq!(config.base_uri(), Some("http://DBSERVER_URI"));
    }

    #[test]
    fn test_explicit_overrides_lookup() {
        let config = Config::from_lookup(|_| Some("http://env:1".to_string()))
            .with_base_uri(Some("http://explicit:2"));
        assert_eq!(config.resolve_base_uri().unwrap(), "http://explicit:2");

        let config =
            Config::from_lookup(|_| Some("http://env:1".to_string())).with_base_uri(None::<String>);
        assert_eq!(config.resolve_base_uri().unwrap(), "http://env:1");
    }

    #[test]
    fn test_missing_or_blank_uri() {
        assert!(matches!(
            Config::default().resolve_base_uri(),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            Config::new("  ").resolve_base_uri(),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            Config::new("/").resolve_base_uri(),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_deserialize() {
        let config: Config = serde_json::from_str(r#"{"base_uri":"http://db"}"#).unwrap();
        assert_eq!(config, Config::new("http://db"));
    }
}
