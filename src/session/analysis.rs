//! Analysis sessions

use super::{Session, SessionCore, Table};
use crate::config::Config;
use crate::transport::Transport;
use crate::Result;

/// A row of the `analyses` table.
///
/// Analyses share the lifecycle operations of [`SessionCore`] and have no
/// file registration of their own.
#[derive(Debug)]
pub struct AnalysisSession<T> {
    core: Session<T>,
}

impl<T: Transport> AnalysisSession<T> {
    /// Create a session for analysis `id` with the base URI from `config`.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`](crate::Error::Configuration) if `config`
    /// yields no base URI.
    pub fn new(id: i64, config: &Config, transport: T) -> Result<Self> {
        Ok(Self {
            core: Session::new(Table::Analyses, id, config, transport)?,
        })
    }

    /// Create a session for analysis `id` at an explicit base URI.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`](crate::Error::Configuration) if `uri` is blank.
    pub fn with_uri(id: i64, uri: impl Into<String>, transport: T) -> Result<Self> {
        Self::new(id, &Config::new(uri), transport)
    }

    /// Create a session for analysis `id`, with the base URI from
    /// `DBSERVER_URI`.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`](crate::Error::Configuration) if the variable
    /// is unset or blank.
    pub fn from_env(id: i64, transport: T) -> Result<Self> {
        Self::new(id, &Config::from_env(), transport)
    }
}

impl<T: Transport> SessionCore for AnalysisSession<T> {
    type Transport = T;

    fn core(&self) -> &Session<T> {
        &self.core
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Status;
    use crate::transport::MemoryServer;
    use serde_json::json;

    #[test]
    fn test_analysis_uses_analyses_table() {
        let server = MemoryServer::default();
        server
            .insert_row("analyses", 3, json!({"status": "AWAITING_CHECK"}))
            .unwrap();
        let analysis = AnalysisSession::with_uri(3, "http://db", &server).unwrap();

        assert_eq!(analysis.table(), Table::Analyses);
        assert_eq!(analysis.status().unwrap(), Status::AwaitingCheck);
        assert_eq!(server.last_request().unwrap().path, "/analyses/3");
    }
}
