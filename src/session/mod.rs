//! Remote experiment/analysis sessions
//!
//! A session wraps one row of the dbserver (`experiments` or `analyses`)
//! and drives its lifecycle from the executing script:
//!
//! ```text
//! INITIALIZING/... ──> RUNNING ──> FINISHING  ──> FINISHED | ABORTED
//!                             └──> CANCELLING ──> CANCELLED
//!                 any in-flight state ──> FAILED | FAULTY
//! ```
//!
//! The server is the only source of truth. Construction performs no I/O,
//! every call is one synchronous round trip, nothing is cached, and no
//! request is ever retried. A cancel requested by another actor is
//! discovered by polling [`SessionCore::check_for_cancel`].
//!
//! ## Usage
//!
//! ```rust
//! use mke_client::session::{ExperimentSession, SessionCore};
//! use mke_client::transport::MemoryServer;
//! use serde_json::json;
//!
//! # fn main() -> mke_client::Result<()> {
//! let server = MemoryServer::default();
//! server.insert_row("experiments", 1, json!({"status": "WAITING_TO_RUN"}))?;
//!
//! let experiment = ExperimentSession::with_uri(1, "http://localhost:8080", &server)?;
//! experiment.set_status_running()?;
//! assert!(!experiment.check_for_cancel()?);
//!
//! server.set_status("experiments", 1, "CANCELLING");
//! assert!(experiment.check_for_cancel()?);
//! # Ok(())
//! # }
//! ```

mod analysis;
mod experiment;
mod row;

pub use analysis::AnalysisSession;
pub use experiment::ExperimentSession;
pub use row::RemoteRow;

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::status::Status;
use crate::time::utc_now;
use crate::transport::{FilePart, HttpResponse, Transport};
use crate::Result;

/// Safety margin applied to a polling tick by [`SessionCore::should_stop`].
pub const TICK_SAFETY_FACTOR: f64 = 1.1;

/// Table a session lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// `experiments`
    Experiments,
    /// `analyses`
    Analyses,
}

impl Table {
    /// Table name as used in URLs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Experiments => "experiments",
            Self::Analyses => "analyses",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity plus transport shared by every session variant.
///
/// The identity is immutable after construction.
#[derive(Debug)]
pub struct Session<T> {
    id: i64,
    table: Table,
    base_uri: String,
    transport: T,
}

impl<T: Transport> Session<T> {
    /// Create a session for `table`/`id`, resolving the base URI from
    /// `config`. Performs no I/O.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`](crate::Error::Configuration) if
    /// `config` yields no base URI.
    pub fn new(table: Table, id: i64, config: &Config, transport: T) -> Result<Self> {
        let base_uri = config.resolve_base_uri()?;
        Ok(Self {
            id,
            table,
            base_uri,
            transport,
        })
    }

    /// Row id.
    #[must_use]
    pub const fn id(&self) -> i64 {
        self.id
    }

    /// Table of the row.
    #[must_use]
    pub const fn table(&self) -> Table {
        self.table
    }

    /// Resolved dbserver base URI.
    #[must_use]
    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    /// Underlying transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_uri)
    }

    fn row_url(&self) -> String {
        self.url(&format!("{}/{}", self.table, self.id))
    }

    /// `GET {uri}/{table}/{id}`; anything but 200 is an error.
    fn fetch(&self, url: &str) -> Result<RemoteRow> {
        debug!(url, "GET");
        let response = self.transport.get(url)?;
        if response.status != 200 {
            warn!(url, status = response.status, "GET rejected");
            return Err(response.into_error());
        }
        response.decode()
    }

    /// Fetch this session's row.
    ///
    /// # Errors
    ///
    /// [`Error::Remote`](crate::Error::Remote) unless the server answers
    /// exactly 200; [`Error::DataIntegrity`](crate::Error::DataIntegrity) if
    /// the body is not a JSON object.
    pub fn get(&self) -> Result<RemoteRow> {
        self.fetch(&self.row_url())
    }

    /// Fetch a row of another table (e.g. the antenna of an experiment).
    ///
    /// # Errors
    ///
    /// As [`Self::get`].
    pub fn get_related(&self, table: &str, id: impl fmt::Display) -> Result<RemoteRow> {
        self.fetch(&self.url(&format!("{table}/{id}")))
    }

    /// `PATCH {uri}/{table}/{id}`; a status of 300 or above is an error.
    fn patch(&self, body: &Value) -> Result<RemoteRow> {
        let url = self.row_url();
        debug!(url = %url, %body, "PATCH");
        let response = self.transport.patch(&url, body)?;
        if response.status >= 300 {
            warn!(url = %url, status = response.status, "PATCH rejected");
            return Err(response.into_error());
        }
        response.decode()
    }

    /// `POST {uri}/{endpoint}`; anything outside 2xx is an error.
    pub(crate) fn post(
        &self,
        endpoint: &str,
        body: &Value,
        files: &[FilePart],
    ) -> Result<HttpResponse> {
        let url = self.url(endpoint);
        debug!(url = %url, files = files.len(), "POST");
        let response = self.transport.post(&url, Some(body), files)?;
        if !response.is_success() {
            warn!(url = %url, status = response.status, "POST rejected");
            return Err(response.into_error());
        }
        Ok(response)
    }

    /// Set a new status literal and return the updated row.
    ///
    /// Unless `ignore_enum` is set the literal must be a known [`Status`].
    ///
    /// # Errors
    ///
    /// [`Error::Validation`](crate::Error::Validation) for an unknown literal
    /// (no request is sent); [`Error::Remote`](crate::Error::Remote) if the
    /// server rejects the update.
    pub fn set_status_str(&self, new_status: &str, ignore_enum: bool) -> Result<RemoteRow> {
        if !ignore_enum {
            new_status.parse::<Status>()?;
        }
        let row = self.patch(&json!({ "status": new_status }))?;
        info!(table = %self.table, id = self.id, status = new_status, "status set");
        Ok(row)
    }
}

/// Operations shared by experiments and analyses.
///
/// Implementors only expose their [`Session`] core; every operation is a
/// provided method delegating to it.
pub trait SessionCore {
    /// Transport used to reach the dbserver.
    type Transport: Transport;

    /// Shared session core.
    fn core(&self) -> &Session<Self::Transport>;

    /// Row id.
    fn id(&self) -> i64 {
        self.core().id()
    }

    /// Table of the row.
    fn table(&self) -> Table {
        self.core().table()
    }

    /// Fetch the current row.
    ///
    /// # Errors
    ///
    /// See [`Session::get`].
    fn get(&self) -> Result<RemoteRow> {
        self.core().get()
    }

    /// Fetch a row of another table.
    ///
    /// # Errors
    ///
    /// See [`Session::get_related`].
    fn get_related(&self, table: &str, id: impl fmt::Display) -> Result<RemoteRow> {
        self.core().get_related(table, id)
    }

    /// Fetch the antenna row referenced by this row's `antenna_id`.
    ///
    /// # Errors
    ///
    /// [`Error::DataIntegrity`](crate::Error::DataIntegrity) if the row has
    /// no usable `antenna_id`; otherwise as [`Session::get`].
    fn get_antenna(&self) -> Result<RemoteRow> {
        let antenna_id = self.get()?.antenna_id()?;
        self.get_related("antennas", antenna_id)
    }

    /// Current status of the row.
    ///
    /// # Errors
    ///
    /// [`Error::DataIntegrity`](crate::Error::DataIntegrity) for an unknown
    /// remote status.
    fn status(&self) -> Result<Status> {
        self.get()?.status()
    }

    /// Set a known status.
    ///
    /// # Errors
    ///
    /// See [`Session::set_status_str`].
    fn set_status(&self, status: Status) -> Result<RemoteRow> {
        self.core().set_status_str(status.as_str(), false)
    }

    /// Set a status literal, optionally bypassing validation.
    ///
    /// # Errors
    ///
    /// See [`Session::set_status_str`].
    fn set_status_str(&self, new_status: &str, ignore_enum: bool) -> Result<RemoteRow> {
        self.core().set_status_str(new_status, ignore_enum)
    }

    /// Set `RUNNING`.
    ///
    /// # Errors
    ///
    /// See [`Session::set_status_str`].
    fn set_status_running(&self) -> Result<RemoteRow> {
        self.set_status(Status::Running)
    }

    /// Set `FINISHING`.
    ///
    /// # Errors
    ///
    /// See [`Session::set_status_str`].
    fn set_status_finishing(&self) -> Result<RemoteRow> {
        self.set_status(Status::Finishing)
    }

    /// Set `CANCELLING`.
    ///
    /// # Errors
    ///
    /// See [`Session::set_status_str`].
    fn set_status_cancelling(&self) -> Result<RemoteRow> {
        self.set_status(Status::Cancelling)
    }

    /// Set `FINISHED`.
    ///
    /// # Errors
    ///
    /// See [`Session::set_status_str`].
    fn set_status_finished(&self) -> Result<RemoteRow> {
        self.set_status(Status::Finished)
    }

    /// Set `CANCELLED`.
    ///
    /// # Errors
    ///
    /// See [`Session::set_status_str`].
    fn set_status_cancelled(&self) -> Result<RemoteRow> {
        self.set_status(Status::Cancelled)
    }

    /// Set `FAILED`.
    ///
    /// # Errors
    ///
    /// See [`Session::set_status_str`].
    fn set_status_failed(&self) -> Result<RemoteRow> {
        self.set_status(Status::Failed)
    }

    /// Poll whether the run must stop: the remote status is terminal or
    /// `CANCELLING`.
    ///
    /// # Errors
    ///
    /// [`Error::DataIntegrity`](crate::Error::DataIntegrity) if the remote
    /// status is not a known literal.
    fn check_for_cancel(&self) -> Result<bool> {
        let status = self.status()?;
        let stop = status.is_stop_worthy();
        if stop {
            info!(table = %self.table(), id = self.id(), %status, "stop requested");
        }
        Ok(stop)
    }

    /// Remaining run time in decimal hours, clamped at zero:
    /// `start_condition + duration_expected_hr_dec - now`.
    ///
    /// # Errors
    ///
    /// [`Error::DataIntegrity`](crate::Error::DataIntegrity) if
    /// `start_condition` or `duration_expected_hr_dec` is missing or
    /// malformed.
    fn remaining_time_hours(&self, now: DateTime<Utc>) -> Result<f64> {
        let end = self.get()?.expected_end()?;
        Ok(row::remaining_hours(end, now))
    }

    /// Remaining run time as a duration, clamped at zero.
    ///
    /// # Errors
    ///
    /// See [`Self::remaining_time_hours`].
    fn remaining_time(&self, now: DateTime<Utc>) -> Result<TimeDelta> {
        let end = self.get()?.expected_end()?;
        Ok((end - now).max(TimeDelta::zero()))
    }

    /// Whether a driver polling every `tick` should stop now so it does not
    /// overrun its budget before the next poll: remaining time at most
    /// [`TICK_SAFETY_FACTOR`] ticks.
    ///
    /// # Errors
    ///
    /// See [`Self::remaining_time_hours`].
    fn should_stop(&self, now: DateTime<Utc>, tick: Duration) -> Result<bool> {
        let remaining_secs = self.remaining_time_hours(now)? * 3600.0;
        Ok(remaining_secs <= tick.as_secs_f64() * TICK_SAFETY_FACTOR)
    }

    /// `start_condition` of the row.
    ///
    /// # Errors
    ///
    /// [`Error::DataIntegrity`](crate::Error::DataIntegrity) if missing or
    /// unparsable.
    fn start_condition(&self) -> Result<DateTime<Utc>> {
        self.get()?.start_condition()
    }

    /// Time left until `start_condition`; zero once it has passed.
    ///
    /// # Errors
    ///
    /// See [`Self::start_condition`].
    fn time_until_start(&self, now: DateTime<Utc>) -> Result<Duration> {
        let start = self.start_condition()?;
        Ok((start - now).to_std().unwrap_or(Duration::ZERO))
    }

    /// Block the calling thread until `start_condition` is reached.
    ///
    /// # Errors
    ///
    /// See [`Self::start_condition`].
    fn wait_for_start_condition(&self) -> Result<()> {
        let wait = self.time_until_start(utc_now())?;
        if !wait.is_zero() {
            info!(
                table = %self.table(),
                id = self.id(),
                wait_secs = wait.as_secs_f64(),
                "waiting for start condition"
            );
            std::thread::sleep(wait);
        }
        Ok(())
    }
}
