//! # mke-client: remote experiment session client
//!
//! A remote execution script uses this crate to track the lifecycle of a
//! long-running observation ("experiment") or analysis against the central
//! dbserver, and to register the data files it produces.
//!
//! ## Design Principles
//!
//! - **Server is the source of truth**: nothing is cached; every accessor
//!   is one synchronous round trip
//! - **Fail fast**: no retries, no silent recovery; errors reach the caller
//!   unmodified
//! - **Poll, don't push**: a driver discovers an external cancel with
//!   [`SessionCore::check_for_cancel`] inside its own loop
//! - **Two-phase files**: register a path, write the file, the path is
//!   authoritative
//!
//! ## Example Usage
//!
//! ```rust
//! use std::time::Duration;
//!
//! use mke_client::session::{ExperimentSession, SessionCore};
//! use mke_client::time::{make_zulu_str, utc_now};
//! use mke_client::transport::MemoryServer;
//!
//! # fn main() -> mke_client::Result<()> {
//! let server = MemoryServer::default();
//! server.insert_row("experiments", 1, serde_json::json!({
//!     "status": "WAITING_TO_RUN",
//!     "start_condition": make_zulu_str(&utc_now()),
//!     "duration_expected_hr_dec": 0.1,
//!     "devices_json": "[\"WTR\"]",
//! }))?;
//!
//! let experiment = ExperimentSession::with_uri(1, "http://localhost:8080", &server)?;
//! experiment.set_status_running()?;
//!
//! let tick = Duration::from_secs(10);
//! if !experiment.check_for_cancel()? && !experiment.should_stop(utc_now(), tick)? {
//!     let devices = experiment.get_expected_devices()?;
//!     let files = experiment.register_main_and_aux_files(devices, None, None)?;
//!     println!("write main data to {}", files.path);
//! }
//! experiment.set_status_finishing()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod error;
pub mod files;
pub mod session;
pub mod status;
pub mod time;
pub mod transport;

pub use config::Config;
pub use error::{Error, Result};
pub use files::{DataFileRegistration, DeviceExtensionMap, ExtensionSpec, FileSource, RegisteredFile};
pub use session::{AnalysisSession, ExperimentSession, RemoteRow, SessionCore};
pub use status::Status;
