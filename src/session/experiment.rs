//! Experiment sessions and their data files

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::info;

use super::{Session, SessionCore, Table};
use crate::config::Config;
use crate::files::{
    normalize_extensions, AuxFilesResponse, DataFileRegistration, ExtensionSpec, FileSource,
    RegisteredFile, DEFAULT_EXTENSION, MAIN_FILE_KEY,
};
use crate::time::{make_zulu_str, utc_now};
use crate::transport::{FilePart, Transport};
use crate::{Error, Result};

/// A row of the `experiments` table.
///
/// Besides the shared lifecycle operations of [`SessionCore`], an
/// experiment registers or uploads its data files:
///
/// - a main data file (key `ACU`) plus per-device auxiliary files for each
///   measurement, via [`Self::register_main_and_aux_files`] or
///   [`Self::upload_main_and_aux_files`];
/// - experiment-level auxiliary files, via
///   [`Self::register_global_aux_files`] or [`Self::upload_global_aux_files`].
///
/// Registration only reserves server-side rows and returns the paths to
/// write to; the caller must write each file before the path counts as
/// populated. A crash in between leaves an orphaned registration.
#[derive(Debug)]
pub struct ExperimentSession<T> {
    core: Session<T>,
}

impl<T: Transport> ExperimentSession<T> {
    /// Create a session for experiment `id` with the base URI from `config`.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if `config` yields no base URI.
    pub fn new(id: i64, config: &Config, transport: T) -> Result<Self> {
        Ok(Self {
            core: Session::new(Table::Experiments, id, config, transport)?,
        })
    }

    /// Create a session for experiment `id` at an explicit base URI.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if `uri` is blank.
    pub fn with_uri(id: i64, uri: impl Into<String>, transport: T) -> Result<Self> {
        Self::new(id, &Config::new(uri), transport)
    }

    /// Create a session for experiment `id`, with the base URI from
    /// `DBSERVER_URI`.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if the variable is unset or blank.
    pub fn from_env(id: i64, transport: T) -> Result<Self> {
        Self::new(id, &Config::from_env(), transport)
    }

    /// Device identifiers this experiment expects data from.
    ///
    /// # Errors
    ///
    /// [`Error::DataIntegrity`] if `devices_json` is absent or malformed.
    pub fn get_expected_devices(&self) -> Result<Vec<String>> {
        self.get()?.expected_devices()
    }

    /// Register a main data file plus auxiliary files for one measurement
    /// and return the paths to write them to.
    ///
    /// `ACU` is always registered (with `.csv` unless `devices` names it).
    /// `start_time` defaults to now; `tag` ends up in the file names.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for malformed `devices`;
    /// [`Error::Remote`] for a non-2xx response.
    pub fn register_main_and_aux_files(
        &self,
        devices: impl Into<ExtensionSpec>,
        start_time: Option<DateTime<Utc>>,
        tag: Option<&str>,
    ) -> Result<DataFileRegistration> {
        let mut extensions = normalize_extensions(devices)?;
        extensions.ensure(MAIN_FILE_KEY, DEFAULT_EXTENSION);

        let body = json!({
            "id": self.id(),
            "extensions": extensions,
            "row": measurement_row(start_time, tag),
        });
        let registration: DataFileRegistration = self
            .core
            .post("register_measurement_data", &body, &[])?
            .decode()?;

        info!(
            experiment = self.id(),
            file_id = registration.id,
            path = %registration.path,
            aux_files = registration.aux_files.len(),
            "measurement files registered"
        );
        Ok(registration)
    }

    /// Upload a main data file (sent under `ACU`) plus auxiliary files for
    /// one measurement.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] if a source cannot be read; [`Error::Validation`] if
    /// an auxiliary key is empty, repeated, or `ACU`; [`Error::Remote`] for a
    /// non-2xx response.
    pub fn upload_main_and_aux_files<I, K, V>(
        &self,
        main_file: impl Into<FileSource>,
        aux_files: I,
        start_time: Option<DateTime<Utc>>,
        tag: Option<&str>,
    ) -> Result<DataFileRegistration>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FileSource>,
    {
        let mut parts = vec![main_file.into().into_part(MAIN_FILE_KEY)?];
        parts.extend(collect_parts(aux_files)?);
        check_unique_keys(&parts)?;

        let body = json!({
            "id": self.id(),
            "row": measurement_row(start_time, tag),
        });
        let registration: DataFileRegistration = self
            .core
            .post("upload_measurement_data", &body, &parts)?
            .decode()?;

        info!(
            experiment = self.id(),
            file_id = registration.id,
            path = %registration.path,
            aux_files = registration.aux_files.len(),
            "measurement files uploaded"
        );
        Ok(registration)
    }

    /// Register experiment-level auxiliary files and return the paths to
    /// write them to. No `ACU` key is added.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for malformed `devices`;
    /// [`Error::Remote`] for a non-2xx response.
    pub fn register_global_aux_files(
        &self,
        devices: impl Into<ExtensionSpec>,
    ) -> Result<Vec<RegisteredFile>> {
        let extensions = normalize_extensions(devices)?;
        let body = json!({
            "id": self.id(),
            "extensions": extensions,
        });
        let response: AuxFilesResponse = self
            .core
            .post("register_exp_aux_files", &body, &[])?
            .decode()?;

        info!(
            experiment = self.id(),
            aux_files = response.aux_files.len(),
            "global aux files registered"
        );
        Ok(response.aux_files)
    }

    /// Upload experiment-level auxiliary files, keyed by device/aux key.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] if a source cannot be read; [`Error::Validation`] if
    /// no file is given or a key is empty or repeated; [`Error::Remote`] for
    /// a non-2xx response.
    pub fn upload_global_aux_files<I, K, V>(&self, files: I) -> Result<Vec<RegisteredFile>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FileSource>,
    {
        let parts = collect_parts(files)?;
        if parts.is_empty() {
            return Err(Error::Validation("no global aux files given".to_string()));
        }
        check_unique_keys(&parts)?;

        let body = json!({ "id": self.id() });
        let response: AuxFilesResponse = self
            .core
            .post("upload_exp_aux_files", &body, &parts)?
            .decode()?;

        info!(
            experiment = self.id(),
            aux_files = response.aux_files.len(),
            "global aux files uploaded"
        );
        Ok(response.aux_files)
    }
}

impl<T: Transport> SessionCore for ExperimentSession<T> {
    type Transport = T;

    fn core(&self) -> &Session<T> {
        &self.core
    }
}

/// `{time_iso, tags}` metadata of a measurement.
fn measurement_row(start_time: Option<DateTime<Utc>>, tag: Option<&str>) -> Value {
    let start_time = start_time.unwrap_or_else(utc_now);
    json!({
        "time_iso": make_zulu_str(&start_time),
        "tags": tag,
    })
}

fn collect_parts<I, K, V>(files: I) -> Result<Vec<FilePart>>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<FileSource>,
{
    files
        .into_iter()
        .map(|(key, source)| {
            let key = key.into();
            if key.trim().is_empty() {
                return Err(Error::Validation("file key must not be empty".to_string()));
            }
            source.into().into_part(&key)
        })
        .collect()
}

fn check_unique_keys(parts: &[FilePart]) -> Result<()> {
    for (i, part) in parts.iter().enumerate() {
        if parts[..i].iter().any(|earlier| earlier.key == part.key) {
            return Err(Error::Validation(format!(
                "file key {:?} given more than once",
                part.key
            )));
        }
    }
    Ok(())
}
