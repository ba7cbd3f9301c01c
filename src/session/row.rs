//! Remote row - the server's current view of a session

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::status::{allowed_list, Status};
use crate::time::from_zulu;
use crate::{Error, Result};

const MICROS_PER_HOUR: f64 = 3_600_000_000.0;

/// Open field → value mapping returned by the dbserver.
///
/// Rows are never cached: every session accessor fetches a fresh one. The
/// typed accessors below turn missing or malformed fields into
/// [`Error::DataIntegrity`], since the server owns the schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteRow(Map<String, Value>);

impl RemoteRow {
    /// Wrap a JSON object.
    #[must_use]
    pub const fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Raw field value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// All fields.
    #[must_use]
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume into the underlying JSON object.
    #[must_use]
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }

    fn required(&self, field: &str) -> Result<&Value> {
        self.0
            .get(field)
            .filter(|v| !v.is_null())
            .ok_or_else(|| Error::DataIntegrity(format!("remote row has no {field:?} field")))
    }

    fn required_str(&self, field: &str) -> Result<&str> {
        let value = self.required(field)?;
        value.as_str().ok_or_else(|| {
            Error::DataIntegrity(format!("{field:?} must be a string, got {value}"))
        })
    }

    /// The `status` literal as stored, unvalidated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DataIntegrity`] if the field is missing or not a string.
    pub fn status_literal(&self) -> Result<&str> {
        self.required_str("status")
    }

    /// The `status` field as a known [`Status`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::DataIntegrity`] if the field is missing or holds an
    /// unrecognized literal (schema drift).
    pub fn status(&self) -> Result<Status> {
        let literal = self.status_literal()?;
        Status::from_literal(literal).ok_or_else(|| {
            Error::DataIntegrity(format!(
                "the remote status {literal:?} is unrecognized (known: {})",
                allowed_list()
            ))
        })
    }

    /// `start_condition` parsed as a Zulu instant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DataIntegrity`] if the field is missing or unparsable.
    pub fn start_condition(&self) -> Result<DateTime<Utc>> {
        let value = self.required("start_condition")?;
        value.as_str().and_then(from_zulu).ok_or_else(|| {
            Error::DataIntegrity(format!("\"start_condition\" could not be parsed. Got: {value}"))
        })
    }

    /// `duration_expected_hr_dec`: expected run length in decimal hours.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DataIntegrity`] if the field is missing, not a
    /// number, or not finite.
    pub fn duration_expected_hours(&self) -> Result<f64> {
        let value = self.required("duration_expected_hr_dec")?;
        value.as_f64().filter(|h| h.is_finite()).ok_or_else(|| {
            Error::DataIntegrity(format!(
                "\"duration_expected_hr_dec\" must be a number of hours, got {value}"
            ))
        })
    }

    /// Instant the run must be over by: `start_condition` plus the
    /// expected duration.
    ///
    /// # Errors
    ///
    /// See [`Self::start_condition`] and [`Self::duration_expected_hours`].
    pub fn expected_end(&self) -> Result<DateTime<Utc>> {
        let start = self.start_condition()?;
        let hours = self.duration_expected_hours()?;
        #[allow(clippy::cast_possible_truncation)]
        let duration = TimeDelta::microseconds((hours * MICROS_PER_HOUR).round() as i64);
        start.checked_add_signed(duration).ok_or_else(|| {
            Error::DataIntegrity(format!(
                "expected end out of range: {start} + {hours} h"
            ))
        })
    }

    /// Device identifiers from `devices_json`.
    ///
    /// The field normally holds a JSON-encoded list; a list value is
    /// accepted as is.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DataIntegrity`] if the field is missing or is not a
    /// list of strings.
    pub fn expected_devices(&self) -> Result<Vec<String>> {
        let value = self.required("devices_json")?;
        let decoded = match value {
            Value::String(encoded) => serde_json::from_str::<Value>(encoded).map_err(|e| {
                Error::DataIntegrity(format!("\"devices_json\" is not valid JSON ({e}): {encoded}"))
            })?,
            other => other.clone(),
        };
        serde_json::from_value(decoded).map_err(|e| {
            Error::DataIntegrity(format!("\"devices_json\" is not a list of device names: {e}"))
        })
    }

    /// `antenna_id` as a path segment (string or integer ids).
    ///
    /// # Errors
    ///
    /// Returns [`Error::DataIntegrity`] if the field is missing or has
    /// another type.
    pub fn antenna_id(&self) -> Result<String> {
        match self.required("antenna_id")? {
            Value::String(id) if !id.is_empty() => Ok(id.clone()),
            Value::Number(id) => Ok(id.to_string()),
            other => Err(Error::DataIntegrity(format!(
                "\"antenna_id\" must be a string or integer, got {other}"
            ))),
        }
    }
}

/// Hours between `now` and `end`, clamped at zero.
pub(crate) fn remaining_hours(end: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let delta = end - now;
    #[allow(clippy::cast_precision_loss)]
    let hours = delta.num_microseconds().map_or_else(
        || delta.num_milliseconds() as f64 / 3_600_000.0,
        |us| us as f64 / MICROS_PER_HOUR,
    );
    hours.max(0.0)
}

impl From<Map<String, Value>> for RemoteRow {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}
