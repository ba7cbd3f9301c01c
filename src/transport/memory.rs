//! In-process dbserver emulation.
//!
//! Serves the same wire shapes as the real dbserver from concurrent
//! in-memory tables, so a driver can run offline and tests can play the
//! part of an external actor (flip a status, inspect what was sent).
//! Data is lost when the server is dropped.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{FilePart, HttpResponse, Transport};
use crate::files::{DataFileRegistration, RegisteredFile, MAIN_FILE_KEY};
use crate::time::{from_zulu, utc_now};
use crate::{Error, Result};

const EXPERIMENTS: &str = "experiments";

/// A request as received by [`MemoryServer`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    /// `GET`, `PATCH` or `POST`.
    pub method: &'static str,
    /// URL path, without scheme and host.
    pub path: String,
    /// JSON body, if any.
    pub body: Option<Value>,
    /// Multipart keys, in the order sent.
    pub file_keys: Vec<String>,
}

/// In-memory dbserver.
///
/// Rows live in a lock-free concurrent map keyed by `(table, id)`, where
/// `id` is the URL path segment, so numeric and string ids (such as
/// antenna names) are both served. Uploaded file content is kept by path. Generated paths look like
/// `{data_root}/{table}/{id}/{YYYYMMDD_HHMMSS}[_{tag}]_{key}{ext}`.
///
/// # Example
///
/// ```rust
/// use mke_client::transport::{MemoryServer, Transport};
///
/// let server = MemoryServer::new("/data");
/// server.insert_row("experiments", 1, serde_json::json!({"status": "HOLD"})).unwrap();
///
/// let response = server.get("http://localhost:8080/experiments/1").unwrap();
/// assert_eq!(response.status, 200);
/// assert_eq!(server.get("http://localhost:8080/experiments/2").unwrap().status, 404);
/// ```
pub struct MemoryServer {
    data_root: String,
    rows: DashMap<(String, String), Map<String, Value>>,
    files: DashMap<String, Vec<u8>>,
    next_file_id: AtomicI64,
    requests: Mutex<Vec<RecordedRequest>>,
    injected: Mutex<Option<HttpResponse>>,
}

impl MemoryServer {
    /// Create an empty server generating paths below `data_root`.
    #[must_use]
    pub fn new(data_root: impl Into<String>) -> Self {
        Self {
            data_root: data_root.into().trim_end_matches('/').to_string(),
            rows: DashMap::new(),
            files: DashMap::new(),
            next_file_id: AtomicI64::new(1),
            requests: Mutex::new(Vec::new()),
            injected: Mutex::new(None),
        }
    }

    /// Insert or replace a row. The `id` field is set from `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if `row` or `id` cannot be serialized and
    /// [`Error::Validation`] if `row` is not a JSON object.
    pub fn insert_row<I, R>(&self, table: &str, id: I, row: R) -> Result<()>
    where
        I: fmt::Display + Serialize,
        R: Serialize,
    {
        let Value::Object(mut fields) = serde_json::to_value(row)? else {
            return Err(Error::Validation(format!(
                "row for {table}/{id} must be a JSON object"
            )));
        };
        fields.insert("id".to_string(), serde_json::to_value(&id)?);
        self.rows.insert(row_key(table, id), fields);
        Ok(())
    }

    /// Current content of a row.
    #[must_use]
    pub fn row(&self, table: &str, id: impl fmt::Display) -> Option<Value> {
        self.rows
            .get(&row_key(table, id))
            .map(|row| Value::Object(row.value().clone()))
    }

    /// Overwrite one field of a row. Returns `false` if the row is missing.
    pub fn set_field(
        &self,
        table: &str,
        id: impl fmt::Display,
        field: &str,
        value: Value,
    ) -> bool {
        self.rows
            .get_mut(&row_key(table, id))
            .map(|mut row| {
                row.insert(field.to_string(), value);
            })
            .is_some()
    }

    /// Set a row's status as another actor would. The literal is not
    /// validated.
    pub fn set_status(&self, table: &str, id: impl fmt::Display, status: &str) -> bool {
        self.set_field(table, id, "status", json!(status))
    }

    /// Answer the next request with `response` instead of routing it.
    pub fn fail_next(&self, response: HttpResponse) {
        *self.injected.lock().unwrap_or_else(PoisonError::into_inner) = Some(response);
    }

    /// Every request received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The most recent request.
    #[must_use]
    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    /// Content uploaded to `path`.
    #[must_use]
    pub fn stored_file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.get(path).map(|bytes| bytes.value().clone())
    }

    fn record(&self, method: &'static str, path: &str, body: Option<&Value>, files: &[FilePart]) {
        debug!(method, path, files = files.len(), "memory server request");
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedRequest {
                method,
                path: path.to_string(),
                body: body.cloned(),
                file_keys: files.iter().map(|f| f.key.clone()).collect(),
            });
    }

    fn take_injected(&self) -> Option<HttpResponse> {
        self.injected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn fetch_row(&self, segments: &[&str]) -> HttpResponse {
        let Some((table, id)) = table_and_id(segments) else {
            return not_found(&segments.join("/"));
        };
        match self.row(table, id) {
            Some(row) => HttpResponse::json(200, &row),
            None => not_found(&format!("{table}/{id}")),
        }
    }

    fn patch_row(&self, segments: &[&str], body: &Value) -> HttpResponse {
        let Some((table, id)) = table_and_id(segments) else {
            return not_found(&segments.join("/"));
        };
        let Some(update) = body.as_object() else {
            return unprocessable("patch body must be a JSON object");
        };
        let Some(mut row) = self.rows.get_mut(&row_key(table, id)) else {
            return not_found(&format!("{table}/{id}"));
        };
        for (field, value) in update {
            row.insert(field.clone(), value.clone());
        }
        HttpResponse::json(200, &Value::Object(row.clone()))
    }

    fn register_measurement(&self, body: Option<&Value>, files: &[FilePart]) -> HttpResponse {
        let request: MeasurementRequest = match parse_body(body) {
            Ok(request) => request,
            Err(response) => return response,
        };
        if !self.has_experiment(request.id) {
            return not_found(&format!("{EXPERIMENTS}/{}", request.id));
        }
        let time = match request.row.time_iso.as_deref() {
            Some(s) => match from_zulu(s) {
                Some(t) => t,
                None => return unprocessable(&format!("time_iso {s:?} could not be parsed")),
            },
            None => utc_now(),
        };
        let stamp = file_stamp(time, request.row.tags.as_deref());

        let entries: Vec<(String, String, Option<&FilePart>)> = if files.is_empty() {
            request
                .extensions
                .into_iter()
                .map(|(key, ext)| (key, ext, None))
                .collect()
        } else {
            files
                .iter()
                .map(|part| (part.key.clone(), extension_of(&part.file_name), Some(part)))
                .collect()
        };

        let mut main = None;
        let mut aux_files = Vec::new();
        for (key, ext, part) in entries {
            let path = format!(
                "{}/{EXPERIMENTS}/{}/{stamp}_{key}{ext}",
                self.data_root, request.id
            );
            let file = self.reserve(key, path, part);
            if file.key == MAIN_FILE_KEY {
                main = Some(file);
            } else {
                aux_files.push(file);
            }
        }

        let Some(main) = main else {
            return unprocessable("no ACU main file given");
        };
        let registration = DataFileRegistration {
            path: main.path,
            id: main.id,
            aux_files,
        };
        match serde_json::to_value(&registration) {
            Ok(body) => HttpResponse::json(200, &body),
            Err(e) => HttpResponse::new(500, e.to_string()),
        }
    }

    fn register_global_aux(&self, body: Option<&Value>, files: &[FilePart]) -> HttpResponse {
        let request: GlobalAuxRequest = match parse_body(body) {
            Ok(request) => request,
            Err(response) => return response,
        };
        if !self.has_experiment(request.id) {
            return not_found(&format!("{EXPERIMENTS}/{}", request.id));
        }

        let entries: Vec<(String, String, Option<&FilePart>)> = if files.is_empty() {
            request
                .extensions
                .into_iter()
                .map(|(key, ext)| (key, ext, None))
                .collect()
        } else {
            files
                .iter()
                .map(|part| (part.key.clone(), extension_of(&part.file_name), Some(part)))
                .collect()
        };

        let aux_files: Vec<RegisteredFile> = entries
            .into_iter()
            .map(|(key, ext, part)| {
                let path = format!(
                    "{}/{EXPERIMENTS}/{}/global_{key}{ext}",
                    self.data_root, request.id
                );
                self.reserve(key, path, part)
            })
            .collect();

        HttpResponse::json(200, &json!({ "aux_files": aux_files }))
    }

    fn reserve(&self, key: String, path: String, part: Option<&FilePart>) -> RegisteredFile {
        let id = self.next_file_id.fetch_add(1, Ordering::Relaxed);
        if let Some(part) = part {
            self.files.insert(path.clone(), part.bytes.clone());
        }
        RegisteredFile { key, id, path }
    }

    fn has_experiment(&self, id: i64) -> bool {
        self.rows.contains_key(&row_key(EXPERIMENTS, id))
    }
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new("/data/mke")
    }
}

impl Transport for MemoryServer {
    fn get(&self, url: &str) -> Result<HttpResponse> {
        let path = url_path(url);
        self.record("GET", path, None, &[]);
        if let Some(response) = self.take_injected() {
            return Ok(response);
        }
        Ok(self.fetch_row(&segments(path)))
    }

    fn patch(&self, url: &str, body: &Value) -> Result<HttpResponse> {
        let path = url_path(url);
        self.record("PATCH", path, Some(body), &[]);
        if let Some(response) = self.take_injected() {
            return Ok(response);
        }
        Ok(self.patch_row(&segments(path), body))
    }

    fn post(&self, url: &str, body: Option<&Value>, files: &[FilePart]) -> Result<HttpResponse> {
        let path = url_path(url);
        self.record("POST", path, body, files);
        if let Some(response) = self.take_injected() {
            return Ok(response);
        }
        let response = match segments(path).as_slice() {
            ["register_measurement_data"] => self.register_measurement(body, &[]),
            ["upload_measurement_data"] if !files.is_empty() => {
                self.register_measurement(body, files)
            }
            ["register_exp_aux_files"] => self.register_global_aux(body, &[]),
            ["upload_exp_aux_files"] if !files.is_empty() => {
                self.register_global_aux(body, files)
            }
            ["upload_measurement_data" | "upload_exp_aux_files"] => {
                unprocessable("no files given")
            }
            _ => not_found(path),
        };
        Ok(response)
    }
}

#[derive(Deserialize)]
struct MeasurementRequest {
    id: i64,
    #[serde(default)]
    extensions: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    row: MeasurementRow,
}

#[derive(Deserialize, Default)]
struct MeasurementRow {
    time_iso: Option<String>,
    tags: Option<String>,
}

#[derive(Deserialize)]
struct GlobalAuxRequest {
    id: i64,
    #[serde(default)]
    extensions: std::collections::BTreeMap<String, String>,
}

fn parse_body<T: for<'de> Deserialize<'de>>(
    body: Option<&Value>,
) -> std::result::Result<T, HttpResponse> {
    let body = body.ok_or_else(|| unprocessable("missing JSON body"))?;
    serde_json::from_value(body.clone()).map_err(|e| unprocessable(&e.to_string()))
}

/// Path part of `url`: everything from the first `/` after the host.
fn url_path(url: &str) -> &str {
    match url.split_once("://") {
        Some((_, rest)) => rest.find('/').map_or("/", |i| &rest[i..]),
        None => url,
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn table_and_id<'a>(segments: &[&'a str]) -> Option<(&'a str, &'a str)> {
    match segments {
        [table, id] => Some((*table, *id)),
        _ => None,
    }
}

fn row_key(table: &str, id: impl fmt::Display) -> (String, String) {
    (table.to_string(), id.to_string())
}

fn file_stamp(time: DateTime<Utc>, tag: Option<&str>) -> String {
    let stamp = time.format("%Y%m%d_%H%M%S").to_string();
    match tag.filter(|t| !t.is_empty()) {
        Some(tag) => format!("{stamp}_{tag}"),
        None => stamp,
    }
}

fn extension_of(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

fn not_found(what: &str) -> HttpResponse {
    HttpResponse::json(404, &json!({ "detail": format!("{what} not found") }))
}

fn unprocessable(detail: &str) -> HttpResponse {
    HttpResponse::json(422, &json!({ "detail": detail }))
}
