//! Data-file registration types
//!
//! Files are attached to an experiment in two phases: the client
//! *registers* a set of device keys with file extensions, the dbserver
//! reserves a file row per key and answers with the authoritative
//! filesystem path for each, and the caller then writes its data to those
//! paths. Alternatively the client *uploads* file content directly.
//!
//! ```text
//! ExtensionSpec ──normalize──> DeviceExtensionMap ──POST──> (path, id, aux_files)
//!                                                             │
//!                                                             └─ [RegisteredFile (key, id, path)]
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use mke_client::files::{normalize_extensions, ExtensionSpec};
//!
//! let map = normalize_extensions(vec!["ACU", "TST"]).unwrap();
//! assert_eq!(map.get("TST"), Some(".csv"));
//!
//! let map = normalize_extensions(vec![("RFC", ".csv"), ("MWS", ".zip")]).unwrap();
//! assert_eq!(map.get("MWS"), Some(".zip"));
//!
//! let map = normalize_extensions(ExtensionSpec::from("TST")).unwrap();
//! assert_eq!(map.len(), 1);
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::transport::FilePart;
use crate::{Error, Result};

/// Key of the main data file of a measurement.
pub const MAIN_FILE_KEY: &str = "ACU";

/// Extension used when the caller names a key without one.
pub const DEFAULT_EXTENSION: &str = ".csv";

/// Mapping from device/aux key to file extension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceExtensionMap(BTreeMap<String, String>);

impl DeviceExtensionMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the extension for `key`, replacing any previous one.
    pub fn insert(&mut self, key: impl Into<String>, extension: impl Into<String>) {
        self.0.insert(key.into(), extension.into());
    }

    /// Set the extension for `key` only if the key is absent.
    pub fn ensure(&mut self, key: &str, extension: &str) {
        self.0
            .entry(key.to_string())
            .or_insert_with(|| extension.to_string());
    }

    /// Extension registered for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate `(key, extension)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Consume into the underlying map.
    #[must_use]
    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.0
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DeviceExtensionMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<BTreeMap<String, String>> for DeviceExtensionMap {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

/// The accepted shapes for "which files, with which extensions".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionSpec {
    /// One key, default extension.
    Single(String),
    /// Several keys, default extension each.
    Keys(Vec<String>),
    /// Explicit `(key, extension)` pairs.
    Pairs(Vec<(String, String)>),
    /// An already-built mapping.
    Map(DeviceExtensionMap),
}

impl ExtensionSpec {
    /// Normalize into a [`DeviceExtensionMap`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an empty key or extension, or when
    /// `Pairs` names the same key with two different extensions.
    pub fn normalize(self) -> Result<DeviceExtensionMap> {
        let pairs: Vec<(String, String)> = match self {
            Self::Single(key) => vec![(key, DEFAULT_EXTENSION.to_string())],
            Self::Keys(keys) => keys
                .into_iter()
                .map(|k| (k, DEFAULT_EXTENSION.to_string()))
                .collect(),
            Self::Pairs(pairs) => pairs,
            Self::Map(map) => map.into_inner().into_iter().collect(),
        };

        let mut map = DeviceExtensionMap::new();
        for (key, extension) in pairs {
            if key.trim().is_empty() {
                return Err(Error::Validation("device key must not be empty".to_string()));
            }
            if extension.trim().is_empty() {
                return Err(Error::Validation(format!(
                    "extension for device {key:?} must not be empty"
                )));
            }
            if let Some(existing) = map.get(&key) {
                if existing != extension {
                    return Err(Error::Validation(format!(
                        "device {key:?} given with conflicting extensions {existing:?} and {extension:?}"
                    )));
                }
                continue;
            }
            map.insert(key, extension);
        }
        Ok(map)
    }
}

impl From<&str> for ExtensionSpec {
    fn from(key: &str) -> Self {
        Self::Single(key.to_string())
    }
}

impl From<String> for ExtensionSpec {
    fn from(key: String) -> Self {
        Self::Single(key)
    }
}

impl From<Vec<&str>> for ExtensionSpec {
    fn from(keys: Vec<&str>) -> Self {
        Self::Keys(keys.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for ExtensionSpec {
    fn from(keys: Vec<String>) -> Self {
        Self::Keys(keys)
    }
}

impl From<&[&str]> for ExtensionSpec {
    fn from(keys: &[&str]) -> Self {
        Self::Keys(keys.iter().map(|k| (*k).to_string()).collect())
    }
}

impl From<Vec<(&str, &str)>> for ExtensionSpec {
    fn from(pairs: Vec<(&str, &str)>) -> Self {
        Self::Pairs(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl From<Vec<(String, String)>> for ExtensionSpec {
    fn from(pairs: Vec<(String, String)>) -> Self {
        Self::Pairs(pairs)
    }
}

impl From<DeviceExtensionMap> for ExtensionSpec {
    fn from(map: DeviceExtensionMap) -> Self {
        Self::Map(map)
    }
}

impl From<BTreeMap<String, String>> for ExtensionSpec {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self::Map(map.into())
    }
}

impl From<BTreeMap<&str, &str>> for ExtensionSpec {
    fn from(map: BTreeMap<&str, &str>) -> Self {
        Self::Map(map.into_iter().collect())
    }
}

/// Normalize any accepted extension shape into a [`DeviceExtensionMap`].
///
/// # Errors
///
/// See [`ExtensionSpec::normalize`].
pub fn normalize_extensions(spec: impl Into<ExtensionSpec>) -> Result<DeviceExtensionMap> {
    spec.into().normalize()
}

/// A file row reserved by the dbserver.
///
/// On the wire this is the array `[key, id, path]`; the object form
/// `{"key", "id", "path"}` is accepted as well.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireRegisteredFile", into = "(String, i64, String)")]
pub struct RegisteredFile {
    /// Device/aux key the file belongs to.
    pub key: String,
    /// Server-assigned file row id.
    pub id: i64,
    /// Authoritative path the file must be written to.
    pub path: String,
}

impl RegisteredFile {
    /// Create a registered file entry.
    #[must_use]
    pub fn new(key: impl Into<String>, id: i64, path: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            id,
            path: path.into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireRegisteredFile {
    Tuple(String, i64, String),
    Object { key: String, id: i64, path: String },
}

impl From<WireRegisteredFile> for RegisteredFile {
    fn from(wire: WireRegisteredFile) -> Self {
        match wire {
            WireRegisteredFile::Tuple(key, id, path)
            | WireRegisteredFile::Object { key, id, path } => Self { key, id, path },
        }
    }
}

impl From<RegisteredFile> for (String, i64, String) {
    fn from(file: RegisteredFile) -> Self {
        (file.key, file.id, file.path)
    }
}

/// Main data file plus its per-device auxiliary files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFileRegistration {
    /// Path of the main (`ACU`) data file.
    pub path: String,
    /// File row id of the main data file.
    pub id: i64,
    /// Auxiliary files registered with it.
    #[serde(default)]
    pub aux_files: Vec<RegisteredFile>,
}

impl DataFileRegistration {
    /// Auxiliary file registered under `key`.
    #[must_use]
    pub fn aux_file(&self, key: &str) -> Option<&RegisteredFile> {
        self.aux_files.iter().find(|f| f.key == key)
    }
}

#[derive(Deserialize)]
pub(crate) struct AuxFilesResponse {
    pub(crate) aux_files: Vec<RegisteredFile>,
}

/// Content to upload: a file on disk or bytes already in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    /// Read from this path at upload time.
    Path(PathBuf),
    /// In-memory content with the file name to report.
    Bytes {
        /// File name reported to the server.
        file_name: String,
        /// File content.
        bytes: Vec<u8>,
    },
}

impl FileSource {
    /// In-memory source.
    #[must_use]
    pub fn bytes(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self::Bytes {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    /// Load the content into a multipart part under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if a path source cannot be read.
    pub fn into_part(self, key: &str) -> Result<FilePart> {
        match self {
            Self::Path(path) => {
                let bytes = std::fs::read(&path)?;
                let file_name = path
                    .file_name()
                    .map_or_else(|| key.to_string(), |n| n.to_string_lossy().into_owned());
                Ok(FilePart::new(key, file_name, bytes))
            }
            Self::Bytes { file_name, bytes } => Ok(FilePart::new(key, file_name, bytes)),
        }
    }
}

impl From<PathBuf> for FileSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&std::path::Path> for FileSource {
    fn from(path: &std::path::Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<&str> for FileSource {
    fn from(path: &str) -> Self {
        Self::Path(PathBuf::from(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_single_key() {
        let map = normalize_extensions("TST").unwrap();
        assert_eq!(map, [("TST", ".csv")].into_iter().collect::<DeviceExtensionMap>());
    }

    #[test]
    fn test_normalize_key_list() {
        let map = normalize_extensions(vec!["ACU", "TST"]).unwrap();
        assert_eq!(
            map,
            [("ACU", ".csv"), ("TST", ".csv")]
                .into_iter()
                .collect::<DeviceExtensionMap>()
        );
    }

    #[test]
    fn test_normalize_pairs() {
        let map = normalize_extensions(vec![("RFC", ".csv"), ("MWS", ".zip")]).unwrap();
        assert_eq!(map.get("RFC"), Some(".csv"));
        assert_eq!(map.get("MWS"), Some(".zip"));
    }

    #[test]
    fn test_normalize_map_unchanged() {
        let input: DeviceExtensionMap = [("RFC", ".csv"), ("MWS", ".zip")].into_iter().collect();
        assert_eq!(normalize_extensions(input.clone()).unwrap(), input);
    }

    #[test]
    fn test_normalize_empty_is_empty() {
        assert!(normalize_extensions(Vec::<String>::new()).unwrap().is_empty());
    }

    #[test]
    fn test_normalize_rejects_bad_input() {
        assert!(matches!(normalize_extensions(""), Err(Error::Validation(_))));
        assert!(matches!(
            normalize_extensions(vec![("RFC", "")]),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            normalize_extensions(vec![("RFC", ".csv"), ("RFC", ".zip")]),
            Err(Error::Validation(_))
        ));
        // Repeating the same pair is harmless.
        assert_eq!(
            normalize_extensions(vec![("RFC", ".csv"), ("RFC", ".csv")])
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_ensure_keeps_existing() {
        let mut map: DeviceExtensionMap = [("ACU", ".zip")].into_iter().collect();
        map.ensure(MAIN_FILE_KEY, DEFAULT_EXTENSION);
        assert_eq!(map.get("ACU"), Some(".zip"));

        let mut map = DeviceExtensionMap::new();
        map.ensure(MAIN_FILE_KEY, DEFAULT_EXTENSION);
        assert_eq!(map.get("ACU"), Some(".csv"));
    }

    #[test]
    fn test_registered_file_wire_shapes() {
        let file: RegisteredFile = serde_json::from_str(r#"["RFC", 7, "/data/rfc.csv"]"#).unwrap();
        assert_eq!(file, RegisteredFile::new("RFC", 7, "/data/rfc.csv"));

        let file: RegisteredFile =
            serde_json::from_str(r#"{"key": "MWS", "id": 8, "path": "/data/mws.zip"}"#).unwrap();
        assert_eq!(file.key, "MWS");

        let json = serde_json::to_value(RegisteredFile::new("RFC", 7, "/p")).unwrap();
        assert_eq!(json, serde_json::json!(["RFC", 7, "/p"]));
    }

    #[test]
    fn test_registration_aux_lookup() {
        let registration: DataFileRegistration = serde_json::from_value(serde_json::json!({
            "path": "/data/main.csv",
            "id": 1,
            "aux_files": [["RFC", 2, "/data/rfc.csv"]]
        }))
        .unwrap();
        assert_eq!(registration.aux_file("RFC").map(|f| f.id), Some(2));
        assert!(registration.aux_file("MWS").is_none());
    }

    #[test]
    fn test_file_source_bytes_part() {
        let part = FileSource::bytes("main.csv", b"a,b\n".to_vec())
            .into_part("ACU")
            .unwrap();
        assert_eq!(part.key, "ACU");
        assert_eq!(part.file_name, "main.csv");
        assert_eq!(part.bytes, b"a,b\n");
    }

    #[test]
    fn test_file_source_missing_path() {
        let result = FileSource::from("/definitely/not/here.csv").into_part("ACU");
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
