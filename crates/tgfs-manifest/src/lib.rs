//! # tgfs-manifest
//!
//! Manifest data structure for the tgfs virtual filesystem.
//!
//! The manifest is a flat list of [`ManifestEntry`] records, one per stored
//! path, serialized as JSON into the chat's pinned control message. It is
//! loaded for one logical operation, mutated in memory and saved back; it is
//! never cached across operations.
//!
//! ## Pieces
//!
//! - [`Manifest`]: entry list, JSON codec (tolerant of legacy layouts), stats
//! - [`index`]: path normalization and duplicate-aware lookup
//! - [`ManifestStore`]: load/save against an [`ObjectTransport`]
//!
//! [`ObjectTransport`]: tgfs_transport::ObjectTransport

pub mod index;
pub mod store;

pub use store::ManifestStore;

use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use tgfs_config::{log_manifest_debug, log_manifest_warn};
use tgfs_transport::{ObjectHandle, TransportError};

/// File name new control messages are uploaded under
pub const CONTROL_FILE_NAME: &str = "manifest.json";

/// Errors that can occur during manifest operations
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ManifestError {
    pub fn is_unbound(&self) -> bool {
        matches!(self, ManifestError::Transport(TransportError::Unbound))
    }
}

pub type Result<T> = std::result::Result<T, ManifestError>;

/// One stored path.
///
/// Field names on the wire follow the manifest JSON format:
/// `path`, `message_id`, `size`, `is_dir`, `ctime`, `mtime`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Absolute, slash-rooted path
    pub path: String,
    /// Handle of the uploaded content; `0` when nothing is uploaded
    #[serde(rename = "message_id", default)]
    pub handle: ObjectHandle,
    /// Content length in bytes, meaningful only when `handle` is set
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub is_dir: bool,
    /// Creation time (seconds since Unix epoch)
    #[serde(rename = "ctime", default)]
    pub created_at: i64,
    /// Modification time (seconds since Unix epoch)
    #[serde(rename = "mtime", default)]
    pub modified_at: i64,
}

impl ManifestEntry {
    /// A new, empty regular file with nothing uploaded.
    pub fn new_file(path: &str, now: i64) -> Self {
        Self {
            path: index::normalize(path),
            handle: ObjectHandle::NONE,
            size: 0,
            is_dir: false,
            created_at: now,
            modified_at: now,
        }
    }

    /// A new directory. Directories never carry content.
    pub fn new_directory(path: &str, now: i64) -> Self {
        Self {
            is_dir: true,
            ..Self::new_file(path, now)
        }
    }

    /// Size of the content actually uploaded.
    pub fn content_size(&self) -> u64 {
        if self.handle.is_some() {
            self.size
        } else {
            0
        }
    }
}

/// Current time in whole seconds since the Unix epoch
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// The directory tree: every stored path in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub files: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn push(&mut self, entry: ManifestEntry) {
        self.files.push(entry);
    }

    /// Remove every entry stored under exactly `path`, returning them.
    pub fn remove_path(&mut self, path: &str) -> Vec<ManifestEntry> {
        let path = index::normalize(path);
        let (removed, kept) = std::mem::take(&mut self.files)
            .into_iter()
            .partition(|e| e.path == path);
        self.files = kept;
        removed
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.files.iter()
    }

    /// Serialize in the `{"files": [...]}` layout.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a control message body.
    ///
    /// Accepts the current `{"files": [...]}` layout and the older layouts: a
    /// bare array of entries, an object keyed by path, or a single entry
    /// object. Text that is not JSON at all yields an empty manifest, and
    /// entries that do not decode are dropped.
    pub fn parse(text: &str) -> Manifest {
        if text.trim().is_empty() {
            return Manifest::new();
        }
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                log_manifest_warn!(
                    "Control message is not JSON, starting from an empty manifest",
                    error = e.to_string()
                );
                return Manifest::new();
            }
        };

        let raw = match value {
            Value::Object(mut map) if map.contains_key("files") => match map.remove("files") {
                Some(Value::Array(items)) => items,
                Some(Value::Object(keyed)) => keyed_entries(keyed),
                Some(other) => {
                    log_manifest_warn!(
                        "Manifest \"files\" is neither a list nor a map",
                        kind = json_kind(&other)
                    );
                    Vec::new()
                }
                None => Vec::new(),
            },
            Value::Array(items) => items,
            Value::Object(map) if map.contains_key("path") => vec![Value::Object(map)],
            Value::Object(map) => keyed_entries(map),
            other => {
                log_manifest_warn!(
                    "Unrecognized manifest layout",
                    kind = json_kind(&other)
                );
                Vec::new()
            }
        };

        let mut manifest = Manifest::new();
        for item in raw {
            if let Some(entry) = decode_entry(item) {
                manifest.push(entry);
            }
        }
        log_manifest_debug!("Manifest parsed", entries = manifest.len());
        manifest
    }

    /// Get manifest statistics
    pub fn stats(&self) -> ManifestStats {
        let mut stats = ManifestStats::default();
        for entry in &self.files {
            if entry.is_dir {
                stats.dir_count += 1;
            } else {
                stats.file_count += 1;
                stats.total_size += entry.content_size();
            }
        }
        stats
    }
}

/// `{"/a.txt": {...}, "/b": {...}}` → entries with the key as their path.
fn keyed_entries(map: Map<String, Value>) -> Vec<Value> {
    map.into_iter()
        .map(|(path, value)| match value {
            Value::Object(mut fields) => {
                fields.entry("path").or_insert(Value::String(path));
                Value::Object(fields)
            }
            other => other,
        })
        .collect()
}

fn decode_entry(value: Value) -> Option<ManifestEntry> {
    match serde_json::from_value::<ManifestEntry>(value) {
        Ok(mut entry) => {
            entry.path = index::normalize(&entry.path);
            if entry.path == "/" {
                log_manifest_debug!("Dropping stored root entry");
                return None;
            }
            if entry.is_dir {
                entry.handle = ObjectHandle::NONE;
                entry.size = 0;
            }
            Some(entry)
        }
        Err(e) => {
            log_manifest_warn!("Skipping malformed manifest entry", error = e.to_string());
            None
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Statistics about a manifest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManifestStats {
    pub file_count: u64,
    pub dir_count: u64,
    pub total_size: u64,
}
