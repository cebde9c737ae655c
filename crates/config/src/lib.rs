#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `config` holds the two pieces of ambient state every other crate in this
//! workspace treats as given: the user-facing [`SyncConfig`] (sync root,
//! exclusions, concurrency knobs) and the [`StateStore`] trait that persists
//! the small set of dotted keys named in the external interface — cursor,
//! last-sync timestamp, pending downloads, and so on.
//!
//! # Design
//!
//! [`JsonStateStore`] is the default [`StateStore`]: the whole document lives
//! in memory behind a [`parking_lot::Mutex`] and is serialized to a single
//! JSON file with the same write-to-temp-then-rename discipline
//! `revindex::RevisionIndex` uses, so the two files can never be observed
//! torn relative to each other after a crash.
//!
//! # Invariants
//!
//! - [`JsonStateStore::save`] never leaves a torn file on disk.
//! - [`StateStore::get_set`] and [`StateStore::set_set`] round-trip a
//!   [`std::collections::BTreeSet`] so the on-disk representation is stable
//!   under re-serialization regardless of insertion order.
//!
//! # Errors
//!
//! [`errors::SyncError::StateFile`] distinguishes a file that failed to parse
//! as JSON at all (`corrupted = true`) from a plain I/O failure.
//!
//! # Examples
//!
//! ```
//! use config::{JsonStateStore, StateStore};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let store = JsonStateStore::new(dir.path().join("state.json"));
//! store.set_string("account.account_id", "abc123");
//! store.save().unwrap();
//! assert_eq!(store.get_string("account.account_id"), Some("abc123".to_string()));
//! ```

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use errors::SyncError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Dotted key naming the sync root path.
pub const KEY_MAIN_PATH: &str = "main.path";
/// Dotted key naming the set of user-excluded items (selective sync).
pub const KEY_MAIN_EXCLUDED_ITEMS: &str = "main.excluded_items";
/// Dotted key naming the remote long-poll/delta cursor.
pub const KEY_SYNC_CURSOR: &str = "sync.cursor";
/// Dotted key naming the last successful sync timestamp.
pub const KEY_SYNC_LASTSYNC: &str = "sync.lastsync";
/// Dotted key naming the set of paths with an outstanding download error.
pub const KEY_SYNC_DOWNLOAD_ERRORS: &str = "sync.download_errors";
/// Dotted key naming the set of paths queued for download.
pub const KEY_SYNC_PENDING_DOWNLOADS: &str = "sync.pending_downloads";
/// Dotted key naming the recent-changes feed surfaced to the operator.
pub const KEY_SYNC_RECENT_CHANGES: &str = "sync.recent_changes";
/// Dotted key naming the signed-in account's identifier.
pub const KEY_ACCOUNT_ID: &str = "account.account_id";

/// User-facing sync configuration: where to sync, what to leave out, and how
/// aggressively to do it.
///
/// Unlike [`StateStore`], this is not persisted key-by-key; it is typically
/// loaded once at startup (for example from the same JSON document, or from
/// a separate settings file) and handed to the daemon by value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// The local directory treated as the sync root.
    pub sync_root: PathBuf,
    /// Remote paths excluded from sync via selective sync.
    pub excluded_items: BTreeSet<String>,
    /// Override for the mignore file's location; defaults to
    /// `<sync_root>/.mignore` when absent.
    pub mignore_path: Option<PathBuf>,
    /// Number of concurrent download workers (bounded parallel downloads).
    pub download_concurrency: usize,
    /// How often the connection-probe worker pings the remote.
    pub connection_probe_interval: Duration,
    /// The debounce window the local-uploader batches events within.
    pub upload_batch_window: Duration,
}

impl SyncConfig {
    /// Creates a configuration with the documented defaults: 6 download
    /// workers, a 4-second connection probe, and a 2-second upload batch
    /// window.
    #[must_use]
    pub fn new(sync_root: impl Into<PathBuf>) -> Self {
        Self {
            sync_root: sync_root.into(),
            excluded_items: BTreeSet::new(),
            mignore_path: None,
            download_concurrency: 6,
            connection_probe_interval: Duration::from_secs(4),
            upload_batch_window: Duration::from_secs(2),
        }
    }

    /// The effective mignore file path: the override if set, otherwise
    /// `<sync_root>/.mignore`.
    #[must_use]
    pub fn mignore_path(&self) -> PathBuf {
        self.mignore_path
            .clone()
            .unwrap_or_else(|| self.sync_root.join(".mignore"))
    }
}

/// Persisted key/value state, keyed by the dotted names declared as
/// constants in this module.
///
/// Implementations are expected to be cheap to clone or share (typically
/// reference-counted internally) since every long-running worker holds one.
pub trait StateStore: Send + Sync {
    /// Reads a string-valued key.
    fn get_string(&self, key: &str) -> Option<String>;
    /// Writes a string-valued key.
    fn set_string(&self, key: &str, value: &str);
    /// Reads a set-valued key.
    fn get_set(&self, key: &str) -> BTreeSet<String>;
    /// Writes a set-valued key.
    fn set_set(&self, key: &str, value: BTreeSet<String>);
    /// Reads a `u64`-valued key (timestamps, cursors).
    fn get_u64(&self, key: &str) -> Option<u64>;
    /// Writes a `u64`-valued key.
    fn set_u64(&self, key: &str, value: u64);
    /// Removes a key entirely, regardless of its value's shape.
    fn remove(&self, key: &str);
}

/// The default [`StateStore`]: the whole document held in memory and
/// persisted to a single JSON file.
pub struct JsonStateStore {
    path: PathBuf,
    doc: Mutex<Map<String, Value>>,
}

impl JsonStateStore {
    /// Creates an empty store backed by `path` (not yet loaded — call
    /// [`JsonStateStore::load`] to populate it from an existing file).
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            doc: Mutex::new(Map::new()),
        }
    }

    /// Loads the document from disk, replacing any in-memory state.
    ///
    /// A missing file is not an error: it yields an empty document, matching
    /// a brand-new sync root.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::StateFile`] if the file exists but cannot be read
    /// or does not contain a valid JSON object.
    pub fn load(&self) -> Result<(), SyncError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                self.doc.lock().clear();
                return Ok(());
            }
            Err(source) => {
                return Err(SyncError::StateFile {
                    corrupted: false,
                    source: Box::new(source),
                })
            }
        };

        let value: Value =
            serde_json::from_slice(&bytes).map_err(|source| SyncError::StateFile {
                corrupted: true,
                source: Box::new(source),
            })?;
        let map = value.as_object().cloned().ok_or_else(|| SyncError::StateFile {
            corrupted: true,
            source: Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "state document root is not a JSON object",
            )),
        })?;

        *self.doc.lock() = map;
        Ok(())
    }

    /// Atomically writes the current state to disk: written to a temporary
    /// file in the same directory, flushed, and renamed into place.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::StateFile`] if the write or rename fails.
    pub fn save(&self) -> Result<(), SyncError> {
        let encoded = {
            let doc = self.doc.lock();
            serde_json::to_vec_pretty(&Value::Object(doc.clone())).map_err(|source| {
                SyncError::StateFile {
                    corrupted: false,
                    source: Box::new(source),
                }
            })?
        };

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|source| SyncError::StateFile {
            corrupted: false,
            source: Box::new(source),
        })?;
        tmp.write_all(&encoded)
            .map_err(|source| SyncError::StateFile {
                corrupted: false,
                source: Box::new(source),
            })?;
        tmp.flush().map_err(|source| SyncError::StateFile {
            corrupted: false,
            source: Box::new(source),
        })?;
        tmp.persist(&self.path).map_err(|e| SyncError::StateFile {
            corrupted: false,
            source: Box::new(e.error),
        })?;
        Ok(())
    }
}

impl StateStore for JsonStateStore {
    fn get_string(&self, key: &str) -> Option<String> {
        self.doc.lock().get(key)?.as_str().map(str::to_owned)
    }

    fn set_string(&self, key: &str, value: &str) {
        self.doc
            .lock()
            .insert(key.to_owned(), Value::String(value.to_owned()));
    }

    fn get_set(&self, key: &str) -> BTreeSet<String> {
        self.doc
            .lock()
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn set_set(&self, key: &str, value: BTreeSet<String>) {
        let array = value.into_iter().map(Value::String).collect();
        self.doc.lock().insert(key.to_owned(), Value::Array(array));
    }

    fn get_u64(&self, key: &str) -> Option<u64> {
        self.doc.lock().get(key)?.as_u64()
    }

    fn set_u64(&self, key: &str, value: u64) {
        self.doc
            .lock()
            .insert(key.to_owned(), Value::Number(value.into()));
    }

    fn remove(&self, key: &str) {
        self.doc.lock().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sync_config_uses_documented_defaults() {
        let cfg = SyncConfig::new("/sync");
        assert_eq!(cfg.download_concurrency, 6);
        assert_eq!(cfg.connection_probe_interval, Duration::from_secs(4));
        assert_eq!(cfg.mignore_path(), PathBuf::from("/sync/.mignore"));
    }

    #[test]
    fn mignore_override_takes_precedence() {
        let mut cfg = SyncConfig::new("/sync");
        cfg.mignore_path = Some(PathBuf::from("/elsewhere/ignore"));
        assert_eq!(cfg.mignore_path(), PathBuf::from("/elsewhere/ignore"));
    }

    #[test]
    fn string_set_and_u64_round_trip_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().join("state.json"));

        store.set_string(KEY_ACCOUNT_ID, "acct-1");
        assert_eq!(store.get_string(KEY_ACCOUNT_ID), Some("acct-1".to_string()));

        let mut excluded = BTreeSet::new();
        excluded.insert("/private".to_string());
        store.set_set(KEY_MAIN_EXCLUDED_ITEMS, excluded.clone());
        assert_eq!(store.get_set(KEY_MAIN_EXCLUDED_ITEMS), excluded);

        store.set_u64(KEY_SYNC_LASTSYNC, 1_700_000_000);
        assert_eq!(store.get_u64(KEY_SYNC_LASTSYNC), Some(1_700_000_000));
    }

    #[test]
    fn save_then_load_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = JsonStateStore::new(&path);
        store.set_string(KEY_MAIN_PATH, "/sync");
        store.set_u64(KEY_SYNC_CURSOR.into(), 42);
        store.save().unwrap();

        let reloaded = JsonStateStore::new(&path);
        reloaded.load().unwrap();
        assert_eq!(reloaded.get_string(KEY_MAIN_PATH), Some("/sync".to_string()));
        assert_eq!(reloaded.get_u64(KEY_SYNC_CURSOR), Some(42));
    }

    #[test]
    fn loading_a_missing_file_yields_an_empty_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().join("missing.json"));
        store.load().unwrap();
        assert_eq!(store.get_string(KEY_ACCOUNT_ID), None);
    }

    #[test]
    fn loading_non_object_json_is_corrupted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"[1, 2, 3]").unwrap();

        let store = JsonStateStore::new(&path);
        let err = store.load().unwrap_err();
        assert!(matches!(err, SyncError::StateFile { corrupted: true, .. }));
    }

    #[test]
    fn removing_a_key_clears_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().join("state.json"));
        store.set_string(KEY_ACCOUNT_ID, "acct-1");
        store.remove(KEY_ACCOUNT_ID);
        assert_eq!(store.get_string(KEY_ACCOUNT_ID), None);
    }
}
