#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `revindex` is the persistent `remote path → revision tag` map the rest of
//! the sync core uses to decide whether a path has changed since it was last
//! reconciled. A revision is either the sentinel [`Rev::Folder`] or an opaque
//! server-issued string naming a specific file version.
//!
//! # Design
//!
//! - Keys are always lowercased on the way in, because the remote's namespace
//!   is case-insensitive; [`RevisionIndex`] never exposes a case-sensitive
//!   lookup.
//! - [`RevisionIndex::set`] materializes every strict-prefix ancestor of the
//!   path as a folder, so a reader can always walk up from a file entry and
//!   find folder entries the whole way to the root.
//! - [`RevisionIndex::remove`] on a folder entry clears every descendant,
//!   mirroring what a server-side folder delete implies locally.
//! - Reads and writes are serialized through a single reentrant lock so a
//!   caller can recursively call back into the index (for example while
//!   iterating a snapshot and clearing entries) without deadlocking itself.
//!
//! # Invariants
//!
//! - If `p` maps to a file revision, every strict-prefix ancestor of `p` maps
//!   to [`Rev::Folder`].
//! - [`RevisionIndex::save`] never leaves a torn file on disk: it always
//!   writes to a temporary file in the same directory and renames it into
//!   place.
//!
//! # Errors
//!
//! [`IndexError`] distinguishes a missing file (treated as an empty index by
//! [`RevisionIndex::load`]) from structurally invalid contents (the caller
//! must decide whether to rebuild) and from a bare I/O failure.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use parking_lot::ReentrantMutex;
use thiserror::Error;

/// A revision tag: either the folder sentinel or an opaque file revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rev {
    /// The path is a folder. Folders have no content revision of their own.
    Folder,
    /// The path is a file at the given server-issued revision string.
    File(String),
}

impl Rev {
    const FOLDER_SENTINEL: &'static str = "folder";

    fn encode(&self) -> &str {
        match self {
            Self::Folder => Self::FOLDER_SENTINEL,
            Self::File(rev) => rev,
        }
    }

    fn decode(raw: &str) -> Self {
        if raw == Self::FOLDER_SENTINEL {
            Self::Folder
        } else {
            Self::File(raw.to_owned())
        }
    }

    /// Reports whether this tag is the folder sentinel.
    #[must_use]
    pub fn is_folder(&self) -> bool {
        matches!(self, Self::Folder)
    }
}

/// Failures loading or saving the index file.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The file could not be read or written for a reason unrelated to its
    /// contents (permissions, disk full, and so on).
    #[error("revision index I/O error at {path}: {source}")]
    Io {
        /// The file that failed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The file's contents do not form a valid length-prefixed map; the
    /// operator must rebuild the index (typically by resyncing from scratch).
    #[error("revision index at {path} is corrupted: {reason}")]
    Corrupted {
        /// The file that failed to parse.
        path: PathBuf,
        /// A short human-readable description of what was wrong.
        reason: &'static str,
    },
}

/// The magic bytes prefixing a serialized index, so a reader can distinguish
/// "empty index" from "not an index file at all" at a glance.
const MAGIC: &[u8; 4] = b"RIX1";

type Map = BTreeMap<String, Rev>;

/// Persistent `path → rev` map, guarded by a single reentrant lock.
///
/// Cloning a `RevisionIndex` is cheap and shares the same underlying map and
/// lock (it is reference-counted internally); this is the type workers pass
/// around, not a handle they construct per-call.
#[derive(Clone)]
pub struct RevisionIndex {
    inner: std::sync::Arc<ReentrantMutex<RefCell<Map>>>,
    file_path: PathBuf,
}

impl RevisionIndex {
    /// Creates an empty index backed by `file_path` (not yet loaded from
    /// disk — call [`RevisionIndex::load`] to populate it from an existing
    /// file).
    #[must_use]
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            inner: std::sync::Arc::new(ReentrantMutex::new(RefCell::new(BTreeMap::new()))),
            file_path: file_path.into(),
        }
    }

    /// Loads the index from disk, replacing any in-memory state.
    ///
    /// A missing file is not an error: it yields an empty index, matching a
    /// brand-new sync root. A structurally invalid file yields
    /// [`IndexError::Corrupted`].
    pub fn load(&self) -> Result<(), IndexError> {
        let bytes = match std::fs::read(&self.file_path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let guard = self.inner.lock();
                guard.borrow_mut().clear();
                return Ok(());
            }
            Err(source) => {
                return Err(IndexError::Io {
                    path: self.file_path.clone(),
                    source,
                })
            }
        };

        let map = decode(&bytes).ok_or_else(|| IndexError::Corrupted {
            path: self.file_path.clone(),
            reason: "length-prefixed map framing did not parse",
        })?;

        let guard = self.inner.lock();
        *guard.borrow_mut() = map;
        Ok(())
    }

    /// Atomically writes the current state to disk: the data is written to a
    /// temporary file in the same directory, flushed, and renamed into place,
    /// so a reader never observes a partially written file.
    pub fn save(&self) -> Result<(), IndexError> {
        let guard = self.inner.lock();
        let encoded = encode(&guard.borrow());
        drop(guard);

        let dir = self
            .file_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|source| IndexError::Io {
            path: self.file_path.clone(),
            source,
        })?;
        tmp.write_all(&encoded).map_err(|source| IndexError::Io {
            path: self.file_path.clone(),
            source,
        })?;
        tmp.flush().map_err(|source| IndexError::Io {
            path: self.file_path.clone(),
            source,
        })?;
        tmp.persist(&self.file_path)
            .map_err(|e| IndexError::Io {
                path: self.file_path.clone(),
                source: e.error,
            })?;
        Ok(())
    }

    /// Looks up the revision tag recorded for `path`. `path` is lowercased
    /// internally before lookup.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Rev> {
        let key = path.to_lowercase();
        let guard = self.inner.lock();
        guard.borrow().get(&key).cloned()
    }

    /// Records `rev` for `path`. If `rev` is a file revision, every
    /// strict-prefix ancestor of `path` is materialized as
    /// [`Rev::Folder`] (inserted if absent, left alone if already a folder).
    pub fn set(&self, path: &str, rev: Rev) {
        let key = path.to_lowercase();
        let guard = self.inner.lock();
        let mut map = guard.borrow_mut();

        if !matches!(rev, Rev::Folder) {
            for ancestor in ancestors(&key) {
                map.entry(ancestor).or_insert(Rev::Folder);
            }
        }
        map.insert(key, rev);
    }

    /// Removes `path` from the index. If the removed entry was a folder,
    /// every descendant entry is removed too, since the server-side folder
    /// this recorded no longer exists.
    pub fn remove(&self, path: &str) {
        let key = path.to_lowercase();
        let guard = self.inner.lock();
        let mut map = guard.borrow_mut();

        let was_folder = matches!(map.get(&key), Some(Rev::Folder));
        map.remove(&key);

        if was_folder {
            let prefix = format!("{key}/");
            map.retain(|candidate, _| !candidate.starts_with(&prefix));
        }
    }

    /// Drops every entry, leaving the index empty in memory. Does not touch
    /// the on-disk file until [`RevisionIndex::save`] is called.
    pub fn clear(&self) {
        let guard = self.inner.lock();
        guard.borrow_mut().clear();
    }

    /// Returns a point-in-time copy of the whole index.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Rev> {
        let guard = self.inner.lock();
        guard.borrow().clone()
    }
}

/// Strict-prefix ancestors of a `/`-separated lowercase path, root-most
/// first. `"/a/b/c"` yields `["/a", "/a/b"]`; `"/a"` and `""` yield nothing.
fn ancestors(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut acc = String::new();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    for segment in segments.iter().take(segments.len().saturating_sub(1)) {
        acc.push('/');
        acc.push_str(segment);
        out.push(acc.clone());
    }
    out
}

fn encode(map: &Map) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAGIC.len() + 4 + map.len() * 32);
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&(map.len() as u32).to_le_bytes());
    for (key, rev) in map {
        write_string(&mut buf, key);
        write_string(&mut buf, rev.encode());
    }
    buf
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn decode(bytes: &[u8]) -> Option<Map> {
    let mut cursor = bytes;
    if cursor.len() < MAGIC.len() || &cursor[..MAGIC.len()] != MAGIC {
        return None;
    }
    cursor = &cursor[MAGIC.len()..];

    let count = read_u32(&mut cursor)?;
    let mut map = BTreeMap::new();
    for _ in 0..count {
        let key = read_string(&mut cursor)?;
        let value = read_string(&mut cursor)?;
        map.insert(key, Rev::decode(&value));
    }
    if !cursor.is_empty() {
        return None;
    }
    Some(map)
}

fn read_u32(cursor: &mut &[u8]) -> Option<u32> {
    if cursor.len() < 4 {
        return None;
    }
    let (head, tail) = cursor.split_at(4);
    *cursor = tail;
    Some(u32::from_le_bytes(head.try_into().ok()?))
}

fn read_string(cursor: &mut &[u8]) -> Option<String> {
    let len = read_u32(cursor)? as usize;
    if cursor.len() < len {
        return None;
    }
    let (head, tail) = cursor.split_at(len);
    *cursor = tail;
    String::from_utf8(head.to_vec()).ok()
}

/// Reads an index file without constructing a [`RevisionIndex`], used by
/// tooling that wants to inspect a revision index file directly.
pub fn read_file(path: &Path) -> Result<Map, IndexError> {
    let mut bytes = Vec::new();
    File::open(path)
        .and_then(|mut f| f.read_to_end(&mut bytes))
        .map_err(|source| IndexError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    decode(&bytes).ok_or_else(|| IndexError::Corrupted {
        path: path.to_path_buf(),
        reason: "length-prefixed map framing did not parse",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setting_a_file_materializes_ancestors_as_folders() {
        let idx = RevisionIndex::new("/tmp/does-not-matter.rix");
        idx.set("/dir/sub/file.txt", Rev::File("rev1".into()));

        assert_eq!(idx.get("/dir"), Some(Rev::Folder));
        assert_eq!(idx.get("/dir/sub"), Some(Rev::Folder));
        assert_eq!(idx.get("/dir/sub/file.txt"), Some(Rev::File("rev1".into())));
    }

    #[test]
    fn removing_a_folder_clears_descendants() {
        let idx = RevisionIndex::new("/tmp/does-not-matter.rix");
        idx.set("/dir/a.txt", Rev::File("r1".into()));
        idx.set("/dir/sub/b.txt", Rev::File("r2".into()));

        idx.remove("/dir");

        assert_eq!(idx.get("/dir"), None);
        assert_eq!(idx.get("/dir/a.txt"), None);
        assert_eq!(idx.get("/dir/sub"), None);
        assert_eq!(idx.get("/dir/sub/b.txt"), None);
    }

    #[test]
    fn keys_are_case_folded() {
        let idx = RevisionIndex::new("/tmp/does-not-matter.rix");
        idx.set("/Dir/File.txt", Rev::File("r1".into()));
        assert_eq!(idx.get("/dir/file.txt"), Some(Rev::File("r1".into())));
        assert_eq!(idx.get("/DIR/FILE.TXT"), Some(Rev::File("r1".into())));
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("index.rix");

        let idx = RevisionIndex::new(&file);
        idx.set("/a.txt", Rev::File("rev-a".into()));
        idx.set("/dir/b.txt", Rev::File("rev-b".into()));
        idx.save().unwrap();

        let reloaded = RevisionIndex::new(&file);
        reloaded.load().unwrap();
        assert_eq!(reloaded.get("/a.txt"), Some(Rev::File("rev-a".into())));
        assert_eq!(reloaded.get("/dir"), Some(Rev::Folder));
        assert_eq!(reloaded.get("/dir/b.txt"), Some(Rev::File("rev-b".into())));
    }

    #[test]
    fn loading_a_missing_file_yields_an_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("missing.rix");

        let idx = RevisionIndex::new(&file);
        idx.load().unwrap();
        assert!(idx.snapshot().is_empty());
    }

    #[test]
    fn loading_garbage_yields_corrupted_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("garbage.rix");
        std::fs::write(&file, b"not an index").unwrap();

        let idx = RevisionIndex::new(&file);
        let err = idx.load().unwrap_err();
        assert!(matches!(err, IndexError::Corrupted { .. }));
    }

    #[test]
    fn save_never_leaves_a_torn_file_visible() {
        // The temp-file-then-rename path means a reader either sees the
        // previous complete contents or the new complete contents.
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("index.rix");

        let idx = RevisionIndex::new(&file);
        idx.set("/a.txt", Rev::File("r1".into()));
        idx.save().unwrap();
        let first = std::fs::read(&file).unwrap();

        idx.set("/b.txt", Rev::File("r2".into()));
        idx.save().unwrap();
        let second = std::fs::read(&file).unwrap();

        assert_ne!(first, second);
        assert!(decode(&second).is_some());
    }
}
