#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! Shared test fixtures for this workspace's crates: a temp-directory sync
//! root with a handful of files already written, paired with the
//! [`config::SyncConfig`]/[`revindex::RevisionIndex`]/[`remote::FakeRemote`]
//! trio most integration tests need to assemble by hand otherwise.
//!
//! # Design
//!
//! [`SyncRootFixture`] owns the [`tempfile::TempDir`] so it is cleaned up on
//! drop, the same lifetime discipline every other crate's `tempfile`-based
//! unit tests already follow.

use std::fs;
use std::path::{Path, PathBuf};

use config::SyncConfig;
use pathutil::PathMapper;
use remote::FakeRemote;
use revindex::RevisionIndex;
use tempfile::TempDir;

/// A disposable sync root plus the trio of objects most tests need alongside
/// it: a [`SyncConfig`] rooted at it, a [`RevisionIndex`] backed by a sibling
/// file, and a [`PathMapper`].
pub struct SyncRootFixture {
    dir: TempDir,
}

impl SyncRootFixture {
    /// Creates an empty sync root.
    ///
    /// # Panics
    ///
    /// Panics if a temporary directory could not be created; test fixtures
    /// fail loudly rather than returning a `Result` the test would just
    /// `.unwrap()` anyway.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create temp sync root"),
        }
    }

    /// The sync root's path on disk.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Writes `contents` to `relative_path` under the root, creating parent
    /// directories as needed, and returns the absolute path written.
    ///
    /// # Panics
    ///
    /// Panics if the write fails.
    pub fn write_file(&self, relative_path: &str, contents: &[u8]) -> PathBuf {
        let path = self.dir.path().join(relative_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create parent directories");
        }
        fs::write(&path, contents).expect("failed to write fixture file");
        path
    }

    /// Creates `relative_path` as a directory under the root.
    ///
    /// # Panics
    ///
    /// Panics if the directory could not be created.
    pub fn make_dir(&self, relative_path: &str) -> PathBuf {
        let path = self.dir.path().join(relative_path);
        fs::create_dir_all(&path).expect("failed to create fixture directory");
        path
    }

    /// A [`SyncConfig`] rooted at this fixture with the documented defaults.
    #[must_use]
    pub fn config(&self) -> SyncConfig {
        SyncConfig::new(self.dir.path())
    }

    /// A [`PathMapper`] rooted at this fixture.
    #[must_use]
    pub fn mapper(&self) -> PathMapper {
        PathMapper::new(self.dir.path())
    }

    /// A fresh [`RevisionIndex`] backed by `<root>/.dropsync.rix`, matching
    /// where the real daemon keeps it.
    #[must_use]
    pub fn revision_index(&self) -> RevisionIndex {
        RevisionIndex::new(self.dir.path().join(".dropsync.rix"))
    }
}

impl Default for SyncRootFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Seeds `remote` with a file entry at `path`, returning the revision tag
/// assigned so the caller can assert against it without recomputing it.
pub fn seed_remote_file(remote: &FakeRemote, path: &str, rev: &str, content_hash: &str, size: u64) {
    remote.seed(remote::Metadata::File {
        path: path.to_string(),
        rev: rev.to_string(),
        content_hash: content_hash.to_string(),
        size,
    });
}

/// Seeds `remote` with a folder entry at `path`.
pub fn seed_remote_folder(remote: &FakeRemote, path: &str, rev: &str) {
    remote.seed(remote::Metadata::Folder {
        path: path.to_string(),
        rev: rev.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_file_creates_parent_directories() {
        let fixture = SyncRootFixture::new();
        let path = fixture.write_file("nested/dir/a.txt", b"hello");
        assert!(path.exists());
        assert_eq!(fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn config_is_rooted_at_the_fixture() {
        let fixture = SyncRootFixture::new();
        let config = fixture.config();
        assert_eq!(config.sync_root, fixture.root());
    }

    #[tokio::test]
    async fn seed_remote_file_is_visible_via_get_metadata() {
        use remote::RemoteClient;

        let remote = FakeRemote::new();
        seed_remote_file(&remote, "/a.txt", "rev1", "hash1", 5);
        let meta = remote.get_metadata("/a.txt", false).await.unwrap();
        assert!(meta.is_some());
    }
}
