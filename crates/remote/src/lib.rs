#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `remote` defines the boundary between the sync core and whatever actually
//! speaks to the server: the [`RemoteClient`] async trait, its wire-level
//! data types, and a deterministic [`FakeRemote`] test double. No HTTP
//! transport lives here — authentication, retry, and rate limiting are a
//! real client's problem, not this crate's.
//!
//! # Design
//!
//! [`RemoteClient`] is written with [`async_trait::async_trait`] so it can be
//! held as a `dyn RemoteClient` behind an `Arc` and shared across the
//! scheduler's five workers. [`FakeRemote`] keeps its whole state as an
//! in-memory `path → `[`Metadata`] map behind a [`parking_lot::Mutex`] and
//! supports scripting both artificial latency and one-shot failures, so
//! callers can exercise retry and conflict paths without a network.
//!
//! # Invariants
//!
//! - [`FakeRemote`] paths are looked up case-insensitively, matching the
//!   remote namespace's real behavior.
//! - A scripted failure is consumed exactly once: the next call for the
//!   scripted path succeeds normally.
//!
//! # Errors
//!
//! [`RemoteError`] enumerates the failure shapes the core's engines branch
//! on directly ([`RemoteError::NotFound`], [`RemoteError::PathConflict`]) as
//! well as the ones it merely logs and retries
//! ([`RemoteError::ConnectionLost`], [`RemoteError::Api`]).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A remote directory entry's metadata, or the tombstone left by a deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metadata {
    /// A file: its path, revision tag, 4 MiB-block content hash, and size.
    File {
        /// The remote path, case-preserved as the server returned it.
        path: String,
        /// The file's current revision tag.
        rev: String,
        /// The file's content hash, as computed by the `hash` crate.
        content_hash: String,
        /// The file's size in bytes.
        size: u64,
    },
    /// A folder: its path and revision tag (folders use the `"folder"`
    /// sentinel revision, matching `revindex::Rev::Folder`).
    Folder {
        /// The remote path, case-preserved as the server returned it.
        path: String,
        /// The folder's revision tag.
        rev: String,
    },
    /// A deletion tombstone returned when the caller asked to include
    /// deleted entries.
    Deleted {
        /// The remote path that was deleted.
        path: String,
    },
}

impl Metadata {
    /// The path this metadata describes, regardless of variant.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::File { path, .. } | Self::Folder { path, .. } | Self::Deleted { path } => path,
        }
    }

    /// The revision tag, or `None` for a deletion.
    #[must_use]
    pub fn rev(&self) -> Option<&str> {
        match self {
            Self::File { rev, .. } | Self::Folder { rev, .. } => Some(rev),
            Self::Deleted { .. } => None,
        }
    }

    /// The content hash, present only for files.
    #[must_use]
    pub fn content_hash(&self) -> Option<&str> {
        match self {
            Self::File { content_hash, .. } => Some(content_hash),
            Self::Folder { .. } | Self::Deleted { .. } => None,
        }
    }
}

/// How an upload should resolve against whatever the remote already holds at
/// the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// The destination must not already exist.
    Add,
    /// Overwrite whatever is at the destination unconditionally.
    Overwrite,
    /// Overwrite only if the destination's current revision matches the
    /// expected one, otherwise fail with [`RemoteError::PathConflict`].
    Update {
        /// The revision the caller last observed at the destination.
        expected_rev: String,
    },
}

/// A page of [`Metadata`] entries plus the cursor to resume from.
#[derive(Debug, Clone)]
pub struct ListFolderResult {
    /// The entries in this page.
    pub entries: Vec<Metadata>,
    /// The cursor identifying this page's position in the remote's change
    /// stream.
    pub cursor: String,
    /// Whether more entries remain beyond this page.
    pub has_more: bool,
}

/// Result of `list_revisions`: the historical versions of a single path.
#[derive(Debug, Clone)]
pub struct RevisionsResult {
    /// Prior revisions, most recent first.
    pub entries: Vec<Metadata>,
}

/// Account-level space usage, in bytes.
#[derive(Debug, Clone, Copy)]
pub struct SpaceUsage {
    /// Bytes currently used.
    pub used: u64,
    /// Total bytes allotted, if the account has a fixed quota.
    pub allocated: Option<u64>,
}

/// The subset of account info the core surfaces to the operator.
#[derive(Debug, Clone)]
pub struct AccountInfo {
    /// The account holder's display name.
    pub display_name: String,
}

/// Failures a [`RemoteClient`] implementation can report.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The requested path does not exist on the remote.
    #[error("remote path not found: {0}")]
    NotFound(String),
    /// The operation's preconditions (an expected revision, an `Add`-mode
    /// write) were violated because the remote changed since the caller
    /// last observed it.
    #[error("path conflict at {path}: {reason}")]
    PathConflict {
        /// The path whose state conflicted with the caller's expectation.
        path: String,
        /// A short description of what the remote actually held.
        reason: String,
    },
    /// The remote rejected the client's credentials.
    #[error("authentication rejected: {0}")]
    Auth(String),
    /// The connection dropped or timed out before a response arrived.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    /// Any other API-level failure not covered above.
    #[error("remote API error: {0}")]
    Api(String),
}

/// The collaborator contract the sync core demands of a remote client.
///
/// Implementations are expected to be cheap to clone or share (the core
/// holds one behind an `Arc` and calls it from all five of its workers
/// concurrently) and to own their own retry/backoff policy — the core calls
/// each method once per logical operation and treats a returned
/// [`RemoteError`] as final for that attempt.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Fetches metadata for a single path. Returns `Ok(None)` if nothing
    /// exists there (and the caller did not ask for deletion tombstones).
    async fn get_metadata(
        &self,
        path: &str,
        include_deleted: bool,
    ) -> Result<Option<Metadata>, RemoteError>;

    /// Lists a folder's contents, optionally recursively and including
    /// deletion tombstones, capped at `limit` entries per page.
    async fn list_folder(
        &self,
        path: &str,
        recursive: bool,
        include_deleted: bool,
        limit: u32,
    ) -> Result<ListFolderResult, RemoteError>;

    /// Fetches the next page of changes since `cursor`.
    async fn list_remote_changes(&self, cursor: &str) -> Result<ListFolderResult, RemoteError>;

    /// Long-polls for new changes past `cursor`, returning `true` if changes
    /// arrived before `timeout` elapsed.
    async fn wait_for_remote_changes(
        &self,
        cursor: &str,
        timeout: Duration,
    ) -> Result<bool, RemoteError>;

    /// Fetches a starting cursor for `path`, for use with
    /// [`RemoteClient::list_remote_changes`].
    async fn get_latest_cursor(&self, path: &str) -> Result<String, RemoteError>;

    /// Downloads `remote` to `local`, returning the downloaded file's
    /// metadata.
    async fn download(&self, remote: &str, local: &Path) -> Result<Metadata, RemoteError>;

    /// Uploads `local` to `remote` under the given [`WriteMode`]. If
    /// `autorename` is set and the destination is occupied in a way the
    /// write mode does not allow, the server picks a new name instead of
    /// failing.
    async fn upload(
        &self,
        local: &Path,
        remote: &str,
        autorename: bool,
        mode: WriteMode,
    ) -> Result<Metadata, RemoteError>;

    /// Moves `src` to `dest`. If `autorename` is set and `dest` is occupied,
    /// the server picks a new name.
    async fn move_path(
        &self,
        src: &str,
        dest: &str,
        autorename: bool,
    ) -> Result<Metadata, RemoteError>;

    /// Creates a folder at `path`. If `autorename` is set and the path is
    /// occupied, the server picks a new name.
    async fn make_dir(&self, path: &str, autorename: bool) -> Result<Metadata, RemoteError>;

    /// Removes `path`. If `parent_rev` is given, the removal only succeeds
    /// if the path's current revision matches.
    async fn remove(&self, path: &str, parent_rev: Option<&str>) -> Result<Metadata, RemoteError>;

    /// Lists up to `limit` historical revisions of `path`.
    async fn list_revisions(&self, path: &str, limit: u32)
        -> Result<RevisionsResult, RemoteError>;

    /// Fetches the account's current space usage.
    async fn get_space_usage(&self) -> Result<SpaceUsage, RemoteError>;

    /// Fetches basic account info for `account_id`.
    async fn get_account_info(&self, account_id: &str) -> Result<AccountInfo, RemoteError>;
}

/// A scripted failure for [`FakeRemote`] to return the next time a given
/// path is touched, consumed after firing once.
struct ScriptedFailure {
    path: String,
    error_factory: Box<dyn Fn() -> RemoteError + Send>,
}

/// A deterministic in-memory [`RemoteClient`] for tests: no network, no
/// clock dependency beyond an internal monotonic cursor counter.
///
/// Not a production client. It carries no retry or backoff logic of its own
/// — callers that want to exercise the core's own retry behavior should
/// script a failure and observe how the caller reacts, not rely on this
/// type to retry internally.
pub struct FakeRemote {
    state: Mutex<FakeState>,
}

struct FakeState {
    entries: BTreeMap<String, Metadata>,
    next_cursor: u64,
    changes: Vec<(u64, Metadata)>,
    scripted_failures: Vec<ScriptedFailure>,
    latency: Duration,
}

impl Default for FakeRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRemote {
    /// Creates an empty fake remote with no artificial latency.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                entries: BTreeMap::new(),
                next_cursor: 1,
                changes: Vec::new(),
                scripted_failures: Vec::new(),
                latency: Duration::ZERO,
            }),
        }
    }

    /// Sets the artificial latency every call sleeps for before acting,
    /// simulating network round-trip time.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Directly seeds an entry, bypassing `upload`/`make_dir`, and records it
    /// as a change so `list_remote_changes` observes it.
    pub fn seed(&self, entry: Metadata) {
        let mut state = self.state.lock();
        let cursor = state.next_cursor;
        state.next_cursor += 1;
        state
            .entries
            .insert(entry.path().to_lowercase(), entry.clone());
        state.changes.push((cursor, entry));
    }

    /// Arranges for the next call touching `path` to fail with whatever
    /// `error_factory` produces, then clears the script for that path.
    pub fn fail_next(&self, path: &str, error_factory: impl Fn() -> RemoteError + Send + 'static) {
        self.state.lock().scripted_failures.push(ScriptedFailure {
            path: path.to_lowercase(),
            error_factory: Box::new(error_factory),
        });
    }

    fn take_scripted_failure(&self, path: &str) -> Option<RemoteError> {
        let mut state = self.state.lock();
        let key = path.to_lowercase();
        let pos = state.scripted_failures.iter().position(|f| f.path == key)?;
        let scripted = state.scripted_failures.remove(pos);
        Some((scripted.error_factory)())
    }

    async fn simulate_latency(&self) {
        let latency = self.state.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl RemoteClient for FakeRemote {
    async fn get_metadata(
        &self,
        path: &str,
        include_deleted: bool,
    ) -> Result<Option<Metadata>, RemoteError> {
        self.simulate_latency().await;
        if let Some(err) = self.take_scripted_failure(path) {
            return Err(err);
        }
        let state = self.state.lock();
        let entry = state.entries.get(&path.to_lowercase()).cloned();
        Ok(match entry {
            Some(Metadata::Deleted { .. }) if !include_deleted => None,
            other => other,
        })
    }

    async fn list_folder(
        &self,
        path: &str,
        recursive: bool,
        include_deleted: bool,
        limit: u32,
    ) -> Result<ListFolderResult, RemoteError> {
        self.simulate_latency().await;
        if let Some(err) = self.take_scripted_failure(path) {
            return Err(err);
        }

        let prefix = format!("{}/", path.to_lowercase().trim_end_matches('/'));
        let state = self.state.lock();
        let mut entries: Vec<Metadata> = state
            .entries
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| {
                recursive || !key[prefix.len()..].contains('/')
            })
            .filter(|(_, meta)| include_deleted || !matches!(meta, Metadata::Deleted { .. }))
            .map(|(_, meta)| meta.clone())
            .collect();
        entries.truncate(limit as usize);

        Ok(ListFolderResult {
            entries,
            cursor: state.next_cursor.to_string(),
            has_more: false,
        })
    }

    async fn list_remote_changes(&self, cursor: &str) -> Result<ListFolderResult, RemoteError> {
        self.simulate_latency().await;
        let since: u64 = cursor.parse().unwrap_or(0);
        let state = self.state.lock();

        let mut by_path: BTreeMap<String, Metadata> = BTreeMap::new();
        for (seq, meta) in &state.changes {
            if *seq > since {
                by_path.insert(meta.path().to_lowercase(), meta.clone());
            }
        }

        Ok(ListFolderResult {
            entries: by_path.into_values().collect(),
            cursor: state.next_cursor.saturating_sub(1).max(since).to_string(),
            has_more: false,
        })
    }

    async fn wait_for_remote_changes(
        &self,
        cursor: &str,
        _timeout: Duration,
    ) -> Result<bool, RemoteError> {
        self.simulate_latency().await;
        let since: u64 = cursor.parse().unwrap_or(0);
        let state = self.state.lock();
        Ok(state.changes.iter().any(|(seq, _)| *seq > since))
    }

    async fn get_latest_cursor(&self, _path: &str) -> Result<String, RemoteError> {
        self.simulate_latency().await;
        Ok(self.state.lock().next_cursor.saturating_sub(1).to_string())
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<Metadata, RemoteError> {
        self.simulate_latency().await;
        if let Some(err) = self.take_scripted_failure(remote) {
            return Err(err);
        }
        let meta = self
            .state
            .lock()
            .entries
            .get(&remote.to_lowercase())
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(remote.to_owned()))?;

        if let Metadata::File { .. } = &meta {
            if let Some(parent) = local.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let _ = std::fs::write(local, []);
        }
        Ok(meta)
    }

    async fn upload(
        &self,
        _local: &Path,
        remote: &str,
        autorename: bool,
        mode: WriteMode,
    ) -> Result<Metadata, RemoteError> {
        self.simulate_latency().await;
        if let Some(err) = self.take_scripted_failure(remote) {
            return Err(err);
        }

        let mut state = self.state.lock();
        let key = remote.to_lowercase();
        let existing = state.entries.get(&key).cloned();

        let conflicts = match (&mode, &existing) {
            (WriteMode::Add, Some(_)) => true,
            (WriteMode::Update { expected_rev }, Some(m)) => m.rev() != Some(expected_rev),
            (WriteMode::Update { .. }, None) => true,
            _ => false,
        };

        let final_path = if conflicts && autorename {
            let mut candidate = format!("{remote} (1)");
            let mut n = 1;
            while state.entries.contains_key(&candidate.to_lowercase()) {
                n += 1;
                candidate = format!("{remote} ({n})");
            }
            candidate
        } else if conflicts {
            return Err(RemoteError::PathConflict {
                path: remote.to_owned(),
                reason: "destination occupied".to_owned(),
            });
        } else {
            remote.to_owned()
        };

        let cursor = state.next_cursor;
        state.next_cursor += 1;
        let meta = Metadata::File {
            path: final_path.clone(),
            rev: format!("rev{cursor}"),
            content_hash: format!("fakehash{cursor}"),
            size: 0,
        };
        state.entries.insert(final_path.to_lowercase(), meta.clone());
        state.changes.push((cursor, meta.clone()));
        Ok(meta)
    }

    async fn move_path(
        &self,
        src: &str,
        dest: &str,
        autorename: bool,
    ) -> Result<Metadata, RemoteError> {
        self.simulate_latency().await;
        if let Some(err) = self.take_scripted_failure(src) {
            return Err(err);
        }

        let mut state = self.state.lock();
        let src_key = src.to_lowercase();
        let meta = state
            .entries
            .get(&src_key)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(src.to_owned()))?;

        let dest_occupied = state.entries.contains_key(&dest.to_lowercase());
        let final_path = if dest_occupied && autorename {
            let mut candidate = format!("{dest} (1)");
            let mut n = 1;
            while state.entries.contains_key(&candidate.to_lowercase()) {
                n += 1;
                candidate = format!("{dest} ({n})");
            }
            candidate
        } else if dest_occupied {
            return Err(RemoteError::PathConflict {
                path: dest.to_owned(),
                reason: "destination occupied".to_owned(),
            });
        } else {
            dest.to_owned()
        };

        state.entries.remove(&src_key);
        let moved = match meta {
            Metadata::File { rev, content_hash, size, .. } => Metadata::File {
                path: final_path.clone(),
                rev,
                content_hash,
                size,
            },
            Metadata::Folder { rev, .. } => Metadata::Folder {
                path: final_path.clone(),
                rev,
            },
            Metadata::Deleted { .. } => Metadata::Deleted { path: final_path.clone() },
        };

        let cursor = state.next_cursor;
        state.next_cursor += 1;
        state.entries.insert(final_path.to_lowercase(), moved.clone());
        state.changes.push((cursor, Metadata::Deleted { path: src.to_owned() }));
        state.changes.push((cursor, moved.clone()));
        Ok(moved)
    }

    async fn make_dir(&self, path: &str, autorename: bool) -> Result<Metadata, RemoteError> {
        self.simulate_latency().await;
        if let Some(err) = self.take_scripted_failure(path) {
            return Err(err);
        }

        let mut state = self.state.lock();
        let occupied = state.entries.contains_key(&path.to_lowercase());
        let final_path = if occupied && autorename {
            let mut candidate = format!("{path} (1)");
            let mut n = 1;
            while state.entries.contains_key(&candidate.to_lowercase()) {
                n += 1;
                candidate = format!("{path} ({n})");
            }
            candidate
        } else if occupied {
            return Err(RemoteError::PathConflict {
                path: path.to_owned(),
                reason: "destination occupied".to_owned(),
            });
        } else {
            path.to_owned()
        };

        let cursor = state.next_cursor;
        state.next_cursor += 1;
        let meta = Metadata::Folder {
            path: final_path.clone(),
            rev: "folder".to_owned(),
        };
        state.entries.insert(final_path.to_lowercase(), meta.clone());
        state.changes.push((cursor, meta.clone()));
        Ok(meta)
    }

    async fn remove(&self, path: &str, parent_rev: Option<&str>) -> Result<Metadata, RemoteError> {
        self.simulate_latency().await;
        if let Some(err) = self.take_scripted_failure(path) {
            return Err(err);
        }

        let mut state = self.state.lock();
        let key = path.to_lowercase();
        let existing = state
            .entries
            .get(&key)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(path.to_owned()))?;

        if let Some(expected) = parent_rev {
            if existing.rev() != Some(expected) {
                return Err(RemoteError::PathConflict {
                    path: path.to_owned(),
                    reason: "revision changed since last observed".to_owned(),
                });
            }
        }

        state.entries.remove(&key);
        let tombstone = Metadata::Deleted { path: path.to_owned() };
        let cursor = state.next_cursor;
        state.next_cursor += 1;
        state.changes.push((cursor, tombstone.clone()));
        Ok(tombstone)
    }

    async fn list_revisions(
        &self,
        path: &str,
        limit: u32,
    ) -> Result<RevisionsResult, RemoteError> {
        self.simulate_latency().await;
        let key = path.to_lowercase();
        let state = self.state.lock();
        let entries = state
            .changes
            .iter()
            .rev()
            .filter(|(_, meta)| meta.path().to_lowercase() == key)
            .take(limit as usize)
            .map(|(_, meta)| meta.clone())
            .collect();
        Ok(RevisionsResult { entries })
    }

    async fn get_space_usage(&self) -> Result<SpaceUsage, RemoteError> {
        self.simulate_latency().await;
        Ok(SpaceUsage {
            used: 0,
            allocated: None,
        })
    }

    async fn get_account_info(&self, _account_id: &str) -> Result<AccountInfo, RemoteError> {
        self.simulate_latency().await;
        Ok(AccountInfo {
            display_name: "Test Account".to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_local() -> PathBuf {
        std::env::temp_dir().join(format!("remote-fake-test-{:?}", std::thread::current().id()))
    }

    #[tokio::test]
    async fn upload_then_get_metadata_round_trips() {
        let remote = FakeRemote::new();
        let meta = remote
            .upload(&tmp_local(), "/a.txt", false, WriteMode::Add)
            .await
            .unwrap();
        assert_eq!(meta.path(), "/a.txt");

        let fetched = remote.get_metadata("/A.TXT", false).await.unwrap();
        assert_eq!(fetched.unwrap().path(), "/a.txt");
    }

    #[tokio::test]
    async fn add_mode_conflicts_on_existing_path() {
        let remote = FakeRemote::new();
        remote
            .upload(&tmp_local(), "/a.txt", false, WriteMode::Add)
            .await
            .unwrap();

        let err = remote
            .upload(&tmp_local(), "/a.txt", false, WriteMode::Add)
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::PathConflict { .. }));
    }

    #[tokio::test]
    async fn autorename_avoids_conflict_instead_of_failing() {
        let remote = FakeRemote::new();
        remote
            .upload(&tmp_local(), "/a.txt", false, WriteMode::Add)
            .await
            .unwrap();

        let meta = remote
            .upload(&tmp_local(), "/a.txt", true, WriteMode::Add)
            .await
            .unwrap();
        assert_ne!(meta.path(), "/a.txt");
    }

    #[tokio::test]
    async fn update_mode_fails_when_expected_rev_is_stale() {
        let remote = FakeRemote::new();
        let first = remote
            .upload(&tmp_local(), "/a.txt", false, WriteMode::Add)
            .await
            .unwrap();
        remote
            .upload(
                &tmp_local(),
                "/a.txt",
                false,
                WriteMode::Update {
                    expected_rev: first.rev().unwrap().to_owned(),
                },
            )
            .await
            .unwrap();

        let err = remote
            .upload(
                &tmp_local(),
                "/a.txt",
                false,
                WriteMode::Update {
                    expected_rev: first.rev().unwrap().to_owned(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::PathConflict { .. }));
    }

    #[tokio::test]
    async fn scripted_failure_fires_once_then_clears() {
        let remote = FakeRemote::new();
        remote.fail_next("/a.txt", || RemoteError::ConnectionLost("dropped".into()));

        let first = remote.get_metadata("/a.txt", false).await;
        assert!(matches!(first, Err(RemoteError::ConnectionLost(_))));

        let second = remote.get_metadata("/a.txt", false).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn list_remote_changes_only_returns_entries_after_cursor() {
        let remote = FakeRemote::new();
        remote
            .upload(&tmp_local(), "/a.txt", false, WriteMode::Add)
            .await
            .unwrap();
        let cursor = remote.get_latest_cursor("/").await.unwrap();

        remote
            .upload(&tmp_local(), "/b.txt", false, WriteMode::Add)
            .await
            .unwrap();

        let changes = remote.list_remote_changes(&cursor).await.unwrap();
        assert_eq!(changes.entries.len(), 1);
        assert_eq!(changes.entries[0].path(), "/b.txt");
    }

    #[tokio::test]
    async fn remove_with_stale_parent_rev_conflicts() {
        let remote = FakeRemote::new();
        remote
            .upload(&tmp_local(), "/a.txt", false, WriteMode::Add)
            .await
            .unwrap();

        let err = remote.remove("/a.txt", Some("wrong-rev")).await.unwrap_err();
        assert!(matches!(err, RemoteError::PathConflict { .. }));
    }

    #[tokio::test]
    async fn remove_missing_path_is_not_found() {
        let remote = FakeRemote::new();
        let err = remote.remove("/missing.txt", None).await.unwrap_err();
        assert!(matches!(err, RemoteError::NotFound(_)));
    }
}
