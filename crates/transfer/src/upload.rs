//! The upload engine: applies a normalized batch of canonical local events to
//! the remote, detecting and materializing server-side renames.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use errors::SyncError;
use events::{CanonicalEvent, EventKind, SuppressionSet};
use pathutil::PathMapper;
use remote::{Metadata, RemoteClient, RemoteError, WriteMode};
use revindex::{Rev, RevisionIndex};

/// How long the import-in-progress guard waits between size samples before
/// deciding a file has stopped growing.
const STABILITY_SAMPLE_WINDOW: Duration = Duration::from_millis(500);

fn rev_tag(rev: &Rev) -> &str {
    match rev {
        Rev::Folder => "folder",
        Rev::File(tag) => tag,
    }
}

/// Drives canonical local events onto the remote under the caller's
/// mutual-exclusion discipline (the caller is expected to hold the shared
/// sync lock for the whole batch).
pub struct UploadEngine<R: RemoteClient> {
    remote: Arc<R>,
    index: RevisionIndex,
    mapper: PathMapper,
    /// Paths this engine is actively uploading; consulted by the local event
    /// handler to suppress the echo of writes this engine itself makes (for
    /// example moving a conflicting upload aside).
    pub queue_uploading: Arc<SuppressionSet>,
    /// Shared with the download engine so a file this engine moves aside
    /// does not get picked up as a fresh local event.
    pub queue_downloading: Arc<SuppressionSet>,
}

impl<R: RemoteClient> UploadEngine<R> {
    /// Creates an upload engine sharing `index` and `mapper` with the rest of
    /// the daemon.
    #[must_use]
    pub fn new(
        remote: Arc<R>,
        index: RevisionIndex,
        mapper: PathMapper,
        queue_uploading: Arc<SuppressionSet>,
        queue_downloading: Arc<SuppressionSet>,
    ) -> Self {
        Self {
            remote,
            index,
            mapper,
            queue_uploading,
            queue_downloading,
        }
    }

    /// Applies a normalized batch of events in order, returning the
    /// per-event failures that occurred (an empty vec means the whole batch
    /// succeeded). The caller is responsible for holding the sync lock for
    /// the duration of this call.
    pub async fn apply_batch(&self, events: Vec<CanonicalEvent>) -> Vec<(String, SyncError)> {
        let mut failures = Vec::new();
        for event in events {
            if let Err(err) = self.apply_one(&event).await {
                let severity = err.severity();
                failures.push((event.src_path.clone(), err));
                if severity == errors::Severity::Fatal {
                    break;
                }
            }
        }
        failures
    }

    async fn apply_one(&self, event: &CanonicalEvent) -> Result<(), SyncError> {
        #[cfg(feature = "tracing")]
        tracing::debug!(kind = ?event.kind, path = %event.src_path, "applying upload event");
        self.queue_uploading.insert(&event.src_path);
        let result = match event.kind {
            EventKind::Deleted => self.apply_delete(&event.src_path).await,
            EventKind::Created if event.is_directory => self.apply_create_dir(&event.src_path).await,
            EventKind::Created => self.apply_create_file(&event.src_path).await,
            EventKind::Modified if event.is_directory => Ok(()),
            EventKind::Modified => self.apply_create_file(&event.src_path).await,
            EventKind::Moved => {
                let dest = event.dest_path.as_deref().unwrap_or(&event.src_path);
                self.apply_move(&event.src_path, dest, event.is_directory).await
            }
        };
        self.queue_uploading.remove(&event.src_path);
        result
    }

    async fn apply_delete(&self, remote_path: &str) -> Result<(), SyncError> {
        let parent_rev = self.index.get(remote_path).map(|rev| rev_tag(&rev).to_owned());
        let outcome = self
            .remote
            .remove(remote_path, parent_rev.as_deref())
            .await;
        self.index.remove(remote_path);
        match outcome {
            Ok(_) | Err(RemoteError::NotFound(_)) => Ok(()),
            Err(RemoteError::PathConflict { path, reason }) => {
                Err(SyncError::PathConflict { path, reason })
            }
            Err(other) => Err(SyncError::transient(remote_path, other)),
        }
    }

    async fn apply_create_dir(&self, remote_path: &str) -> Result<(), SyncError> {
        if let Ok(Some(Metadata::Folder { .. })) = self.remote.get_metadata(remote_path, false).await {
            self.index.set(remote_path, Rev::Folder);
            return Ok(());
        }

        let meta = self
            .remote
            .make_dir(remote_path, true)
            .await
            .map_err(|e| SyncError::transient(remote_path, e))?;

        self.handle_possible_rename(remote_path, meta).await
    }

    async fn apply_create_file(&self, remote_path: &str) -> Result<(), SyncError> {
        let local_path = self.mapper.to_local(remote_path);
        if !wait_for_stable_size(&local_path).await {
            return Ok(());
        }

        let local_hash = match hash::hash_file(&local_path) {
            Ok(h) => h,
            Err(_) => return Ok(()),
        };

        if let Ok(Some(existing)) = self.remote.get_metadata(remote_path, false).await {
            if existing.content_hash() == Some(local_hash.as_str()) {
                if let Some(rev) = existing.rev() {
                    self.index.set(remote_path, Rev::File(rev.to_owned()));
                }
                return Ok(());
            }
        }

        let local_rev = self.index.get(remote_path);
        let mode = match &local_rev {
            None => WriteMode::Add,
            Some(Rev::Folder) => WriteMode::Overwrite,
            Some(Rev::File(rev)) => WriteMode::Update {
                expected_rev: rev.clone(),
            },
        };

        let meta = match self.remote.upload(&local_path, remote_path, true, mode).await {
            Ok(meta) => meta,
            Err(RemoteError::NotFound(_)) => return Ok(()),
            Err(other) => return Err(SyncError::transient(remote_path, other)),
        };

        self.handle_possible_rename(remote_path, meta).await
    }

    async fn apply_move(&self, src: &str, dest: &str, is_directory: bool) -> Result<(), SyncError> {
        self.index.remove(src);

        let src_meta = self.remote.get_metadata(src, false).await.ok().flatten();
        if src_meta.is_none() {
            return if is_directory {
                self.apply_create_dir(dest).await
            } else {
                self.apply_create_file(dest).await
            };
        }

        let meta = self
            .remote
            .move_path(src, dest, true)
            .await
            .map_err(|e| SyncError::transient(dest, e))?;

        self.handle_possible_rename(dest, meta).await
    }

    /// If the server renamed the requested destination to avoid a conflict,
    /// moves the local item aside (suppressing its own echo), clears the
    /// stale revision, records revisions for the whole uploaded tree from
    /// authoritative server metadata, and re-fetches the original target so
    /// the other half of the conflict materializes locally too.
    async fn handle_possible_rename(
        &self,
        requested_remote_path: &str,
        meta: Metadata,
    ) -> Result<(), SyncError> {
        let actual_path = meta.path().to_owned();
        if actual_path.to_lowercase() == requested_remote_path.to_lowercase() {
            self.record_rev(&actual_path, &meta);
            return Ok(());
        }

        let requested_local = self.mapper.to_local(requested_remote_path);
        let renamed_local = self.mapper.to_local(&actual_path);
        self.queue_downloading.insert(&actual_path);
        let _ = std::fs::rename(&requested_local, &renamed_local);

        self.index.remove(requested_remote_path);
        self.record_rev_tree(&actual_path, &meta).await;

        if let Ok(Some(original)) = self.remote.get_metadata(requested_remote_path, false).await {
            let original_local = self.mapper.to_local(requested_remote_path);
            if let Metadata::File { .. } = &original {
                let _ = self.remote.download(requested_remote_path, &original_local).await;
            }
            self.record_rev(requested_remote_path, &original);
        }

        self.queue_downloading.remove(&actual_path);
        Ok(())
    }

    fn record_rev(&self, remote_path: &str, meta: &Metadata) {
        match meta {
            Metadata::File { rev, .. } => self.index.set(remote_path, Rev::File(rev.clone())),
            Metadata::Folder { .. } => self.index.set(remote_path, Rev::Folder),
            Metadata::Deleted { .. } => self.index.remove(remote_path),
        }
    }

    async fn record_rev_tree(&self, remote_path: &str, meta: &Metadata) {
        self.record_rev(remote_path, meta);
        if matches!(meta, Metadata::Folder { .. }) {
            if let Ok(listing) = self.remote.list_folder(remote_path, true, false, u32::MAX).await {
                for entry in listing.entries {
                    self.record_rev(entry.path(), &entry);
                }
            }
        }
    }
}

/// Samples `path`'s size twice, `STABILITY_SAMPLE_WINDOW` apart, and reports
/// whether it was unchanged (and the file still exists). Used as an
/// import-in-progress guard before uploading a freshly created file.
async fn wait_for_stable_size(path: &Path) -> bool {
    let Ok(first) = std::fs::metadata(path) else {
        return false;
    };
    tokio::time::sleep(STABILITY_SAMPLE_WINDOW).await;
    let Ok(second) = std::fs::metadata(path) else {
        return false;
    };
    first.len() == second.len()
}

/// Current wall-clock time as Unix seconds, for `sync.lastsync` bookkeeping.
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use remote::FakeRemote;

    fn engine(remote: Arc<FakeRemote>, root: &Path) -> UploadEngine<FakeRemote> {
        UploadEngine::new(
            remote,
            RevisionIndex::new(root.join("index.rix")),
            PathMapper::new(root),
            Arc::new(SuppressionSet::new()),
            Arc::new(SuppressionSet::new()),
        )
    }

    #[tokio::test]
    async fn deleting_a_never_uploaded_path_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(FakeRemote::new());
        let engine = engine(remote, dir.path());

        let failures = engine
            .apply_batch(vec![CanonicalEvent::new(EventKind::Deleted, false, "/a.txt")])
            .await;
        assert!(failures.is_empty());
    }

    #[tokio::test]
    async fn creating_a_directory_records_folder_rev() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(FakeRemote::new());
        let engine = engine(remote, dir.path());

        let failures = engine
            .apply_batch(vec![CanonicalEvent::new(EventKind::Created, true, "/Sub")])
            .await;
        assert!(failures.is_empty());
        assert_eq!(engine.index.get("/sub"), Some(Rev::Folder));
    }

    #[tokio::test]
    async fn uploading_a_new_file_records_its_revision() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let remote = Arc::new(FakeRemote::new());
        let engine = engine(remote, dir.path());

        let failures = engine
            .apply_batch(vec![CanonicalEvent::new(EventKind::Created, false, "/a.txt")])
            .await;
        assert!(failures.is_empty());
        assert!(matches!(engine.index.get("/a.txt"), Some(Rev::File(_))));
    }

    #[tokio::test]
    async fn moving_a_path_with_no_remote_metadata_is_treated_as_create() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), b"hi").unwrap();
        let remote = Arc::new(FakeRemote::new());
        let engine = engine(remote, dir.path());

        let failures = engine
            .apply_batch(vec![CanonicalEvent::moved(false, "/a.txt", "/b.txt")])
            .await;
        assert!(failures.is_empty());
        assert!(matches!(engine.index.get("/b.txt"), Some(Rev::File(_))));
    }

    #[tokio::test]
    async fn modified_directory_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(FakeRemote::new());
        let engine = engine(remote, dir.path());

        let failures = engine
            .apply_batch(vec![CanonicalEvent::new(EventKind::Modified, true, "/dir")])
            .await;
        assert!(failures.is_empty());
        assert_eq!(engine.index.get("/dir"), None);
    }
}
