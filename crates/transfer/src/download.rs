//! The download engine: applies a remote change list (full listing or delta)
//! to disk, classifying each entry against local state before touching it.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use conflict::{classify, Classification};
use dashmap::DashMap;
use errors::SyncError;
use events::SuppressionSet;
use pathutil::{ExclusionRules, PathMapper};
use parking_lot::Mutex;
use remote::{Metadata, RemoteClient};
use revindex::{Rev, RevisionIndex};
use tokio::sync::Semaphore;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

fn remote_rev_of(meta: &Metadata) -> Option<Rev> {
    match meta {
        Metadata::File { rev, .. } => Some(Rev::File(rev.clone())),
        Metadata::Folder { .. } => Some(Rev::Folder),
        Metadata::Deleted { .. } => None,
    }
}

fn depth(path: &str) -> usize {
    path.matches('/').count()
}

/// Throttles a progress callback to at most once per second.
struct ProgressThrottle {
    last_emit: Mutex<Option<Instant>>,
}

impl ProgressThrottle {
    fn new() -> Self {
        Self {
            last_emit: Mutex::new(None),
        }
    }

    fn maybe_emit(&self, done: usize, total: usize, on_progress: &(dyn Fn(usize, usize) + Send + Sync)) {
        let mut last = self.last_emit.lock();
        let now = Instant::now();
        let should_emit = match *last {
            None => true,
            Some(prev) => now.duration_since(prev) >= PROGRESS_INTERVAL,
        };
        if should_emit || done == total {
            on_progress(done, total);
            *last = Some(now);
        }
    }
}

/// Drives a remote change list onto disk under the caller's mutual-exclusion
/// discipline.
pub struct DownloadEngine<R: RemoteClient> {
    remote: Arc<R>,
    index: RevisionIndex,
    mapper: PathMapper,
    concurrency: usize,
    /// Paths currently being written by this engine, consulted by the local
    /// event handler to suppress the echo of its own writes.
    pub queue_downloading: Arc<SuppressionSet>,
    last_sync_for_path: DashMap<String, SystemTime>,
}

impl<R: RemoteClient + 'static> DownloadEngine<R> {
    /// Creates a download engine with `concurrency` parallel file-download
    /// workers (6 by default).
    #[must_use]
    pub fn new(
        remote: Arc<R>,
        index: RevisionIndex,
        mapper: PathMapper,
        concurrency: usize,
        queue_downloading: Arc<SuppressionSet>,
    ) -> Self {
        Self {
            remote,
            index,
            mapper,
            concurrency,
            queue_downloading,
            last_sync_for_path: DashMap::new(),
        }
    }

    /// Applies a batch of remote entries (a full `list_folder` result or a
    /// `list_remote_changes` delta) to disk. Returns the per-path failures
    /// that occurred; an empty vec means the whole batch applied cleanly and
    /// the caller may advance its cursor.
    ///
    /// `exclusions` is updated in place when a deletion arrives for a path
    /// previously on the selective-sync list (the server removed the source
    /// of truth for that exclusion).
    pub async fn apply_batch(
        self: &Arc<Self>,
        entries: Vec<Metadata>,
        exclusions: &Mutex<ExclusionRules>,
        on_progress: impl Fn(usize, usize) + Send + Sync + 'static,
    ) -> Vec<(String, SyncError)> {
        let entries = dedup_by_path(entries);
        let total = entries.len();
        let progress = Arc::new(ProgressThrottle::new());
        let on_progress: Arc<dyn Fn(usize, usize) + Send + Sync> = Arc::new(on_progress);

        let mut deletions = Vec::new();
        let mut folders = Vec::new();
        let mut files = Vec::new();
        let mut failures = Vec::new();

        for entry in entries {
            let verdict = self.classify_entry(&entry);
            match verdict {
                Classification::Identical => {
                    if let Some(rev) = remote_rev_of(&entry) {
                        self.index.set(entry.path(), rev);
                    }
                }
                Classification::LocalNewerOrIdentical => {}
                Classification::Conflict => {
                    self.rename_local_aside(entry.path());
                    self.bucket(entry, &mut deletions, &mut folders, &mut files);
                }
                Classification::RemoteNewer => {
                    self.bucket(entry, &mut deletions, &mut folders, &mut files);
                }
            }
        }

        deletions.sort_by_key(|e: &Metadata| std::cmp::Reverse(depth(e.path())));
        folders.sort_by_key(|e: &Metadata| depth(e.path()));

        let mut done = 0;
        for entry in &deletions {
            if let Err(err) = self.apply_deletion(entry, exclusions) {
                failures.push((entry.path().to_owned(), err));
            }
            done += 1;
            progress.maybe_emit(done, total, on_progress.as_ref());
        }
        for entry in &folders {
            if let Err(err) = self.apply_folder(entry) {
                failures.push((entry.path().to_owned(), err));
            }
            done += 1;
            progress.maybe_emit(done, total, on_progress.as_ref());
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency.max(1)));
        let mut tasks = tokio::task::JoinSet::new();
        for entry in files {
            let engine = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let path = entry.path().to_owned();
                let result = engine.apply_file(&entry).await;
                (path, result)
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Ok((path, result)) = joined {
                if let Err(err) = result {
                    failures.push((path, err));
                }
                done += 1;
                progress.maybe_emit(done, total, on_progress.as_ref());
            }
        }

        failures
    }

    fn bucket(
        &self,
        entry: Metadata,
        deletions: &mut Vec<Metadata>,
        folders: &mut Vec<Metadata>,
        files: &mut Vec<Metadata>,
    ) {
        match &entry {
            Metadata::Deleted { .. } => deletions.push(entry),
            Metadata::Folder { .. } => folders.push(entry),
            Metadata::File { .. } => files.push(entry),
        }
    }

    fn classify_entry(&self, entry: &Metadata) -> Classification {
        let path = entry.path();
        let local_path = self.mapper.to_local(path);
        let local_rev = self.index.get(path);

        if local_rev.is_none() && !local_path.exists() {
            // Nothing local has ever occupied this path: there is no
            // conflict to detect, only a new remote entry to materialize.
            return Classification::RemoteNewer;
        }

        let local_mtime = std::fs::metadata(&local_path).and_then(|m| m.modified()).ok();
        let last_sync = self.last_sync_for_path.get(path).map(|v| *v);
        let remote_hash = entry.content_hash();

        classify(
            remote_rev_of(entry),
            remote_hash,
            local_rev,
            local_mtime,
            last_sync,
            || hash::hash_file(&local_path).ok(),
        )
    }

    fn rename_local_aside(&self, remote_path: &str) {
        let local_path = self.mapper.to_local(remote_path);
        if !local_path.exists() {
            return;
        }
        let Some(parent) = local_path.parent() else { return };
        let Some(name) = local_path.file_name().and_then(|n| n.to_str()) else {
            return;
        };
        let (base, ext) = split_extension(name);
        let mut n = 0;
        loop {
            let candidate_name = if n == 0 {
                format!("{base} (conflicting copy){ext}")
            } else {
                format!("{base} (conflicting copy {n}){ext}")
            };
            let candidate = parent.join(&candidate_name);
            if !candidate.exists() {
                let _ = std::fs::rename(&local_path, &candidate);
                return;
            }
            n += 1;
        }
    }

    fn apply_deletion(
        &self,
        entry: &Metadata,
        exclusions: &Mutex<ExclusionRules>,
    ) -> Result<(), SyncError> {
        let path = entry.path();
        let local_path = self.mapper.to_local(path);
        if local_path.is_dir() {
            let _ = std::fs::remove_dir_all(&local_path);
        } else {
            let _ = std::fs::remove_file(&local_path);
        }
        self.index.remove(path);
        self.last_sync_for_path.remove(path);
        exclusions.lock().forget_selective_sync(path);
        Ok(())
    }

    fn apply_folder(&self, entry: &Metadata) -> Result<(), SyncError> {
        let path = entry.path();
        let local_path = self.mapper.to_local(path);
        if local_path.is_file() {
            std::fs::remove_file(&local_path).map_err(|e| SyncError::transient(path, e))?;
        }
        std::fs::create_dir_all(&local_path).map_err(|e| SyncError::transient(path, e))?;
        self.record_mtime(path, &local_path);
        self.index.set(path, Rev::Folder);
        Ok(())
    }

    async fn apply_file(&self, entry: &Metadata) -> Result<(), SyncError> {
        let path = entry.path();
        let local_path = self.mapper.to_local(path);
        self.queue_downloading.insert(path);

        let result = async {
            if local_path.is_dir() {
                std::fs::remove_dir_all(&local_path).map_err(|e| SyncError::transient(path, e))?;
            }
            self.remote
                .download(path, &local_path)
                .await
                .map_err(|e| SyncError::transient(path, e))?;
            self.record_mtime(path, &local_path);
            if let Some(rev) = remote_rev_of(entry) {
                self.index.set(path, rev);
            }
            Ok(())
        }
        .await;

        self.queue_downloading.remove(path);
        result
    }

    fn record_mtime(&self, remote_path: &str, local_path: &Path) {
        if let Ok(modified) = std::fs::metadata(local_path).and_then(|m| m.modified()) {
            self.last_sync_for_path.insert(remote_path.to_owned(), modified);
        }
    }
}

fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(0) | None => (name, ""),
        Some(idx) => (&name[..idx], &name[idx..]),
    }
}

/// Collapses duplicate entries for the same path, keeping only the last one
/// (the remote's ordering is authoritative).
fn dedup_by_path(entries: Vec<Metadata>) -> Vec<Metadata> {
    let mut by_path: BTreeMap<String, Metadata> = BTreeMap::new();
    for entry in entries {
        by_path.insert(entry.path().to_lowercase(), entry);
    }
    by_path.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use remote::FakeRemote;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn engine(remote: Arc<FakeRemote>, root: &Path) -> Arc<DownloadEngine<FakeRemote>> {
        Arc::new(DownloadEngine::new(
            remote,
            RevisionIndex::new(root.join("index.rix")),
            PathMapper::new(root),
            2,
            Arc::new(SuppressionSet::new()),
        ))
    }

    #[tokio::test]
    async fn new_remote_file_is_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(FakeRemote::new());
        let engine = engine(remote, dir.path());
        let exclusions = Mutex::new(ExclusionRules::new("/"));

        let entry = Metadata::File {
            path: "/a.txt".into(),
            rev: "rev1".into(),
            content_hash: "hash1".into(),
            size: 0,
        };

        let failures = engine.apply_batch(vec![entry], &exclusions, |_, _| {}).await;
        assert!(failures.is_empty());
        assert!(dir.path().join("a.txt").exists());
        assert!(matches!(engine.index.get("/a.txt"), Some(Rev::File(_))));
    }

    #[tokio::test]
    async fn identical_local_file_is_skipped_but_rev_recorded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), []).unwrap();
        let remote = Arc::new(FakeRemote::new());
        let engine = engine(remote, dir.path());
        let exclusions = Mutex::new(ExclusionRules::new("/"));

        let local_hash = hash::hash_file(&dir.path().join("a.txt")).unwrap();
        let entry = Metadata::File {
            path: "/a.txt".into(),
            rev: "rev1".into(),
            content_hash: local_hash,
            size: 0,
        };

        let failures = engine.apply_batch(vec![entry], &exclusions, |_, _| {}).await;
        assert!(failures.is_empty());
        assert!(matches!(engine.index.get("/a.txt"), Some(Rev::File(_))));
    }

    #[tokio::test]
    async fn deletion_clears_selective_sync_entry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.txt"), b"data").unwrap();
        let remote = Arc::new(FakeRemote::new());
        let engine = engine(remote, dir.path());

        let mut rules = ExclusionRules::new("/");
        rules.set_selective_sync(vec!["/private/x.txt".into()]);
        let exclusions = Mutex::new(rules);

        let entry = Metadata::Deleted {
            path: "/private/x.txt".into(),
        };

        let failures = engine.apply_batch(vec![entry], &exclusions, |_, _| {}).await;
        assert!(failures.is_empty());
        assert!(!exclusions.lock().selective_sync().contains(&"/private/x.txt".to_string()));
    }

    #[tokio::test]
    async fn duplicate_entries_for_same_path_collapse_to_last() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(FakeRemote::new());
        let engine = engine(remote, dir.path());
        let exclusions = Mutex::new(ExclusionRules::new("/"));

        let stale = Metadata::File {
            path: "/a.txt".into(),
            rev: "rev1".into(),
            content_hash: "h1".into(),
            size: 0,
        };
        let latest = Metadata::File {
            path: "/a.txt".into(),
            rev: "rev2".into(),
            content_hash: "h2".into(),
            size: 0,
        };

        let failures = engine
            .apply_batch(vec![stale, latest], &exclusions, |_, _| {})
            .await;
        assert!(failures.is_empty());
        assert_eq!(engine.index.get("/a.txt"), Some(Rev::File("rev2".into())));
    }

    #[tokio::test]
    async fn progress_callback_fires_at_least_once_for_a_nonempty_batch() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(FakeRemote::new());
        let engine = engine(remote, dir.path());
        let exclusions = Mutex::new(ExclusionRules::new("/"));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let entry = Metadata::File {
            path: "/a.txt".into(),
            rev: "rev1".into(),
            content_hash: "hash1".into(),
            size: 0,
        };

        engine
            .apply_batch(vec![entry], &exclusions, move |_, _| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }
}
