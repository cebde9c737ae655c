//! The scheduler: five long-running workers cooperating under a single
//! re-entrant lock, plus the start/pause/resume/stop lifecycle.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use config::{SyncConfig, KEY_SYNC_CURSOR, KEY_SYNC_LASTSYNC};
use dashmap::DashMap;
use errors::{Severity, SyncError};
use events::{CanonicalEvent, LocalEventHandler, RawEvent, SuppressionSet};
use pathutil::{ExclusionRules, PathMapper};
use parking_lot::Mutex as SyncMutex;
use remote::{RemoteClient, RemoteError};
use revindex::RevisionIndex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use transfer::{unix_now, DownloadEngine, UploadEngine};

use crate::flags::ControlFlags;
use crate::lock::SyncLock;
use crate::lockfile::RootLock;
use crate::watcher::RootWatcher;

fn remote_error_severity(err: &RemoteError) -> Severity {
    match err {
        RemoteError::NotFound(_) => Severity::Ignorable,
        RemoteError::PathConflict { .. } | RemoteError::ConnectionLost(_) | RemoteError::Api(_) => {
            Severity::Transient
        }
        RemoteError::Auth(_) => Severity::Unauthorized,
    }
}

/// Five cooperating long-running workers driving sync for one configured
/// root, serialized through a single re-entrant [`SyncLock`].
pub struct Monitor<R: RemoteClient> {
    remote: Arc<R>,
    config: SyncConfig,
    state: Arc<dyn config::StateStore>,
    index: RevisionIndex,
    mapper: PathMapper,
    exclusions: Arc<SyncMutex<ExclusionRules>>,
    upload_engine: Arc<UploadEngine<R>>,
    download_engine: Arc<DownloadEngine<R>>,
    sync_lock: Arc<SyncLock>,
    flags: ControlFlags,
    /// Per-path failures that are transient and awaiting retry; cleared when
    /// the same path next syncs successfully.
    pub sync_errors: Arc<DashMap<String, String>>,
    event_tx: mpsc::UnboundedSender<CanonicalEvent>,
    event_rx: SyncMutex<Option<mpsc::UnboundedReceiver<CanonicalEvent>>>,
    added_item_tx: mpsc::UnboundedSender<String>,
    added_item_rx: SyncMutex<Option<mpsc::UnboundedReceiver<String>>>,
    local_event_handler: LocalEventHandler,
    raw_tx: mpsc::UnboundedSender<RawEvent>,
    raw_rx: SyncMutex<Option<mpsc::UnboundedReceiver<RawEvent>>>,
    handles: SyncMutex<Vec<JoinHandle<()>>>,
    root_lock: SyncMutex<Option<RootLock>>,
    root_watcher: SyncMutex<Option<RootWatcher>>,
}

impl<R: RemoteClient + 'static> Monitor<R> {
    /// Builds a monitor for `config`'s sync root. Nothing runs until
    /// [`Monitor::start`] is called.
    #[must_use]
    pub fn new(
        remote: Arc<R>,
        config: SyncConfig,
        state: Arc<dyn config::StateStore>,
        index: RevisionIndex,
    ) -> Self {
        let mapper = PathMapper::new(config.sync_root.clone());
        let mut rules = ExclusionRules::new("/");
        rules.set_selective_sync(config.excluded_items.iter().cloned().collect());
        rules.set_mignore_path(config.mignore_path());
        let exclusions = Arc::new(SyncMutex::new(rules));

        let queue_uploading = Arc::new(SuppressionSet::new());
        let queue_downloading = Arc::new(SuppressionSet::new());

        let upload_engine = Arc::new(UploadEngine::new(
            Arc::clone(&remote),
            index.clone(),
            mapper.clone(),
            Arc::clone(&queue_uploading),
            Arc::clone(&queue_downloading),
        ));
        let download_engine = Arc::new(DownloadEngine::new(
            Arc::clone(&remote),
            index.clone(),
            mapper.clone(),
            config.download_concurrency,
            Arc::clone(&queue_downloading),
        ));

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (added_item_tx, added_item_rx) = mpsc::unbounded_channel();
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let local_event_handler = LocalEventHandler::new(mapper.clone(), cfg!(target_os = "linux"));

        Self {
            remote,
            config,
            state,
            index,
            mapper,
            exclusions,
            upload_engine,
            download_engine,
            sync_lock: Arc::new(SyncLock::new()),
            flags: ControlFlags::new(),
            sync_errors: Arc::new(DashMap::new()),
            event_tx,
            event_rx: SyncMutex::new(Some(event_rx)),
            added_item_tx,
            added_item_rx: SyncMutex::new(Some(added_item_rx)),
            local_event_handler,
            raw_tx,
            raw_rx: SyncMutex::new(Some(raw_rx)),
            handles: SyncMutex::new(Vec::new()),
            root_lock: SyncMutex::new(None),
            root_watcher: SyncMutex::new(None),
        }
    }

    /// The control flags a UI layer can observe.
    #[must_use]
    pub fn flags(&self) -> &ControlFlags {
        &self.flags
    }

    /// Submits a canonical local event for the next upload batch.
    pub fn enqueue_event(&self, event: CanonicalEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Submits a path newly included by selective sync for download.
    pub fn enqueue_added_item(&self, path: String) {
        let _ = self.added_item_tx.send(path);
    }

    /// Starts all five workers.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::RootGone`] if the configured sync root does not
    /// exist: this is fatal, the daemon must not silently recreate it.
    pub fn start(self: &Arc<Self>) -> Result<(), SyncError> {
        if !self.config.sync_root.is_dir() {
            return Err(SyncError::RootGone {
                path: self.config.sync_root.clone(),
            });
        }

        let lock_path: PathBuf = self.config.sync_root.join(".dropsync.lock");
        let lock = RootLock::acquire(&lock_path).map_err(|source| SyncError::Watcher {
            root: self.config.sync_root.clone(),
            source,
        })?;
        *self.root_lock.lock() = Some(lock);

        let watcher = RootWatcher::start(&self.config.sync_root, self.raw_tx.clone()).map_err(|err| {
            SyncError::Watcher {
                root: self.config.sync_root.clone(),
                source: std::io::Error::other(err.to_string()),
            }
        })?;
        *self.root_watcher.lock() = Some(watcher);

        self.flags.set_running(true);
        self.flags.set_startup(true);

        let mut handles = Vec::new();
        handles.push(tokio::spawn(connection_probe_worker(Arc::clone(self))));
        handles.push(tokio::spawn(startup_worker(Arc::clone(self))));
        handles.push(tokio::spawn(remote_listener_worker(Arc::clone(self))));

        let added_item_rx = self.added_item_rx.lock().take();
        if let Some(rx) = added_item_rx {
            handles.push(tokio::spawn(added_item_downloader_worker(Arc::clone(self), rx)));
        }
        let event_rx = self.event_rx.lock().take();
        if let Some(rx) = event_rx {
            handles.push(tokio::spawn(local_uploader_worker(Arc::clone(self), rx)));
        }
        let raw_rx = self.raw_rx.lock().take();
        if let Some(rx) = raw_rx {
            handles.push(tokio::spawn(local_event_bridge_worker(Arc::clone(self), rx)));
        }

        *self.handles.lock() = handles;
        Ok(())
    }

    /// Suspends syncing without tearing workers down; in-flight batches
    /// still complete.
    pub fn pause(&self) {
        self.flags.set_paused_by_user(true);
    }

    /// Resumes syncing after [`Monitor::pause`].
    pub fn resume(&self) {
        self.flags.set_paused_by_user(false);
    }

    /// Clears `running`, waits for any in-progress batch to drain, then
    /// joins every worker. There is no mid-batch cancellation.
    pub async fn stop(self: &Arc<Self>) {
        self.flags.set_running(false);

        // Acquiring and releasing the lock guarantees the current batch (if
        // any) has completed before we tear workers down.
        drop(self.sync_lock.lock().await);

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            handle.abort();
        }
        *self.root_watcher.lock() = None;
        *self.root_lock.lock() = None;
    }
}

async fn local_event_bridge_worker<R: RemoteClient + 'static>(
    monitor: Arc<Monitor<R>>,
    mut rx: mpsc::UnboundedReceiver<RawEvent>,
) {
    while let Some(raw) = rx.recv().await {
        if !monitor.flags.running() {
            return;
        }
        let canonical = monitor.local_event_handler.handle(
            raw,
            monitor.flags.is_active(),
            &monitor.download_engine.queue_downloading,
        );
        if let Some(event) = canonical {
            monitor.enqueue_event(event);
        }
    }
}

async fn connection_probe_worker<R: RemoteClient + 'static>(monitor: Arc<Monitor<R>>) {
    while monitor.flags.running() {
        match monitor.remote.get_space_usage().await {
            Ok(_) => monitor.flags.set_connected(true),
            Err(err) => {
                monitor.flags.set_connected(false);
                let severity = remote_error_severity(&err);
                #[cfg(feature = "tracing")]
                tracing::warn!(%err, ?severity, "connection probe failed");
                if severity == Severity::Unauthorized {
                    monitor.flags.set_running(false);
                }
            }
        }
        tokio::time::sleep(monitor.config.connection_probe_interval).await;
    }
}

async fn startup_worker<R: RemoteClient + 'static>(monitor: Arc<Monitor<R>>) {
    loop {
        if !monitor.flags.running() {
            return;
        }
        if !monitor.flags.startup() {
            tokio::time::sleep(Duration::from_millis(200)).await;
            continue;
        }

        let guard = monitor.sync_lock.lock().await;
        let listing = monitor.remote.list_folder("/", true, false, u32::MAX).await;
        if let Ok(listing) = listing {
            let entry_count = listing.entries.len();
            let exclusions = Arc::clone(&monitor.exclusions);
            let failures = monitor
                .download_engine
                .apply_batch(listing.entries, &exclusions, |_, _| {})
                .await;
            #[cfg(feature = "tracing")]
            tracing::info!(
                entry_count,
                failure_count = failures.len(),
                "startup reconciliation applied"
            );
            for (path, err) in failures {
                record_failure(&monitor, path, err);
            }
            monitor.state.set_string(KEY_SYNC_CURSOR, &listing.cursor);
        }
        drop(guard);

        monitor.flags.set_startup(false);
        monitor.flags.set_syncing(true);
    }
}

async fn remote_listener_worker<R: RemoteClient + 'static>(monitor: Arc<Monitor<R>>) {
    while monitor.flags.running() {
        if !monitor.flags.connected() || monitor.flags.startup() {
            tokio::time::sleep(Duration::from_millis(200)).await;
            continue;
        }

        let cursor = monitor.state.get_string(KEY_SYNC_CURSOR).unwrap_or_default();
        match monitor
            .remote
            .wait_for_remote_changes(&cursor, Duration::from_secs(30))
            .await
        {
            Ok(true) => {
                let guard = monitor.sync_lock.lock().await;
                if let Ok(changes) = monitor.remote.list_remote_changes(&cursor).await {
                    let entry_count = changes.entries.len();
                    let exclusions = Arc::clone(&monitor.exclusions);
                    let failures = monitor
                        .download_engine
                        .apply_batch(changes.entries, &exclusions, |_, _| {})
                        .await;
                    #[cfg(feature = "tracing")]
                    tracing::info!(
                        entry_count,
                        failure_count = failures.len(),
                        "remote change batch applied"
                    );
                    if failures.is_empty() {
                        monitor.state.set_string(KEY_SYNC_CURSOR, &changes.cursor);
                    }
                    for (path, err) in failures {
                        record_failure(&monitor, path, err);
                    }
                }
                drop(guard);
            }
            Ok(false) => {}
            Err(_) => {
                monitor.flags.set_connected(false);
            }
        }
    }
}

async fn added_item_downloader_worker<R: RemoteClient + 'static>(
    monitor: Arc<Monitor<R>>,
    mut rx: mpsc::UnboundedReceiver<String>,
) {
    while let Some(path) = rx.recv().await {
        if !monitor.flags.running() {
            return;
        }
        let guard = monitor.sync_lock.lock().await;
        if let Ok(listing) = monitor.remote.list_folder(&path, true, false, u32::MAX).await {
            let exclusions = Arc::clone(&monitor.exclusions);
            let failures = monitor
                .download_engine
                .apply_batch(listing.entries, &exclusions, |_, _| {})
                .await;
            for (path, err) in failures {
                record_failure(&monitor, path, err);
            }
        }
        drop(guard);
    }
}

async fn local_uploader_worker<R: RemoteClient + 'static>(
    monitor: Arc<Monitor<R>>,
    mut rx: mpsc::UnboundedReceiver<CanonicalEvent>,
) {
    loop {
        if !monitor.flags.running() {
            return;
        }

        let mut batch = Vec::new();
        let deadline = tokio::time::sleep(monitor.config.upload_batch_window);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                biased;
                _ = &mut deadline => break,
                received = rx.recv() => match received {
                    Some(event) => batch.push(event),
                    None => return,
                },
            }
        }

        if batch.is_empty() || !monitor.flags.is_active() {
            continue;
        }

        let normalized = {
            let exclusions = monitor.exclusions.lock();
            events::normalize(batch, &exclusions)
        };

        let batch_len = normalized.len();
        let guard = monitor.sync_lock.lock().await;
        let failures = monitor.upload_engine.apply_batch(normalized).await;
        #[cfg(feature = "tracing")]
        tracing::info!(batch_len, failure_count = failures.len(), "upload batch applied");
        if failures.is_empty() {
            monitor.state.set_u64(KEY_SYNC_LASTSYNC, unix_now());
        }
        for (path, err) in failures {
            record_failure(&monitor, path, err);
        }
        drop(guard);
    }
}

fn record_failure<R: RemoteClient>(monitor: &Arc<Monitor<R>>, path: String, err: SyncError) {
    match err.severity() {
        Severity::Ignorable => {
            monitor.sync_errors.remove(&path);
        }
        Severity::Transient => {
            #[cfg(feature = "tracing")]
            tracing::warn!(%path, %err, "transient sync failure");
            monitor.sync_errors.insert(path, err.to_string());
        }
        Severity::Fatal | Severity::Unauthorized => {
            #[cfg(feature = "tracing")]
            tracing::error!(%path, %err, "fatal sync failure, stopping");
            monitor.sync_errors.insert(path, err.to_string());
            monitor.flags.set_running(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::JsonStateStore;
    use remote::{FakeRemote, Metadata, WriteMode};

    fn make_monitor(root: &std::path::Path) -> Arc<Monitor<FakeRemote>> {
        let remote = Arc::new(FakeRemote::new());
        let cfg = SyncConfig::new(root);
        let state: Arc<dyn config::StateStore> = Arc::new(JsonStateStore::new(root.join("state.json")));
        let index = RevisionIndex::new(root.join("index.rix"));
        Arc::new(Monitor::new(remote, cfg, state, index))
    }

    #[tokio::test]
    async fn start_fails_fatally_when_sync_root_is_missing() {
        let monitor = make_monitor(std::path::Path::new("/does/not/exist"));
        let err = monitor.start().unwrap_err();
        assert_eq!(err.severity(), Severity::Fatal);
    }

    #[tokio::test]
    async fn start_then_stop_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = make_monitor(dir.path());
        monitor.start().unwrap();
        assert!(monitor.flags().running());
        monitor.stop().await;
        assert!(!monitor.flags().running());
    }

    #[tokio::test]
    async fn pause_sets_paused_flag_without_stopping_workers() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = make_monitor(dir.path());
        monitor.start().unwrap();
        monitor.pause();
        assert!(monitor.flags().paused_by_user());
        assert!(monitor.flags().running());
        monitor.resume();
        assert!(!monitor.flags().paused_by_user());
        monitor.stop().await;
    }

    #[tokio::test]
    async fn startup_worker_downloads_existing_remote_tree() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(FakeRemote::new());
        remote.seed(Metadata::File {
            path: "/a.txt".into(),
            rev: "rev1".into(),
            content_hash: "hash1".into(),
            size: 0,
        });

        let cfg = SyncConfig::new(dir.path());
        let state: Arc<dyn config::StateStore> =
            Arc::new(JsonStateStore::new(dir.path().join("state.json")));
        let index = RevisionIndex::new(dir.path().join("index.rix"));
        let monitor = Arc::new(Monitor::new(remote, cfg, state, index));

        monitor.start().unwrap();
        for _ in 0..50 {
            if !monitor.flags().startup() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        monitor.stop().await;

        assert!(dir.path().join("a.txt").exists());
    }

    #[test]
    fn remote_upload_conflict_is_recorded_as_severity_transient() {
        let err = RemoteError::PathConflict {
            path: "/a.txt".into(),
            reason: "stale".into(),
        };
        assert_eq!(remote_error_severity(&err), Severity::Transient);
        let _ = WriteMode::Add;
    }
}
