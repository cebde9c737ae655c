//! Bridges the OS filesystem watcher into the canonical event pipeline.
//!
//! `notify`'s callback runs on its own background thread; [`RootWatcher`]
//! forwards each raw [`notify::Event`] onto an unbounded `tokio` channel so
//! the rest of the daemon never touches a non-`tokio` primitive.

use std::path::{Path, PathBuf};

use events::{EventKind, RawEvent};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Owns the live `notify` watcher handle; dropping this stops filesystem
/// monitoring.
pub struct RootWatcher {
    _watcher: RecommendedWatcher,
}

impl RootWatcher {
    /// Starts watching `root` recursively, forwarding translated events to
    /// `tx`. Malformed or unsupported `notify` events (permission errors,
    /// events notify itself couldn't classify) are dropped rather than
    /// surfaced — the daemon relies on its periodic reconciliation passes to
    /// catch anything a watcher glitch missed.
    ///
    /// # Errors
    ///
    /// Returns a `notify::Error` if the underlying OS watch (inotify on
    /// Linux) could not be installed, typically because the instance limit
    /// was exceeded.
    pub fn start(root: &Path, tx: mpsc::UnboundedSender<RawEvent>) -> notify::Result<Self> {
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                if let Ok(event) = res {
                    for raw in translate(event) {
                        let _ = tx.send(raw);
                    }
                }
            },
            notify::Config::default(),
        )?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        Ok(Self { _watcher: watcher })
    }
}

fn translate(event: Event) -> Vec<RawEvent> {
    use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
    use notify::EventKind as NotifyKind;

    match event.kind {
        NotifyKind::Create(CreateKind::Folder) => single(EventKind::Created, true, event.paths),
        NotifyKind::Create(_) => single(EventKind::Created, false, event.paths),
        NotifyKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let [src, dest]: [PathBuf; 2] = match <[PathBuf; 2]>::try_from(event.paths) {
                Ok(pair) => pair,
                Err(_) => return Vec::new(),
            };
            let is_directory = dest.is_dir() || src.is_dir();
            vec![RawEvent {
                kind: EventKind::Moved,
                is_directory,
                src_path: src,
                dest_path: Some(dest),
            }]
        }
        NotifyKind::Modify(_) => {
            let is_directory = event.paths.first().is_some_and(|p| p.is_dir());
            single(EventKind::Modified, is_directory, event.paths)
        }
        NotifyKind::Remove(kind) => {
            let is_directory = matches!(kind, RemoveKind::Folder);
            single(EventKind::Deleted, is_directory, event.paths)
        }
        NotifyKind::Any | NotifyKind::Access(_) | NotifyKind::Other => Vec::new(),
    }
}

fn single(kind: EventKind, is_directory: bool, paths: Vec<PathBuf>) -> Vec<RawEvent> {
    paths
        .into_iter()
        .map(|src_path| RawEvent {
            kind,
            is_directory,
            src_path,
            dest_path: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
    use notify::{Event, EventKind as NotifyKind};

    #[test]
    fn a_create_event_becomes_a_created_raw_event() {
        let event = Event::new(NotifyKind::Create(CreateKind::File)).add_path("/sync/a.txt".into());
        let raw = translate(event);
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].kind, EventKind::Created);
        assert!(!raw[0].is_directory);
    }

    #[test]
    fn a_both_rename_event_becomes_a_single_moved_raw_event() {
        let event = Event::new(NotifyKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path("/sync/a.txt".into())
            .add_path("/sync/b.txt".into());
        let raw = translate(event);
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].kind, EventKind::Moved);
        assert_eq!(raw[0].dest_path.as_deref(), Some(Path::new("/sync/b.txt")));
    }

    #[test]
    fn a_remove_event_becomes_a_deleted_raw_event() {
        let event = Event::new(NotifyKind::Remove(RemoveKind::File)).add_path("/sync/a.txt".into());
        let raw = translate(event);
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].kind, EventKind::Deleted);
    }

    #[test]
    fn an_access_event_yields_no_raw_events() {
        let event = Event::new(NotifyKind::Access(notify::event::AccessKind::Any));
        assert!(translate(event).is_empty());
    }
}
