#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `events` turns raw filesystem notifications into the canonical event
//! stream the upload engine consumes: [`LocalEventHandler`] filters and
//! rewrites individual events as they arrive, and [`normalize`] coalesces a
//! time-bounded burst of them into the minimal equivalent set, in a fixed
//! sorted order the upload engine relies on.
//!
//! # Design
//!
//! - [`LocalEventHandler::handle`] drops events for paths under active
//!   download (self-inflicted echo) and resolves case collisions on a
//!   case-sensitive filesystem before an event is allowed onto the queue.
//! - [`normalize`] runs a fixed pipeline: drop bare directory-modified
//!   events, collapse subtree moves and deletes, split moves that cannot be
//!   safely applied atomically, then reduce each remaining path's history to
//!   a single event.
//!
//! # Invariants
//!
//! - [`normalize`]'s output is sorted: deletions deepest-first, then
//!   directory creations shallowest-first, with everything else preserving
//!   its relative order after that.
//! - A path with an equal number of creates and deletes in one burst
//!   collapses to `Modified`, never disappears silently.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use dashmap::DashSet;
use pathutil::ExclusionRules;

/// What happened to a path, in the vocabulary the rest of the core shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The path was created.
    Created,
    /// The path's contents changed (files only; directories never carry a
    /// meaningful `Modified`).
    Modified,
    /// The path was removed.
    Deleted,
    /// The path was renamed or moved; `dest_path` on the owning
    /// [`CanonicalEvent`] holds the new location.
    Moved,
}

/// A single filesystem change, normalized to the remote path space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalEvent {
    /// What kind of change this is.
    pub kind: EventKind,
    /// Whether the path names a directory.
    pub is_directory: bool,
    /// The path the event originated at. For anything but `Moved` this is
    /// the only path carried.
    pub src_path: String,
    /// The destination path, present only for `Moved` events.
    pub dest_path: Option<String>,
}

impl CanonicalEvent {
    /// Creates a non-move event.
    #[must_use]
    pub fn new(kind: EventKind, is_directory: bool, src_path: impl Into<String>) -> Self {
        Self {
            kind,
            is_directory,
            src_path: src_path.into(),
            dest_path: None,
        }
    }

    /// Creates a `Moved` event from `src_path` to `dest_path`.
    #[must_use]
    pub fn moved(is_directory: bool, src_path: impl Into<String>, dest_path: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Moved,
            is_directory,
            src_path: src_path.into(),
            dest_path: Some(dest_path.into()),
        }
    }

    fn depth(&self) -> usize {
        self.src_path.matches('/').count()
    }
}

/// A raw, unfiltered notification from the filesystem observer, expressed in
/// local paths.
#[derive(Debug, Clone)]
pub struct RawEvent {
    /// What kind of change this is.
    pub kind: EventKind,
    /// Whether the path names a directory.
    pub is_directory: bool,
    /// The local path the event originated at.
    pub src_path: PathBuf,
    /// The local destination path, present only for `Moved` events.
    pub dest_path: Option<PathBuf>,
}

/// Tracks paths currently undergoing an I/O operation initiated by this
/// process, so the local event handler can tell a self-inflicted echo apart
/// from a genuine external change.
///
/// Keys are lowercased remote paths. Membership is a prefix test:
/// [`SuppressionSet::contains_prefix_of`] also matches descendants of a
/// suppressed folder.
#[derive(Default)]
pub struct SuppressionSet {
    paths: DashSet<String>,
}

impl SuppressionSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `remote_path` as undergoing I/O.
    pub fn insert(&self, remote_path: &str) {
        self.paths.insert(remote_path.to_lowercase());
    }

    /// Clears `remote_path` from the set, typically after a grace delay past
    /// I/O completion.
    pub fn remove(&self, remote_path: &str) {
        self.paths.remove(&remote_path.to_lowercase());
    }

    /// True if `remote_path` is itself suppressed or lies beneath a
    /// suppressed folder.
    #[must_use]
    pub fn contains_prefix_of(&self, remote_path: &str) -> bool {
        let lower = remote_path.to_lowercase();
        self.paths.iter().any(|entry| {
            let suppressed = entry.key();
            &lower == suppressed || pathutil::is_child(&lower, suppressed)
        })
    }
}

/// Filters and rewrites raw observer events into canonical ones.
pub struct LocalEventHandler {
    mapper: pathutil::PathMapper,
    case_sensitive_fs: bool,
}

impl LocalEventHandler {
    /// Creates a handler rooted at the same sync root as `mapper`.
    /// `case_sensitive_fs` should be `true` on Linux and `false` on macOS and
    /// Windows, where case-conflict resolution does not apply.
    #[must_use]
    pub fn new(mapper: pathutil::PathMapper, case_sensitive_fs: bool) -> Self {
        Self {
            mapper,
            case_sensitive_fs,
        }
    }

    /// Processes one raw event. Returns `None` if the event should be
    /// dropped: syncing is not active, or the path is currently suppressed
    /// because this process is downloading it.
    ///
    /// On a case-sensitive filesystem, if the event's destination would
    /// collide case-insensitively with an existing sibling, the item is
    /// renamed on disk to `"<base> (case conflict[ N])<ext>"` and the
    /// returned event reflects the new path; the caller should suppress the
    /// resulting rename's own echo via `downloading`.
    pub fn handle(
        &self,
        raw: RawEvent,
        syncing_active: bool,
        downloading: &SuppressionSet,
    ) -> Option<CanonicalEvent> {
        if !syncing_active {
            return None;
        }

        let remote_src = self.mapper.to_remote(&raw.src_path).ok()?;
        if downloading.contains_prefix_of(&remote_src) {
            return None;
        }

        let target_local = raw.dest_path.clone().unwrap_or_else(|| raw.src_path.clone());
        let mut final_local = target_local.clone();

        if self.case_sensitive_fs && matches!(raw.kind, EventKind::Created | EventKind::Moved) {
            if let Ok(renamed) = resolve_case_conflict(&target_local) {
                if renamed != target_local {
                    downloading.insert(&self.mapper.to_remote(&renamed).ok()?);
                    final_local = renamed;
                }
            }
        }

        let final_remote = self.mapper.to_remote(&final_local).ok()?;

        Some(match raw.kind {
            EventKind::Moved => CanonicalEvent::moved(raw.is_directory, remote_src, final_remote),
            other => CanonicalEvent::new(other, raw.is_directory, final_remote),
        })
    }
}

/// Renames `path` to `"<base> (case conflict[ N])<ext>"` if an existing
/// sibling matches its name case-insensitively but not exactly, returning
/// the resulting path (unchanged if no conflict exists).
fn resolve_case_conflict(path: &Path) -> io::Result<PathBuf> {
    let Some(parent) = path.parent() else {
        return Ok(path.to_path_buf());
    };
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return Ok(path.to_path_buf());
    };

    let has_conflict = std::fs::read_dir(parent)?.flatten().any(|entry| {
        let entry_name = entry.file_name();
        let entry_name = entry_name.to_string_lossy();
        entry_name.eq_ignore_ascii_case(name) && entry_name != name
    });

    if !has_conflict {
        return Ok(path.to_path_buf());
    }

    let (base, ext) = split_extension(name);
    let mut n = 0;
    loop {
        let candidate_name = if n == 0 {
            format!("{base} (case conflict){ext}")
        } else {
            format!("{base} (case conflict {n}){ext}")
        };
        let candidate = parent.join(&candidate_name);
        if !candidate.exists() {
            std::fs::rename(path, &candidate)?;
            return Ok(candidate);
        }
        n += 1;
    }
}

fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(0) | None => (name, ""),
        Some(idx) => (&name[..idx], &name[idx..]),
    }
}

/// Coalesces a time-bounded burst of canonical events into the minimal
/// equivalent set, applying `exclusions` to decide which moves must be split
/// rather than applied atomically.
#[must_use]
pub fn normalize(events: Vec<CanonicalEvent>, exclusions: &ExclusionRules) -> Vec<CanonicalEvent> {
    let events = drop_bare_dir_modified(events);
    let events = collapse_subtree_moves(events);
    let events = collapse_subtree_deletes(events);
    let events = split_problematic_moves(events, exclusions);
    let events = per_path_history_reduction(events);
    sort_for_application(events)
}

fn drop_bare_dir_modified(events: Vec<CanonicalEvent>) -> Vec<CanonicalEvent> {
    events
        .into_iter()
        .filter(|e| !(e.is_directory && e.kind == EventKind::Modified))
        .collect()
}

fn collapse_subtree_moves(events: Vec<CanonicalEvent>) -> Vec<CanonicalEvent> {
    let move_roots: Vec<(String, String)> = events
        .iter()
        .filter(|e| e.kind == EventKind::Moved && e.is_directory)
        .map(|e| (e.src_path.clone(), e.dest_path.clone().unwrap_or_default()))
        .collect();

    events
        .into_iter()
        .filter(|e| {
            if e.kind != EventKind::Moved {
                return true;
            }
            let dest = e.dest_path.as_deref().unwrap_or_default();
            !move_roots.iter().any(|(root_src, root_dest)| {
                (root_src != &e.src_path || root_dest != dest)
                    && pathutil::is_child(&e.src_path, root_src)
                    && pathutil::is_child(dest, root_dest)
            })
        })
        .collect()
}

fn collapse_subtree_deletes(events: Vec<CanonicalEvent>) -> Vec<CanonicalEvent> {
    let delete_roots: Vec<String> = events
        .iter()
        .filter(|e| e.kind == EventKind::Deleted && e.is_directory)
        .map(|e| e.src_path.clone())
        .collect();

    events
        .into_iter()
        .filter(|e| {
            !delete_roots
                .iter()
                .any(|root| root != &e.src_path && pathutil::is_child(&e.src_path, root))
        })
        .collect()
}

fn split_problematic_moves(
    events: Vec<CanonicalEvent>,
    exclusions: &ExclusionRules,
) -> Vec<CanonicalEvent> {
    let mut path_counts: HashMap<String, usize> = HashMap::new();
    for event in &events {
        *path_counts.entry(event.src_path.clone()).or_default() += 1;
        if let Some(dest) = &event.dest_path {
            *path_counts.entry(dest.clone()).or_default() += 1;
        }
    }

    let mut out = Vec::with_capacity(events.len());
    for event in events {
        if event.kind != EventKind::Moved {
            out.push(event);
            continue;
        }
        let dest = event.dest_path.clone().unwrap_or_default();
        let shared = path_counts.get(&event.src_path).copied().unwrap_or(0) > 2
            || path_counts.get(&dest).copied().unwrap_or(0) > 2;
        let crosses_boundary = exclusions.is_excluded(&event.src_path) != exclusions.is_excluded(&dest);

        if shared || crosses_boundary {
            out.push(CanonicalEvent::new(
                EventKind::Deleted,
                event.is_directory,
                event.src_path.clone(),
            ));
            out.push(CanonicalEvent::new(EventKind::Created, event.is_directory, dest));
        } else {
            out.push(event);
        }
    }
    out
}

fn per_path_history_reduction(events: Vec<CanonicalEvent>) -> Vec<CanonicalEvent> {
    let mut moves = Vec::new();
    let mut grouped: HashMap<String, Vec<CanonicalEvent>> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for event in events {
        if event.kind == EventKind::Moved {
            moves.push(event);
            continue;
        }
        if !grouped.contains_key(&event.src_path) {
            order.push(event.src_path.clone());
        }
        grouped.entry(event.src_path.clone()).or_default().push(event);
    }

    let mut out = moves;
    for path in order {
        let group = grouped.remove(&path).unwrap_or_default();
        let n_created = group.iter().filter(|e| e.kind == EventKind::Created).count();
        let n_deleted = group.iter().filter(|e| e.kind == EventKind::Deleted).count();
        let first_is_dir = group.first().map(|e| e.is_directory).unwrap_or(false);
        let last_is_dir = group.last().map(|e| e.is_directory).unwrap_or(false);

        if n_created == 0 && n_deleted == 0 {
            continue;
        }

        if n_created > n_deleted {
            out.push(CanonicalEvent::new(EventKind::Created, last_is_dir, path));
        } else if n_created < n_deleted {
            out.push(CanonicalEvent::new(EventKind::Deleted, first_is_dir, path));
        } else if first_is_dir == last_is_dir {
            out.push(CanonicalEvent::new(EventKind::Modified, first_is_dir, path));
        } else {
            out.push(CanonicalEvent::new(EventKind::Deleted, first_is_dir, path.clone()));
            out.push(CanonicalEvent::new(EventKind::Created, last_is_dir, path));
        }
    }
    out
}

fn sort_for_application(events: Vec<CanonicalEvent>) -> Vec<CanonicalEvent> {
    let mut deletions: Vec<CanonicalEvent> = Vec::new();
    let mut dir_creates: Vec<CanonicalEvent> = Vec::new();
    let mut rest: Vec<CanonicalEvent> = Vec::new();

    for event in events {
        if event.kind == EventKind::Deleted {
            deletions.push(event);
        } else if event.kind == EventKind::Created && event.is_directory {
            dir_creates.push(event);
        } else {
            rest.push(event);
        }
    }

    deletions.sort_by_key(|e| std::cmp::Reverse(e.depth()));
    dir_creates.sort_by_key(CanonicalEvent::depth);

    let mut out = deletions;
    out.extend(dir_creates);
    out.extend(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created(path: &str, is_dir: bool) -> CanonicalEvent {
        CanonicalEvent::new(EventKind::Created, is_dir, path)
    }
    fn deleted(path: &str, is_dir: bool) -> CanonicalEvent {
        CanonicalEvent::new(EventKind::Deleted, is_dir, path)
    }
    fn modified(path: &str) -> CanonicalEvent {
        CanonicalEvent::new(EventKind::Modified, false, path)
    }

    #[test]
    fn bare_directory_modified_is_dropped() {
        let rules = ExclusionRules::new("/");
        let out = normalize(vec![CanonicalEvent::new(EventKind::Modified, true, "/dir")], &rules);
        assert!(out.is_empty());
    }

    #[test]
    fn subtree_delete_collapses_children() {
        let rules = ExclusionRules::new("/");
        let out = normalize(
            vec![
                deleted("/dir", true),
                deleted("/dir/a.txt", false),
                deleted("/dir/sub/b.txt", false),
            ],
            &rules,
        );
        assert_eq!(out, vec![deleted("/dir", true)]);
    }

    #[test]
    fn equal_create_and_delete_counts_collapse_to_modified() {
        let rules = ExclusionRules::new("/");
        let out = normalize(
            vec![created("/a.txt", false), deleted("/a.txt", false)],
            &rules,
        );
        assert_eq!(out, vec![modified("/a.txt")]);
    }

    #[test]
    fn more_creates_than_deletes_collapses_to_created() {
        let rules = ExclusionRules::new("/");
        let out = normalize(
            vec![
                created("/a.txt", false),
                deleted("/a.txt", false),
                created("/a.txt", false),
            ],
            &rules,
        );
        assert_eq!(out, vec![created("/a.txt", false)]);
    }

    #[test]
    fn zero_net_events_are_dropped_entirely() {
        let rules = ExclusionRules::new("/");
        // A directory that appears only via a Modified event (dropped first)
        // leaves nothing behind for this path.
        let out = normalize(vec![CanonicalEvent::new(EventKind::Modified, true, "/dir")], &rules);
        assert!(out.is_empty());
    }

    #[test]
    fn move_crossing_exclusion_boundary_is_split() {
        let mut rules = ExclusionRules::new("/");
        rules.set_selective_sync(vec!["/private".into()]);

        let out = normalize(
            vec![CanonicalEvent::moved(false, "/public/a.txt", "/private/a.txt")],
            &rules,
        );
        assert_eq!(
            out,
            vec![
                deleted("/public/a.txt", false),
                created("/private/a.txt", false),
            ]
        );
    }

    #[test]
    fn clean_move_is_left_intact() {
        let rules = ExclusionRules::new("/");
        let out = normalize(
            vec![CanonicalEvent::moved(false, "/a.txt", "/b.txt")],
            &rules,
        );
        assert_eq!(out, vec![CanonicalEvent::moved(false, "/a.txt", "/b.txt")]);
    }

    #[test]
    fn output_orders_deletions_deepest_first_then_dir_creates_shallowest_first() {
        let rules = ExclusionRules::new("/");
        let out = normalize(
            vec![
                created("/a/b", true),
                deleted("/x/y/z.txt", false),
                deleted("/x/y", true),
                created("/a", true),
            ],
            &rules,
        );
        assert_eq!(
            out,
            vec![
                deleted("/x/y", true),
                created("/a", true),
                created("/a/b", true),
            ]
        );
    }

    #[test]
    fn suppression_set_matches_descendants() {
        let set = SuppressionSet::new();
        set.insert("/dir");
        assert!(set.contains_prefix_of("/DIR/file.txt"));
        assert!(!set.contains_prefix_of("/other"));
    }

    #[test]
    fn local_handler_drops_events_while_not_syncing() {
        let mapper = pathutil::PathMapper::new("/sync");
        let handler = LocalEventHandler::new(mapper, true);
        let downloading = SuppressionSet::new();
        let raw = RawEvent {
            kind: EventKind::Created,
            is_directory: false,
            src_path: PathBuf::from("/sync/a.txt"),
            dest_path: None,
        };
        assert!(handler.handle(raw, false, &downloading).is_none());
    }

    #[test]
    fn local_handler_suppresses_paths_under_active_download() {
        let mapper = pathutil::PathMapper::new("/sync");
        let handler = LocalEventHandler::new(mapper, true);
        let downloading = SuppressionSet::new();
        downloading.insert("/a.txt");
        let raw = RawEvent {
            kind: EventKind::Modified,
            is_directory: false,
            src_path: PathBuf::from("/sync/a.txt"),
            dest_path: None,
        };
        assert!(handler.handle(raw, true, &downloading).is_none());
    }

    #[test]
    fn local_handler_renames_on_case_conflict() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("File.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("file.txt"), b"b").unwrap();

        let mapper = pathutil::PathMapper::new(dir.path());
        let handler = LocalEventHandler::new(mapper, true);
        let downloading = SuppressionSet::new();

        let raw = RawEvent {
            kind: EventKind::Created,
            is_directory: false,
            src_path: dir.path().join("file.txt"),
            dest_path: None,
        };
        let event = handler.handle(raw, true, &downloading).unwrap();
        assert!(event.src_path.contains("case conflict"));
    }
}
