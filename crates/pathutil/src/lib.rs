#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `pathutil` maps between local filesystem paths and the case-insensitive
//! remote namespace, and implements the two-tier exclusion policy (hardcoded
//! temp-file patterns plus user-configured selective sync / mignore rules)
//! that both the local event handler and the download engine consult before
//! touching a path.
//!
//! # Design
//!
//! - [`PathMapper`] owns the sync root and never synthesizes a lowercased
//!   local path: [`PathMapper::to_local`] always walks existing directory
//!   entries to recover whatever casing is already on disk.
//! - [`ExclusionRules`] combines three sources keyed by lowercased remote
//!   path: a fixed table of OS/office temp-file patterns, an explicit
//!   selective-sync list, and a gitignore-style pattern file reloaded when
//!   its modification time changes.
//!
//! # Invariants
//!
//! - `to_remote` rejects any local path that does not lie inside the sync
//!   root.
//! - If a folder is on the selective-sync list, every path beneath it is
//!   excluded too.

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use globset::{Glob, GlobSet, GlobSetBuilder};
use thiserror::Error;

/// Failures mapping between local and remote path spaces.
#[derive(Debug, Error)]
pub enum PathUtilError {
    /// The local path does not lie inside the configured sync root.
    #[error("{path} is not inside the sync root {root}")]
    OutsideRoot {
        /// The offending path.
        path: PathBuf,
        /// The configured sync root.
        root: PathBuf,
    },
    /// The mignore file could not be read.
    #[error("could not read mignore file at {path}: {source}")]
    MignoreIo {
        /// The mignore file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Maps between local filesystem paths rooted at `root` and remote paths of
/// the form `/segment/segment`.
#[derive(Debug, Clone)]
pub struct PathMapper {
    root: PathBuf,
}

impl PathMapper {
    /// Creates a mapper rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The configured sync root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Converts a local path into its remote representation, preserving the
    /// caller's casing.
    ///
    /// # Errors
    ///
    /// Returns [`PathUtilError::OutsideRoot`] if `local` does not lie inside
    /// the sync root.
    pub fn to_remote(&self, local: &Path) -> Result<String, PathUtilError> {
        let relative = local.strip_prefix(&self.root).map_err(|_| PathUtilError::OutsideRoot {
            path: local.to_path_buf(),
            root: self.root.clone(),
        })?;

        let mut remote = String::new();
        for component in relative.components() {
            let segment = component.as_os_str().to_string_lossy();
            remote.push('/');
            remote.push_str(&segment);
        }
        if remote.is_empty() {
            remote.push('/');
        }
        Ok(remote)
    }

    /// Converts a remote path back into a local path, reusing whatever
    /// casing already exists on disk for each segment and only falling back
    /// to the server-provided casing when no case-insensitive match exists.
    ///
    /// This never synthesizes a lowercased path: callers must always go
    /// through this function rather than joining `remote.to_lowercase()`
    /// onto the root, or sibling directories that differ only in case would
    /// silently multiply.
    #[must_use]
    pub fn to_local(&self, remote: &str) -> PathBuf {
        let mut current = self.root.clone();
        for segment in remote.split('/').filter(|s| !s.is_empty()) {
            current = match find_case_insensitive_entry(&current, segment) {
                Some(existing) => current.join(existing),
                None => current.join(segment),
            };
        }
        current
    }
}

/// Looks for a directory entry under `dir` whose name matches `segment`
/// case-insensitively, returning the on-disk name if found.
fn find_case_insensitive_entry(dir: &Path, segment: &str) -> Option<String> {
    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.eq_ignore_ascii_case(segment) {
            return Some(name.into_owned());
        }
    }
    None
}

/// True iff `sub` lies strictly beneath `parent` in the remote namespace.
/// Comparison is case-insensitive, matching the remote's own namespace
/// rules.
#[must_use]
pub fn is_child(sub: &str, parent: &str) -> bool {
    let sub = normalize(sub);
    let parent = normalize(parent);
    if parent == "/" {
        return sub != "/" && !sub.is_empty();
    }
    sub.len() > parent.len() && sub.starts_with(&parent) && sub.as_bytes()[parent.len()] == b'/'
}

fn normalize(path: &str) -> String {
    let lower = path.to_lowercase();
    if lower.len() > 1 && lower.ends_with('/') {
        lower.trim_end_matches('/').to_string()
    } else {
        lower
    }
}

/// Hardcoded basename patterns excluded regardless of user configuration:
/// office/OS temp-file markers that are never meaningful to sync.
fn hardcoded_patterns() -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in [
        "~$*", ".~*", "~*.tmp", ".ds_store", "thumbs.db", "desktop.ini", ".dropbox",
        ".dropbox.cache", ".icloud",
    ] {
        if let Ok(glob) = Glob::new(pattern) {
            builder.add(glob);
        }
    }
    builder.build().unwrap_or_else(|_| GlobSetBuilder::new().build().unwrap())
}

/// The two-tier exclusion policy: hardcoded temp-file patterns plus
/// user-configured selective sync and mignore rules.
pub struct ExclusionRules {
    root_remote: String,
    hardcoded: GlobSet,
    selective_sync: Vec<String>,
    mignore_path: Option<PathBuf>,
    mignore: GlobSet,
    mignore_mtime: Option<SystemTime>,
}

impl ExclusionRules {
    /// Creates a rule set with no selective-sync entries and no mignore
    /// file. Call [`ExclusionRules::set_mignore_path`] and
    /// [`ExclusionRules::reload_mignore_if_changed`] to wire up the user
    /// pattern file.
    #[must_use]
    pub fn new(root_remote: impl Into<String>) -> Self {
        Self {
            root_remote: root_remote.into(),
            hardcoded: hardcoded_patterns(),
            selective_sync: Vec::new(),
            mignore_path: None,
            mignore: GlobSetBuilder::new().build().unwrap(),
            mignore_mtime: None,
        }
    }

    /// Replaces the selective-sync exclusion list. Entries are lowercased;
    /// excluding a folder implicitly excludes everything beneath it.
    pub fn set_selective_sync(&mut self, excluded: Vec<String>) {
        self.selective_sync = excluded.into_iter().map(|p| p.to_lowercase()).collect();
    }

    /// The current selective-sync exclusion list.
    #[must_use]
    pub fn selective_sync(&self) -> &[String] {
        &self.selective_sync
    }

    /// Removes `path` from the selective-sync list if present. Used when the
    /// server deletes a path that was previously selectively excluded: the
    /// source of truth for the exclusion is gone, so the bookkeeping should
    /// not keep referencing it.
    pub fn forget_selective_sync(&mut self, path: &str) {
        let path = path.to_lowercase();
        self.selective_sync.retain(|p| p != &path);
    }

    /// Points this rule set at a mignore file. Does not load it; call
    /// [`ExclusionRules::reload_mignore_if_changed`] afterwards.
    pub fn set_mignore_path(&mut self, path: PathBuf) {
        self.mignore_path = Some(path);
        self.mignore_mtime = None;
    }

    /// Reloads the mignore file if its modification time has changed since
    /// the last load. Returns `Ok(true)` if a reload happened.
    pub fn reload_mignore_if_changed(&mut self) -> Result<bool, PathUtilError> {
        let Some(path) = self.mignore_path.clone() else {
            return Ok(false);
        };

        let metadata = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                self.mignore = GlobSetBuilder::new().build().unwrap();
                self.mignore_mtime = None;
                return Ok(true);
            }
            Err(source) => return Err(PathUtilError::MignoreIo { path, source }),
        };

        let mtime = metadata.modified().ok();
        if mtime == self.mignore_mtime {
            return Ok(false);
        }

        let contents = std::fs::read_to_string(&path)
            .map_err(|source| PathUtilError::MignoreIo { path: path.clone(), source })?;

        let mut builder = GlobSetBuilder::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Ok(glob) = Glob::new(&line.to_lowercase()) {
                builder.add(glob);
            }
        }
        self.mignore = builder.build().unwrap_or_else(|_| GlobSetBuilder::new().build().unwrap());
        self.mignore_mtime = mtime;
        Ok(true)
    }

    /// True if `remote_path` should never be synced, under any of the three
    /// exclusion sources.
    #[must_use]
    pub fn is_excluded(&self, remote_path: &str) -> bool {
        let lower = remote_path.to_lowercase();
        if lower == self.root_remote {
            return true;
        }

        let basename = lower.rsplit('/').next().unwrap_or(&lower);
        if self.hardcoded.is_match(basename) {
            return true;
        }

        for excluded in &self.selective_sync {
            if &lower == excluded || is_child(&lower, excluded) {
                return true;
            }
        }

        self.mignore.is_match(basename) || self.mignore.is_match(lower.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_child_requires_strict_descendance() {
        assert!(is_child("/a/b", "/a"));
        assert!(!is_child("/a", "/a"));
        assert!(!is_child("/ab", "/a"));
        assert!(is_child("/A/B", "/a"));
    }

    #[test]
    fn to_remote_rejects_paths_outside_root() {
        let mapper = PathMapper::new("/sync");
        let err = mapper.to_remote(Path::new("/elsewhere/file.txt")).unwrap_err();
        assert!(matches!(err, PathUtilError::OutsideRoot { .. }));
    }

    #[test]
    fn to_remote_preserves_casing() {
        let mapper = PathMapper::new("/sync");
        let remote = mapper.to_remote(Path::new("/sync/Dir/File.TXT")).unwrap();
        assert_eq!(remote, "/Dir/File.TXT");
    }

    #[test]
    fn to_local_reuses_existing_casing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("MyFolder")).unwrap();

        let mapper = PathMapper::new(dir.path());
        let local = mapper.to_local("/myfolder/newfile.txt");
        assert_eq!(
            local,
            dir.path().join("MyFolder").join("newfile.txt")
        );
    }

    #[test]
    fn hardcoded_temp_names_are_excluded() {
        let rules = ExclusionRules::new("/");
        assert!(rules.is_excluded("/docs/~$notes.docx"));
        assert!(rules.is_excluded("/.DS_Store"));
        assert!(rules.is_excluded("/Thumbs.db"));
    }

    #[test]
    fn selective_sync_excludes_descendants() {
        let mut rules = ExclusionRules::new("/");
        rules.set_selective_sync(vec!["/private".into()]);
        assert!(rules.is_excluded("/private"));
        assert!(rules.is_excluded("/private/x/y.txt"));
        assert!(!rules.is_excluded("/public/x.txt"));
    }

    #[test]
    fn forgetting_a_selective_sync_entry_removes_it() {
        let mut rules = ExclusionRules::new("/");
        rules.set_selective_sync(vec!["/private/x".into()]);
        rules.forget_selective_sync("/private/x");
        assert!(!rules.is_excluded("/private/x"));
    }

    #[test]
    fn mignore_reloads_when_mtime_changes() {
        let dir = tempfile::tempdir().unwrap();
        let mignore_path = dir.path().join(".mignore");
        std::fs::write(&mignore_path, "*.log\n").unwrap();

        let mut rules = ExclusionRules::new("/");
        rules.set_mignore_path(mignore_path.clone());
        assert!(rules.reload_mignore_if_changed().unwrap());
        assert!(rules.is_excluded("/debug.log"));
        assert!(!rules.is_excluded("/debug.txt"));

        // Unchanged mtime: no reload, no error.
        assert!(!rules.reload_mignore_if_changed().unwrap());
    }
}
