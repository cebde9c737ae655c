#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `conflict` holds the single classifier the download path calls once per
//! remote entry to decide whether to skip it, apply it outright, or rename
//! the local item aside first. It is a pure function over revision tags,
//! content hashes, and timestamps — it never touches the filesystem or the
//! network itself, so callers gather the inputs and the rest of the engine
//! acts on the verdict.
//!
//! # Design
//!
//! [`classify`] mirrors the order of checks the rest of this workspace
//! expects: revision equality first (cheapest, most common), then the
//! "untouched since last sync" timestamp check, then deletion handling, and
//! only as a last resort a content hash comparison — which is why the hash
//! is passed as a lazily-evaluated closure instead of a plain value.
//!
//! # Invariants
//!
//! - [`classify`] never calls `local_hash` unless every cheaper check has
//!   already failed to decide the outcome.
//! - The checks are evaluated in a fixed order; reordering them changes
//!   observable behavior (for example, a deletion with an equal revision
//!   must resolve via revision equality, not via the deletion branch).
//!
//! # Examples
//!
//! ```
//! use conflict::{classify, Classification};
//! use revindex::Rev;
//!
//! let verdict = classify(
//!     Some(Rev::File("rev2".into())),
//!     Some("deadbeef"),
//!     Some(Rev::File("rev1".into())),
//!     None,
//!     None,
//!     || Some("deadbeef".to_string()),
//! );
//! assert_eq!(verdict, Classification::Identical);
//! ```

use std::time::SystemTime;

use revindex::Rev;

/// The verdict [`classify`] reaches for a single remote entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The remote side has changed and the local side has not; apply the
    /// remote entry.
    RemoteNewer,
    /// Both sides changed since the last reconciliation and disagree;
    /// rename the local item aside before applying the remote entry.
    Conflict,
    /// Both sides changed but ended up with the same content; adopt the
    /// remote revision without touching local content.
    Identical,
    /// The local side is authoritative (it changed, or is equal to the
    /// remote, or the remote entry is a deletion that should be
    /// recreated); skip the download and let the upload path handle it.
    LocalNewerOrIdentical,
}

/// Classifies a single remote entry against local state.
///
/// `remote_rev` and `remote_hash` are `None` for a remote deletion;
/// `remote_hash` is also absent for folders. `local_rev` is whatever
/// [`revindex::RevisionIndex::get`] currently holds for the path.
/// `local_mtime` and `last_sync_for_path` are `None` when the path has never
/// been observed locally or synced before, respectively. `local_hash` is
/// invoked at most once, only when every cheaper check is inconclusive.
#[must_use]
pub fn classify(
    remote_rev: Option<Rev>,
    remote_hash: Option<&str>,
    local_rev: Option<Rev>,
    local_mtime: Option<SystemTime>,
    last_sync_for_path: Option<SystemTime>,
    local_hash: impl FnOnce() -> Option<String>,
) -> Classification {
    if remote_rev == local_rev {
        return Classification::LocalNewerOrIdentical;
    }

    if let (Some(mtime), Some(last_sync)) = (local_mtime, last_sync_for_path) {
        if mtime <= last_sync {
            return Classification::RemoteNewer;
        }
    }

    if remote_rev.is_none() {
        return Classification::LocalNewerOrIdentical;
    }

    if local_hash().as_deref() == remote_hash {
        return Classification::Identical;
    }

    Classification::Conflict
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rev(tag: &str) -> Rev {
        Rev::File(tag.to_string())
    }

    #[test]
    fn equal_revisions_are_local_newer_or_identical() {
        let verdict = classify(
            Some(rev("r1")),
            Some("hash1"),
            Some(rev("r1")),
            None,
            None,
            || panic!("local_hash must not be evaluated"),
        );
        assert_eq!(verdict, Classification::LocalNewerOrIdentical);
    }

    #[test]
    fn untouched_since_last_sync_is_remote_newer() {
        let old = SystemTime::UNIX_EPOCH;
        let newer = old + std::time::Duration::from_secs(10);
        let verdict = classify(
            Some(rev("r2")),
            Some("hash2"),
            Some(rev("r1")),
            Some(old),
            Some(newer),
            || panic!("local_hash must not be evaluated"),
        );
        assert_eq!(verdict, Classification::RemoteNewer);
    }

    #[test]
    fn touched_since_last_sync_is_not_remote_newer_by_itself() {
        let last_sync = SystemTime::UNIX_EPOCH;
        let touched = last_sync + std::time::Duration::from_secs(10);
        let verdict = classify(
            Some(rev("r2")),
            Some("hash2"),
            Some(rev("r1")),
            Some(touched),
            Some(last_sync),
            || Some("hash2".to_string()),
        );
        assert_eq!(verdict, Classification::Identical);
    }

    #[test]
    fn remote_deletion_with_changed_local_is_local_newer_or_identical() {
        let verdict = classify(None, None, Some(rev("r1")), None, None, || {
            panic!("local_hash must not be evaluated")
        });
        assert_eq!(verdict, Classification::LocalNewerOrIdentical);
    }

    #[test]
    fn matching_content_hash_is_identical_despite_differing_revisions() {
        let verdict = classify(
            Some(rev("r2")),
            Some("same-hash"),
            Some(rev("r1")),
            None,
            None,
            || Some("same-hash".to_string()),
        );
        assert_eq!(verdict, Classification::Identical);
    }

    #[test]
    fn differing_content_hash_is_a_conflict() {
        let verdict = classify(
            Some(rev("r2")),
            Some("remote-hash"),
            Some(rev("r1")),
            None,
            None,
            || Some("local-hash".to_string()),
        );
        assert_eq!(verdict, Classification::Conflict);
    }

    #[test]
    fn never_synced_path_with_differing_revisions_falls_through_to_hash_check() {
        let verdict = classify(Some(rev("r1")), Some("h"), None, None, None, || None);
        assert_eq!(verdict, Classification::Conflict);
    }
}
