#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `errors` defines the single, crate-wide behavioral error taxonomy shared by
//! every layer of the sync core: the revision index, the event pipeline, the
//! conflict detector, and the upload/download engines all fail through
//! [`SyncError`] rather than inventing their own per-module enum.
//!
//! # Design
//!
//! Each variant names a *behavior*, not a source type: `PathError` is raised
//! whenever the remote rejects an operation because its revision is stale,
//! regardless of which engine triggered it. [`SyncError::Unexpected`] is the
//! catch-all for anything that doesn't fit an anticipated category and always
//! carries its `#[source]` so the original cause is never silently dropped.
//!
//! # Invariants
//!
//! - Every variant that wraps another error keeps that error reachable through
//!   [`std::error::Error::source`].
//! - [`SyncError::severity`] is a pure function of the variant; it never
//!   inspects the wrapped payload, so triage stays deterministic.
//!
//! # See also
//!
//! - [`Severity`] for how a caller should react to a given error.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// How the scheduler should react to a [`SyncError`].
///
/// Most failures are transient and simply get retried, a handful are fatal to
/// the current sync session, and authorization failures additionally require
/// surfacing to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Log and continue; the operation was a harmless no-op (e.g. deleting
    /// something that is already gone).
    Ignorable,
    /// Push the offending path onto the transient error set and retry on the
    /// next cycle.
    Transient,
    /// Stop syncing entirely; the operator must intervene before resuming.
    Fatal,
    /// Stop syncing and notify the operator that credentials are no longer
    /// valid.
    Unauthorized,
}

/// Behavioral error categories raised anywhere in the sync core.
///
/// Variant documentation intentionally describes *when the core raises it*
/// and *what the scheduler does in response*, not the data carried — each
/// variant's fields exist to let a UI layer render a human-readable message.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote reports that the target of an operation does not exist.
    /// Treated as a no-op: the local side already agrees there is nothing
    /// there.
    #[error("remote path not found: {path}")]
    NotFound {
        /// The remote path that was missing.
        path: String,
    },

    /// The remote rejected a write because its revision changed since the
    /// core last observed it. The local revision entry is cleared so the next
    /// reconciliation re-evaluates the path from scratch.
    #[error("stale revision for {path}: {reason}")]
    PathConflict {
        /// The remote path whose revision was stale.
        path: String,
        /// The remote's explanation, if one was provided.
        reason: String,
    },

    /// A local path collides with an entry on the user's selective-sync
    /// exclusion list. Recorded as a per-path error and surfaced to the
    /// operator, but does not stop the sync session.
    #[error("path is excluded from sync: {path}")]
    ExcludedItem {
        /// The path that conflicts with an exclusion rule.
        path: String,
    },

    /// Any other per-item failure that is expected to be transient: a
    /// dropped connection mid-transfer, a momentary permission error, and so
    /// on. Queued for retry on the next sync cycle.
    #[error("transient failure syncing {path}: {source}")]
    Transient {
        /// The path that failed to sync.
        path: String,
        /// The underlying cause.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The revision index file could not be loaded or saved.
    ///
    /// `corrupted` distinguishes a structurally invalid file (the operator
    /// must rebuild the index) from an I/O failure that might clear on retry.
    #[error("revision index error (corrupted={corrupted}): {source}")]
    RevFile {
        /// Whether the file parsed but violated the index's own invariants,
        /// as opposed to a plain I/O failure.
        corrupted: bool,
        /// The underlying I/O or decode error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The persisted configuration/state document could not be loaded or
    /// saved.
    ///
    /// `corrupted` distinguishes contents that parsed but did not form a
    /// valid state document from a plain I/O failure, the same way
    /// [`SyncError::RevFile`] does for the revision index.
    #[error("state store error (corrupted={corrupted}): {source}")]
    StateFile {
        /// Whether the file parsed but violated the state document's own
        /// shape, as opposed to a plain I/O failure.
        corrupted: bool,
        /// The underlying I/O or decode error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The filesystem watcher could not be installed, typically because the
    /// OS's inotify-instance limit was exceeded. Fatal for this run; workers
    /// are never started.
    #[error("filesystem watcher could not be installed for {root}: {source}")]
    Watcher {
        /// The sync root the watcher was being installed on.
        root: PathBuf,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The sync root itself has vanished from disk or from the remote.
    /// Fatal: syncing must stop rather than silently recreate the root.
    #[error("sync root is gone: {path}")]
    RootGone {
        /// The root path that disappeared.
        path: PathBuf,
    },

    /// The remote rejected the daemon's credentials. Fatal and requires
    /// operator attention; `running` is cleared.
    #[error("authentication rejected by remote: {0}")]
    Auth(String),

    /// Anything that does not fit one of the above categories. Always
    /// fatal-by-default; callers that know a specific unexpected error is
    /// safe to ignore should match on `source` rather than relying on this
    /// catch-all.
    #[error("unexpected error: {0}")]
    Unexpected(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl SyncError {
    /// Classifies this error into the triage bucket the scheduler should act
    /// on.
    ///
    /// # Examples
    ///
    /// ```
    /// use errors::{Severity, SyncError};
    ///
    /// let err = SyncError::NotFound { path: "/a.txt".into() };
    /// assert_eq!(err.severity(), Severity::Ignorable);
    /// ```
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            Self::NotFound { .. } => Severity::Ignorable,
            Self::PathConflict { .. } | Self::ExcludedItem { .. } | Self::Transient { .. } => {
                Severity::Transient
            }
            Self::RevFile { corrupted, .. } | Self::StateFile { corrupted, .. } => {
                if *corrupted {
                    Severity::Fatal
                } else {
                    Severity::Transient
                }
            }
            Self::Watcher { .. } | Self::RootGone { .. } | Self::Unexpected(_) => Severity::Fatal,
            Self::Auth(_) => Severity::Unauthorized,
        }
    }

    /// Wraps an arbitrary error as [`SyncError::Transient`] for `path`.
    pub fn transient<E>(path: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transient {
            path: path.into(),
            source: Box::new(source),
        }
    }

    /// Wraps an arbitrary error as [`SyncError::Unexpected`].
    pub fn unexpected<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Unexpected(Box::new(source))
    }
}

/// A [`SyncError`] tied to the path it was raised for, with both the local
/// and remote representations kept around so a UI layer can display whichever
/// is more meaningful.
///
/// Per-path errors auto-clear when the same path next syncs successfully;
/// that bookkeeping lives in the caller (typically the scheduler's error
/// set), not in this type.
#[derive(Debug)]
pub struct PathError {
    /// The local filesystem path, if one exists.
    pub local_path: Option<PathBuf>,
    /// The remote path, always present.
    pub remote_path: String,
    /// The error that occurred.
    pub error: SyncError,
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.remote_path, self.error)
    }
}

impl std::error::Error for PathError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
