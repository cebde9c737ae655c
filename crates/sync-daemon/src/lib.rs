#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `sync-daemon` is the scheduler that ties every other crate in this
//! workspace into one running daemon: [`Monitor`] owns a [`RemoteClient`]
//! (from `remote`), a `revindex::RevisionIndex`, a `pathutil::PathMapper`,
//! and the `transfer` crate's upload/download engines, and drives five
//! long-running workers against them.
//!
//! # Design
//!
//! Exactly five workers run once [`Monitor::start`] succeeds: a connection
//! probe, a startup/resume reconciliation pass, a remote long-poll listener,
//! an added-item downloader (for paths newly included by selective sync),
//! and a local-event uploader. All five serialize their apply-batch calls
//! through a single [`lock::SyncLock`] so an upload batch and a download
//! batch never interleave — the same discipline `oferchen-rsync` uses its
//! generation lock for, adapted to be re-entrant per `tokio` task rather
//! than per OS thread, since a batch may suspend across `.await` points.
//!
//! A second, OS-level lock (itself `lockfile::RootLock`, backed by
//! `fs2`'s advisory file locking) prevents two daemon processes from ever
//! attaching to the same sync root concurrently.
//!
//! # Invariants
//!
//! - [`Monitor::stop`] never returns while a batch is still in flight: it
//!   clears `running` then acquires the sync lock itself before joining
//!   workers, which blocks until the current batch's guard drops.
//! - A missing sync root is fatal at [`Monitor::start`] time; the daemon
//!   never creates the root on the caller's behalf.
//!
//! # Errors
//!
//! Per-path failures surfacing from either transfer engine are triaged by
//! `errors::SyncError::severity` and recorded in [`Monitor::sync_errors`];
//! only a `Fatal` or `Unauthorized` verdict clears `running`.

mod flags;
mod lock;
mod lockfile;
mod monitor;
mod watcher;

pub use flags::ControlFlags;
pub use lock::{SyncLock, SyncLockGuard};
pub use lockfile::RootLock;
pub use monitor::Monitor;
pub use watcher::RootWatcher;
