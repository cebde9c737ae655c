#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `transfer` applies the two halves of a sync batch: [`upload::UploadEngine`]
//! drives canonical local events onto the remote, and
//! [`download::DownloadEngine`] drives remote change lists onto disk. Both
//! hold the revision index and path mapper in common but never call each
//! other directly — the scheduler in `sync-daemon` serializes them through
//! a single lock so a batch of one never interleaves with a batch of the
//! other.
//!
//! # Design
//!
//! Upload and download are deliberately separate types rather than two
//! methods on one god-object: their failure handling, ordering rules, and
//! concurrency shape differ enough (sequential-with-server-rename-detection
//! versus bounded-parallel-with-conflict-classification) that sharing a type
//! would mean threading unrelated state through both paths.
//!
//! # Errors
//!
//! Both engines report per-path failures as [`errors::SyncError`] and triage
//! them via [`errors::SyncError::severity`] rather than aborting the whole
//! batch on the first failure, matching the rest of this workspace's error
//! handling.

pub mod download;
pub mod upload;

pub use download::DownloadEngine;
pub use upload::{unix_now, UploadEngine};
