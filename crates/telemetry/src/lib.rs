#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! Thin `tracing` bootstrap shared by the demo binary and by tests that want
//! human-readable span output. The rest of the workspace never calls into a
//! subscriber directly; crates just emit `tracing::info_span!`/`debug!` calls
//! behind their own optional `tracing` feature, the same layering used
//! across this workspace's `logging`/`core`/`daemon` crates.
//!
//! # Design
//!
//! Span names are kept flat and behavior-named so log aggregation can filter
//! on them directly: `upload_batch`, `download_batch`, `normalize`,
//! `conflict_check`, `connection_probe`. See [`spans`] for the canonical
//! constants.

/// Canonical span-name constants, kept here so every crate names its spans
/// consistently instead of hand-rolling string literals.
pub mod spans {
    /// Span covering one full upload-engine batch.
    pub const UPLOAD_BATCH: &str = "upload_batch";
    /// Span covering one full download-engine batch.
    pub const DOWNLOAD_BATCH: &str = "download_batch";
    /// Span covering one normalizer pass over a burst of local events.
    pub const NORMALIZE: &str = "normalize";
    /// Span covering one conflict-detector verdict.
    pub const CONFLICT_CHECK: &str = "conflict_check";
    /// Span covering one connection-probe tick.
    pub const CONNECTION_PROBE: &str = "connection_probe";
}

#[cfg(feature = "tracing")]
mod subscriber {
    use tracing_subscriber::EnvFilter;

    /// Installs a global `tracing` subscriber that honors `RUST_LOG`,
    /// falling back to `info` when the variable is unset.
    ///
    /// Intended for the demo binary and for tests that opt into human
    /// readable output (most unit tests assert on in-memory state instead and
    /// never call this).
    ///
    /// # Panics
    ///
    /// Panics if a global subscriber has already been installed; callers are
    /// expected to call this at most once per process.
    pub fn init_tracing() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

#[cfg(feature = "tracing")]
pub use subscriber::init_tracing;
