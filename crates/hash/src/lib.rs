#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `hash` computes the remote's whole-file content hash: each 4 MiB block of
//! the file is hashed with SHA-256, the resulting block digests are
//! concatenated in order, and that concatenation is hashed again with
//! SHA-256. The result is a single hex string that is stable for identical
//! file contents regardless of how the file was produced, which is exactly
//! what the conflict detector needs to tell "truly identical" apart from
//! "merely same revision tag."
//!
//! # Design
//!
//! [`ContentHasher`] streams input through [`ContentHasher::update`] the same
//! way the rest of this workspace's digest wrappers do, so callers can feed
//! it a file in fixed-size reads without holding the whole thing in memory.
//! [`hash_file`] is the common-case convenience wrapper around a [`Path`].
//!
//! # Invariants
//!
//! - The block size is fixed at 4 MiB and is not configurable: changing it
//!   would silently break compatibility with hashes recorded before the
//!   change.
//! - [`ContentHasher::update`] never panics; it accepts any slice length,
//!   including zero, and correctly spans block boundaries across multiple
//!   calls.
//!
//! # Examples
//!
//! ```
//! use hash::ContentHasher;
//!
//! let mut hasher = ContentHasher::new();
//! hasher.update(b"hello ");
//! hasher.update(b"world");
//! let digest = hasher.finalize();
//! assert_eq!(digest.len(), 64);
//! ```

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Size of each block hashed independently, matching the remote's own
/// content-hash algorithm.
pub const BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// Failures computing the content hash of a file on disk.
#[derive(Debug, Error)]
pub enum HashError {
    /// The file could not be opened or read.
    #[error("could not hash {path}: {source}")]
    Io {
        /// The file that failed.
        path: std::path::PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Streaming content hasher. Accumulates input into 4 MiB blocks, hashing
/// each block with SHA-256 as it completes, and combines the block digests
/// into one final SHA-256 on [`ContentHasher::finalize`].
#[derive(Default)]
pub struct ContentHasher {
    block: Vec<u8>,
    block_digests: Vec<[u8; 32]>,
}

impl ContentHasher {
    /// Creates an empty hasher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            block: Vec::with_capacity(BLOCK_SIZE),
            block_digests: Vec::new(),
        }
    }

    /// Feeds `data` into the hasher. May be called any number of times with
    /// slices of any length, including empty ones; block boundaries are
    /// tracked internally and never depend on the caller's chunking.
    pub fn update(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let space = BLOCK_SIZE - self.block.len();
            let take = space.min(data.len());
            self.block.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.block.len() == BLOCK_SIZE {
                self.flush_block();
            }
        }
    }

    fn flush_block(&mut self) {
        if self.block.is_empty() {
            return;
        }
        let mut sha = Sha256::new();
        sha.update(&self.block);
        self.block_digests.push(sha.finalize().into());
        self.block.clear();
    }

    /// Finalizes the hash, returning its lowercase hex representation.
    ///
    /// Calling `finalize` consumes any partial trailing block (even if it is
    /// empty, matching the behavior of hashing a zero-byte file).
    #[must_use]
    pub fn finalize(mut self) -> String {
        if !self.block.is_empty() || self.block_digests.is_empty() {
            self.flush_block();
        }

        let mut combined = Sha256::new();
        for digest in &self.block_digests {
            combined.update(digest);
        }
        hex::encode(combined.finalize())
    }
}

/// Computes the content hash of the file at `path`, streaming it through a
/// fixed-size read buffer rather than loading it whole.
///
/// # Errors
///
/// Returns [`HashError::Io`] if the file cannot be opened or a read fails
/// partway through.
pub fn hash_file(path: &Path) -> Result<String, HashError> {
    let mut file = File::open(path).map_err(|source| HashError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut hasher = ContentHasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf).map_err(|source| HashError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hasher.finalize())
}

/// Minimal hex encoder so this crate does not need a dependency just for
/// lowercase hex formatting of a 32-byte digest.
mod hex {
    pub(crate) fn encode(bytes: impl AsRef<[u8]>) -> String {
        let bytes = bytes.as_ref();
        let mut out = String::with_capacity(bytes.len() * 2);
        for byte in bytes {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }
}
