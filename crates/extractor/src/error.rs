//! Error types for archive extraction operations.

use crate::types::EntryKind;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for extraction operations.
///
/// Every variant collapses the extraction to failure. The variants exist so
/// that callers, logs and tests can tell a traversal attempt apart from an
/// ordinary I/O problem.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The archive or the destination directory could not be opened.
    #[error("Cannot open {}: {source}", path.display())]
    OpenFailure {
        /// Path that could not be opened or created
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The archive stream is corrupt (bad header, truncated content).
    #[error("Malformed archive: {0}")]
    MalformedStream(String),

    /// An entry tried to escape the destination directory.
    #[error("Security violation: {0}")]
    UnsafePath(#[from] SecurityError),

    /// The entry kind is not something this extractor materializes.
    #[error("Unsupported entry type {kind} for {}", name.display())]
    UnsupportedEntry {
        /// Declared entry name
        name: PathBuf,
        /// Decoded entry kind
        kind: EntryKind,
    },

    /// A filesystem operation failed while materializing an entry.
    #[error("IO error on {}: {source}", path.display())]
    IoFailure {
        /// Path being written when the error occurred
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The extraction size limit was exceeded.
    #[error("Size limit exceeded: {current} bytes > {limit} bytes")]
    SizeLimitExceeded {
        /// Extracted size in bytes including the offending entry
        current: u64,
        /// Configured size limit in bytes
        limit: u64,
    },
}

impl ExtractError {
    /// Returns `true` if this error was raised by a containment check rather
    /// than by the filesystem or the archive format.
    pub fn is_security_violation(&self) -> bool {
        matches!(self, ExtractError::UnsafePath(_))
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ExtractError::IoFailure {
            path: path.into(),
            source,
        }
    }
}

/// Reasons a path or link target is refused by the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecurityError {
    /// The declared entry name is empty.
    #[error("Empty entry name")]
    EmptyName,

    /// Absolute path not allowed in archive entries.
    #[error("Absolute path not allowed: {0}")]
    AbsolutePath(String),

    /// The entry normalizes to a location outside the destination.
    #[error("{0} escapes destination")]
    PathTraversal(String),

    /// The symlink target resolves outside the destination.
    #[error("symlink {link} -> {target} escapes destination")]
    SymlinkEscape {
        /// Declared link name
        link: String,
        /// Declared link target
        target: String,
    },

    /// A path component on disk between the root and the target is a symlink.
    #[error("{0} traverses an existing symlink")]
    SymlinkInPath(String),
}
