//! # Tar Extractor
//!
//! Contained extraction of untrusted tar archives.
//!
//! Every entry of the archive is resolved against the destination directory
//! before anything touches the filesystem. Entries that would land outside
//! the destination (`../x`, absolute names, symlinks pointing out) are
//! refused, device nodes and hard links are never materialized, and the
//! permission bits an archive asks for are masked before they are applied.
//!
//! Extraction is all-or-partial: the first failure stops it, and whatever was
//! written before stays on disk.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tar_extractor::{extract, extract_archive, probe, ExtractOptions};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Boolean boundary
//! if !extract_archive(Path::new("bundle.tar"), Path::new("output")) {
//!     eprintln!("extraction failed");
//! }
//!
//! // Structured errors and statistics
//! let stats = extract(
//!     Path::new("bundle.tar"),
//!     Path::new("output"),
//!     &ExtractOptions::default(),
//! )?;
//! println!("Extracted {} files ({} bytes)", stats.files_extracted, stats.bytes_written);
//!
//! // List entries without extracting
//! let info = probe(Path::new("bundle.tar"))?;
//! println!("Entries: {}", info.entries);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod extract;
pub mod materialize;
pub mod probe;
pub mod reader;
pub mod root;
pub mod safety;
pub mod types;

// Re-export main types
pub use error::{ExtractError, SecurityError};
pub use extract::ExtractState;
pub use root::ExtractionRoot;
pub use safety::{Rejection, ResolvedTarget};
pub use types::{ArchiveEntry, ArchiveInfo, EntryKind, ExtractOptions, ExtractStats};

use std::io::Read;
use std::path::Path;

/// Extract the archive at `archive_path` into `destination_root` with default
/// options.
///
/// Returns `true` iff every entry was read, resolved inside the destination
/// and written. Any failure (missing archive, corrupt header, traversal
/// attempt, unsupported entry, I/O error) yields `false`; use [`extract`] to
/// find out which.
pub fn extract_archive(archive_path: &Path, destination_root: &Path) -> bool {
    extract(archive_path, destination_root, &ExtractOptions::default()).is_ok()
}

/// Extract an archive to the specified output directory.
///
/// # Errors
///
/// Returns an error if:
/// - The archive or the destination cannot be opened
/// - A header is corrupt or file content is truncated
/// - An entry would escape the destination
/// - An entry kind is not supported
/// - The size limit is exceeded
/// - I/O errors occur
pub fn extract(
    archive_path: &Path,
    output_dir: &Path,
    options: &ExtractOptions,
) -> Result<ExtractStats, ExtractError> {
    extract::extract_archive_file(archive_path, output_dir, options)
}

/// Extract a tar stream from any reader.
///
/// # Errors
///
/// Same as [`extract`], except that there is no archive file to open.
pub fn extract_from_reader<R: Read>(
    reader: R,
    output_dir: &Path,
    options: &ExtractOptions,
) -> Result<ExtractStats, ExtractError> {
    extract::extract_stream(reader, output_dir, options)
}

/// Probe an archive to retrieve metadata without extracting.
///
/// # Errors
///
/// Returns an error if the archive cannot be opened or a header is corrupt.
pub fn probe(path: &Path) -> Result<ArchiveInfo, ExtractError> {
    probe::probe_archive(path)
}
