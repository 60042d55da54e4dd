//! Type definitions for archive extraction.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Kind of filesystem object an archive entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Regular file with content
    RegularFile,
    /// Directory
    Directory,
    /// Symbolic link
    Symlink,
    /// Hard links, device nodes, FIFOs, sparse files. Carries the raw typeflag.
    Other(u8),
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::RegularFile => f.write_str("regular file"),
            EntryKind::Directory => f.write_str("directory"),
            EntryKind::Symlink => f.write_str("symlink"),
            EntryKind::Other(flag) if flag.is_ascii_graphic() => {
                write!(f, "other (typeflag '{}')", *flag as char)
            }
            EntryKind::Other(flag) => write!(f, "other (typeflag {:#04x})", flag),
        }
    }
}

/// Individual entry within an archive, as declared by the archive.
///
/// Every field is untrusted input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    /// Path of the entry within the archive
    pub name: PathBuf,

    /// What the entry describes
    pub kind: EntryKind,

    /// Requested permission bits
    pub mode: u32,

    /// Declared content length in bytes
    pub size: u64,

    /// Declared link destination, only set for symlinks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_target: Option<PathBuf>,
}

/// Metadata information about an archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveInfo {
    /// Archive format
    pub format: String,

    /// Number of entries in the archive
    pub entries: u64,

    /// Size of the archive file in bytes
    pub archive_bytes: u64,

    /// Sum of declared regular-file sizes
    pub uncompressed_estimate: u64,

    /// List of all entries in the archive
    pub entry_list: Vec<ArchiveEntry>,
}

/// Options for extracting an archive.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Ceiling applied to every declared mode (`mode & mode_mask & 0o777`)
    pub mode_mask: u32,

    /// Whether to materialize symbolic links (rejected as unsupported otherwise)
    pub allow_symlinks: bool,

    /// Number of leading path components to strip from entry names
    pub strip_components: u32,

    /// Maximum total extracted size in bytes (default: 20 GB)
    pub size_limit_bytes: Option<u64>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            mode_mask: 0o755,
            allow_symlinks: true,
            strip_components: 0,
            size_limit_bytes: Some(20 * 1024 * 1024 * 1024), // 20 GB
        }
    }
}

/// Statistics about a completed extraction operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractStats {
    /// Number of regular files written
    pub files_extracted: u64,

    /// Number of directory entries materialized
    pub directories_created: u64,

    /// Number of symbolic links created
    pub symlinks_created: u64,

    /// Entries dropped entirely by `strip_components`
    pub entries_skipped: u64,

    /// Total bytes written to disk
    pub bytes_written: u64,

    /// Duration of the extraction operation (in seconds)
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

// Helper module for Duration serialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_kind_display() {
        assert_eq!(EntryKind::RegularFile.to_string(), "regular file");
        assert_eq!(EntryKind::Other(b'3').to_string(), "other (typeflag '3')");
        assert_eq!(EntryKind::Other(0x7f).to_string(), "other (typeflag 0x7f)");
    }

    #[test]
    fn test_default_options() {
        let options = ExtractOptions::default();
        assert_eq!(options.mode_mask, 0o755);
        assert!(options.allow_symlinks);
        assert_eq!(options.strip_components, 0);
        assert_eq!(options.size_limit_bytes, Some(20 * 1024 * 1024 * 1024));
    }
}
