//! Security and safety checks for archive extraction.
//!
//! This module decides, from text alone, where an archive entry may land.
//! Nothing here consults the filesystem: the entry name is joined onto the
//! destination root, normalized lexically and compared component-wise with
//! the root. Symlink targets get the same treatment relative to the link's
//! own directory.

use crate::error::{ExtractError, SecurityError};
use crate::types::{ArchiveEntry, EntryKind, ExtractOptions};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Permission bits that are ever applied to extracted objects.
pub const PERMISSION_BITS: u32 = 0o777;

/// Outcome of resolving one archive entry against the destination root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedTarget {
    /// Absolute, normalized location inside the destination root.
    Allowed(PathBuf),
    /// The entry must not be materialized.
    Rejected(Rejection),
}

/// Why an entry was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The name or link target would leave the destination.
    Unsafe(SecurityError),
    /// The entry kind is never materialized.
    UnsupportedEntryType(EntryKind),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Unsafe(e) => e.fmt(f),
            Rejection::UnsupportedEntryType(_) => f.write_str("unsupported entry type"),
        }
    }
}

impl ResolvedTarget {
    /// Convert into the extraction error taxonomy.
    pub fn into_result(self, entry: &ArchiveEntry) -> Result<PathBuf, ExtractError> {
        match self {
            ResolvedTarget::Allowed(path) => Ok(path),
            ResolvedTarget::Rejected(Rejection::Unsafe(e)) => Err(ExtractError::UnsafePath(e)),
            ResolvedTarget::Rejected(Rejection::UnsupportedEntryType(kind)) => {
                Err(ExtractError::UnsupportedEntry {
                    name: entry.name.clone(),
                    kind,
                })
            }
        }
    }
}

/// Resolves an archive entry to a location inside `root`.
///
/// `root` must be absolute and normalized (the extraction root is
/// canonicalized before use). The checks, in order:
///
/// - `Other` entries are refused regardless of their name
/// - empty, absolute and drive-prefixed names are refused
/// - `root.join(name)`, normalized, must be `root` or lie below it
/// - a symlink's target, taken relative to the link's directory, must also
///   normalize to a location below `root`
///
/// # Examples
///
/// ```
/// use std::path::{Path, PathBuf};
/// use tar_extractor::safety::{resolve, ResolvedTarget};
/// use tar_extractor::{ArchiveEntry, EntryKind};
///
/// let entry = ArchiveEntry {
///     name: PathBuf::from("dir/../file.txt"),
///     kind: EntryKind::RegularFile,
///     mode: 0o644,
///     size: 0,
///     link_target: None,
/// };
/// assert_eq!(
///     resolve(Path::new("/srv/out"), &entry),
///     ResolvedTarget::Allowed(PathBuf::from("/srv/out/file.txt"))
/// );
///
/// let escape = ArchiveEntry { name: PathBuf::from("../../etc/passwd"), ..entry };
/// assert!(matches!(resolve(Path::new("/srv/out"), &escape), ResolvedTarget::Rejected(_)));
/// ```
pub fn resolve(root: &Path, entry: &ArchiveEntry) -> ResolvedTarget {
    if let EntryKind::Other(_) = entry.kind {
        return ResolvedTarget::Rejected(Rejection::UnsupportedEntryType(entry.kind));
    }

    let target = match resolve_entry_path(root, &entry.name) {
        Ok(target) => target,
        Err(e) => return ResolvedTarget::Rejected(Rejection::Unsafe(e)),
    };

    if entry.kind == EntryKind::Symlink {
        let link_target = entry.link_target.as_deref().unwrap_or(Path::new(""));
        if let Err(e) = check_symlink_target(root, &target, &entry.name, link_target) {
            return ResolvedTarget::Rejected(Rejection::Unsafe(e));
        }
    }

    ResolvedTarget::Allowed(target)
}

/// Joins `name` onto `root` and verifies the result stays inside `root`.
pub fn resolve_entry_path(root: &Path, name: &Path) -> Result<PathBuf, SecurityError> {
    if name.as_os_str().is_empty() {
        return Err(SecurityError::EmptyName);
    }

    if name.has_root() || name.is_absolute() || has_prefix(name) {
        return Err(SecurityError::AbsolutePath(name.display().to_string()));
    }

    let resolved = normalize_lexically(&root.join(name));
    if !is_contained(root, &resolved) {
        return Err(SecurityError::PathTraversal(name.display().to_string()));
    }

    Ok(resolved)
}

/// Verifies a symlink created at `link_path` pointing at `target` cannot reach
/// outside `root`.
fn check_symlink_target(
    root: &Path,
    link_path: &Path,
    link_name: &Path,
    target: &Path,
) -> Result<(), SecurityError> {
    let escape = || SecurityError::SymlinkEscape {
        link: link_name.display().to_string(),
        target: target.display().to_string(),
    };

    // A link replacing the root itself would redirect every later entry.
    if link_path == root {
        return Err(SecurityError::PathTraversal(link_name.display().to_string()));
    }

    if target.as_os_str().is_empty()
        || target.has_root()
        || target.is_absolute()
        || has_prefix(target)
    {
        return Err(escape());
    }

    let link_dir = link_path.parent().unwrap_or(root);
    let resolved = normalize_lexically(&link_dir.join(target));
    if !is_contained(root, &resolved) {
        return Err(escape());
    }

    Ok(())
}

/// Resolves `.` and `..` components without touching the filesystem.
///
/// `..` at the filesystem root stays at the root.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// `Path::starts_with` compares whole components, so `/out-evil` is not
/// inside `/out`.
fn is_contained(root: &Path, candidate: &Path) -> bool {
    candidate.starts_with(root)
}

fn has_prefix(path: &Path) -> bool {
    path.components()
        .any(|component| matches!(component, Component::Prefix(_)))
}

/// Applies the permission ceiling to a declared mode.
///
/// The result never exceeds the declared bits, never exceeds `mask`, and
/// never carries setuid, setgid or sticky bits.
///
/// # Examples
///
/// ```
/// use tar_extractor::safety::mask_mode;
///
/// assert_eq!(mask_mode(0o4777, 0o755), 0o755);
/// assert_eq!(mask_mode(0o600, 0o755), 0o600);
/// assert_eq!(mask_mode(0o666, 0o755), 0o644);
/// ```
pub fn mask_mode(mode: u32, mask: u32) -> u32 {
    mode & mask & PERMISSION_BITS
}

/// Checks if the current extracted size exceeds the configured limit.
///
/// # Examples
///
/// ```
/// use tar_extractor::safety::check_size_limits;
///
/// // Within limit
/// assert!(check_size_limits(1000, Some(2000)).is_ok());
///
/// // Exceeds limit
/// assert!(check_size_limits(3000, Some(2000)).is_err());
///
/// // No limit
/// assert!(check_size_limits(999_999_999, None).is_ok());
/// ```
pub fn check_size_limits(current_bytes: u64, limit: Option<u64>) -> Result<(), ExtractError> {
    if let Some(max_bytes) = limit {
        if current_bytes > max_bytes {
            return Err(ExtractError::SizeLimitExceeded {
                current: current_bytes,
                limit: max_bytes,
            });
        }
    }
    Ok(())
}

/// Determines if an entry kind may be extracted under the given options.
///
/// Regular files and directories are always allowed, symlinks only when
/// `allow_symlinks` is set, everything else never.
///
/// # Examples
///
/// ```
/// use tar_extractor::safety::is_safe_entry_type;
/// use tar_extractor::{EntryKind, ExtractOptions};
///
/// let mut options = ExtractOptions::default();
/// assert!(is_safe_entry_type(EntryKind::Symlink, &options));
///
/// options.allow_symlinks = false;
/// assert!(!is_safe_entry_type(EntryKind::Symlink, &options));
/// assert!(!is_safe_entry_type(EntryKind::Other(b'3'), &options));
/// ```
pub fn is_safe_entry_type(kind: EntryKind, options: &ExtractOptions) -> bool {
    match kind {
        EntryKind::RegularFile | EntryKind::Directory => true,
        EntryKind::Symlink => options.allow_symlinks,
        EntryKind::Other(_) => false,
    }
}
