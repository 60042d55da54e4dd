//! Writes resolved entries to disk.

use crate::error::{ExtractError, SecurityError};
use crate::root::ExtractionRoot;
use crate::safety::mask_mode;
use crate::types::{ArchiveEntry, EntryKind};
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Component, Path};
use tracing::{debug, warn};

/// Owner bits every extracted directory keeps, so later entries can be
/// written into it.
const DIR_OWNER_BITS: u32 = 0o700;

/// Mode requested for directories created without an entry of their own,
/// before the mask is applied.
const DEFAULT_DIR_MODE: u32 = 0o755;

/// What a successful [`Materializer::apply`] produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Materialized {
    /// A directory now exists at the target.
    Directory,
    /// A regular file with this many bytes was written.
    File {
        /// Bytes copied from the archive
        bytes: u64,
    },
    /// A symbolic link was created.
    Symlink,
}

/// Creates directories, files and symlinks below an [`ExtractionRoot`].
///
/// Targets must come from the resolver. The materializer additionally refuses
/// to write through any symlink that already exists between the root and the
/// target, so a link created by an earlier entry can never redirect a later
/// one.
#[derive(Debug)]
pub struct Materializer<'r> {
    root: &'r Path,
    mode_mask: u32,
}

impl<'r> Materializer<'r> {
    /// Creates a materializer writing below `root`, limiting permissions to
    /// `mode_mask`.
    pub fn new(root: &'r ExtractionRoot, mode_mask: u32) -> Self {
        Self {
            root: root.as_path(),
            mode_mask,
        }
    }

    /// Materializes one entry at `target`, reading file content from
    /// `content`.
    ///
    /// # Errors
    ///
    /// - `UnsafePath` if an existing symlink sits on the way to `target`
    /// - `MalformedStream` if `content` ends before `entry.size` bytes
    /// - `UnsupportedEntry` for `Other` entries
    /// - `IoFailure` for any filesystem error
    pub fn apply<C: Read>(
        &self,
        target: &Path,
        entry: &ArchiveEntry,
        content: &mut C,
    ) -> Result<Materialized, ExtractError> {
        if target == self.root && entry.kind != EntryKind::Directory {
            return Err(ExtractError::io(
                target,
                io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "only a directory entry may name the destination itself",
                ),
            ));
        }

        match entry.kind {
            EntryKind::Directory => {
                self.verify_no_symlinks(target, true)?;
                self.create_directory(target, entry.mode)?;
                Ok(Materialized::Directory)
            }
            EntryKind::RegularFile => {
                self.verify_no_symlinks(target, false)?;
                let bytes = self.write_file(target, entry, content)?;
                Ok(Materialized::File { bytes })
            }
            EntryKind::Symlink => {
                self.verify_no_symlinks(target, false)?;
                let link_target = entry.link_target.as_deref().ok_or_else(|| {
                    ExtractError::MalformedStream(format!(
                        "symlink {} has no target",
                        entry.name.display()
                    ))
                })?;
                self.create_symlink(target, &entry.name, link_target)?;
                Ok(Materialized::Symlink)
            }
            EntryKind::Other(_) => Err(ExtractError::UnsupportedEntry {
                name: entry.name.clone(),
                kind: entry.kind,
            }),
        }
    }

    /// Walks from the root towards `target` and fails on the first existing
    /// component that is a symlink. The walk stops at the first missing
    /// component since nothing below it can exist.
    fn verify_no_symlinks(&self, target: &Path, include_leaf: bool) -> Result<(), ExtractError> {
        let relative = target.strip_prefix(self.root).map_err(|_| {
            ExtractError::UnsafePath(SecurityError::PathTraversal(
                target.display().to_string(),
            ))
        })?;

        let components: Vec<_> = relative.components().collect();
        let checked = if include_leaf {
            components.len()
        } else {
            components.len().saturating_sub(1)
        };

        let mut current = self.root.to_path_buf();
        for component in &components[..checked] {
            current.push(component);
            match fs::symlink_metadata(&current) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    let path = relative.display().to_string();
                    return Err(SecurityError::SymlinkInPath(path).into());
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => break,
                Err(e) => return Err(ExtractError::io(&current, e)),
            }
        }
        Ok(())
    }

    fn create_directory(&self, target: &Path, mode: u32) -> Result<(), ExtractError> {
        match fs::symlink_metadata(target) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(ExtractError::io(
                    target,
                    io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        "a non-directory already exists at this path",
                    ),
                ))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => self.create_missing_dirs(target)?,
            Err(e) => return Err(ExtractError::io(target, e)),
        }

        // The root keeps the mode it was prepared with.
        if target != self.root {
            set_mode(target, mask_mode(mode, self.mode_mask) | DIR_OWNER_BITS)?;
        }
        debug!(path = %target.display(), "directory ready");
        Ok(())
    }

    fn write_file<C: Read>(
        &self,
        target: &Path,
        entry: &ArchiveEntry,
        content: &mut C,
    ) -> Result<u64, ExtractError> {
        // Archives are not required to list directories before their files.
        if let Some(parent) = target.parent() {
            self.create_missing_dirs(parent)?;
        }

        remove_existing_symlink(target)?;

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(target)
            .map_err(|e| ExtractError::io(target, e))?;
        let mut writer = BufWriter::with_capacity(64 * 1024, file);

        let copied = io::copy(&mut content.by_ref().take(entry.size), &mut writer)
            .map_err(|e| ExtractError::io(target, e))?;
        writer.flush().map_err(|e| ExtractError::io(target, e))?;
        drop(writer);

        if copied != entry.size {
            // Earlier entries stay; the half-written file does not.
            if let Err(e) = fs::remove_file(target) {
                warn!(path = %target.display(), error = %e, "cannot remove truncated file");
            }
            return Err(ExtractError::MalformedStream(format!(
                "truncated entry {}: expected {} bytes, got {}",
                entry.name.display(),
                entry.size,
                copied
            )));
        }

        set_mode(target, mask_mode(entry.mode, self.mode_mask))?;
        debug!(path = %target.display(), bytes = copied, "file written");
        Ok(copied)
    }

    fn create_symlink(
        &self,
        target: &Path,
        name: &Path,
        link_target: &Path,
    ) -> Result<(), ExtractError> {
        self.verify_link_climbs(target, name, link_target)?;
        if let Some(parent) = target.parent() {
            self.create_missing_dirs(parent)?;
        }

        remove_existing_symlink(target)?;
        symlink(link_target, target).map_err(|e| ExtractError::io(target, e))?;
        debug!(
            path = %target.display(),
            target = %link_target.display(),
            "symlink created"
        );
        Ok(())
    }

    /// Mode of a directory the archive never listed.
    fn implicit_dir_mode(&self) -> u32 {
        mask_mode(DEFAULT_DIR_MODE, self.mode_mask) | DIR_OWNER_BITS
    }

    /// Creates every missing directory between the root and `dir`, one level
    /// at a time, each with [`Self::implicit_dir_mode`].
    fn create_missing_dirs(&self, dir: &Path) -> Result<(), ExtractError> {
        let relative = dir.strip_prefix(self.root).map_err(|_| {
            ExtractError::UnsafePath(SecurityError::PathTraversal(dir.display().to_string()))
        })?;

        let mut current = self.root.to_path_buf();
        for component in relative.components() {
            current.push(component);
            match create_dir(&current, self.implicit_dir_mode()) {
                Ok(()) => {
                    // DirBuilder is subject to the process umask
                    set_mode(&current, self.implicit_dir_mode())?;
                    debug!(path = %current.display(), "implicit directory created");
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && is_real_dir(&current) => {}
                Err(e) => return Err(ExtractError::io(&current, e)),
            }
        }
        Ok(())
    }

    /// Every component of a link target that a later `..` climbs out of must
    /// already be a real directory. The kernel resolves `..` against what is
    /// on disk, so a symlink there (or a missing path that a later entry turns
    /// into one) would move the climb outside the root.
    fn verify_link_climbs(
        &self,
        target: &Path,
        name: &Path,
        link_target: &Path,
    ) -> Result<(), ExtractError> {
        let escape = || {
            ExtractError::UnsafePath(SecurityError::SymlinkEscape {
                link: name.display().to_string(),
                target: link_target.display().to_string(),
            })
        };

        let mut current = target.parent().unwrap_or(self.root).to_path_buf();
        let components: Vec<_> = link_target.components().collect();
        for (index, component) in components.iter().enumerate() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    current.pop();
                }
                Component::Normal(part) => {
                    current.push(part);
                    let climbs_out = components[index + 1..]
                        .iter()
                        .any(|later| matches!(later, Component::ParentDir));
                    if climbs_out && !is_real_dir(&current) {
                        return Err(escape());
                    }
                }
                Component::RootDir | Component::Prefix(_) => return Err(escape()),
            }
        }
        Ok(())
    }
}

/// Whether `path` is a directory and not a symlink to one.
fn is_real_dir(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

/// A symlink left at the exact target (by an earlier entry or an earlier run)
/// is replaced rather than followed.
fn remove_existing_symlink(target: &Path) -> Result<(), ExtractError> {
    match fs::symlink_metadata(target) {
        Ok(meta) if meta.file_type().is_symlink() => {
            fs::remove_file(target).map_err(|e| ExtractError::io(target, e))
        }
        _ => Ok(()),
    }
}

#[cfg(unix)]
fn create_dir(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().mode(mode).create(path)
}

#[cfg(not(unix))]
fn create_dir(path: &Path, _mode: u32) -> io::Result<()> {
    fs::DirBuilder::new().create(path)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), ExtractError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| ExtractError::io(path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), ExtractError> {
    Ok(())
}

#[cfg(unix)]
fn symlink(link_target: &Path, path: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(link_target, path)
}

#[cfg(not(unix))]
fn symlink(_link_target: &Path, _path: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlinks are only supported on Unix platforms",
    ))
}
