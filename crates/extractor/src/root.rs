//! The destination directory of an extraction.

use crate::error::ExtractError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Mode given to a destination directory that did not exist yet.
pub const ROOT_DIR_MODE: u32 = 0o755;

/// A destination directory that exists and is represented by its canonical,
/// absolute path.
///
/// Every path produced by the resolver is compared against this path, so it
/// must not contain symlinks or `..` components itself. Canonicalizing once up
/// front guarantees that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRoot(PathBuf);

impl ExtractionRoot {
    /// Creates the directory if absent (mode `0755`) and canonicalizes it.
    ///
    /// # Errors
    ///
    /// Returns `OpenFailure` if the directory cannot be created, is not a
    /// directory, or cannot be canonicalized.
    pub fn prepare(path: &Path) -> Result<Self, ExtractError> {
        let open_failure = |source: io::Error| ExtractError::OpenFailure {
            path: path.to_path_buf(),
            source,
        };

        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(open_failure(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "destination exists and is not a directory",
                )))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                create_root_dir(path).map_err(open_failure)?;
                debug!(path = %path.display(), "created destination directory");
            }
            Err(e) => return Err(open_failure(e)),
        }

        let canonical = path.canonicalize().map_err(open_failure)?;
        Ok(Self(canonical))
    }

    /// Returns the canonical path.
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for ExtractionRoot {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

#[cfg(unix)]
fn create_root_dir(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::{DirBuilderExt, PermissionsExt};

    fs::DirBuilder::new()
        .recursive(true)
        .mode(ROOT_DIR_MODE)
        .create(path)?;
    // DirBuilder is subject to the process umask
    fs::set_permissions(path, fs::Permissions::from_mode(ROOT_DIR_MODE))
}

#[cfg(not(unix))]
fn create_root_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_prepare_existing_directory() {
        let temp = TempDir::new().unwrap();
        let root = ExtractionRoot::prepare(temp.path()).unwrap();
        assert_eq!(root.as_path(), temp.path().canonicalize().unwrap());
    }

    #[test]
    fn test_prepare_creates_missing_directory() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("nested/output");

        let root = ExtractionRoot::prepare(&dest).unwrap();
        assert!(dest.is_dir());
        assert!(root.as_path().is_absolute());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&dest).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, ROOT_DIR_MODE);
        }
    }

    #[test]
    fn test_prepare_normalizes_dot_dot() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("a")).unwrap();
        let dest = temp.path().join("a/../a");

        let root = ExtractionRoot::prepare(&dest).unwrap();
        assert_eq!(root.as_path(), temp.path().join("a").canonicalize().unwrap());
    }

    #[test]
    fn test_prepare_rejects_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file");
        fs::write(&file, "x").unwrap();

        let result = ExtractionRoot::prepare(&file);
        assert!(matches!(result, Err(ExtractError::OpenFailure { .. })));
    }
}
