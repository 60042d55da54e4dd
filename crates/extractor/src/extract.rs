//! Archive extraction implementation with security features.
//!
//! The driver pulls entries from the [`EntryReader`], resolves each one with
//! [`safety::resolve`](crate::safety::resolve) and hands the result to the
//! [`Materializer`]. The first error ends the extraction; entries already
//! written stay on disk.

use crate::error::ExtractError;
use crate::materialize::{Materialized, Materializer};
use crate::reader::EntryReader;
use crate::root::ExtractionRoot;
use crate::safety::{check_size_limits, is_safe_entry_type, resolve, Rejection, ResolvedTarget};
use crate::types::{ArchiveEntry, EntryKind, ExtractOptions, ExtractStats};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Progress of a single extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractState {
    /// Nothing opened yet
    Idle,
    /// Waiting for the next entry
    Reading,
    /// Checking where the current entry may land
    Resolving,
    /// Materializing the current entry
    Writing,
    /// End of stream reached without error
    Done,
    /// Stopped on the first error
    Failed,
}

impl ExtractState {
    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: ExtractState) -> bool {
        use ExtractState::*;
        matches!(
            (self, next),
            (Idle, Reading)
                | (Idle, Failed)
                | (Reading, Resolving)
                | (Reading, Done)
                | (Reading, Failed)
                | (Resolving, Writing)
                | (Resolving, Reading)
                | (Resolving, Failed)
                | (Writing, Reading)
                | (Writing, Failed)
        )
    }

    /// `Done` and `Failed` end the extraction.
    pub fn is_terminal(self) -> bool {
        matches!(self, ExtractState::Done | ExtractState::Failed)
    }
}

/// Extract the tar archive at `archive_path` into `output_dir`.
///
/// The archive handle is closed on every exit path when it goes out of scope.
pub fn extract_archive_file(
    archive_path: &Path,
    output_dir: &Path,
    options: &ExtractOptions,
) -> Result<ExtractStats, ExtractError> {
    let file = File::open(archive_path).map_err(|source| {
        error!(archive = %archive_path.display(), error = %source, "cannot open archive");
        ExtractError::OpenFailure {
            path: archive_path.to_path_buf(),
            source,
        }
    })?;

    info!(
        archive = %archive_path.display(),
        destination = %output_dir.display(),
        "extracting archive"
    );
    extract_stream(BufReader::new(file), output_dir, options)
}

/// Extract a tar stream into `output_dir`.
pub fn extract_stream<R: Read>(
    reader: R,
    output_dir: &Path,
    options: &ExtractOptions,
) -> Result<ExtractStats, ExtractError> {
    let start_time = Instant::now();
    let mut extraction = Extraction::new(options);

    let result = ExtractionRoot::prepare(output_dir).and_then(|root| {
        let mut archive = tar::Archive::new(reader);
        let mut entries = EntryReader::new(&mut archive)?;
        extraction.run(&root, &mut entries)
    });

    extraction.stats.duration = start_time.elapsed();
    match result {
        Ok(()) => {
            info!(
                files = extraction.stats.files_extracted,
                directories = extraction.stats.directories_created,
                symlinks = extraction.stats.symlinks_created,
                bytes = extraction.stats.bytes_written,
                "extraction complete"
            );
            Ok(extraction.stats)
        }
        Err(e) => {
            extraction.advance(ExtractState::Failed);
            if e.is_security_violation() {
                warn!(error = %e, "extraction aborted on unsafe entry");
            } else {
                error!(error = %e, "extraction failed");
            }
            Err(e)
        }
    }
}

struct Extraction<'o> {
    options: &'o ExtractOptions,
    state: ExtractState,
    stats: ExtractStats,
}

impl<'o> Extraction<'o> {
    fn new(options: &'o ExtractOptions) -> Self {
        Self {
            options,
            state: ExtractState::Idle,
            stats: ExtractStats::default(),
        }
    }

    fn advance(&mut self, next: ExtractState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        trace!(from = ?self.state, to = ?next, "extraction state");
        self.state = next;
    }

    fn run<R: Read>(
        &mut self,
        root: &ExtractionRoot,
        entries: &mut EntryReader<'_, R>,
    ) -> Result<(), ExtractError> {
        let materializer = Materializer::new(root, self.options.mode_mask);

        loop {
            self.advance(ExtractState::Reading);
            let Some(next) = entries.next_entry()? else {
                self.advance(ExtractState::Done);
                return Ok(());
            };

            self.advance(ExtractState::Resolving);
            let (entry, mut content) = next.into_parts();
            let Some(entry) = strip_entry(entry, self.options.strip_components) else {
                self.stats.entries_skipped += 1;
                continue;
            };
            let target = self.resolve(root, &entry)?;

            self.advance(ExtractState::Writing);
            check_size_limits(
                self.stats.bytes_written.saturating_add(bytes_to_write(&entry)),
                self.options.size_limit_bytes,
            )?;

            match materializer.apply(&target, &entry, &mut content)? {
                Materialized::Directory => self.stats.directories_created += 1,
                Materialized::File { bytes } => {
                    self.stats.files_extracted += 1;
                    self.stats.bytes_written += bytes;
                }
                Materialized::Symlink => self.stats.symlinks_created += 1,
            }
            debug!(entry = %entry.name.display(), kind = %entry.kind, "materialized");
        }
    }

    fn resolve(&self, root: &ExtractionRoot, entry: &ArchiveEntry) -> Result<PathBuf, ExtractError> {
        let resolved = if is_safe_entry_type(entry.kind, self.options) {
            resolve(root.as_path(), entry)
        } else {
            ResolvedTarget::Rejected(Rejection::UnsupportedEntryType(entry.kind))
        };

        if let ResolvedTarget::Rejected(reason) = &resolved {
            warn!(
                entry = %entry.name.display(),
                kind = %entry.kind,
                reason = %reason,
                "rejected archive entry"
            );
        }
        resolved.into_result(entry)
    }
}

/// Bytes an entry will write to disk.
fn bytes_to_write(entry: &ArchiveEntry) -> u64 {
    match entry.kind {
        EntryKind::RegularFile => entry.size,
        _ => 0,
    }
}

/// Apply `strip_components` to an entry name. Returns `None` when nothing is
/// left to extract.
///
/// Rooted names are passed through untouched so the resolver still sees, and
/// refuses, them.
fn strip_entry(mut entry: ArchiveEntry, count: u32) -> Option<ArchiveEntry> {
    if count == 0 || entry.name.has_root() || entry.name.is_absolute() {
        return Some(entry);
    }

    let stripped = strip_path_components(&entry.name, count);
    if stripped.as_os_str().is_empty() {
        debug!(entry = %entry.name.display(), "entry consumed by strip_components");
        return None;
    }
    entry.name = stripped;
    Some(entry)
}

/// Strip leading path components from a path. `.` components are not
/// counted.
fn strip_path_components(path: &Path, count: u32) -> PathBuf {
    if count == 0 {
        return path.to_path_buf();
    }

    let components: Vec<_> = path
        .components()
        .filter(|component| !matches!(component, Component::CurDir))
        .collect();
    let skip = count as usize;

    if skip >= components.len() {
        return PathBuf::new();
    }

    components[skip..].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_path_components() {
        // No stripping
        let path = Path::new("a/b/c/file.txt");
        assert_eq!(strip_path_components(path, 0), path);

        // Strip 1 component
        assert_eq!(strip_path_components(path, 1), Path::new("b/c/file.txt"));

        // Strip 3 components
        assert_eq!(strip_path_components(path, 3), Path::new("file.txt"));

        // Strip more than available
        assert_eq!(strip_path_components(path, 4), PathBuf::new());
        assert_eq!(strip_path_components(path, 10), PathBuf::new());

        // Leading "./" is not a component
        assert_eq!(
            strip_path_components(Path::new("./pkg/bin/tool"), 1),
            Path::new("bin/tool")
        );
    }

    #[test]
    fn test_strip_entry_keeps_absolute_names() {
        let entry = ArchiveEntry {
            name: PathBuf::from("/etc/passwd"),
            kind: EntryKind::RegularFile,
            mode: 0o644,
            size: 0,
            link_target: None,
        };
        let stripped = strip_entry(entry, 1).unwrap();
        assert_eq!(stripped.name, PathBuf::from("/etc/passwd"));
    }

    #[test]
    fn test_strip_entry_consumes_top_level() {
        let entry = ArchiveEntry {
            name: PathBuf::from("pkg/"),
            kind: EntryKind::Directory,
            mode: 0o755,
            size: 0,
            link_target: None,
        };
        assert!(strip_entry(entry, 1).is_none());
    }

    #[test]
    fn test_state_transitions() {
        use ExtractState::*;

        assert!(Idle.can_transition_to(Reading));
        assert!(Reading.can_transition_to(Resolving));
        assert!(Resolving.can_transition_to(Writing));
        assert!(Writing.can_transition_to(Reading));
        assert!(Reading.can_transition_to(Done));
        assert!(Resolving.can_transition_to(Failed));
        assert!(Writing.can_transition_to(Failed));

        assert!(!Idle.can_transition_to(Writing));
        assert!(!Resolving.can_transition_to(Done));
        assert!(!Done.can_transition_to(Reading));
        assert!(!Failed.can_transition_to(Reading));

        assert!(Done.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Writing.is_terminal());
    }
}
