//! Archive probing functionality for reading metadata without extraction.

use crate::error::ExtractError;
use crate::reader::EntryReader;
use crate::types::{ArchiveEntry, ArchiveInfo, EntryKind};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::debug;

/// Probe an archive to retrieve metadata without extracting.
///
/// Every entry header is decoded, so a corrupt archive fails here the same
/// way it would fail during extraction. Entry names are reported as declared;
/// no containment check is applied.
///
/// # Errors
///
/// Returns an error if:
/// - The archive file doesn't exist or cannot be opened
/// - A header is truncated or corrupt
pub fn probe_archive(path: &Path) -> Result<ArchiveInfo, ExtractError> {
    let open_failure = |source| ExtractError::OpenFailure {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(open_failure)?;
    let archive_bytes = file.metadata().map_err(open_failure)?.len();

    let entry_list = list_entries(BufReader::new(file))?;
    debug!(archive = %path.display(), entries = entry_list.len(), "probed archive");

    Ok(ArchiveInfo {
        format: "TAR".to_string(),
        entries: entry_list.len() as u64,
        archive_bytes,
        uncompressed_estimate: entry_list
            .iter()
            .filter(|entry| entry.kind == EntryKind::RegularFile)
            .map(|entry| entry.size)
            .sum(),
        entry_list,
    })
}

/// Decode every entry header of a tar stream.
pub fn list_entries<R: Read>(reader: R) -> Result<Vec<ArchiveEntry>, ExtractError> {
    let mut archive = tar::Archive::new(reader);
    let mut entries = EntryReader::new(&mut archive)?;

    let mut listed = Vec::new();
    while let Some(next) = entries.next_entry()? {
        listed.push(next.entry().clone());
    }
    Ok(listed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::path::PathBuf;

    #[test]
    fn test_list_entries_reports_declared_names() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        header.set_mode(0o777);
        builder
            .append_link(&mut header, "link", "../../outside")
            .unwrap();
        let bytes = builder.into_inner().unwrap();

        let entries = list_entries(&bytes[..]).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, EntryKind::Symlink);
        assert_eq!(
            entries[0].link_target,
            Some(PathBuf::from("../../outside"))
        );
    }

    #[test]
    fn test_list_entries_empty_stream() {
        assert!(list_entries(io::empty()).unwrap().is_empty());
    }
}
