//! Sequential decoding of tar entries.
//!
//! The reader turns the `tar` crate's entry stream into [`ArchiveEntry`]
//! records plus a content handle. It never touches the filesystem.

use crate::error::ExtractError;
use crate::types::{ArchiveEntry, EntryKind};
use std::io::{self, Read};
use tracing::{debug, trace};

/// Pulls entries out of a tar stream in archive order.
///
/// Once the end of the stream or a read error has been returned, the reader
/// is fused and every further call yields `Ok(None)`.
pub struct EntryReader<'a, R: 'a + Read> {
    entries: Option<tar::Entries<'a, R>>,
    position: u64,
}

/// One decoded entry together with its unread content.
pub struct StreamEntry<'a, R: 'a + Read> {
    entry: ArchiveEntry,
    content: tar::Entry<'a, R>,
}

/// Content of a single entry. Yields at most the declared number of bytes,
/// fewer if the underlying stream ends early.
pub struct EntryContent<'a, R: 'a + Read>(tar::Entry<'a, R>);

impl<'a, R: 'a + Read> EntryReader<'a, R> {
    /// Start reading entries from an archive that has not been read yet.
    pub fn new(archive: &'a mut tar::Archive<R>) -> Result<Self, ExtractError> {
        let entries = archive.entries().map_err(malformed)?;
        Ok(Self {
            entries: Some(entries),
            position: 0,
        })
    }

    /// Decode the next entry.
    ///
    /// Returns `Ok(None)` at end of stream and `Err(MalformedStream)` for a
    /// truncated or corrupt header.
    pub fn next_entry(&mut self) -> Result<Option<StreamEntry<'a, R>>, ExtractError> {
        loop {
            let Some(entries) = self.entries.as_mut() else {
                return Ok(None);
            };

            let raw = match entries.next() {
                None => {
                    trace!(entries = self.position, "end of archive stream");
                    self.entries = None;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    self.entries = None;
                    return Err(malformed(e));
                }
                Some(Ok(raw)) => raw,
            };

            // Global PAX records only carry defaults for later headers.
            if raw.header().entry_type().is_pax_global_extensions() {
                debug!("skipping pax global header");
                continue;
            }

            let entry = match decode(&raw) {
                Ok(entry) => entry,
                Err(e) => {
                    self.entries = None;
                    return Err(e);
                }
            };
            self.position += 1;

            return Ok(Some(StreamEntry {
                entry,
                content: raw,
            }));
        }
    }
}

impl<'a, R: 'a + Read> StreamEntry<'a, R> {
    /// Declared metadata of this entry.
    pub fn entry(&self) -> &ArchiveEntry {
        &self.entry
    }

    /// Split into metadata and a reader over the content.
    pub fn into_parts(self) -> (ArchiveEntry, EntryContent<'a, R>) {
        (self.entry, EntryContent(self.content))
    }
}

impl<'a, R: 'a + Read> Read for EntryContent<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

/// Map a tar typeflag onto the closed set of kinds the extractor knows.
pub fn kind_of(entry_type: tar::EntryType) -> EntryKind {
    if entry_type.is_file() || entry_type.is_contiguous() {
        EntryKind::RegularFile
    } else if entry_type.is_dir() {
        EntryKind::Directory
    } else if entry_type.is_symlink() {
        EntryKind::Symlink
    } else {
        EntryKind::Other(entry_type.as_byte())
    }
}

fn decode<R: Read>(raw: &tar::Entry<'_, R>) -> Result<ArchiveEntry, ExtractError> {
    let header = raw.header();
    let name = raw.path().map_err(malformed)?.into_owned();
    let kind = kind_of(header.entry_type());
    let mode = header.mode().map_err(malformed)?;

    let link_target = if kind == EntryKind::Symlink {
        let target = raw
            .link_name()
            .map_err(malformed)?
            .map(|target| target.into_owned())
            .filter(|target| !target.as_os_str().is_empty());
        match target {
            Some(target) => Some(target),
            None => {
                return Err(ExtractError::MalformedStream(format!(
                    "symlink {} has no target",
                    name.display()
                )))
            }
        }
    } else {
        None
    };

    Ok(ArchiveEntry {
        name,
        kind,
        mode,
        size: raw.size(),
        link_target,
    })
}

fn malformed(e: io::Error) -> ExtractError {
    ExtractError::MalformedStream(e.to_string())
}
