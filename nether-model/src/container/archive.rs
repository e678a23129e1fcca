//! Zip archive reader
//!
//! Stored entries are borrowed straight out of the caller's bytes; deflated
//! entries are inflated into owned buffers. Both are checked against the
//! CRC-32 in the central directory.

use std::borrow::Cow;
use std::io::{self, Cursor, Read};

use zip::CompressionMethod;

use crate::error::{ModelError, malformed};

fn corrupt(file: &str, name: &str, e: io::Error) -> ModelError {
    malformed(file, format!("entry '{name}' is corrupt: {e}"))
}

/// One file entry of an [`Archive`].
#[derive(Debug, Clone)]
pub struct ArchiveEntry<'a> {
    pub name: String,
    pub data: Cow<'a, [u8]>,
}

impl ArchiveEntry<'_> {
    /// Whether the entry data aliases the archive input.
    pub fn is_borrowed(&self) -> bool {
        matches!(self.data, Cow::Borrowed(_))
    }

    /// Case-insensitive suffix test on the entry name.
    pub fn has_extension(&self, ext: &str) -> bool {
        let name = self.name.as_bytes();
        let ext = ext.as_bytes();
        name.len() >= ext.len() && name[name.len() - ext.len()..].eq_ignore_ascii_case(ext)
    }
}

/// An in-memory zip archive with every file entry extracted.
#[derive(Debug, Clone, Default)]
pub struct Archive<'a> {
    entries: Vec<ArchiveEntry<'a>>,
}

impl<'a> Archive<'a> {
    /// Read every file entry of a zip archive held in `bytes`.
    pub fn from_bytes(bytes: &'a [u8], file: &str) -> Result<Self, ModelError> {
        let mut zip = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| {
            malformed(file, format!("not a zip archive: {e}"))
        })?;

        let mut entries = Vec::with_capacity(zip.len());
        for index in 0..zip.len() {
            let mut entry = zip.by_index(index)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();

            let data = if entry.compression() == CompressionMethod::Stored {
                let start = usize::try_from(entry.data_start()).ok();
                let size = usize::try_from(entry.size()).ok();
                let slice = start
                    .zip(size)
                    .and_then(|(start, size)| bytes.get(start..start.checked_add(size)?))
                    .ok_or_else(|| malformed(file, format!("entry '{name}' extends past the archive")))?;
                // The reader verifies the checksum once it reaches the end.
                io::copy(&mut entry, &mut io::sink()).map_err(|e| corrupt(file, &name, e))?;
                Cow::Borrowed(slice)
            } else {
                let mut data = Vec::new();
                entry.read_to_end(&mut data).map_err(|e| corrupt(file, &name, e))?;
                Cow::Owned(data)
            };

            tracing::trace!(file = %file, entry = %name, bytes = data.len(), "archive entry");
            entries.push(ArchiveEntry { name, data });
        }

        Ok(Self { entries })
    }

    pub fn from_entries(entries: Vec<ArchiveEntry<'a>>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[ArchiveEntry<'a>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find an entry by name, ignoring ASCII case.
    pub fn find(&self, name: &str) -> Option<&ArchiveEntry<'a>> {
        self.entries.iter().find(|e| e.name.eq_ignore_ascii_case(name))
    }
}
