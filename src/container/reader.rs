use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::container::format::{
    decode_directory, DirectoryEntry, FileHeader, Trailer, FILE_HEADER_SIZE, TRAILER_SIZE,
};
use crate::container::mmap::MappedFile;
use crate::path::PathStyle;
use crate::{Error, Result};

/// Boxed stream over one entry's raw bytes.
pub type EntryStream<'a> = Box<dyn Read + Send + 'a>;

/// Sealed container opened for reading. Every accessor takes `&self` and
/// slices the mapping, so one handle can serve many threads.
pub struct ContainerReader {
    path: PathBuf,
    map: MappedFile,
    header: FileHeader,
    entries: BTreeMap<String, DirectoryEntry>,
    verify: bool,
}

impl ContainerReader {
    pub fn open(path: impl AsRef<Path>, verify: bool) -> Result<Self> {
        let path = path.as_ref();
        let map = MappedFile::open(path)?;
        let bytes = map.as_slice();
        let header = FileHeader::from_bytes(bytes)?;
        if bytes.len() < FILE_HEADER_SIZE + TRAILER_SIZE {
            return Err(Error::corrupt("container truncated"));
        }
        let trailer = Trailer::from_bytes(&bytes[bytes.len() - TRAILER_SIZE..])?;
        let directory_end = trailer
            .directory_offset
            .checked_add(trailer.directory_len)
            .ok_or_else(|| Error::corrupt("directory range overflow"))?;
        if trailer.directory_offset < FILE_HEADER_SIZE as u64
            || directory_end != (bytes.len() - TRAILER_SIZE) as u64
        {
            return Err(Error::corrupt("directory range does not match file size"));
        }
        let directory = map.range(trailer.directory_offset, trailer.directory_len)?;
        if crc32fast::hash(directory) != trailer.directory_crc {
            return Err(Error::corrupt("directory crc mismatch"));
        }

        let mut entries = BTreeMap::new();
        for entry in decode_directory(directory, trailer.entry_count)? {
            let end = entry
                .offset
                .checked_add(entry.stored_len)
                .ok_or_else(|| Error::corrupt("entry range overflow"))?;
            if entry.offset < FILE_HEADER_SIZE as u64 || end > trailer.directory_offset {
                return Err(Error::corrupt(format!("entry {} out of bounds", entry.name)));
            }
            if entries.insert(entry.name.clone(), entry).is_some() {
                return Err(Error::corrupt("duplicate directory entry"));
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            map,
            header,
            entries,
            verify,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn path_style(&self) -> PathStyle {
        PathStyle::from_flag(self.header.flags)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, name: &str) -> Option<&DirectoryEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Entries whose name starts with `prefix`, in name order.
    pub fn entries_with_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = &'a DirectoryEntry> + 'a {
        self.entries
            .range(prefix.to_string()..)
            .take_while(move |(name, _)| name.starts_with(prefix))
            .map(|(_, entry)| entry)
    }

    pub fn read(&self, name: &str) -> Result<Vec<u8>> {
        let entry = self.lookup(name)?;
        let stored = self.stored_bytes(entry)?;
        if !entry.is_compressed() {
            return Ok(stored.to_vec());
        }
        let raw = decompress_bulk(stored, entry.raw_len)?;
        if raw.len() as u64 != entry.raw_len {
            return Err(Error::corrupt(format!("entry {name} length mismatch")));
        }
        Ok(raw)
    }

    pub fn open_entry(&self, name: &str) -> Result<EntryStream<'_>> {
        let entry = self.lookup(name)?;
        let stored = self.stored_bytes(entry)?;
        if entry.is_compressed() {
            decoder(stored)
        } else {
            Ok(Box::new(stored))
        }
    }

    fn lookup(&self, name: &str) -> Result<&DirectoryEntry> {
        self.entries
            .get(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    fn stored_bytes(&self, entry: &DirectoryEntry) -> Result<&[u8]> {
        let stored = self.map.range(entry.offset, entry.stored_len)?;
        if self.verify && crc32fast::hash(stored) != entry.crc32 {
            return Err(Error::corrupt(format!("entry {} crc mismatch", entry.name)));
        }
        Ok(stored)
    }
}

#[cfg(feature = "compression")]
fn decompress_bulk(stored: &[u8], raw_len: u64) -> Result<Vec<u8>> {
    let capacity = usize::try_from(raw_len).map_err(|_| Error::corrupt("entry too large"))?;
    zstd::bulk::decompress(stored, capacity).map_err(|err| Error::corrupt(err.to_string()))
}

#[cfg(not(feature = "compression"))]
fn decompress_bulk(_stored: &[u8], _raw_len: u64) -> Result<Vec<u8>> {
    Err(Error::Unsupported("compression feature disabled"))
}

#[cfg(feature = "compression")]
fn decoder(stored: &[u8]) -> Result<EntryStream<'_>> {
    Ok(Box::new(zstd::stream::read::Decoder::with_buffer(stored)?))
}

#[cfg(not(feature = "compression"))]
fn decoder(_stored: &[u8]) -> Result<EntryStream<'_>> {
    Err(Error::Unsupported("compression feature disabled"))
}
