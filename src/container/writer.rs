use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::config::{CompressionConfig, WriterConfig};
use crate::container::format::{
    encode_directory, DirectoryEntry, FileHeader, Trailer, ENTRY_FLAG_ZSTD, FILE_HEADER_SIZE,
};
use crate::{Error, Result};

/// Append-only container builder. Entries go to `<path>.tmp`; `seal` writes
/// the directory and trailer and renames the file into place.
pub struct ContainerWriter {
    final_path: PathBuf,
    temp_path: PathBuf,
    file: Option<File>,
    offset: u64,
    entries: Vec<DirectoryEntry>,
    names: HashSet<String>,
    compression: CompressionConfig,
}

/// An entry whose bytes are written but which has no name yet.
#[derive(Debug)]
#[must_use = "a pending entry must be committed or discarded"]
pub struct PendingEntry {
    offset: u64,
    stored_len: u64,
    raw_len: u64,
    crc32: u32,
    sha256: [u8; 32],
    flags: u16,
}

impl PendingEntry {
    pub fn sha256(&self) -> [u8; 32] {
        self.sha256
    }

    pub fn raw_len(&self) -> u64 {
        self.raw_len
    }
}

impl ContainerWriter {
    pub fn create(path: impl Into<PathBuf>, config: &WriterConfig) -> Result<Self> {
        let final_path = path.into();
        let temp_path = temp_path_for(&final_path);
        if let Some(parent) = final_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let _ = std::fs::remove_file(&temp_path);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(&FileHeader::new(config.path_style.flag()).to_bytes())?;
        Ok(Self {
            final_path,
            temp_path,
            file: Some(file),
            offset: FILE_HEADER_SIZE as u64,
            entries: Vec::new(),
            names: HashSet::new(),
            compression: config.compression.clone(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.final_path
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Writes an in-memory entry. Small payloads are stored raw.
    pub fn write_entry(&mut self, name: &str, data: &[u8]) -> Result<()> {
        if self.names.contains(name) {
            return Err(Error::Unsupported("duplicate container entry"));
        }
        let (stored, flags) = self.encode_payload(data)?;
        let file = self.file.as_mut().ok_or(Error::AlreadySealed)?;
        if let Err(err) = file.write_all(&stored) {
            self.rewind_to(self.offset)?;
            return Err(err.into());
        }

        let entry = DirectoryEntry {
            name: name.to_string(),
            flags,
            offset: self.offset,
            stored_len: stored.len() as u64,
            raw_len: data.len() as u64,
            crc32: crc32fast::hash(&stored),
            sha256: Sha256::digest(data).into(),
        };
        self.offset = self
            .offset
            .checked_add(entry.stored_len)
            .ok_or(Error::Unsupported("container offset overflow"))?;
        log::debug!("entry {name}: {} -> {} bytes", entry.raw_len, entry.stored_len);
        self.names.insert(entry.name.clone());
        self.entries.push(entry);
        Ok(())
    }

    /// Streams `reader` to the end of the container without naming it.
    pub fn stream_entry(&mut self, reader: &mut dyn Read) -> Result<PendingEntry> {
        let compress = self.compression.enabled && cfg!(feature = "compression");
        let level = self.compression.level;
        let offset = self.offset;
        let file = self.file.as_mut().ok_or(Error::AlreadySealed)?;

        let mut source = HashingReader::new(reader);
        let mut sink = CrcWriter::new(BufWriter::new(&*file));
        let copied = if compress {
            copy_compressed(&mut source, &mut sink, level)
        } else {
            io::copy(&mut source, &mut sink)
                .map(|_| ())
                .map_err(Error::from)
        }
        .and_then(|()| sink.flush().map_err(Error::from));
        if let Err(err) = copied {
            drop(sink);
            self.rewind_to(offset)?;
            return Err(err);
        }

        let pending = PendingEntry {
            offset,
            stored_len: sink.written,
            raw_len: source.len,
            crc32: sink.crc.finalize(),
            sha256: source.sha.finalize().into(),
            flags: if compress { ENTRY_FLAG_ZSTD } else { 0 },
        };
        self.offset = offset
            .checked_add(pending.stored_len)
            .ok_or(Error::Unsupported("container offset overflow"))?;
        Ok(pending)
    }

    pub fn commit(&mut self, pending: PendingEntry, name: String) -> Result<()> {
        self.check_latest(&pending)?;
        if self.names.contains(&name) {
            self.discard(pending)?;
            return Err(Error::Unsupported("duplicate container entry"));
        }
        log::debug!(
            "entry {name}: {} -> {} bytes (streamed)",
            pending.raw_len,
            pending.stored_len
        );
        self.names.insert(name.clone());
        self.entries.push(DirectoryEntry {
            name,
            flags: pending.flags,
            offset: pending.offset,
            stored_len: pending.stored_len,
            raw_len: pending.raw_len,
            crc32: pending.crc32,
            sha256: pending.sha256,
        });
        Ok(())
    }

    /// Drops the bytes of the most recent pending entry.
    pub fn discard(&mut self, pending: PendingEntry) -> Result<()> {
        self.check_latest(&pending)?;
        self.rewind_to(pending.offset)
    }

    /// Writes directory and trailer, syncs, and publishes the file.
    /// A failed seal removes the temp file.
    pub fn seal(&mut self) -> Result<PathBuf> {
        let mut file = self.file.take().ok_or(Error::AlreadySealed)?;
        let directory = encode_directory(&self.entries);
        let trailer = Trailer {
            directory_offset: self.offset,
            directory_len: directory.len() as u64,
            entry_count: self.entries.len() as u64,
            directory_crc: crc32fast::hash(&directory),
        };
        let published = file
            .write_all(&directory)
            .and_then(|()| file.write_all(&trailer.to_bytes()))
            .and_then(|()| file.sync_all())
            .and_then(|()| {
                drop(file);
                std::fs::rename(&self.temp_path, &self.final_path)
            });
        if let Err(err) = published {
            remove_temp(&self.temp_path);
            return Err(err.into());
        }
        Ok(self.final_path.clone())
    }

    pub fn is_sealed(&self) -> bool {
        self.file.is_none()
    }

    /// Truncates the file to `offset`, dropping any partial write past it.
    fn rewind_to(&mut self, offset: u64) -> Result<()> {
        let file = self.file.as_mut().ok_or(Error::AlreadySealed)?;
        file.set_len(offset)?;
        file.seek(SeekFrom::Start(offset))?;
        self.offset = offset;
        Ok(())
    }

    fn check_latest(&self, pending: &PendingEntry) -> Result<()> {
        if pending.offset + pending.stored_len != self.offset {
            return Err(Error::Unsupported("pending entry is not the latest write"));
        }
        Ok(())
    }

    fn encode_payload(&self, data: &[u8]) -> Result<(Vec<u8>, u16)> {
        if self.compression.enabled && data.len() >= self.compression.min_size {
            if let Some(compressed) = compress_bulk(data, self.compression.level)? {
                if compressed.len() < data.len() {
                    return Ok((compressed, ENTRY_FLAG_ZSTD));
                }
            }
        }
        Ok((data.to_vec(), 0))
    }
}

impl Drop for ContainerWriter {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            drop(file);
            remove_temp(&self.temp_path);
        }
    }
}

fn remove_temp(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != io::ErrorKind::NotFound {
            log::warn!("failed to remove unsealed container {}: {err}", path.display());
        }
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(feature = "compression")]
fn copy_compressed(source: &mut dyn Read, sink: &mut dyn Write, level: i32) -> Result<()> {
    let mut encoder = zstd::stream::write::Encoder::new(sink, level)?;
    io::copy(source, &mut encoder)?;
    encoder.finish()?;
    Ok(())
}

#[cfg(not(feature = "compression"))]
fn copy_compressed(_source: &mut dyn Read, _sink: &mut dyn Write, _level: i32) -> Result<()> {
    Err(Error::Unsupported("compression feature disabled"))
}

#[cfg(feature = "compression")]
fn compress_bulk(data: &[u8], level: i32) -> Result<Option<Vec<u8>>> {
    Ok(Some(zstd::bulk::compress(data, level)?))
}

#[cfg(not(feature = "compression"))]
fn compress_bulk(_data: &[u8], _level: i32) -> Result<Option<Vec<u8>>> {
    Ok(None)
}

struct HashingReader<'a> {
    inner: &'a mut dyn Read,
    sha: Sha256,
    len: u64,
}

impl<'a> HashingReader<'a> {
    fn new(inner: &'a mut dyn Read) -> Self {
        Self {
            inner,
            sha: Sha256::new(),
            len: 0,
        }
    }
}

impl Read for HashingReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.sha.update(&buf[..n]);
        self.len += n as u64;
        Ok(n)
    }
}

struct CrcWriter<W: Write> {
    inner: W,
    crc: crc32fast::Hasher,
    written: u64,
}

impl<W: Write> CrcWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            crc: crc32fast::Hasher::new(),
            written: 0,
        }
    }
}

impl<W: Write> Write for CrcWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.crc.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
