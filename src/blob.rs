//! Content-addressed blob pool.
//!
//! Text-like inputs (sources, additional files, resources, generated text)
//! are keyed by the SHA-256 of their bytes, so identical bytes anywhere in a
//! build are stored once regardless of the path they came from.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::container::ContainerWriter;
use crate::{Error, Result};

pub const BLOB_PREFIX: &str = "blobs/";

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentKey([u8; 32]);

impl ContentKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn entry_name(&self) -> String {
        format!("{BLOB_PREFIX}{}", self.to_hex())
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentKey({})", self.to_hex())
    }
}

impl FromStr for ContentKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out)
            .map_err(|_| Error::InvalidFormat(format!("bad content key: {s}")))?;
        Ok(Self(out))
    }
}

impl Serialize for ContentKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Writer-side view of the blob pool. Owned by one archive writer.
#[derive(Debug, Default)]
pub struct BlobStore {
    known: HashMap<ContentKey, u64>,
}

impl BlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `data` unless an identical blob is already present.
    pub fn put(&mut self, container: &mut ContainerWriter, data: &[u8]) -> Result<ContentKey> {
        let key = ContentKey::of(data);
        if self.known.contains_key(&key) {
            log::debug!("blob {key} already stored");
            return Ok(key);
        }
        container.write_entry(&key.entry_name(), data)?;
        self.known.insert(key, data.len() as u64);
        Ok(key)
    }

    /// Streams `reader` into the container, hashing on the way. A duplicate is
    /// rolled back once its key is known.
    pub fn put_reader(
        &mut self,
        container: &mut ContainerWriter,
        reader: &mut dyn Read,
    ) -> Result<ContentKey> {
        let pending = container.stream_entry(reader)?;
        let key = ContentKey::from_bytes(pending.sha256());
        if self.known.contains_key(&key) {
            log::debug!("blob {key} already stored, discarding streamed copy");
            container.discard(pending)?;
            return Ok(key);
        }
        let raw_len = pending.raw_len();
        container.commit(pending, key.entry_name())?;
        self.known.insert(key, raw_len);
        Ok(key)
    }

    /// Streams the file at `path` into the pool.
    pub fn put_file(&mut self, container: &mut ContainerWriter, path: &Path) -> Result<ContentKey> {
        let file = File::open(path).map_err(|source| Error::InputUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let mut tracked = TrackedReader::new(file);
        match self.put_reader(container, &mut tracked) {
            Ok(key) => Ok(key),
            Err(err) => Err(tracked.attribute(err, path)),
        }
    }

    pub fn contains(&self, key: &ContentKey) -> bool {
        self.known.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    pub fn stored_bytes(&self) -> u64 {
        self.known.values().sum()
    }
}

/// Remembers whether a failure came from the input side of a copy, so it can
/// be reported against the input rather than the archive.
pub(crate) struct TrackedReader<R> {
    inner: R,
    read_failed: bool,
}

impl<R: Read> TrackedReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            read_failed: false,
        }
    }

    pub(crate) fn attribute(&self, err: Error, path: &Path) -> Error {
        match err {
            Error::Io(source) if self.read_failed => Error::InputUnreadable {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        }
    }
}

impl<R: Read> Read for TrackedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf).inspect_err(|_| self.read_failed = true)
    }
}
