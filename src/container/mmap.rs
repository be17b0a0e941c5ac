use std::fs::File;
use std::path::Path;

use memmap2::{Mmap, MmapOptions};

use crate::{Error, Result};

/// Read-only mapping of a sealed container.
pub struct MappedFile {
    map: Mmap,
    len: usize,
}

impl MappedFile {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len() as usize;
        if len == 0 {
            return Err(Error::InvalidFormat("container is empty".to_string()));
        }
        let map = unsafe { MmapOptions::new().len(len).map(&file)? };
        Ok(Self { map, len })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.map
    }

    pub fn range(&self, offset: u64, len: u64) -> Result<&[u8]> {
        let start = usize::try_from(offset).map_err(|_| Error::corrupt("range overflow"))?;
        let len = usize::try_from(len).map_err(|_| Error::corrupt("range overflow"))?;
        let end = start
            .checked_add(len)
            .ok_or_else(|| Error::corrupt("range overflow"))?;
        if end > self.len {
            return Err(Error::corrupt("range out of bounds"));
        }
        Ok(&self.map[start..end])
    }
}
