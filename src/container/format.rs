use crate::{Error, Result};

pub const FILE_HEADER_SIZE: usize = 64;
pub const TRAILER_SIZE: usize = 64;
pub const DIR_ENTRY_FIXED_SIZE: usize = 64;

pub const CONTAINER_MAGIC: u32 = 0x474F_4C43; // 'CLOG'
pub const TRAILER_MAGIC: u32 = 0x4547_4C43; // 'CLGE'
pub const CONTAINER_VERSION: u32 = 1;

pub const ENTRY_FLAG_ZSTD: u16 = 1;

const MAGIC_OFFSET: usize = 0;
const VERSION_OFFSET: usize = 4;
const FLAGS_OFFSET: usize = 8;

const DIR_OFFSET_OFFSET: usize = 8;
const DIR_LEN_OFFSET: usize = 16;
const ENTRY_COUNT_OFFSET: usize = 24;
const DIR_CRC_OFFSET: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub magic: u32,
    pub version: u32,
    pub flags: u32,
}

impl FileHeader {
    pub fn new(flags: u32) -> Self {
        Self {
            magic: CONTAINER_MAGIC,
            version: CONTAINER_VERSION,
            flags,
        }
    }

    pub fn to_bytes(&self) -> [u8; FILE_HEADER_SIZE] {
        let mut buf = [0u8; FILE_HEADER_SIZE];
        buf[MAGIC_OFFSET..MAGIC_OFFSET + 4].copy_from_slice(&self.magic.to_le_bytes());
        buf[VERSION_OFFSET..VERSION_OFFSET + 4].copy_from_slice(&self.version.to_le_bytes());
        buf[FLAGS_OFFSET..FLAGS_OFFSET + 4].copy_from_slice(&self.flags.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FILE_HEADER_SIZE {
            return Err(Error::InvalidFormat("container header truncated".to_string()));
        }
        let header = Self {
            magic: read_u32(bytes, MAGIC_OFFSET),
            version: read_u32(bytes, VERSION_OFFSET),
            flags: read_u32(bytes, FLAGS_OFFSET),
        };
        if header.magic != CONTAINER_MAGIC {
            return Err(Error::InvalidFormat(format!(
                "not a complog container (magic {:#010x})",
                header.magic
            )));
        }
        if header.version > CONTAINER_VERSION {
            return Err(Error::InvalidFormat(format!(
                "container version {} is newer than supported {}",
                header.version, CONTAINER_VERSION
            )));
        }
        Ok(header)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer {
    pub directory_offset: u64,
    pub directory_len: u64,
    pub entry_count: u64,
    pub directory_crc: u32,
}

impl Trailer {
    pub fn to_bytes(&self) -> [u8; TRAILER_SIZE] {
        let mut buf = [0u8; TRAILER_SIZE];
        buf[MAGIC_OFFSET..MAGIC_OFFSET + 4].copy_from_slice(&TRAILER_MAGIC.to_le_bytes());
        buf[VERSION_OFFSET..VERSION_OFFSET + 4].copy_from_slice(&CONTAINER_VERSION.to_le_bytes());
        buf[DIR_OFFSET_OFFSET..DIR_OFFSET_OFFSET + 8]
            .copy_from_slice(&self.directory_offset.to_le_bytes());
        buf[DIR_LEN_OFFSET..DIR_LEN_OFFSET + 8].copy_from_slice(&self.directory_len.to_le_bytes());
        buf[ENTRY_COUNT_OFFSET..ENTRY_COUNT_OFFSET + 8]
            .copy_from_slice(&self.entry_count.to_le_bytes());
        buf[DIR_CRC_OFFSET..DIR_CRC_OFFSET + 4].copy_from_slice(&self.directory_crc.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < TRAILER_SIZE {
            return Err(Error::corrupt("container trailer truncated"));
        }
        if read_u32(bytes, MAGIC_OFFSET) != TRAILER_MAGIC {
            return Err(Error::corrupt("container trailer missing (archive was not sealed)"));
        }
        Ok(Self {
            directory_offset: read_u64(bytes, DIR_OFFSET_OFFSET),
            directory_len: read_u64(bytes, DIR_LEN_OFFSET),
            entry_count: read_u64(bytes, ENTRY_COUNT_OFFSET),
            directory_crc: read_u32(bytes, DIR_CRC_OFFSET),
        })
    }
}

/// One named entry. `crc32` covers the stored bytes, `sha256` the raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub flags: u16,
    pub offset: u64,
    pub stored_len: u64,
    pub raw_len: u64,
    pub crc32: u32,
    pub sha256: [u8; 32],
}

impl DirectoryEntry {
    pub fn is_compressed(&self) -> bool {
        self.flags & ENTRY_FLAG_ZSTD != 0
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.name.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.stored_len.to_le_bytes());
        out.extend_from_slice(&self.raw_len.to_le_bytes());
        out.extend_from_slice(&self.crc32.to_le_bytes());
        out.extend_from_slice(&self.sha256);
        out.extend_from_slice(self.name.as_bytes());
    }
}

pub fn encode_directory(entries: &[DirectoryEntry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(entries.len() * (DIR_ENTRY_FIXED_SIZE + 48));
    for entry in entries {
        entry.encode_into(&mut out);
    }
    out
}

pub fn decode_directory(mut bytes: &[u8], entry_count: u64) -> Result<Vec<DirectoryEntry>> {
    let mut entries = Vec::new();
    for _ in 0..entry_count {
        if bytes.len() < DIR_ENTRY_FIXED_SIZE {
            return Err(Error::corrupt("directory entry truncated"));
        }
        let name_len = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
        let flags = u16::from_le_bytes([bytes[2], bytes[3]]);
        let offset = read_u64(bytes, 4);
        let stored_len = read_u64(bytes, 12);
        let raw_len = read_u64(bytes, 20);
        let crc32 = read_u32(bytes, 28);
        let mut sha256 = [0u8; 32];
        sha256.copy_from_slice(&bytes[32..64]);
        let rest = &bytes[DIR_ENTRY_FIXED_SIZE..];
        if rest.len() < name_len {
            return Err(Error::corrupt("directory entry name truncated"));
        }
        let name = std::str::from_utf8(&rest[..name_len])
            .map_err(|_| Error::corrupt("directory entry name is not utf-8"))?
            .to_string();
        entries.push(DirectoryEntry {
            name,
            flags,
            offset,
            stored_len,
            raw_len,
            crc32,
            sha256,
        });
        bytes = &rest[name_len..];
    }
    if !bytes.is_empty() {
        return Err(Error::corrupt("trailing bytes after directory"));
    }
    Ok(entries)
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().expect("slice length"))
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(bytes[offset..offset + 8].try_into().expect("slice length"))
}
