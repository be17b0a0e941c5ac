//! Module images and their embedded identity.
//!
//! Every compiled module starts with a 64-byte header that carries a 128-bit
//! module id baked in at build time. The id, not the path or the bytes, is
//! what the module pool deduplicates on.
//!
//! Header layout (little-endian):
//!
//! | offset | size | field            |
//! |--------|------|------------------|
//! | 0      | 4    | magic `CLMD`     |
//! | 4      | 2    | header version   |
//! | 6      | 2    | flags            |
//! | 8      | 16   | module id        |
//! | 24     | 8    | version (4 x u16)|
//! | 32     | 4    | metadata length  |
//! | 36     | 4    | metadata crc32   |
//! | 40     | 24   | reserved         |
//!
//! The JSON metadata block (name, dependencies, exported types) follows the
//! header; the opaque module body follows the metadata.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::record::Language;
use crate::{Error, Result};

pub const MODULE_MAGIC: u32 = 0x444D_4C43; // 'CLMD'
pub const MODULE_HEADER_VERSION: u16 = 1;
pub const MODULE_HEADER_SIZE: usize = 64;
pub const MAX_METADATA_LEN: u32 = 16 * 1024 * 1024;
pub const MODULE_PREFIX: &str = "modules/";

const MAGIC_OFFSET: usize = 0;
const VERSION_OFFSET: usize = 4;
const FLAGS_OFFSET: usize = 6;
const ID_OFFSET: usize = 8;
const MODULE_VERSION_OFFSET: usize = 24;
const METADATA_LEN_OFFSET: usize = 32;
const METADATA_CRC_OFFSET: usize = 36;

pub const MODULE_FLAG_EXTENSION: u16 = 1;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId([u8; 16]);

impl ModuleId {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn entry_name(&self) -> String {
        format!("{MODULE_PREFIX}{}", self.to_hex())
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleId({})", self.to_hex())
    }
}

impl FromStr for ModuleId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut out = [0u8; 16];
        hex::decode_to_slice(s, &mut out)
            .map_err(|_| Error::InvalidFormat(format!("bad module id: {s}")))?;
        Ok(Self(out))
    }
}

impl Serialize for ModuleId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ModuleId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Four-part module version, ordered component-wise.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleVersion {
    pub major: u16,
    pub minor: u16,
    pub build: u16,
    pub revision: u16,
}

impl ModuleVersion {
    pub const fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }

    fn to_bytes(self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[0..2].copy_from_slice(&self.major.to_le_bytes());
        buf[2..4].copy_from_slice(&self.minor.to_le_bytes());
        buf[4..6].copy_from_slice(&self.build.to_le_bytes());
        buf[6..8].copy_from_slice(&self.revision.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8]) -> Self {
        let part = |i: usize| u16::from_le_bytes([buf[i], buf[i + 1]]);
        Self::new(part(0), part(2), part(4), part(6))
    }
}

impl fmt::Display for ModuleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

impl FromStr for ModuleVersion {
    type Err = Error;

    /// Accepts one to four dot-separated parts; missing parts are zero.
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = [0u16; 4];
        let mut count = 0;
        for piece in s.split('.') {
            if count == 4 {
                return Err(Error::InvalidFormat(format!("bad module version: {s}")));
            }
            parts[count] = piece
                .parse()
                .map_err(|_| Error::InvalidFormat(format!("bad module version: {s}")))?;
            count += 1;
        }
        Ok(Self::new(parts[0], parts[1], parts[2], parts[3]))
    }
}

impl Serialize for ModuleVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ModuleVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A dependency edge: simple name plus the minimum version required.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleRef {
    pub name: String,
    pub version: ModuleVersion,
}

impl ModuleRef {
    pub fn new(name: impl Into<String>, version: ModuleVersion) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionKind {
    Analyzer,
    Generator,
}

/// Declarative marker attached to an exported type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionMarker {
    pub kind: ExtensionKind,
    pub languages: Vec<String>,
}

impl ExtensionMarker {
    pub fn applies_to(&self, kind: ExtensionKind, language: Language) -> bool {
        self.kind == kind && self.languages.iter().any(|l| l == language.marker_name())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedType {
    pub type_name: String,
    #[serde(default)]
    pub markers: Vec<ExtensionMarker>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct ModuleMetadata {
    name: String,
    #[serde(default)]
    dependencies: Vec<ModuleRef>,
    #[serde(default)]
    exports: Vec<ExportedType>,
}

/// Everything the archive needs to know about a module without its body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub id: ModuleId,
    pub name: String,
    pub version: ModuleVersion,
    #[serde(default)]
    pub dependencies: Vec<ModuleRef>,
    #[serde(default)]
    pub exports: Vec<ExportedType>,
}

#[derive(Debug, thiserror::Error)]
pub enum ModuleFormatError {
    #[error("not a module image (magic {0:#010x})")]
    BadMagic(u32),
    #[error("unsupported module header version {0}")]
    UnsupportedVersion(u16),
    #[error("module image truncated")]
    Truncated,
    #[error("module metadata too large ({0} bytes)")]
    MetadataTooLarge(u32),
    #[error("module metadata crc mismatch")]
    CrcMismatch,
    #[error("module metadata malformed: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for ModuleFormatError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            ModuleFormatError::Truncated
        } else {
            ModuleFormatError::Io(err)
        }
    }
}

impl ModuleInfo {
    /// Parses the header and metadata block, leaving `reader` positioned at
    /// the start of the module body.
    pub fn read_from(reader: &mut dyn Read) -> std::result::Result<Self, ModuleFormatError> {
        let mut header = [0u8; MODULE_HEADER_SIZE];
        reader.read_exact(&mut header)?;
        let magic = u32::from_le_bytes(
            header[MAGIC_OFFSET..MAGIC_OFFSET + 4]
                .try_into()
                .expect("slice length"),
        );
        if magic != MODULE_MAGIC {
            return Err(ModuleFormatError::BadMagic(magic));
        }
        let version = u16::from_le_bytes([header[VERSION_OFFSET], header[VERSION_OFFSET + 1]]);
        if version != MODULE_HEADER_VERSION {
            return Err(ModuleFormatError::UnsupportedVersion(version));
        }
        let mut id = [0u8; 16];
        id.copy_from_slice(&header[ID_OFFSET..ID_OFFSET + 16]);
        let module_version =
            ModuleVersion::from_bytes(&header[MODULE_VERSION_OFFSET..MODULE_VERSION_OFFSET + 8]);
        let metadata_len = u32::from_le_bytes(
            header[METADATA_LEN_OFFSET..METADATA_LEN_OFFSET + 4]
                .try_into()
                .expect("slice length"),
        );
        if metadata_len > MAX_METADATA_LEN {
            return Err(ModuleFormatError::MetadataTooLarge(metadata_len));
        }
        let metadata_crc = u32::from_le_bytes(
            header[METADATA_CRC_OFFSET..METADATA_CRC_OFFSET + 4]
                .try_into()
                .expect("slice length"),
        );

        let mut metadata = vec![0u8; metadata_len as usize];
        reader.read_exact(&mut metadata)?;
        if crc32fast::hash(&metadata) != metadata_crc {
            return Err(ModuleFormatError::CrcMismatch);
        }
        let metadata: ModuleMetadata = serde_json::from_slice(&metadata)?;

        Ok(Self {
            id: ModuleId::from_bytes(id),
            name: metadata.name,
            version: module_version,
            dependencies: metadata.dependencies,
            exports: metadata.exports,
        })
    }

    pub fn from_slice(bytes: &[u8]) -> std::result::Result<Self, ModuleFormatError> {
        let mut reader = bytes;
        Self::read_from(&mut reader)
    }

    pub fn reference(&self) -> ModuleRef {
        ModuleRef::new(self.name.clone(), self.version)
    }

    /// Exported types carrying a marker for `kind` and `language`. Types
    /// without any marker are skipped.
    pub fn extensions(
        &self,
        kind: ExtensionKind,
        language: Language,
    ) -> impl Iterator<Item = &ExportedType> + '_ {
        self.exports.iter().filter(move |export| {
            export
                .markers
                .iter()
                .any(|marker| marker.applies_to(kind, language))
        })
    }

    pub fn is_extension(&self) -> bool {
        self.exports.iter().any(|export| !export.markers.is_empty())
    }
}

/// Builds module image bytes.
#[derive(Clone, Debug)]
pub struct ModuleImage {
    id: ModuleId,
    version: ModuleVersion,
    metadata: ModuleMetadata,
    body: Vec<u8>,
}

impl ModuleImage {
    pub fn new(name: impl Into<String>, id: ModuleId, version: ModuleVersion) -> Self {
        Self {
            id,
            version,
            metadata: ModuleMetadata {
                name: name.into(),
                ..ModuleMetadata::default()
            },
            body: Vec::new(),
        }
    }

    pub fn dependency(mut self, name: impl Into<String>, version: ModuleVersion) -> Self {
        self.metadata.dependencies.push(ModuleRef::new(name, version));
        self
    }

    /// Exports a type carrying one extension marker.
    pub fn extension(
        mut self,
        type_name: impl Into<String>,
        kind: ExtensionKind,
        languages: &[Language],
    ) -> Self {
        self.metadata.exports.push(ExportedType {
            type_name: type_name.into(),
            markers: vec![ExtensionMarker {
                kind,
                languages: languages
                    .iter()
                    .map(|l| l.marker_name().to_string())
                    .collect(),
            }],
        });
        self
    }

    /// Exports a type with no markers.
    pub fn plain_type(mut self, type_name: impl Into<String>) -> Self {
        self.metadata.exports.push(ExportedType {
            type_name: type_name.into(),
            markers: Vec::new(),
        });
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let metadata = serde_json::to_vec(&self.metadata).expect("module metadata serializes");
        let mut flags = 0u16;
        if self.metadata.exports.iter().any(|e| !e.markers.is_empty()) {
            flags |= MODULE_FLAG_EXTENSION;
        }
        let mut header = [0u8; MODULE_HEADER_SIZE];
        header[MAGIC_OFFSET..MAGIC_OFFSET + 4].copy_from_slice(&MODULE_MAGIC.to_le_bytes());
        header[VERSION_OFFSET..VERSION_OFFSET + 2]
            .copy_from_slice(&MODULE_HEADER_VERSION.to_le_bytes());
        header[FLAGS_OFFSET..FLAGS_OFFSET + 2].copy_from_slice(&flags.to_le_bytes());
        header[ID_OFFSET..ID_OFFSET + 16].copy_from_slice(self.id.as_bytes());
        header[MODULE_VERSION_OFFSET..MODULE_VERSION_OFFSET + 8]
            .copy_from_slice(&self.version.to_bytes());
        header[METADATA_LEN_OFFSET..METADATA_LEN_OFFSET + 4]
            .copy_from_slice(&(metadata.len() as u32).to_le_bytes());
        header[METADATA_CRC_OFFSET..METADATA_CRC_OFFSET + 4]
            .copy_from_slice(&crc32fast::hash(&metadata).to_le_bytes());

        let mut out = Vec::with_capacity(MODULE_HEADER_SIZE + metadata.len() + self.body.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(&metadata);
        out.extend_from_slice(&self.body);
        out
    }
}
