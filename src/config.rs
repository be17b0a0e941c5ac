//! Capture, read, and replay configuration.
//!
//! All structs deserialize with defaults for missing fields, so a JSON file
//! only needs to mention what it changes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::loader::LoaderKind;
use crate::module::ModuleVersion;
use crate::path::PathStyle;
use crate::Result;

/// Entry compression settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Compress entries with zstd.
    /// Default: true
    pub enabled: bool,

    /// Zstd compression level (1-22).
    /// Default: 3
    pub level: i32,

    /// In-memory entries smaller than this are stored raw.
    /// Default: 512 bytes
    pub min_size: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: 3,
            min_size: 512,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    pub compression: CompressionConfig,

    /// Separator convention recorded in the manifest.
    /// Default: the host's
    pub path_style: PathStyle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Check entry crc32 on every fetch.
    /// Default: true
    pub verify_checksums: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            verify_checksums: true,
        }
    }
}

/// Modules the host toolchain already provides, by simple name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostModules(BTreeMap<String, ModuleVersion>);

impl HostModules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, version: ModuleVersion) -> Self {
        self.0.insert(name.into(), version);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, version: ModuleVersion) {
        self.0.insert(name.into(), version);
    }

    pub fn get(&self, name: &str) -> Option<ModuleVersion> {
        self.0.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ModuleVersion)> {
        self.0.iter().map(|(name, version)| (name.as_str(), *version))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// How analyzer/generator modules are made available during replay.
    /// Default: in-memory
    pub kind: LoaderKind,

    /// Parent directory for on-disk materialization.
    /// Default: the system temp directory
    pub temp_root: Option<PathBuf>,

    /// Host toolchain tier consulted before any session-private module.
    pub host: HostModules,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            kind: LoaderKind::InMemory,
            temp_root: None,
            host: HostModules::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Worker threads replaying invocations.
    /// Default: available parallelism
    pub workers: usize,

    pub loader: LoaderConfig,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            loader: LoaderConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub writer: WriterConfig,
    pub reader: ReaderConfig,
    pub replay: ReplayConfig,
}

impl CaptureConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }
}
