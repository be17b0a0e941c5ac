//! Archive reader.
//!
//! Opening validates the manifest, the record range and the module index up
//! front; after that every accessor takes `&self`, so one reader can be
//! shared across replay workers.

use std::collections::BTreeMap;
use std::path::Path;

use crate::blob::ContentKey;
use crate::codec::{self, Manifest, DIAGNOSTICS_ENTRY, MANIFEST_ENTRY, MODULE_INDEX_ENTRY};
use crate::config::ReaderConfig;
use crate::container::{ContainerReader, EntryStream};
use crate::hash::{self, InvocationHash, ModuleDigests};
use crate::module::{ModuleId, ModuleInfo};
use crate::path::{self, PathStyle};
use crate::record::InvocationRecord;
use crate::writer::Diagnostic;
use crate::{Error, Result};

pub struct ArchiveReader {
    container: ContainerReader,
    manifest: Manifest,
    modules: BTreeMap<ModuleId, ModuleInfo>,
    diagnostics: Vec<Diagnostic>,
}

impl ArchiveReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, &ReaderConfig::default())
    }

    pub fn open_with_config(path: impl AsRef<Path>, config: &ReaderConfig) -> Result<Self> {
        let container = ContainerReader::open(path.as_ref(), config.verify_checksums)?;
        let manifest = Manifest::decode(&required(&container, MANIFEST_ENTRY)?)?;

        for index in 0..manifest.record_count {
            let name = codec::record_entry_name(index);
            if !container.contains(&name) {
                return Err(Error::corrupt(format!("missing {name}")));
            }
        }

        let mut modules = BTreeMap::new();
        for info in codec::decode_module_index(&required(&container, MODULE_INDEX_ENTRY)?)? {
            if !container.contains(&info.id.entry_name()) {
                return Err(Error::corrupt(format!("module {} listed but not stored", info.id)));
            }
            modules.insert(info.id, info);
        }

        let diagnostics = if container.contains(DIAGNOSTICS_ENTRY) {
            codec::decode_diagnostics(&container.read(DIAGNOSTICS_ENTRY)?)?
        } else {
            Vec::new()
        };

        log::debug!(
            "opened {}: {} records, {} modules, {} entries",
            container.path().display(),
            manifest.record_count,
            modules.len(),
            container.len()
        );
        Ok(Self {
            container,
            manifest,
            modules,
            diagnostics,
        })
    }

    pub fn path(&self) -> &Path {
        self.container.path()
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Separator convention of the machine that captured the archive.
    pub fn path_style(&self) -> PathStyle {
        self.manifest.path_style
    }

    pub fn count(&self) -> usize {
        self.manifest.record_count
    }

    pub fn record(&self, index: usize) -> Result<InvocationRecord> {
        let count = self.count();
        if index >= count {
            return Err(Error::OutOfRange { index, count });
        }
        let bytes = self.container.read(&codec::record_entry_name(index))?;
        codec::decode(&bytes)
    }

    pub fn records(&self) -> impl Iterator<Item = Result<InvocationRecord>> + '_ {
        (0..self.count()).map(move |index| self.record(index))
    }

    /// Records matching `predicate`, with their indices.
    pub fn find_records<F>(&self, mut predicate: F) -> Result<Vec<(usize, InvocationRecord)>>
    where
        F: FnMut(&InvocationRecord) -> bool,
    {
        let mut found = Vec::new();
        for index in 0..self.count() {
            let record = self.record(index)?;
            if predicate(&record) {
                found.push((index, record));
            }
        }
        Ok(found)
    }

    pub fn blob(&self, key: &ContentKey) -> Result<EntryStream<'_>> {
        self.container.open_entry(&key.entry_name())
    }

    pub fn blob_bytes(&self, key: &ContentKey) -> Result<Vec<u8>> {
        self.container.read(&key.entry_name())
    }

    pub fn module(&self, id: &ModuleId) -> Result<EntryStream<'_>> {
        self.container.open_entry(&id.entry_name())
    }

    pub fn module_bytes(&self, id: &ModuleId) -> Result<Vec<u8>> {
        self.container.read(&id.entry_name())
    }

    pub fn module_info(&self, id: &ModuleId) -> Result<&ModuleInfo> {
        self.modules
            .get(id)
            .ok_or_else(|| Error::NotFound(id.entry_name()))
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleInfo> + '_ {
        self.modules.values()
    }

    /// Invocations dropped at capture time.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Stored path rewritten with the host's separators. Records themselves
    /// keep the stored spelling.
    pub fn display_path(&self, stored: &str) -> String {
        path::to_style(stored, PathStyle::host())
    }

    pub fn content_hash(&self, index: usize) -> Result<InvocationHash> {
        hash::content_hash(&self.record(index)?, self)
    }

    pub fn identity_hash(&self, index: usize) -> Result<InvocationHash> {
        hash::identity_hash(&self.record(index)?)
    }
}

impl ModuleDigests for ArchiveReader {
    fn module_digest(&self, id: &ModuleId) -> Result<[u8; 32]> {
        self.container
            .entry(&id.entry_name())
            .map(|entry| entry.sha256)
            .ok_or_else(|| Error::NotFound(id.entry_name()))
    }
}

fn required(container: &ContainerReader, name: &str) -> Result<Vec<u8>> {
    match container.read(name) {
        Err(Error::NotFound(_)) => Err(Error::corrupt(format!("missing {name}"))),
        other => other,
    }
}
