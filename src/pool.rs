//! Module-addressed pool for references and analyzer modules.
//!
//! Modules are keyed by the identity embedded in their header. Two files at
//! different paths carrying the same id are stored once; two different ids
//! sharing a simple name are stored separately.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::Path;

use crate::blob::TrackedReader;
use crate::container::ContainerWriter;
use crate::module::{ModuleId, ModuleInfo};
use crate::{Error, Result};

#[derive(Debug, Default)]
pub struct ModulePool {
    known: HashMap<ModuleId, ModuleInfo>,
    order: Vec<ModuleId>,
    by_name: HashMap<String, Vec<ModuleId>>,
}

impl ModulePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the module header at `path` and stores the module unless its id
    /// is already pooled. Files that are not module images fail with
    /// `UnsupportedModule`.
    pub fn put_file(&mut self, container: &mut ContainerWriter, path: &Path) -> Result<ModuleInfo> {
        let unreadable = |source| Error::InputUnreadable {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(unreadable)?;
        let mut header_reader = BufReader::new(file);
        let info = ModuleInfo::read_from(&mut header_reader).map_err(|err| {
            Error::UnsupportedModule {
                path: path.to_path_buf(),
                reason: err.to_string(),
            }
        })?;
        if let Some(existing) = self.known.get(&info.id) {
            log::debug!(
                "module {} ({}) already pooled, skipping {}",
                existing.name,
                info.id,
                path.display()
            );
            return Ok(existing.clone());
        }

        let mut file = header_reader.into_inner();
        file.seek(SeekFrom::Start(0)).map_err(unreadable)?;
        let mut tracked = TrackedReader::new(file);
        let pending = container
            .stream_entry(&mut tracked)
            .map_err(|err| tracked.attribute(err, path))?;
        container.commit(pending, info.id.entry_name())?;
        self.remember(info.clone());
        Ok(info)
    }

    /// Stores an in-memory module image.
    pub fn put_bytes(&mut self, container: &mut ContainerWriter, bytes: &[u8]) -> Result<ModuleInfo> {
        let info = ModuleInfo::from_slice(bytes).map_err(|err| Error::UnsupportedModule {
            path: Default::default(),
            reason: err.to_string(),
        })?;
        if let Some(existing) = self.known.get(&info.id) {
            return Ok(existing.clone());
        }
        container.write_entry(&info.id.entry_name(), bytes)?;
        self.remember(info.clone());
        Ok(info)
    }

    fn remember(&mut self, info: ModuleInfo) {
        let same_name = self.by_name.entry(info.name.clone()).or_default();
        if !same_name.is_empty() {
            log::debug!(
                "module name {} now has {} distinct identities",
                info.name,
                same_name.len() + 1
            );
        }
        same_name.push(info.id);
        self.order.push(info.id);
        self.known.insert(info.id, info);
    }

    pub fn get(&self, id: &ModuleId) -> Option<&ModuleInfo> {
        self.known.get(id)
    }

    pub fn contains(&self, id: &ModuleId) -> bool {
        self.known.contains_key(id)
    }

    /// Ids stored under the simple name `name`, in insertion order.
    pub fn ids_named(&self, name: &str) -> &[ModuleId] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Pooled modules in insertion order.
    pub fn infos(&self) -> impl Iterator<Item = &ModuleInfo> + '_ {
        self.order.iter().filter_map(|id| self.known.get(id))
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}
