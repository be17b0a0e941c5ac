use std::sync::Arc;

use crate::config::HostModules;
use crate::loader::{
    plan_session, ExtensionHandle, ExtensionLoader, LoaderKind, ModuleLocation, SessionModules,
};
use crate::module::ExtensionKind;
use crate::reader::ArchiveReader;
use crate::record::{InvocationRecord, Language};
use crate::Result;

/// Same isolation as the on-disk loader, with module bytes held in memory.
#[derive(Debug)]
pub struct InMemoryLoader {
    modules: SessionModules,
    disposed: bool,
}

impl InMemoryLoader {
    pub fn new(reader: &ArchiveReader, record: &InvocationRecord, host: &HostModules) -> Result<Self> {
        let mut modules = SessionModules::default();
        for planned in plan_session(reader, record, host)? {
            let location = match planned.host {
                Some(version) => ModuleLocation::Host(version),
                None => {
                    let bytes: Arc<[u8]> = reader.module_bytes(&planned.info.id)?.into();
                    ModuleLocation::Memory(bytes)
                }
            };
            modules.push(planned.info, location);
        }
        Ok(Self {
            modules,
            disposed: false,
        })
    }
}

impl ExtensionLoader for InMemoryLoader {
    fn kind(&self) -> LoaderKind {
        LoaderKind::InMemory
    }

    fn analyzers(&self, language: Language) -> Vec<ExtensionHandle> {
        self.modules.handles(ExtensionKind::Analyzer, language)
    }

    fn generators(&self, language: Language) -> Vec<ExtensionHandle> {
        self.modules.handles(ExtensionKind::Generator, language)
    }

    fn dispose(&mut self) {
        self.modules.clear();
        self.disposed = true;
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }
}
