//! Extension loader strategies.
//!
//! A strategy decides how analyzer and generator code becomes available to a
//! replay. `None` replays captured generator output instead of running
//! anything. `OnDisk` and `InMemory` build an isolated session over the
//! record's analyzer modules, delegating to the host toolchain first.
//!
//! Every replay gets its own loader instance; nothing is shared between
//! instances, so disposing one never affects another.

pub mod in_memory;
pub mod none;
pub mod on_disk;
pub mod resolver;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{HostModules, LoaderConfig};
use crate::module::{ExtensionKind, ModuleId, ModuleInfo, ModuleVersion};
use crate::reader::ArchiveReader;
use crate::record::{InvocationRecord, Language};
use crate::{Error, Result};

pub use in_memory::InMemoryLoader;
pub use none::{GeneratedFile, GeneratedOutcome, NoneLoader, SYNTHETIC_GENERATOR};
pub use on_disk::OnDiskLoader;
pub use resolver::{LoadContext, Resolution};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoaderKind {
    None,
    OnDisk,
    #[default]
    InMemory,
}

impl LoaderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LoaderKind::None => "none",
            LoaderKind::OnDisk => "on-disk",
            LoaderKind::InMemory => "in-memory",
        }
    }
}

impl fmt::Display for LoaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoaderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(LoaderKind::None),
            "on-disk" | "ondisk" => Ok(LoaderKind::OnDisk),
            "in-memory" | "inmemory" => Ok(LoaderKind::InMemory),
            _ => Err(Error::InvalidFormat(format!("unknown loader kind: {s}"))),
        }
    }
}

/// Where a loaded module's bytes live for the front-end.
#[derive(Debug, Clone)]
pub enum ModuleLocation {
    File(PathBuf),
    Memory(Arc<[u8]>),
    /// Served by the host toolchain's copy at this version.
    Host(ModuleVersion),
}

#[derive(Debug, Clone)]
pub enum ExtensionOrigin {
    /// Stand-in generator that replays captured output.
    Synthetic(GeneratedOutcome),
    Module {
        id: ModuleId,
        name: String,
        location: ModuleLocation,
    },
}

/// One analyzer or generator type made available to the front-end.
#[derive(Debug, Clone)]
pub struct ExtensionHandle {
    pub type_name: String,
    pub kind: ExtensionKind,
    pub origin: ExtensionOrigin,
}

pub trait ExtensionLoader: Send {
    fn kind(&self) -> LoaderKind;

    fn analyzers(&self, language: Language) -> Vec<ExtensionHandle>;

    fn generators(&self, language: Language) -> Vec<ExtensionHandle>;

    /// Releases everything the loader holds. Safe to call more than once;
    /// cleanup failures are logged, not returned.
    fn dispose(&mut self);

    fn is_disposed(&self) -> bool;
}

/// Builds the loader `config` asks for, scoped to one record.
pub fn create(
    config: &LoaderConfig,
    reader: &ArchiveReader,
    record: &InvocationRecord,
) -> Result<Box<dyn ExtensionLoader>> {
    Ok(match config.kind {
        LoaderKind::None => Box::new(NoneLoader::new(reader, record)?),
        LoaderKind::OnDisk => Box::new(OnDiskLoader::new(
            reader,
            record,
            &config.host,
            config.temp_root.as_deref(),
        )?),
        LoaderKind::InMemory => Box::new(InMemoryLoader::new(reader, record, &config.host)?),
    })
}

/// An analyzer module of the record and where it resolves.
#[derive(Debug, Clone)]
pub(crate) struct PlannedModule {
    pub(crate) info: ModuleInfo,
    /// Host version when the host toolchain provides the module itself.
    pub(crate) host: Option<ModuleVersion>,
}

/// Every distinct analyzer module of `record`, in stored order.
///
/// Modules whose simple name the host provides resolve to the host copy,
/// unless the archived copy is newer, which is a `VersionConflict`. Every
/// other module must have all its dependencies resolvable.
pub(crate) fn plan_session(
    reader: &ArchiveReader,
    record: &InvocationRecord,
    host: &HostModules,
) -> Result<Vec<PlannedModule>> {
    let mut context = LoadContext::new(host.clone());
    let mut candidates: Vec<ModuleInfo> = Vec::new();
    for entry in &record.analyzers {
        let info = reader.module_info(&entry.module)?;
        if candidates.iter().any(|c| c.id == info.id) {
            continue;
        }
        context.add_private(info);
        candidates.push(info.clone());
    }

    let mut session = Vec::with_capacity(candidates.len());
    for info in candidates {
        if let Some(available) = host.get(&info.name) {
            if info.version > available {
                return Err(Error::VersionConflict {
                    name: info.name,
                    requested: info.version,
                    available,
                });
            }
            log::debug!(
                "{} {} delegated to host {}",
                info.name,
                info.version,
                available
            );
            session.push(PlannedModule {
                info,
                host: Some(available),
            });
            continue;
        }
        context.resolve_dependencies(&info)?;
        session.push(PlannedModule { info, host: None });
    }
    Ok(session)
}

/// Loaded modules of an isolated session.
#[derive(Debug, Default)]
pub(crate) struct SessionModules {
    modules: Vec<(ModuleInfo, ModuleLocation)>,
}

impl SessionModules {
    pub(crate) fn push(&mut self, info: ModuleInfo, location: ModuleLocation) {
        self.modules.push((info, location));
    }

    pub(crate) fn len(&self) -> usize {
        self.modules.len()
    }

    pub(crate) fn clear(&mut self) {
        self.modules.clear();
    }

    pub(crate) fn handles(&self, kind: ExtensionKind, language: Language) -> Vec<ExtensionHandle> {
        self.modules
            .iter()
            .flat_map(|(info, location)| {
                info.extensions(kind, language).map(move |export| ExtensionHandle {
                    type_name: export.type_name.clone(),
                    kind,
                    origin: ExtensionOrigin::Module {
                        id: info.id,
                        name: info.name.clone(),
                        location: location.clone(),
                    },
                })
            })
            .collect()
    }
}
