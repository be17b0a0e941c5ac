//! Two-tier module resolution for isolated extension contexts.
//!
//! Tier one is the host toolchain: a fixed name → version set that is always
//! consulted first. Tier two is the session's private modules taken from the
//! archive. A request the host can only satisfy with a lower version is a
//! conflict, never a silent downgrade.

use std::collections::BTreeMap;

use crate::config::HostModules;
use crate::module::{ModuleId, ModuleInfo, ModuleVersion};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Served by the host at the given version.
    Host(ModuleVersion),
    /// Served by a session-private module.
    Private(ModuleId),
}

#[derive(Debug, Clone, Default)]
pub struct LoadContext {
    host: HostModules,
    private: BTreeMap<String, Vec<(ModuleVersion, ModuleId)>>,
}

impl LoadContext {
    pub fn new(host: HostModules) -> Self {
        Self {
            host,
            private: BTreeMap::new(),
        }
    }

    pub fn host(&self) -> &HostModules {
        &self.host
    }

    pub fn add_private(&mut self, info: &ModuleInfo) {
        let versions = self.private.entry(info.name.clone()).or_default();
        if !versions.iter().any(|(_, id)| *id == info.id) {
            versions.push((info.version, info.id));
            versions.sort();
        }
    }

    pub fn resolve(&self, name: &str, requested: ModuleVersion) -> Result<Resolution> {
        if let Some(available) = self.host.get(name) {
            if requested > available {
                return Err(Error::VersionConflict {
                    name: name.to_string(),
                    requested,
                    available,
                });
            }
            return Ok(Resolution::Host(available));
        }
        self.private
            .get(name)
            .and_then(|versions| versions.iter().rev().find(|(v, _)| *v >= requested))
            .map(|(_, id)| Resolution::Private(*id))
            .ok_or_else(|| Error::NotFound(format!("{name} >= {requested}")))
    }

    /// Resolves every declared dependency of `info`.
    pub fn resolve_dependencies(&self, info: &ModuleInfo) -> Result<Vec<Resolution>> {
        info.dependencies
            .iter()
            .map(|dep| self.resolve(&dep.name, dep.version))
            .collect()
    }
}
