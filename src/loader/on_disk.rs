use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Component, Path};

use tempfile::TempDir;

use crate::config::HostModules;
use crate::loader::{
    plan_session, ExtensionHandle, ExtensionLoader, LoaderKind, ModuleLocation, SessionModules,
};
use crate::module::{ExtensionKind, ModuleInfo};
use crate::reader::ArchiveReader;
use crate::record::{InvocationRecord, Language};
use crate::Result;

/// Materializes the session's modules under a private temp directory, one
/// subdirectory per module id, so equal simple names never overwrite each
/// other.
#[derive(Debug)]
pub struct OnDiskLoader {
    dir: Option<TempDir>,
    modules: SessionModules,
}

impl OnDiskLoader {
    pub fn new(
        reader: &ArchiveReader,
        record: &InvocationRecord,
        host: &HostModules,
        temp_root: Option<&Path>,
    ) -> Result<Self> {
        let session = plan_session(reader, record, host)?;
        let mut builder = tempfile::Builder::new();
        builder.prefix("complog-");
        let dir = match temp_root {
            Some(root) => {
                fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };

        let mut modules = SessionModules::default();
        for planned in session {
            let info = planned.info;
            if let Some(version) = planned.host {
                modules.push(info, ModuleLocation::Host(version));
                continue;
            }
            let target = dir
                .path()
                .join(info.id.to_hex())
                .join(file_name_for(&info));
            materialize(reader, &info, &target)?;
            modules.push(info, ModuleLocation::File(target));
        }
        log::debug!(
            "materialized {} modules under {}",
            modules.len(),
            dir.path().display()
        );
        Ok(Self {
            dir: Some(dir),
            modules,
        })
    }

    /// Session directory; `None` once disposed.
    pub fn directory(&self) -> Option<&Path> {
        self.dir.as_ref().map(TempDir::path)
    }
}

/// `<name>.dll` when the module name is a single plain path component,
/// otherwise `<id hex>.dll`. Names come from archived metadata.
fn file_name_for(info: &ModuleInfo) -> String {
    let name = info.name.as_str();
    let mut components = Path::new(name).components();
    let plain = !name.is_empty()
        && !name.contains(['/', '\\', ':', '\0'])
        && matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none();
    if plain {
        format!("{name}.dll")
    } else {
        log::warn!(
            "module {} has an unusable file name {:?}, materializing by id",
            info.id,
            name
        );
        format!("{}.dll", info.id.to_hex())
    }
}

fn materialize(reader: &ArchiveReader, info: &ModuleInfo, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut source = reader.module(&info.id)?;
    let mut sink = BufWriter::new(File::create(target)?);
    io::copy(&mut source, &mut sink)?;
    sink.flush()?;
    Ok(())
}

impl ExtensionLoader for OnDiskLoader {
    fn kind(&self) -> LoaderKind {
        LoaderKind::OnDisk
    }

    fn analyzers(&self, language: Language) -> Vec<ExtensionHandle> {
        self.modules.handles(ExtensionKind::Analyzer, language)
    }

    fn generators(&self, language: Language) -> Vec<ExtensionHandle> {
        self.modules.handles(ExtensionKind::Generator, language)
    }

    fn dispose(&mut self) {
        self.modules.clear();
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(err) = dir.close() {
                log::warn!("failed to remove {}: {err}", path.display());
            }
        }
    }

    fn is_disposed(&self) -> bool {
        self.dir.is_none()
    }
}

impl Drop for OnDiskLoader {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{ModuleId, ModuleVersion};

    fn named(name: &str) -> ModuleInfo {
        ModuleInfo {
            id: ModuleId::from_bytes([0xAB; 16]),
            name: name.to_string(),
            version: ModuleVersion::default(),
            dependencies: Vec::new(),
            exports: Vec::new(),
        }
    }

    #[test]
    fn only_plain_names_become_file_names() {
        let by_id = format!("{}.dll", "ab".repeat(16));
        assert_eq!(file_name_for(&named("Contoso.Analyzers")), "Contoso.Analyzers.dll");
        for bad in ["", ".", "..", "../../../escaped", "/etc/escaped", "a/b", r"a\b", "C:x"] {
            assert_eq!(file_name_for(&named(bad)), by_id, "{bad:?}");
        }
    }
}
