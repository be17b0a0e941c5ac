#![allow(dead_code)]

use std::path::{Path, PathBuf};

use complog::module::ExtensionKind;
use complog::{Language, ModuleId, ModuleImage, ModuleVersion};
use tempfile::TempDir;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn v(major: u16, minor: u16) -> ModuleVersion {
    ModuleVersion::new(major, minor, 0, 0)
}

pub fn id(byte: u8) -> ModuleId {
    ModuleId::from_bytes([byte; 16])
}

/// Scratch build tree: `<tmp>/<root>/app/app.csproj` plus whatever a test
/// writes next to it.
pub struct BuildTree {
    pub dir: TempDir,
    pub root: PathBuf,
}

impl BuildTree {
    pub fn new() -> Self {
        Self::with_root("work")
    }

    pub fn with_root(root: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join(root);
        std::fs::create_dir_all(root.join("app")).expect("mkdir");
        Self { dir, root }
    }

    pub fn project(&self) -> String {
        self.root.join("app/app.csproj").to_string_lossy().into_owned()
    }

    pub fn archive(&self) -> PathBuf {
        self.dir.path().join("build.complog")
    }

    pub fn write(&self, rel: &str, bytes: impl AsRef<[u8]>) -> PathBuf {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("mkdir");
        }
        std::fs::write(&path, bytes).expect("write");
        path
    }

    pub fn module(&self, rel: &str, image: &ModuleImage) -> PathBuf {
        self.write(rel, image.to_bytes())
    }
}

/// Plain reference module with a deterministic body.
pub fn library(name: &str, module: u8, version: ModuleVersion) -> ModuleImage {
    ModuleImage::new(name, id(module), version)
        .plain_type(format!("{name}.Api"))
        .body(vec![module; 512])
}

pub fn analyzer(name: &str, module: u8, version: ModuleVersion) -> ModuleImage {
    ModuleImage::new(name, id(module), version)
        .extension(
            format!("{name}.Analyzer"),
            ExtensionKind::Analyzer,
            &[Language::CSharp],
        )
        .extension(
            format!("{name}.Generator"),
            ExtensionKind::Generator,
            &[Language::CSharp, Language::VisualBasic],
        )
        .plain_type(format!("{name}.Helpers"))
        .body(vec![module ^ 0x5A; 256])
}

pub fn read(path: &Path) -> Vec<u8> {
    std::fs::read(path).expect("read")
}
