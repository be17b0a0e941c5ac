//! Archive writer.
//!
//! One writer produces one archive, sequentially. Inputs are read when they
//! are added, pushed through the blob or module pool, and only their identity
//! plus original path ends up in the record. An invocation with any input
//! failure is dropped as a whole and reported as a diagnostic. A failure on
//! the archive side (the container write itself) aborts the writer instead:
//! the temp file is removed and every later call fails with `Aborted`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::blob::{BlobStore, ContentKey};
use crate::codec::{self, Manifest, DIAGNOSTICS_ENTRY, MANIFEST_ENTRY, MODULE_INDEX_ENTRY};
use crate::config::{ReaderConfig, WriterConfig};
use crate::container::ContainerWriter;
use crate::module::ModuleInfo;
use crate::options::OptionsBundle;
use crate::pool::ModulePool;
use crate::reader::ArchiveReader;
use crate::record::{
    AnalyzerEntry, ContentEntry, ContentKind, GeneratedEntry, InvocationKind, InvocationRecord,
    Language, ReferenceEntry, ReferenceKind, ResourceEntry,
};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticKind {
    InputUnreadable,
    UnsupportedModule,
    Discovery,
    Other,
}

/// Why an invocation was left out of the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub project_path: String,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    fn from_error(project_path: &str, err: &Error) -> Self {
        let kind = match err {
            Error::InputUnreadable { .. } => DiagnosticKind::InputUnreadable,
            Error::UnsupportedModule { .. } => DiagnosticKind::UnsupportedModule,
            Error::Discovery { .. } => DiagnosticKind::Discovery,
            _ => DiagnosticKind::Other,
        };
        Self {
            project_path: project_path.to_string(),
            kind,
            message: err.to_string(),
        }
    }
}

/// Result of sealing: where the archive is and what went into it.
#[derive(Debug, Clone)]
pub struct SealedArchive {
    pub path: PathBuf,
    pub record_count: usize,
    pub blob_count: usize,
    pub module_count: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl SealedArchive {
    pub fn open(&self) -> Result<ArchiveReader> {
        ArchiveReader::open(&self.path)
    }

    pub fn open_with_config(&self, config: &ReaderConfig) -> Result<ArchiveReader> {
        ArchiveReader::open_with_config(&self.path, config)
    }
}

enum WriterState {
    Open(ContainerWriter),
    Sealed(PathBuf),
    Aborted(String),
}

impl WriterState {
    fn container(&mut self) -> Result<&mut ContainerWriter> {
        match self {
            WriterState::Open(container) => Ok(container),
            WriterState::Sealed(_) => Err(Error::AlreadySealed),
            WriterState::Aborted(reason) => Err(Error::Aborted(reason.clone())),
        }
    }
}

#[derive(Debug, Clone)]
enum InputIdentity {
    Content(ContentKey),
    Module(ModuleInfo),
}

/// What a cached path looked like when it was read. A file rewritten in
/// place within the timestamp granularity, keeping its length, still hits.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    len: u64,
    modified: Option<SystemTime>,
    #[cfg(unix)]
    inode: (u64, u64),
    #[cfg(unix)]
    changed: (i64, i64),
}

impl Fingerprint {
    fn of(meta: &std::fs::Metadata) -> Self {
        #[cfg(unix)]
        use std::os::unix::fs::MetadataExt;
        Self {
            len: meta.len(),
            modified: meta.modified().ok(),
            #[cfg(unix)]
            inode: (meta.dev(), meta.ino()),
            #[cfg(unix)]
            changed: (meta.ctime(), meta.ctime_nsec()),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedInput {
    fingerprint: Fingerprint,
    identity: InputIdentity,
}

pub struct ArchiveWriter {
    state: WriterState,
    config: WriterConfig,
    blobs: BlobStore,
    modules: ModulePool,
    inputs: HashMap<PathBuf, CachedInput>,
    records: usize,
    diagnostics: Vec<Diagnostic>,
}

impl ArchiveWriter {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        Self::create_with_config(path, WriterConfig::default())
    }

    pub fn create_with_config(path: impl Into<PathBuf>, config: WriterConfig) -> Result<Self> {
        let container = ContainerWriter::create(path, &config)?;
        Ok(Self {
            state: WriterState::Open(container),
            config,
            blobs: BlobStore::new(),
            modules: ModulePool::new(),
            inputs: HashMap::new(),
            records: 0,
            diagnostics: Vec::new(),
        })
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    pub fn begin_invocation(
        &mut self,
        project_path: impl Into<String>,
        language: Language,
        kind: InvocationKind,
    ) -> Result<InvocationBuilder<'_>> {
        self.ensure_open()?;
        Ok(InvocationBuilder {
            record: InvocationRecord::new(project_path, language, kind),
            writer: self,
            failure: None,
        })
    }

    /// Records written so far; also the index the next commit will get.
    pub fn record_count(&self) -> usize {
        self.records
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn is_sealed(&self) -> bool {
        matches!(self.state, WriterState::Sealed(_))
    }

    /// Final archive path; only available once sealed.
    pub fn archive_path(&self) -> Result<&Path> {
        match &self.state {
            WriterState::Sealed(path) => Ok(path),
            WriterState::Open(_) => Err(Error::NotSealed),
            WriterState::Aborted(reason) => Err(Error::Aborted(reason.clone())),
        }
    }

    /// Writes the module index, diagnostics and manifest, then publishes the
    /// archive. A second call fails with `AlreadySealed`.
    pub fn seal(&mut self) -> Result<SealedArchive> {
        self.ensure_open()?;
        let path = match self.finish() {
            Ok(path) => path,
            Err(err) => return Err(self.abort(err)),
        };
        self.state = WriterState::Sealed(path.clone());
        self.inputs.clear();
        log::info!(
            "sealed {}: {} records, {} blobs, {} modules, {} dropped invocations",
            path.display(),
            self.records,
            self.blobs.len(),
            self.modules.len(),
            self.diagnostics.len()
        );
        Ok(SealedArchive {
            path,
            record_count: self.records,
            blob_count: self.blobs.len(),
            module_count: self.modules.len(),
            diagnostics: self.diagnostics.clone(),
        })
    }

    fn finish(&mut self) -> Result<PathBuf> {
        let infos: Vec<ModuleInfo> = self.modules.infos().cloned().collect();
        let index = codec::encode_module_index(&infos)?;
        let diagnostics = codec::encode_diagnostics(&self.diagnostics)?;
        let mut manifest = Manifest::new(self.config.path_style);
        manifest.record_count = self.records;
        manifest.blob_count = self.blobs.len();
        manifest.module_count = self.modules.len();
        let manifest = manifest.encode()?;

        let container = self.state.container()?;
        container.write_entry(MODULE_INDEX_ENTRY, &index)?;
        container.write_entry(DIAGNOSTICS_ENTRY, &diagnostics)?;
        container.write_entry(MANIFEST_ENTRY, &manifest)?;
        container.seal()
    }

    pub(crate) fn ensure_open(&mut self) -> Result<()> {
        self.state.container().map(|_| ())
    }

    /// Drops the container, which removes the temp file, and poisons the
    /// writer. Returns `err` for the caller to propagate.
    fn abort(&mut self, err: Error) -> Error {
        if matches!(self.state, WriterState::Open(_)) {
            log::error!("aborting archive writer: {err}");
            self.state = WriterState::Aborted(err.to_string());
            self.inputs.clear();
        }
        err
    }

    fn cached(&self, path: &Path, meta: &std::fs::Metadata) -> Option<&InputIdentity> {
        let cached = self.inputs.get(path)?;
        (cached.fingerprint == Fingerprint::of(meta)).then_some(&cached.identity)
    }

    fn remember(&mut self, path: &Path, meta: &std::fs::Metadata, identity: InputIdentity) {
        self.inputs.insert(
            path.to_path_buf(),
            CachedInput {
                fingerprint: Fingerprint::of(meta),
                identity,
            },
        );
    }

    fn content_key(&mut self, path: &Path) -> Result<ContentKey> {
        let meta = stat(path)?;
        if let Some(InputIdentity::Content(key)) = self.cached(path, &meta) {
            return Ok(*key);
        }
        let stored = self.state.container().and_then(|c| self.blobs.put_file(c, path));
        let key = self.checked(stored)?;
        self.remember(path, &meta, InputIdentity::Content(key));
        Ok(key)
    }

    fn module_info(&mut self, path: &Path) -> Result<ModuleInfo> {
        let meta = stat(path)?;
        if let Some(InputIdentity::Module(info)) = self.cached(path, &meta) {
            return Ok(info.clone());
        }
        let stored = self.state.container().and_then(|c| self.modules.put_file(c, path));
        let info = self.checked(stored)?;
        self.remember(path, &meta, InputIdentity::Module(info.clone()));
        Ok(info)
    }

    fn put_text(&mut self, data: &[u8]) -> Result<ContentKey> {
        let stored = self.state.container().and_then(|c| self.blobs.put(c, data));
        self.checked(stored)
    }

    /// Passes invocation-scoped failures through and aborts on the rest.
    fn checked<T>(&mut self, result: Result<T>) -> Result<T> {
        result.map_err(|err| {
            if err.is_invocation_scoped() {
                err
            } else {
                self.abort(err)
            }
        })
    }

    pub(crate) fn report(&mut self, project_path: &str, err: &Error) {
        let diagnostic = Diagnostic::from_error(project_path, err);
        log::warn!(
            "dropping invocation for {}: {}",
            diagnostic.project_path,
            diagnostic.message
        );
        self.diagnostics.push(diagnostic);
    }

    fn commit_record(&mut self, record: InvocationRecord, failure: Option<Error>) -> Result<usize> {
        if let Some(err) = failure {
            if err.is_invocation_scoped() {
                self.report(&record.project_path, &err);
                return Err(err);
            }
            return Err(self.abort(err));
        }
        let index = self.records;
        let written = codec::encode(&record).and_then(|encoded| {
            self.state
                .container()?
                .write_entry(&codec::record_entry_name(index), &encoded)
        });
        self.checked(written)?;
        self.records += 1;
        log::debug!("recorded invocation {index} for {}", record.project_path);
        Ok(index)
    }
}

fn stat(path: &Path) -> Result<std::fs::Metadata> {
    std::fs::metadata(path).map_err(|source| Error::InputUnreadable {
        path: path.to_path_buf(),
        source,
    })
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Accumulates one invocation. The first failing `add_*` poisons the builder;
/// later adds are skipped and `commit` reports the failure.
pub struct InvocationBuilder<'w> {
    writer: &'w mut ArchiveWriter,
    record: InvocationRecord,
    failure: Option<Error>,
}

impl InvocationBuilder<'_> {
    pub fn add_source(self, path: impl AsRef<Path>) -> Self {
        self.add_content(path, ContentKind::Source)
    }

    pub fn add_additional_file(self, path: impl AsRef<Path>) -> Self {
        self.add_content(path, ContentKind::AdditionalText)
    }

    pub fn add_analyzer_config(self, path: impl AsRef<Path>) -> Self {
        self.add_content(path, ContentKind::AnalyzerConfig)
    }

    pub fn add_content(mut self, path: impl AsRef<Path>, kind: ContentKind) -> Self {
        if self.failure.is_none() {
            let path = path.as_ref();
            match self.writer.content_key(path) {
                Ok(key) => self.record.contents.push(ContentEntry {
                    kind,
                    key,
                    path: display(path),
                }),
                Err(err) => self.failure = Some(err),
            }
        }
        self
    }

    pub fn add_embedded_resource(
        mut self,
        path: impl AsRef<Path>,
        name: impl Into<String>,
        is_public: bool,
    ) -> Self {
        if self.failure.is_none() {
            let path = path.as_ref();
            match self.writer.content_key(path) {
                Ok(key) => self.record.resources.push(ResourceEntry {
                    key,
                    name: name.into(),
                    file_name: path.file_name().map(|n| n.to_string_lossy().into_owned()),
                    is_public,
                }),
                Err(err) => self.failure = Some(err),
            }
        }
        self
    }

    pub fn add_reference<S: AsRef<str>>(
        mut self,
        path: impl AsRef<Path>,
        kind: ReferenceKind,
        embed_interop_types: bool,
        aliases: &[S],
    ) -> Self {
        if self.failure.is_none() {
            let path = path.as_ref();
            match self.writer.module_info(path) {
                Ok(info) => self.record.references.push(ReferenceEntry {
                    module: info.id,
                    kind,
                    embed_interop_types,
                    aliases: aliases.iter().map(|a| a.as_ref().to_string()).collect(),
                    path: display(path),
                }),
                Err(err) => self.failure = Some(err),
            }
        }
        self
    }

    pub fn add_analyzer(mut self, path: impl AsRef<Path>) -> Self {
        if self.failure.is_none() {
            let path = path.as_ref();
            match self.writer.module_info(path) {
                Ok(info) => self.record.analyzers.push(AnalyzerEntry {
                    module: info.id,
                    path: display(path),
                }),
                Err(err) => self.failure = Some(err),
            }
        }
        self
    }

    /// Captures a generator output file observed on disk.
    pub fn add_generated_source(mut self, path: impl AsRef<Path>) -> Self {
        if self.failure.is_none() {
            let path = path.as_ref();
            match self.writer.content_key(path) {
                Ok(key) => self
                    .record
                    .generated
                    .get_or_insert_with(Vec::new)
                    .push(GeneratedEntry {
                        key,
                        path: display(path),
                    }),
                Err(err) => self.failure = Some(err),
            }
        }
        self
    }

    /// Captures generator output held in memory under the hint path `name`.
    pub fn add_generated_text(mut self, name: impl Into<String>, text: &[u8]) -> Self {
        if self.failure.is_none() {
            match self.writer.put_text(text) {
                Ok(key) => self
                    .record
                    .generated
                    .get_or_insert_with(Vec::new)
                    .push(GeneratedEntry {
                        key,
                        path: name.into(),
                    }),
                Err(err) => self.failure = Some(err),
            }
        }
        self
    }

    /// Marks generator output as captured even if no file gets added.
    pub fn mark_generators_captured(mut self) -> Self {
        self.record.generated.get_or_insert_with(Vec::new);
        self
    }

    pub fn set_options(mut self, options: OptionsBundle) -> Self {
        self.record.options = options;
        self
    }

    pub fn set_target_framework(mut self, target_framework: impl Into<String>) -> Self {
        self.record.target_framework = Some(target_framework.into());
        self
    }

    pub fn set_output_name(mut self, output_name: impl Into<String>) -> Self {
        self.record.output_name = Some(output_name.into());
        self
    }

    pub fn set_working_directory(mut self, dir: impl Into<String>) -> Self {
        self.record.working_directory = Some(dir.into());
        self
    }

    pub fn set_arguments<S: Into<String>>(mut self, args: impl IntoIterator<Item = S>) -> Self {
        self.record.arguments = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn record(&self) -> &InvocationRecord {
        &self.record
    }

    pub fn has_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Writes the record and returns its index, or drops the invocation and
    /// returns the first input failure.
    pub fn commit(self) -> Result<usize> {
        self.writer.commit_record(self.record, self.failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn same_path_is_read_once() -> Result<()> {
        let dir = tempdir()?;
        let src = dir.path().join("a.cs");
        std::fs::write(&src, "class A {}")?;
        let mut writer = ArchiveWriter::create(dir.path().join("out.complog"))?;

        for _ in 0..3 {
            writer
                .begin_invocation("p.csproj", Language::CSharp, InvocationKind::Regular)?
                .add_source(&src)
                .commit()?;
        }
        assert_eq!(writer.inputs.len(), 1);
        assert_eq!(writer.blob_count(), 1);
        assert_eq!(writer.record_count(), 3);
        Ok(())
    }

    #[test]
    fn changed_file_is_rehashed() -> Result<()> {
        let dir = tempdir()?;
        let src = dir.path().join("a.cs");
        std::fs::write(&src, "class A {}")?;
        let mut writer = ArchiveWriter::create(dir.path().join("out.complog"))?;
        writer
            .begin_invocation("p.csproj", Language::CSharp, InvocationKind::Regular)?
            .add_source(&src)
            .commit()?;
        std::fs::write(&src, "class A { int x; }")?;
        writer
            .begin_invocation("p.csproj", Language::CSharp, InvocationKind::Regular)?
            .add_source(&src)
            .commit()?;
        assert_eq!(writer.blob_count(), 2);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn replaced_file_with_same_size_and_mtime_is_rehashed() -> Result<()> {
        let dir = tempdir()?;
        let src = dir.path().join("a.cs");
        std::fs::write(&src, "class A {}")?;
        let modified = std::fs::metadata(&src)?.modified()?;
        let mut writer = ArchiveWriter::create(dir.path().join("out.complog"))?;
        writer
            .begin_invocation("p.csproj", Language::CSharp, InvocationKind::Regular)?
            .add_source(&src)
            .commit()?;

        let staged = dir.path().join("a.cs.new");
        std::fs::write(&staged, "class B {}")?;
        std::fs::File::options()
            .write(true)
            .open(&staged)?
            .set_modified(modified)?;
        std::fs::rename(&staged, &src)?;
        let meta = std::fs::metadata(&src)?;
        assert_eq!((meta.len(), meta.modified()?), (10, modified));

        writer
            .begin_invocation("p.csproj", Language::CSharp, InvocationKind::Regular)?
            .add_source(&src)
            .commit()?;
        assert_eq!(writer.blob_count(), 2);
        Ok(())
    }

    #[test]
    fn archive_failure_aborts_instead_of_dropping() -> Result<()> {
        let dir = tempdir()?;
        let out = dir.path().join("out.complog");
        let mut writer = ArchiveWriter::create(out.clone())?;
        let mut builder =
            writer.begin_invocation("p.csproj", Language::CSharp, InvocationKind::Regular)?;
        builder.failure = Some(Error::Io(std::io::Error::other("disk full")));
        assert!(matches!(builder.commit(), Err(Error::Io(_))));

        assert!(writer.diagnostics().is_empty());
        assert!(matches!(
            writer.begin_invocation("p.csproj", Language::CSharp, InvocationKind::Regular),
            Err(Error::Aborted(_))
        ));
        assert!(matches!(writer.seal(), Err(Error::Aborted(_))));
        assert!(matches!(writer.archive_path(), Err(Error::Aborted(_))));
        assert!(!out.exists());
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 0, "temp file removed");
        Ok(())
    }

    #[test]
    fn archive_path_requires_seal() -> Result<()> {
        let dir = tempdir()?;
        let mut writer = ArchiveWriter::create(dir.path().join("out.complog"))?;
        assert!(matches!(writer.archive_path(), Err(Error::NotSealed)));
        let sealed = writer.seal()?;
        assert_eq!(writer.archive_path()?, sealed.path.as_path());
        assert!(matches!(writer.seal(), Err(Error::AlreadySealed)));
        assert!(matches!(
            writer.begin_invocation("p", Language::CSharp, InvocationKind::Regular),
            Err(Error::AlreadySealed)
        ));
        Ok(())
    }
}
