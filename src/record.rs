//! Captured metadata for one compiler invocation.
//!
//! Every list keeps the order the compiler saw it in. Identity keys point
//! into the archive's blob and module pools; the original paths are kept
//! verbatim next to them.

use serde::{Deserialize, Serialize};

use crate::blob::ContentKey;
use crate::module::ModuleId;
use crate::options::OptionsBundle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    CSharp,
    VisualBasic,
}

impl Language {
    /// Name used by extension markers.
    pub fn marker_name(self) -> &'static str {
        match self {
            Language::CSharp => "C#",
            Language::VisualBasic => "Visual Basic",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvocationKind {
    #[default]
    Regular,
    Satellite,
    WpfTemporaryCompile,
    XamlPreCompile,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentKind {
    Source,
    AdditionalText,
    AnalyzerConfig,
    Embed,
    SourceLink,
    RuleSet,
    AppConfig,
    Win32Manifest,
    Win32Resource,
    Win32Icon,
    CryptoKeyFile,
}

impl ContentKind {
    /// Whether the relative order of entries of this kind affects the build.
    pub fn is_order_sensitive(self) -> bool {
        matches!(self, ContentKind::Source)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentEntry {
    pub kind: ContentKind,
    pub key: ContentKey,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEntry {
    pub key: ContentKey,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub is_public: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    #[default]
    Assembly,
    Module,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub module: ModuleId,
    pub kind: ReferenceKind,
    #[serde(default)]
    pub embed_interop_types: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerEntry {
    pub module: ModuleId,
    pub path: String,
}

/// Source text a generator produced at capture time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedEntry {
    pub key: ContentKey,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub project_path: String,
    pub language: Language,
    pub kind: InvocationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_framework: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_name: Option<String>,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub contents: Vec<ContentEntry>,
    #[serde(default)]
    pub resources: Vec<ResourceEntry>,
    #[serde(default)]
    pub references: Vec<ReferenceEntry>,
    #[serde(default)]
    pub analyzers: Vec<AnalyzerEntry>,
    /// `None` when generator output was never captured; `Some(vec![])` when
    /// generators ran and produced nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated: Option<Vec<GeneratedEntry>>,
    #[serde(default)]
    pub options: OptionsBundle,
}

impl InvocationRecord {
    pub fn new(project_path: impl Into<String>, language: Language, kind: InvocationKind) -> Self {
        Self {
            project_path: project_path.into(),
            language,
            kind,
            target_framework: None,
            working_directory: None,
            output_name: None,
            arguments: Vec::new(),
            contents: Vec::new(),
            resources: Vec::new(),
            references: Vec::new(),
            analyzers: Vec::new(),
            generated: None,
            options: OptionsBundle::default(),
        }
    }

    pub fn contents_of(&self, kind: ContentKind) -> impl Iterator<Item = &ContentEntry> + '_ {
        self.contents.iter().filter(move |entry| entry.kind == kind)
    }

    pub fn sources(&self) -> impl Iterator<Item = &ContentEntry> + '_ {
        self.contents_of(ContentKind::Source)
    }

    pub fn additional_files(&self) -> impl Iterator<Item = &ContentEntry> + '_ {
        self.contents_of(ContentKind::AdditionalText)
    }

    /// Every module id the record points at, references first.
    pub fn module_ids(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.references
            .iter()
            .map(|r| r.module)
            .chain(self.analyzers.iter().map(|a| a.module))
    }

    /// Every content key the record points at.
    pub fn content_keys(&self) -> impl Iterator<Item = ContentKey> + '_ {
        self.contents
            .iter()
            .map(|c| c.key)
            .chain(self.resources.iter().map(|r| r.key))
            .chain(self.generated.iter().flatten().map(|g| g.key))
    }

    pub fn project_name(&self) -> &str {
        let file = crate::path::file_name(&self.project_path);
        file.rsplit_once('.').map_or(file, |(stem, _)| stem)
    }
}
