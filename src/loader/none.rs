use std::sync::Arc;

use crate::loader::{ExtensionHandle, ExtensionLoader, ExtensionOrigin, LoaderKind};
use crate::module::ExtensionKind;
use crate::reader::ArchiveReader;
use crate::record::{InvocationRecord, Language};
use crate::Result;

/// Type name of the stand-in generator exposed by the `None` strategy.
pub const SYNTHETIC_GENERATOR: &str = "complog.CapturedOutputGenerator";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    pub path: String,
    pub text: Arc<[u8]>,
}

/// What the synthetic generator will produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedOutcome {
    /// Generator output was never recorded for this invocation.
    NotCaptured,
    /// Recorded output, possibly empty, in stored order.
    Captured(Vec<GeneratedFile>),
}

impl GeneratedOutcome {
    pub fn is_captured(&self) -> bool {
        matches!(self, GeneratedOutcome::Captured(_))
    }

    pub fn files(&self) -> &[GeneratedFile] {
        match self {
            GeneratedOutcome::NotCaptured => &[],
            GeneratedOutcome::Captured(files) => files,
        }
    }
}

/// Runs no extension code. Analyzers are skipped and generators are replaced
/// by one synthetic generator over the captured output.
#[derive(Debug)]
pub struct NoneLoader {
    language: Language,
    outcome: GeneratedOutcome,
    disposed: bool,
}

impl NoneLoader {
    pub fn new(reader: &ArchiveReader, record: &InvocationRecord) -> Result<Self> {
        let outcome = match &record.generated {
            None => GeneratedOutcome::NotCaptured,
            Some(entries) => GeneratedOutcome::Captured(
                entries
                    .iter()
                    .map(|entry| -> Result<GeneratedFile> {
                        Ok(GeneratedFile {
                            path: entry.path.clone(),
                            text: reader.blob_bytes(&entry.key)?.into(),
                        })
                    })
                    .collect::<Result<_>>()?,
            ),
        };
        Ok(Self {
            language: record.language,
            outcome,
            disposed: false,
        })
    }

    pub fn outcome(&self) -> &GeneratedOutcome {
        &self.outcome
    }
}

impl ExtensionLoader for NoneLoader {
    fn kind(&self) -> LoaderKind {
        LoaderKind::None
    }

    fn analyzers(&self, _language: Language) -> Vec<ExtensionHandle> {
        Vec::new()
    }

    fn generators(&self, language: Language) -> Vec<ExtensionHandle> {
        if self.disposed || language != self.language {
            return Vec::new();
        }
        vec![ExtensionHandle {
            type_name: SYNTHETIC_GENERATOR.to_string(),
            kind: ExtensionKind::Generator,
            origin: ExtensionOrigin::Synthetic(self.outcome.clone()),
        }]
    }

    fn dispose(&mut self) {
        self.outcome = GeneratedOutcome::NotCaptured;
        self.disposed = true;
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }
}
