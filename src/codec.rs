//! Encoding of records and archive metadata entries.
//!
//! Records are JSON objects with named fields wrapped in a versioned
//! envelope. Readers ignore fields they do not know and default fields that
//! are missing, so optional fields can be added without a format bump.

use serde::{Deserialize, Serialize};

use crate::module::ModuleInfo;
use crate::path::PathStyle;
use crate::record::InvocationRecord;
use crate::writer::Diagnostic;
use crate::{Error, Result};

pub const RECORD_FORMAT_VERSION: u32 = 1;
pub const ARCHIVE_FORMAT_VERSION: u32 = 1;

pub const MANIFEST_ENTRY: &str = "manifest.json";
pub const MODULE_INDEX_ENTRY: &str = "modules/index.json";
pub const DIAGNOSTICS_ENTRY: &str = "diagnostics.json";
pub const RECORD_PREFIX: &str = "records/";

pub fn record_entry_name(index: usize) -> String {
    format!("{RECORD_PREFIX}{index}.json")
}

#[derive(Serialize)]
struct RecordEnvelopeRef<'a> {
    version: u32,
    record: &'a InvocationRecord,
}

#[derive(Deserialize)]
struct RecordEnvelope {
    version: u32,
    record: InvocationRecord,
}

pub fn encode(record: &InvocationRecord) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&RecordEnvelopeRef {
        version: RECORD_FORMAT_VERSION,
        record,
    })?)
}

/// Decodes a whole record or fails; nothing is partially applied.
/// The version is checked before the record body, so a newer layout is
/// `InvalidFormat` even when its body does not parse as this one.
pub fn decode(bytes: &[u8]) -> Result<InvocationRecord> {
    let value: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|err| Error::corrupt(format!("record undecodable: {err}")))?;
    let version = value
        .get("version")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| Error::corrupt("record has no version"))?;
    if version > u64::from(RECORD_FORMAT_VERSION) {
        return Err(Error::InvalidFormat(format!(
            "record version {version} is newer than supported {RECORD_FORMAT_VERSION}"
        )));
    }
    let envelope: RecordEnvelope = serde_json::from_value(value)
        .map_err(|err| Error::corrupt(format!("record malformed: {err}")))?;
    Ok(envelope.record)
}

/// Top-level description of an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub path_style: PathStyle,
    pub record_count: usize,
    #[serde(default)]
    pub blob_count: usize,
    #[serde(default)]
    pub module_count: usize,
    #[serde(default)]
    pub tool_version: String,
}

impl Manifest {
    pub fn new(path_style: PathStyle) -> Self {
        Self {
            format_version: ARCHIVE_FORMAT_VERSION,
            path_style,
            record_count: 0,
            blob_count: 0,
            module_count: 0,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|err| Error::corrupt(format!("manifest undecodable: {err}")))?;
        let version = value
            .get("format_version")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| Error::corrupt("manifest has no format version"))?;
        if version > u64::from(ARCHIVE_FORMAT_VERSION) {
            return Err(Error::InvalidFormat(format!(
                "archive format {version} is newer than supported {ARCHIVE_FORMAT_VERSION}"
            )));
        }
        serde_json::from_value(value)
            .map_err(|err| Error::corrupt(format!("manifest malformed: {err}")))
    }
}

pub fn encode_module_index(modules: &[ModuleInfo]) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(modules)?)
}

pub fn decode_module_index(bytes: &[u8]) -> Result<Vec<ModuleInfo>> {
    serde_json::from_slice(bytes)
        .map_err(|err| Error::corrupt(format!("module index undecodable: {err}")))
}

pub fn encode_diagnostics(diagnostics: &[Diagnostic]) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(diagnostics)?)
}

pub fn decode_diagnostics(bytes: &[u8]) -> Result<Vec<Diagnostic>> {
    serde_json::from_slice(bytes)
        .map_err(|err| Error::corrupt(format!("diagnostics undecodable: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::ContentKey;
    use crate::module::ModuleId;
    use crate::record::{
        AnalyzerEntry, ContentEntry, ContentKind, GeneratedEntry, InvocationKind, Language,
        ReferenceEntry, ReferenceKind, ResourceEntry,
    };

    fn sample() -> InvocationRecord {
        let mut record = InvocationRecord::new(
            "/src/app/app.csproj",
            Language::CSharp,
            InvocationKind::Regular,
        );
        record.target_framework = Some("net8.0".to_string());
        record.arguments = vec!["/nologo".to_string(), "Program.cs".to_string()];
        record.contents = vec![
            ContentEntry {
                kind: ContentKind::Source,
                key: ContentKey::of(b"b"),
                path: "/src/app/B.cs".to_string(),
            },
            ContentEntry {
                kind: ContentKind::Source,
                key: ContentKey::of(b"a"),
                path: "/src/app/A.cs".to_string(),
            },
            ContentEntry {
                kind: ContentKind::AnalyzerConfig,
                key: ContentKey::of(b"root = true"),
                path: "/src/.editorconfig".to_string(),
            },
        ];
        record.resources = vec![ResourceEntry {
            key: ContentKey::of(b"res"),
            name: "app.Strings.resources".to_string(),
            file_name: None,
            is_public: true,
        }];
        record.references = vec![ReferenceEntry {
            module: ModuleId::from_bytes([9; 16]),
            kind: ReferenceKind::Assembly,
            embed_interop_types: true,
            aliases: vec!["global".to_string(), "core".to_string()],
            path: "/nuget/Core.dll".to_string(),
        }];
        record.analyzers = vec![AnalyzerEntry {
            module: ModuleId::from_bytes([4; 16]),
            path: "/nuget/Gen.dll".to_string(),
        }];
        record.generated = Some(vec![GeneratedEntry {
            key: ContentKey::of(b"partial class C {}"),
            path: "Gen/C.g.cs".to_string(),
        }]);
        record
            .options
            .compilation
            .specific_diagnostic_options
            .insert("CS1591", 0);
        record.options.parse.features.insert("strict", String::new());
        record.options.emit.checksum_algorithm = 2;
        record
    }

    #[test]
    fn decode_of_encode_is_identity() {
        let record = sample();
        let decoded = decode(&encode(&record).expect("encode")).expect("decode");
        assert_eq!(decoded, record);
    }

    #[test]
    fn generated_tri_state_survives() {
        let mut record = sample();
        record.generated = None;
        assert_eq!(decode(&encode(&record).unwrap()).unwrap().generated, None);
        record.generated = Some(Vec::new());
        assert_eq!(
            decode(&encode(&record).unwrap()).unwrap().generated,
            Some(Vec::new())
        );
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let json = r#"{"version":1,"record":{"project_path":"p.csproj","language":"csharp",
            "kind":"satellite","future_field":{"x":1}}}"#;
        let record = decode(json.as_bytes()).expect("decode");
        assert_eq!(record.kind, InvocationKind::Satellite);
        assert!(record.contents.is_empty());
    }

    #[test]
    fn newer_record_version_is_rejected() {
        let json = r#"{"version":99,"record":{"project_path":"p","language":"csharp","kind":"regular"}}"#;
        assert!(matches!(decode(json.as_bytes()), Err(Error::InvalidFormat(_))));
        assert!(matches!(decode(b"{\"version\":1"), Err(Error::Corrupt(_))));
    }

    #[test]
    fn newer_record_with_a_different_body_is_invalid_format() {
        let json = r#"{"version":2,"record":{"entries":[{"blob":"ab"}],"shape":"changed"}}"#;
        assert!(matches!(decode(json.as_bytes()), Err(Error::InvalidFormat(_))));
        let current = r#"{"version":1,"record":{"shape":"changed"}}"#;
        assert!(matches!(decode(current.as_bytes()), Err(Error::Corrupt(_))));
        assert!(matches!(decode(br#"{"record":{}}"#), Err(Error::Corrupt(_))));
    }

    #[test]
    fn manifest_version_gate() {
        let manifest = Manifest::new(PathStyle::Windows);
        let decoded = Manifest::decode(&manifest.encode().unwrap()).unwrap();
        assert_eq!(decoded, manifest);

        let newer = br#"{"format_version":7,"path_style":"unix","record_count":1,"shiny":true}"#;
        assert!(matches!(Manifest::decode(newer), Err(Error::InvalidFormat(_))));
        assert!(matches!(Manifest::decode(b"{\"format_"), Err(Error::Corrupt(_))));
    }
}
