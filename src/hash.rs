//! Per-invocation content and identity hashes.
//!
//! Both hashes are blake3 digests over a canonical JSON view of a record.
//! The content view carries the literal input digests and stored strings in
//! stored order. The identity view relativizes machine paths and sorts the
//! collections whose order the compiler does not care about.

use std::fmt;

use serde::Serialize;

use crate::blob::ContentKey;
use crate::module::ModuleId;
use crate::options::OptionsBundle;
use crate::path;
use crate::record::{ContentKind, InvocationKind, InvocationRecord, Language, ReferenceKind};
use crate::Result;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvocationHash([u8; 32]);

impl InvocationHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for InvocationHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for InvocationHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InvocationHash({})", self.to_hex())
    }
}

/// Digest of a pooled module's bytes.
pub trait ModuleDigests {
    fn module_digest(&self, id: &ModuleId) -> Result<[u8; 32]>;
}

#[derive(Serialize)]
struct ContentView<'a> {
    language: Language,
    kind: InvocationKind,
    target_framework: Option<&'a str>,
    output_name: Option<&'a str>,
    contents: Vec<(ContentKind, ContentKey)>,
    resources: Vec<(ContentKey, &'a str, bool)>,
    references: Vec<(String, ReferenceKind, bool, &'a [String])>,
    analyzers: Vec<String>,
    generated: Option<Vec<ContentKey>>,
    options: &'a OptionsBundle,
}

#[derive(Serialize)]
struct IdentityView<'a> {
    language: Language,
    kind: InvocationKind,
    target_framework: Option<&'a str>,
    output_name: Option<&'a str>,
    contents: Vec<(ContentKind, ContentKey, String)>,
    resources: Vec<(ContentKey, &'a str, bool)>,
    references: Vec<(ModuleId, ReferenceKind, bool, Vec<String>)>,
    analyzers: Vec<ModuleId>,
    generated: Option<Vec<(ContentKey, String)>>,
    options: OptionsBundle,
}

/// Digest of the literal inputs in stored order. References contribute the
/// digest of their module bytes and their aliases verbatim.
pub fn content_hash(record: &InvocationRecord, modules: &dyn ModuleDigests) -> Result<InvocationHash> {
    let references = record
        .references
        .iter()
        .map(|r| -> Result<_> {
            Ok((
                hex::encode(modules.module_digest(&r.module)?),
                r.kind,
                r.embed_interop_types,
                r.aliases.as_slice(),
            ))
        })
        .collect::<Result<Vec<_>>>()?;
    let analyzers = record
        .analyzers
        .iter()
        .map(|a| modules.module_digest(&a.module).map(hex::encode))
        .collect::<Result<Vec<_>>>()?;

    let view = ContentView {
        language: record.language,
        kind: record.kind,
        target_framework: record.target_framework.as_deref(),
        output_name: record.output_name.as_deref(),
        contents: record.contents.iter().map(|c| (c.kind, c.key)).collect(),
        resources: record
            .resources
            .iter()
            .map(|r| (r.key, r.name.as_str(), r.is_public))
            .collect(),
        references,
        analyzers,
        generated: record
            .generated
            .as_ref()
            .map(|entries| entries.iter().map(|g| g.key).collect()),
        options: &record.options,
    };
    digest(&view)
}

/// Digest of the machine-independent view of `record`.
pub fn identity_hash(record: &InvocationRecord) -> Result<InvocationHash> {
    let root = path::parent_dir(&record.project_path);
    let rel = |p: &str| path::relativize(p, &root);

    // Sources keep their stored order; every other content kind is sorted
    // within its own kind.
    let (mut contents, mut unordered): (Vec<_>, Vec<_>) = record
        .contents
        .iter()
        .map(|c| (c.kind, c.key, rel(&c.path)))
        .partition(|(kind, _, _)| kind.is_order_sensitive());
    unordered.sort();
    contents.extend(unordered);

    let mut resources: Vec<_> = record
        .resources
        .iter()
        .map(|r| (r.key, r.name.as_str(), r.is_public))
        .collect();
    resources.sort();

    let references = record
        .references
        .iter()
        .map(|r| {
            let mut aliases: Vec<String> = r
                .aliases
                .iter()
                .map(|alias| path::canonicalize_text(alias, &root))
                .collect();
            aliases.sort();
            aliases.dedup();
            (r.module, r.kind, r.embed_interop_types, aliases)
        })
        .collect();

    let mut analyzers: Vec<ModuleId> = record.analyzers.iter().map(|a| a.module).collect();
    analyzers.sort();

    let generated = record.generated.as_ref().map(|entries| {
        let mut generated: Vec<_> = entries.iter().map(|g| (g.key, rel(&g.path))).collect();
        generated.sort();
        generated
    });

    let mut options = record.options.clone();
    relativize_option(&mut options.compilation.crypto_key_file, &root);
    relativize_option(&mut options.emit.pdb_file_path, &root);

    let view = IdentityView {
        language: record.language,
        kind: record.kind,
        target_framework: record.target_framework.as_deref(),
        output_name: record.output_name.as_deref(),
        contents,
        resources,
        references,
        analyzers,
        generated,
        options,
    };
    digest(&view)
}

fn relativize_option(value: &mut Option<String>, root: &str) {
    if let Some(p) = value.as_mut() {
        *p = path::relativize(p, root);
    }
}

fn digest<T: Serialize>(view: &T) -> Result<InvocationHash> {
    let bytes = serde_json::to_vec(view)?;
    Ok(InvocationHash(*blake3::hash(&bytes).as_bytes()))
}
