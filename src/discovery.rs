//! Boundary with the invocation discovery collaborator.
//!
//! Discovery hands over raw invocations (project, language, working
//! directory, unparsed arguments). Interpreting the arguments is the
//! resolver's job; the writer only stores what the resolver produced.

use std::path::{Path, PathBuf};

use crate::options::OptionsBundle;
use crate::record::{ContentKind, InvocationKind, Language, ReferenceKind};
use crate::writer::{ArchiveWriter, InvocationBuilder};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawInvocation {
    pub project_path: String,
    pub language: Language,
    pub kind: InvocationKind,
    pub working_directory: PathBuf,
    pub arguments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedReference {
    pub path: PathBuf,
    pub kind: ReferenceKind,
    pub embed_interop_types: bool,
    pub aliases: Vec<String>,
}

impl ResolvedReference {
    pub fn assembly(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: ReferenceKind::Assembly,
            embed_interop_types: false,
            aliases: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedResource {
    pub path: PathBuf,
    pub name: String,
    pub is_public: bool,
}

/// Inputs of one invocation as the resolver understood its arguments. Lists
/// are in command-line order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedInputs {
    pub target_framework: Option<String>,
    pub output_name: Option<String>,
    pub contents: Vec<(PathBuf, ContentKind)>,
    pub resources: Vec<ResolvedResource>,
    pub references: Vec<ResolvedReference>,
    pub analyzers: Vec<PathBuf>,
    /// `None` when generator output was not observed.
    pub generated: Option<Vec<PathBuf>>,
    pub options: OptionsBundle,
}

pub trait InvocationResolver {
    fn resolve(&self, raw: &RawInvocation) -> anyhow::Result<ResolvedInputs>;
}

impl<F> InvocationResolver for F
where
    F: Fn(&RawInvocation) -> anyhow::Result<ResolvedInputs>,
{
    fn resolve(&self, raw: &RawInvocation) -> anyhow::Result<ResolvedInputs> {
        self(raw)
    }
}

impl ArchiveWriter {
    /// Resolves `raw` and records it. Relative input paths are taken from the
    /// invocation's working directory. Resolver failures drop the invocation
    /// like any other input failure.
    pub fn capture(
        &mut self,
        raw: &RawInvocation,
        resolver: &dyn InvocationResolver,
    ) -> Result<usize> {
        self.ensure_open()?;
        let inputs = match resolver.resolve(raw) {
            Ok(inputs) => inputs,
            Err(err) => {
                let err = Error::Discovery {
                    project_path: raw.project_path.clone(),
                    message: format!("{err:#}"),
                };
                self.report(&raw.project_path, &err);
                return Err(err);
            }
        };

        let cwd = raw.working_directory.as_path();
        let builder = self
            .begin_invocation(raw.project_path.clone(), raw.language, raw.kind)?
            .set_working_directory(cwd.to_string_lossy())
            .set_arguments(raw.arguments.iter().cloned())
            .set_options(inputs.options);
        let builder = apply_inputs(builder, cwd, inputs.contents, inputs.resources);
        let mut builder = inputs
            .references
            .into_iter()
            .fold(builder, |b, reference| {
                b.add_reference(
                    within(cwd, &reference.path),
                    reference.kind,
                    reference.embed_interop_types,
                    reference.aliases.as_slice(),
                )
            });
        builder = inputs
            .analyzers
            .iter()
            .fold(builder, |b, path| b.add_analyzer(within(cwd, path)));
        if let Some(generated) = inputs.generated {
            builder = generated
                .iter()
                .fold(builder.mark_generators_captured(), |b, path| {
                    b.add_generated_source(within(cwd, path))
                });
        }
        if let Some(target_framework) = inputs.target_framework {
            builder = builder.set_target_framework(target_framework);
        }
        if let Some(output_name) = inputs.output_name {
            builder = builder.set_output_name(output_name);
        }
        builder.commit()
    }
}

fn apply_inputs<'w>(
    builder: InvocationBuilder<'w>,
    cwd: &Path,
    contents: Vec<(PathBuf, ContentKind)>,
    resources: Vec<ResolvedResource>,
) -> InvocationBuilder<'w> {
    let builder = contents
        .iter()
        .fold(builder, |b, (path, kind)| b.add_content(within(cwd, path), *kind));
    resources.into_iter().fold(builder, |b, resource| {
        b.add_embedded_resource(within(cwd, &resource.path), resource.name, resource.is_public)
    })
}

fn within(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}
