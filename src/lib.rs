//! Capture and replay archives for compiler invocations.
//!
//! An [`ArchiveWriter`] records invocations into a single sealed container,
//! storing every distinct input once. An [`ArchiveReader`] opens the sealed
//! container, decodes records by index and resolves their inputs on demand.
//! [`replay::replay_all`] feeds records to an external compiler front-end in
//! parallel, each with its own extension loader.

pub mod blob;
pub mod codec;
pub mod config;
pub mod container;
pub mod discovery;
pub mod error;
pub mod hash;
pub mod loader;
pub mod module;
pub mod options;
pub mod path;
pub mod pool;
pub mod reader;
pub mod record;
pub mod replay;
pub mod writer;

pub use blob::ContentKey;
pub use config::{
    CaptureConfig, CompressionConfig, HostModules, LoaderConfig, ReaderConfig, ReplayConfig,
    WriterConfig,
};
pub use discovery::{InvocationResolver, RawInvocation, ResolvedInputs};
pub use error::{Error, Result};
pub use hash::InvocationHash;
pub use loader::{ExtensionLoader, GeneratedOutcome, LoaderKind};
pub use module::{ModuleId, ModuleImage, ModuleInfo, ModuleVersion};
pub use options::OptionsBundle;
pub use path::PathStyle;
pub use reader::ArchiveReader;
pub use record::{ContentKind, InvocationKind, InvocationRecord, Language, ReferenceKind};
pub use replay::{replay_all, CancelToken, CompilerFrontEnd, ReplayReport, ReplayRequest};
pub use writer::{ArchiveWriter, Diagnostic, SealedArchive};
