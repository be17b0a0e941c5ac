use std::path::PathBuf;

use crate::module::ModuleVersion;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("input unreadable: {path}: {source}")]
    InputUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported module {path}: {reason}")]
    UnsupportedModule { path: PathBuf, reason: String },
    #[error("invocation discovery failed for {project_path}: {message}")]
    Discovery {
        project_path: String,
        message: String,
    },
    #[error("archive already sealed")]
    AlreadySealed,
    #[error("archive not sealed")]
    NotSealed,
    #[error("archive writer aborted: {0}")]
    Aborted(String),
    #[error("invalid format: {0}")]
    InvalidFormat(String),
    #[error("corrupt archive: {0}")]
    Corrupt(String),
    #[error("record index {index} out of range (count {count})")]
    OutOfRange { index: usize, count: usize },
    #[error("version conflict for {name}: requested {requested}, host provides {available}")]
    VersionConflict {
        name: String,
        requested: ModuleVersion,
        available: ModuleVersion,
    },
    #[error("entry not found: {0}")]
    NotFound(String),
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl Error {
    /// Failures that only affect the invocation being captured or replayed.
    pub fn is_invocation_scoped(&self) -> bool {
        matches!(
            self,
            Error::InputUnreadable { .. }
                | Error::UnsupportedModule { .. }
                | Error::Discovery { .. }
                | Error::VersionConflict { .. }
        )
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Error::Corrupt(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
