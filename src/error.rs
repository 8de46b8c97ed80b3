// File: src/error.rs
use std::io;
use std::path::PathBuf;

/// Everything that can abort a compilation run.
///
/// Parse-level problems in dictionary lines are never represented here: they
/// are recovered inside the reader and only counted.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// No dictionary sources were configured.
    #[error("no dictionary sources configured")]
    NoSources,

    /// Two sources share a type label; per-type statistics would collide.
    #[error("dictionary type '{dict_type}' is configured more than once")]
    DuplicateType { dict_type: String },

    /// A dictionary file could not be opened or read.
    #[error("failed to read dictionary {path}: {source}")]
    SourceRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The output directory or one of the artifact files could not be written.
    #[error("failed to write {path}: {source}")]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Another compilation holds the lock for the same output directory.
    #[error(
        "output directory is locked by another compilation: {path} \
        (if no compilation is running, delete this file and retry)"
    )]
    Locked { path: PathBuf },

    #[error("binary encoding failed: {0}")]
    Encode(#[from] bincode::Error),

    #[error("summary encoding failed: {0}")]
    Summary(#[from] serde_json::Error),

    /// Renaming a staged file into place failed after `published` files were
    /// already replaced, so the directory mixes old and new artifact files.
    #[error(
        "failed to publish {path}: {source}; already replaced {published:?}, \
        the output directory now holds a mixed artifact set"
    )]
    Publish {
        path: PathBuf,
        published: Vec<PathBuf>,
        #[source]
        source: io::Error,
    },

    /// A persisted artifact failed validation while being loaded back.
    #[error("invalid artifact: {0}")]
    InvalidArtifact(String),
}

impl CompileError {
    pub(crate) fn source_read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::SourceRead { path: path.into(), source }
    }

    pub(crate) fn output_write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::OutputWrite { path: path.into(), source }
    }

    pub(crate) fn invalid<S: Into<String>>(msg: S) -> Self {
        Self::InvalidArtifact(msg.into())
    }
}

pub type Result<T, E = CompileError> = std::result::Result<T, E>;
