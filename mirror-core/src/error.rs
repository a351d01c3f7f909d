use std::path::{Path, PathBuf};

pub type Result<T> = std::result::Result<T, CoreError>;

/// Error taxonomy of the core. The lifecycle-guard variants are recoverable
/// business conditions the request layer branches on, not defects; each one
/// carries enough identity for the caller to act on the rejection.
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("an active diff already exists: {id}")]
    ActiveDiffExists { id: String },

    #[error("diff {id} is superseded and no longer accepts this transition")]
    Superseded { id: String },

    #[error("destination {destination_id} already confirmed delivery of diff {id}")]
    DuplicateConfirmation { id: String, destination_id: String },

    #[error("unknown destination: {0}")]
    UnknownDestination(String),

    #[error("unknown diff: {0}")]
    UnknownDiff(String),

    #[error("destination already exists: {0}")]
    DestinationExists(String),

    #[error("the default destination cannot be deleted")]
    DefaultDestinationProtected,

    #[error("no job known for task {0}")]
    JobNotFound(String),

    #[error("failed to launch job: {0}")]
    JobLaunchFailure(String),

    #[error("I/O failure on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    pub(crate) fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        CoreError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}
