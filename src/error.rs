use std::path::PathBuf;

use thiserror::Error;

use crate::subprocess::ProcessError;
use crate::template::TemplateError;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// The error taxonomy of the execution engine.
///
/// Every variant is fatal for the running pipeline: a half-finished step
/// leaves downstream state unreliable, so there is no retry and no
/// skip-and-continue. The only swallowed condition is a missing file during
/// input unlinking, which is logged and never surfaces here.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("input files missing and no previous step output available")]
    MissingInput,

    #[error("empty input list")]
    EmptyInput,

    #[error("{message}")]
    CommandFailed { message: String },

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("filesystem error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a command failure carrying the resolved exception text.
    pub fn command_failed(message: impl Into<String>) -> Self {
        Self::CommandFailed {
            message: message.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
