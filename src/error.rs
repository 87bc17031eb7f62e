// PSET ERRORS
// ONE ENUM FOR EVERY FAILURE THE CORE CAN REPORT. NOTHING IS RETRIED:
// CONFIG AND RESOURCE ERRORS FIRE BEFORE ANY PROCESS IS SPAWNED,
// PARSE AND DEPENDENCY ERRORS FIRE DURING COLLECTION.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PsetError {
    /// Bad feature registration, empty program or unreadable experiment file.
    #[error("configuration error: {0}")]
    Config(String),

    /// Not enough CPUs, partition classes or cache ways for the requested threads.
    #[error("resource error: {0}")]
    Resource(String),

    /// A process-wide hardware probe could not be determined.
    #[error("probe error: {0}")]
    Probe(String),

    #[error("parse error in {}: {msg}", path.display())]
    Parse { path: PathBuf, msg: String },

    /// A value needed by a computed feature or by aggregation was never resolved.
    #[error("dependency error: {needed_by} needs '{missing}', which was not resolved")]
    Dependency { needed_by: String, missing: String },

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("interrupted while waiting for the experiment script")]
    Interrupted,
}

impl PsetError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub fn parse(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Parse { path: path.into(), msg: msg.into() }
    }
}

pub type Result<T> = std::result::Result<T, PsetError>;
