use std::io;
use std::path::PathBuf;

use apk_verify::VerificationError;
use thiserror::Error;

/// A source that cannot be built from its configuration. Fatal at startup.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid config for source `{source_name}` of app `{app}`: {reason}")]
pub struct ConfigurationError {
    pub app: String,
    pub source_name: String,
    pub reason: String,
}

impl ConfigurationError {
    pub fn new(app: impl Into<String>, source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }
}

/// Failure of one source for one cycle. Never fatal to the run.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Verification(#[from] VerificationError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl SourceError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        SourceError::Unavailable(reason.into())
    }
}

/// Errors surfaced by the updater as a whole.
#[derive(Debug, Error)]
pub enum SchleuderError {
    #[error(transparent)]
    Config(#[from] ConfigurationError),
    #[error("catalog `{}` could not be {action}", path.display())]
    Catalog {
        path: PathBuf,
        action: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml_bw::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SchleuderError {
    pub fn catalog(path: impl Into<PathBuf>, action: &'static str, source: io::Error) -> Self {
        SchleuderError::Catalog {
            path: path.into(),
            action,
            source,
        }
    }
}
