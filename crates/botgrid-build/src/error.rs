//! Build-side error types.

use std::path::PathBuf;

use thiserror::Error;

pub type BuildResult<T> = Result<T, BuildError>;

pub type FetchResult<T> = Result<T, FetchError>;

/// Image build failures, split by where they happened.
#[derive(Debug, Clone, Error)]
pub enum BuildError {
    /// The build steps ran and failed.
    #[error("image build failed for {tag}: {message}")]
    Process { tag: String, message: String },

    /// The builder backend could not be reached or refused the request.
    #[error("image builder unavailable: {0}")]
    Communication(String),
}

impl BuildError {
    pub fn is_communication(&self) -> bool {
        matches!(self, Self::Communication(_))
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid repository url {url}: {message}")]
    InvalidUrl { url: String, message: String },

    /// A git invocation failed. The message never contains the token.
    #[error("git {operation} failed for {url}: {message}")]
    Git {
        operation: &'static str,
        url: String,
        message: String,
    },

    #[error("cannot prepare {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
