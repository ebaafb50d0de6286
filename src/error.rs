//! Error types for a build.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::container::InvocationError;
use crate::ownership::OwnershipError;
use crate::process::ProcessError;
use crate::signing::SigningError;

/// Every way a build can fail. None of them is retried.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid build request: {0}")]
    InvalidRequest(String),

    #[error("no .spec or .spectemplate file found in {}", .dir.display())]
    NoSpecFound { dir: PathBuf },

    #[error(
        "more than one .{extension} file in {}: {}",
        .dir.display(),
        display_paths(.candidates)
    )]
    AmbiguousSpec {
        dir: PathBuf,
        extension: &'static str,
        candidates: Vec<PathBuf>,
    },

    #[error(
        "sources unavailable in {}: {} (remote sources need --download-sources)",
        .source_dir.display(),
        .missing.join(", ")
    )]
    SourcesUnavailable {
        source_dir: PathBuf,
        missing: Vec<String>,
    },

    #[error("{0}")]
    InvalidInvocation(String),

    #[error("build failed")]
    Process(#[source] ProcessError),

    #[error("build finished but no packages were written under {}", .output_dir.display())]
    NoPackagesProduced { output_dir: PathBuf },

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error(transparent)]
    Ownership(#[from] OwnershipError),

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl From<InvocationError> for BuildError {
    fn from(err: InvocationError) -> Self {
        match err {
            InvocationError::Process(e) => BuildError::Process(e),
            other => BuildError::InvalidInvocation(other.to_string()),
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
