use std::path::PathBuf;
use testbed_core::{ProvisioningError, ResourceKind, SynthError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("cannot build plan: {0}")]
    Plan(#[from] SynthError),

    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    #[error(transparent)]
    Teardown(#[from] TeardownError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// A hard failure during teardown. "Already gone" is never one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TeardownError {
    #[error("failed to remove {kind} '{name}': {reason}")]
    Removal {
        kind: ResourceKind,
        name: String,
        reason: String,
    },

    #[error("failed to remove kubeconfig {path}: {reason}")]
    Kubeconfig { path: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, EngineError>;
