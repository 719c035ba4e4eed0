use std::path::PathBuf;
use testbed_core::{SynthError, TaskError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error(
        "cannot connect to Docker: {0}\n\nHint:\n  - check that the Docker daemon is running\n  - check DOCKER_HOST if you use a remote daemon"
    )]
    DockerConnectionFailed(String),

    #[error("Dockerfile not found: {0}")]
    DockerfileNotFound(PathBuf),

    #[error("build context not found: {0}")]
    ContextNotFound(PathBuf),

    #[error("build context is not a directory: {0}")]
    InvalidContext(PathBuf),
}

impl From<ExecError> for TaskError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::DockerfileNotFound(ref path)
            | ExecError::ContextNotFound(ref path)
            | ExecError::InvalidContext(ref path) => TaskError::ConfigSynthesis(SynthError::Io {
                path: path.clone(),
                message: err.to_string(),
            }),
            ExecError::DockerConnectionFailed(message) => {
                TaskError::external("connect to docker", None, message)
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecError>;
