use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("KDL parse error: {0}")]
    KdlParse(#[from] kdl::KdlError),

    #[error("cannot read {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error(
        "no environment definition found. Looked for:\n{}\n\
        Pass --file or set TESTBED_FILE to use another path",
        .searched.iter().map(|p| format!("  - {}", p.display())).collect::<Vec<_>>().join("\n")
    )]
    NotFound { searched: Vec<PathBuf> },

    #[error("invalid '{node}' node: {message}")]
    InvalidNode { node: String, message: String },

    #[error("environment definition has {} problem(s):\n{}", .0.len(), .0.iter().map(|p| format!("  - {}", p)).collect::<Vec<_>>().join("\n"))]
    Validation(Vec<String>),
}

impl ConfigError {
    pub(crate) fn invalid(node: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::InvalidNode {
            node: node.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
