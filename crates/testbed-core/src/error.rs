//! Error taxonomy shared by every crate in the workspace.

use crate::model::ResourceHandle;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single provisioning task.
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    #[error("external operation `{operation}` failed (exit code: {})", format_exit_code(.exit_code))]
    ExternalOperationFailed {
        operation: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("external operation `{operation}` timed out after {}s", .budget.as_secs_f64())]
    Timeout {
        operation: String,
        budget: Duration,
        output: String,
    },

    #[error("{target} was not ready within {}s (last observed: {last_observed})", .deadline.as_secs_f64())]
    DeadlineExceeded {
        target: String,
        deadline: Duration,
        last_observed: String,
    },

    #[error("config synthesis failed: {0}")]
    ConfigSynthesis(#[from] SynthError),

    #[error("missing input from an earlier phase: {0}")]
    MissingInput(String),

    #[error("task panicked: {0}")]
    Panicked(String),
}

fn format_exit_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "none".to_string(), |c| c.to_string())
}

impl TaskError {
    pub fn external(
        operation: impl Into<String>,
        exit_code: Option<i32>,
        output: impl Into<String>,
    ) -> Self {
        TaskError::ExternalOperationFailed {
            operation: operation.into(),
            exit_code,
            output: output.into(),
        }
    }

    /// Captured raw output of the underlying operation, when there is any.
    pub fn output(&self) -> Option<&str> {
        match self {
            TaskError::ExternalOperationFailed { output, .. }
            | TaskError::Timeout { output, .. } => Some(output.as_str()),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskError::Timeout { .. })
    }
}

/// Errors from the manifest/config synthesizer. Always a caller or config
/// mistake, never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SynthError {
    #[error("template '{template}' has unresolved placeholders: {}", .names.join(", "))]
    UnresolvedPlaceholder { template: String, names: Vec<String> },

    #[error("template '{template}' failed to render: {message}")]
    Render { template: String, message: String },

    #[error("no insertion point for mounts: neither '{anchor}' nor '- role: {role}' found")]
    AnchorNotFound { anchor: String, role: String },

    #[error("document is not valid YAML after synthesis: {0}")]
    InvalidDocument(String),

    #[error("path '{path}' does not exist in {kind}/{name}")]
    PathNotFound {
        kind: String,
        name: String,
        path: String,
    },

    #[error("'{0}' is not a JSON pointer (must start with '/')")]
    InvalidPointer(String),

    #[error("cannot read {path}: {message}")]
    Io { path: PathBuf, message: String },
}

/// One failed task inside a failed phase.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub phase: String,
    pub task: String,
    pub error: TaskError,
}

/// Outcome of a failed plan execution.
#[derive(Error, Debug)]
pub enum ProvisioningError {
    #[error("phase '{phase}' failed: {} of its tasks reported errors", .failures.len())]
    Aggregate {
        phase: String,
        failures: Vec<TaskFailure>,
        /// Resources created before the failure, for partial teardown.
        created: Vec<ResourceHandle>,
    },

    #[error("this plan has already been executed")]
    AlreadyExecuted,
}

impl ProvisioningError {
    pub fn failures(&self) -> &[TaskFailure] {
        match self {
            ProvisioningError::Aggregate { failures, .. } => failures,
            ProvisioningError::AlreadyExecuted => &[],
        }
    }

    pub fn created(&self) -> &[ResourceHandle] {
        match self {
            ProvisioningError::Aggregate { created, .. } => created,
            ProvisioningError::AlreadyExecuted => &[],
        }
    }

    /// Full diagnostic text: phase, task, error and raw output of every failure.
    pub fn report(&self) -> String {
        let mut out = format!("{}\n", self);
        for failure in self.failures() {
            let _ = writeln!(
                out,
                "\n[{}] {}: {}",
                failure.phase, failure.task, failure.error
            );
            if let Some(output) = failure.error.output() {
                let trimmed = output.trim_end();
                if trimmed.is_empty() {
                    out.push_str("  (no output captured)\n");
                } else {
                    for line in trimmed.lines() {
                        let _ = writeln!(out, "  | {}", line);
                    }
                }
            }
        }
        out
    }
}
