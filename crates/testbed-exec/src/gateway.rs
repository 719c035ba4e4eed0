//! External operation gateway
//!
//! Runs one external tool invocation under a hard wall-clock budget and
//! always hands back what the tool printed, whether it succeeded, failed or
//! was killed.

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use testbed_core::{Operation, OperationOutput, OperationRunner, TaskError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// Output fragments that mean "the thing you asked me to create is there"
const ALREADY_EXISTS_MARKERS: &[&str] = &[
    "already exists",
    "alreadyexists",
    "already in use",
    // kind: "node(s) already exist for a cluster with the name ..."
    "already exist for a cluster",
];

/// How long to keep draining pipes after the child was killed
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Runs operations as local processes with `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct ProcessGateway;

impl ProcessGateway {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl OperationRunner for ProcessGateway {
    async fn run(
        &self,
        operation: &Operation,
        budget: Duration,
    ) -> Result<OperationOutput, TaskError> {
        let command_line = operation.display();
        tracing::debug!(operation = %command_line, budget_s = budget.as_secs_f64(), "running");
        let started = Instant::now();

        let mut cmd = Command::new(&operation.program);
        cmd.args(&operation.args)
            .envs(&operation.env)
            .stdin(if operation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &operation.current_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            TaskError::external(
                &command_line,
                None,
                format!("failed to start '{}': {}", operation.program, e),
            )
        })?;

        if let (Some(input), Some(mut stdin)) = (operation.stdin.clone(), child.stdin.take()) {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    tracing::debug!(error = %e, "stdin closed early");
                }
            });
        }

        let combined = Arc::new(Mutex::new(Vec::new()));
        let stdout_only = Arc::new(Mutex::new(Vec::new()));
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(drain(
                stdout,
                Arc::clone(&combined),
                Some(Arc::clone(&stdout_only)),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(drain(stderr, Arc::clone(&combined), None));
        }

        let waited = tokio::time::timeout(budget, child.wait()).await;

        let timed_out = waited.is_err();
        if timed_out {
            if let Err(e) = child.kill().await {
                tracing::warn!(
                    operation = %command_line,
                    error = %e,
                    "failed to kill timed-out process"
                );
            }
        }
        let _ = tokio::time::timeout(DRAIN_GRACE, futures_util::future::join_all(readers)).await;
        let output = take_output(&combined);
        let stdout = take_output(&stdout_only);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match waited {
            Err(_) => {
                tracing::warn!(operation = %command_line, elapsed_ms, "timed out");
                Err(TaskError::Timeout {
                    operation: command_line,
                    budget,
                    output,
                })
            }
            Ok(Err(e)) => Err(TaskError::external(
                command_line,
                None,
                format!("{}\n{}", output, e),
            )),
            Ok(Ok(status)) if status.success() => {
                tracing::debug!(operation = %command_line, elapsed_ms, "succeeded");
                Ok(OperationOutput {
                    output,
                    stdout,
                    exit_code: status.code(),
                    already_existed: false,
                })
            }
            Ok(Ok(status)) => {
                if operation.idempotent_create && mentions_already_exists(&output) {
                    tracing::info!(
                        operation = %command_line,
                        "resource already exists, treating as created"
                    );
                    return Ok(OperationOutput {
                        output,
                        stdout,
                        exit_code: status.code(),
                        already_existed: true,
                    });
                }
                tracing::debug!(
                    operation = %command_line,
                    elapsed_ms,
                    code = ?status.code(),
                    "failed"
                );
                Err(TaskError::external(command_line, status.code(), output))
            }
        }
    }
}

/// Copy a pipe into the combined buffer and, for stdout, its own buffer
fn drain<R>(
    mut pipe: R,
    combined: Arc<Mutex<Vec<u8>>>,
    own: Option<Arc<Mutex<Vec<u8>>>>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut buf) = combined.lock() {
                        buf.extend_from_slice(&chunk[..n]);
                    }
                    if let Some(Ok(mut buf)) = own.as_ref().map(|own| own.lock()) {
                        buf.extend_from_slice(&chunk[..n]);
                    }
                }
            }
        }
    })
}

fn take_output(buffer: &Mutex<Vec<u8>>) -> String {
    buffer
        .lock()
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default()
}

fn mentions_already_exists(output: &str) -> bool {
    let lower = output.to_lowercase();
    ALREADY_EXISTS_MARKERS.iter().any(|m| lower.contains(m))
}
