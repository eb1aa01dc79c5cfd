//! Linux process operations implementation
//!
//! Every child runs with `LC_ALL=C` so dpkg and apt messages can be parsed.

use async_trait::async_trait;
use crossgrader_errors::{Error, PlatformError};
use crossgrader_events::{
    AppEvent, FailureContext, PlatformEvent, PlatformOperationContext, PlatformOperationKind,
    PlatformOperationMetrics, ProcessCommandDescriptor,
};
use std::convert::TryFrom;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::process::Command;

use crate::core::PlatformContext;
use crate::process::{CommandOutput, PlatformCommand, ProcessOperations};

/// Linux implementation of process operations
pub struct LinuxProcessOperations;

impl LinuxProcessOperations {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LinuxProcessOperations {
    fn default() -> Self {
        Self::new()
    }
}

fn process_context(descriptor: ProcessCommandDescriptor) -> PlatformOperationContext {
    PlatformOperationContext {
        kind: PlatformOperationKind::Process,
        operation: "execute_command".to_string(),
        target: None,
        command: Some(descriptor),
    }
}

fn process_metrics(duration: Duration, output: Option<&CommandOutput>) -> PlatformOperationMetrics {
    PlatformOperationMetrics {
        duration_ms: Some(duration_to_millis(duration)),
        exit_code: output.and_then(CommandOutput::code),
        stdout_bytes: output.and_then(|o| u64::try_from(o.stdout.len()).ok()),
        stderr_bytes: output.and_then(|o| u64::try_from(o.stderr.len()).ok()),
    }
}

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl ProcessOperations for LinuxProcessOperations {
    async fn execute_command(
        &self,
        ctx: &PlatformContext,
        cmd: PlatformCommand,
    ) -> Result<CommandOutput, Error> {
        let start = Instant::now();
        let descriptor = ProcessCommandDescriptor {
            program: cmd.program().to_string(),
            args: cmd.get_args().to_vec(),
            cwd: cmd.get_current_dir().cloned(),
        };

        ctx.emit_event(AppEvent::Platform(PlatformEvent::OperationStarted {
            context: process_context(descriptor.clone()),
        }))
        .await;

        let result: Result<CommandOutput, PlatformError> = async {
            let mut command = Command::new(cmd.program());
            command.args(cmd.get_args());
            command.env("LC_ALL", "C");
            command.stdin(std::process::Stdio::null());

            if let Some(dir) = cmd.get_current_dir() {
                command.current_dir(dir);
            }

            for (key, value) in cmd.get_env_vars() {
                command.env(key, value);
            }

            let output = command.output().await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    PlatformError::CommandNotFound {
                        command: cmd.program().to_string(),
                    }
                } else {
                    PlatformError::ProcessExecutionFailed {
                        command: cmd.command_line(),
                        message: e.to_string(),
                    }
                }
            })?;

            Ok(CommandOutput {
                status: output.status,
                stdout: output.stdout,
                stderr: output.stderr,
            })
        }
        .await;

        let duration = start.elapsed();

        match &result {
            Ok(output) => {
                ctx.emit_event(AppEvent::Platform(PlatformEvent::OperationCompleted {
                    context: process_context(descriptor),
                    metrics: Some(process_metrics(duration, Some(output))),
                }))
                .await;
            }
            Err(e) => {
                ctx.emit_event(AppEvent::Platform(PlatformEvent::OperationFailed {
                    context: process_context(descriptor),
                    failure: FailureContext::from_error(e),
                    metrics: Some(process_metrics(duration, None)),
                }))
                .await;
            }
        }

        result.map_err(Error::from)
    }

    async fn which(&self, program: &str) -> Result<PathBuf, Error> {
        let path_var = std::env::var("PATH").unwrap_or_else(|_| "/usr/sbin:/usr/bin:/sbin:/bin".into());
        for dir in path_var.split(':').filter(|d| !d.is_empty()) {
            let candidate = PathBuf::from(dir).join(program);
            if let Ok(meta) = tokio::fs::metadata(&candidate).await {
                if meta.is_file() {
                    return Ok(candidate);
                }
            }
        }
        Err(PlatformError::CommandNotFound {
            command: program.to_string(),
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossgrader_events::channel;

    #[tokio::test]
    async fn test_runs_with_c_locale_and_emits_events() {
        let (tx, mut rx) = channel();
        let ctx = PlatformContext::new(Some(tx));
        let ops = LinuxProcessOperations::new();

        let mut cmd = PlatformCommand::new("sh");
        cmd.args(["-c", "printf %s \"$LC_ALL\""]);
        let output = ops.execute_command(&ctx, cmd).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout_lossy(), "C");

        let started = rx.recv().await.unwrap();
        assert!(matches!(
            started.event,
            AppEvent::Platform(PlatformEvent::OperationStarted { .. })
        ));
        let completed = rx.recv().await.unwrap();
        assert!(matches!(
            completed.event,
            AppEvent::Platform(PlatformEvent::OperationCompleted { .. })
        ));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_an_error() {
        let ctx = PlatformContext::default();
        let mut cmd = PlatformCommand::new("sh");
        cmd.args(["-c", "echo oops >&2; exit 3"]);
        let output = LinuxProcessOperations::new()
            .execute_command(&ctx, cmd)
            .await
            .unwrap();
        assert_eq!(output.code(), Some(3));
        assert_eq!(output.stderr_lossy().trim(), "oops");
    }

    #[tokio::test]
    async fn test_missing_program() {
        let ctx = PlatformContext::default();
        let cmd = PlatformCommand::new("definitely-not-a-real-program-xyz");
        let err = LinuxProcessOperations::new()
            .execute_command(&ctx, cmd)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Platform(PlatformError::CommandNotFound { .. })
        ));
    }
}
