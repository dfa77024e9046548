use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::job::Job;
use crate::store::OutputStore;

/// What one execution attempt produced.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub exit_code: i32,
    pub output_ref: Option<String>,
    pub error: Option<String>,
    pub duration: Duration,
}

// Substrings that disqualify a command outright. A guard against accidents,
// not against hostile input.
const DENYLIST: &[&str] = &[
    "rm -rf",
    "mkfs",
    "dd if=",
    "shutdown",
    "reboot",
    ":(){ :|:& };:",
    "> /dev/sd",
];

/// Check a command against the denylist before execution. Returns the
/// rejection reason, or `None` when the command may run.
pub fn screen(command: &str) -> Option<String> {
    if command.trim().is_empty() {
        return Some("command rejected: empty command".to_string());
    }
    let lowered = command.to_lowercase();
    DENYLIST
        .iter()
        .find(|needle| lowered.contains(*needle))
        .map(|needle| format!("command rejected: {needle}"))
}

/// Runs job commands through `sh -c`, bounded by the job's timeout, and
/// stores captured output. The executor enforces the timeout itself by
/// killing the child process; the reaper only exists as a safety net for
/// workers that die mid-job.
pub struct CommandExecutor {
    outputs: Arc<OutputStore>,
}

impl CommandExecutor {
    pub fn new(outputs: Arc<OutputStore>) -> Self {
        Self { outputs }
    }

    /// Execute the job's command. Failures of any kind are folded into the
    /// outcome rather than surfaced as errors.
    pub async fn execute(&self, job: &Job) -> ExecutionOutcome {
        debug!("executing job {}: {}", job.id, job.command);
        let started = Instant::now();

        let mut command = Command::new("sh");
        command.arg("-c").arg(&job.command).kill_on_drop(true);

        let result = match timeout(job.timeout, command.output()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "job {} timed out after {}s",
                    job.id,
                    job.timeout.as_secs()
                );
                return ExecutionOutcome {
                    success: false,
                    exit_code: -1,
                    output_ref: None,
                    error: Some(format!("timed out after {}s", job.timeout.as_secs())),
                    duration: started.elapsed(),
                };
            }
        };

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                return ExecutionOutcome {
                    success: false,
                    exit_code: -1,
                    output_ref: None,
                    error: Some(format!("failed to start command: {e}")),
                    duration: started.elapsed(),
                };
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let output_ref = if !stdout.is_empty() || !stderr.is_empty() {
            match self
                .outputs
                .store(&job.id, job.attempts + 1, &stdout, &stderr)
            {
                Ok(output_ref) => Some(output_ref),
                Err(e) => {
                    warn!("failed to store output for job {}: {e}", job.id);
                    None
                }
            }
        } else {
            None
        };

        let success = output.status.success();
        let error = if success {
            None
        } else if stderr.trim().is_empty() {
            Some(format!("command failed with exit code {exit_code}"))
        } else {
            Some(stderr.trim().chars().take(512).collect())
        };

        ExecutionOutcome {
            success,
            exit_code,
            output_ref,
            error,
            duration: started.elapsed(),
        }
    }
}
