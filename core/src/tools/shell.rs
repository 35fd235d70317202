use crate::tools::{extract_string_arg, extract_u64_arg_opt};
use crate::traits::{Tool, ToolOutput};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tokio::process::Command;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub struct ShellTool {
    workspace: std::path::PathBuf,
}

impl ShellTool {
    pub fn new(workspace: impl AsRef<std::path::Path>) -> Self {
        Self {
            workspace: workspace.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the workspace directory"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Shell command to execute"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Seconds before the command is killed (default 30)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolOutput> {
        let command = extract_string_arg(&args, "command")?;
        let timeout = Duration::from_secs(extract_u64_arg_opt(
            &args,
            "timeout_secs",
            DEFAULT_TIMEOUT_SECS,
        ));

        // kill_on_drop: a cancelled or timed-out loop drops this future.
        let child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&self.workspace)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Ok(ToolOutput::error(format!(
                    "Failed to execute command: {}",
                    e
                )));
            }
            Err(_) => {
                return Ok(ToolOutput::error(format!(
                    "Command timed out after {}s",
                    timeout.as_secs()
                )));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if output.status.success() {
            let result = if stdout.is_empty() { stderr } else { stdout };
            Ok(ToolOutput::success(result))
        } else {
            let error = if stderr.is_empty() {
                format!("Command failed with status: {}", output.status)
            } else {
                stderr
            };
            Ok(ToolOutput::error(error))
        }
    }
}
