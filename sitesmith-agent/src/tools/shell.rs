use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    DEFAULT_COMMAND_TIMEOUT, RUN_SHELL_COMMAND, ToolCall, ToolError, ToolFuture, ToolInfo, ToolTrait,
    resolve_in_workspace,
};

const SHELL_METACHARACTERS: &[char] = &[
    ';', '&', '|', '<', '>', '$', '`', '\n', '\r', '(', ')', '{', '}', '*', '?', '!', '~', '\'', '"', '\\',
];

/// Which commands the shell tool is willing to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandPolicy {
    /// Only `mkdir [-p] <relative dir>...` inside the workspace.
    #[default]
    FoldersOnly,
    /// Any command string is handed to `sh -c`.
    Unrestricted,
}

impl CommandPolicy {
    pub fn check(&self, command: &str) -> Result<(), ToolError> {
        match self {
            CommandPolicy::Unrestricted => Ok(()),
            CommandPolicy::FoldersOnly => check_folder_command(command),
        }
    }
}

fn check_folder_command(command: &str) -> Result<(), ToolError> {
    if let Some(c) = command.chars().find(|c| SHELL_METACHARACTERS.contains(c)) {
        return Err(ToolError::CommandRejected(format!(
            "character {:?} is not allowed; only folder creation is permitted",
            c
        )));
    }

    let mut tokens = command.split_whitespace();
    match tokens.next() {
        Some("mkdir") => {}
        Some(other) => {
            return Err(ToolError::CommandRejected(format!(
                "'{}' is not allowed; only mkdir may be used, write files with write_file",
                other
            )));
        }
        None => return Err(ToolError::CommandRejected("empty command".to_string())),
    }

    let mut folders = 0;
    for token in tokens {
        if token == "-p" || token == "--parents" {
            continue;
        }
        if token.starts_with('-') {
            return Err(ToolError::CommandRejected(format!("option '{}' is not allowed", token)));
        }
        resolve_in_workspace(Path::new("."), token)?;
        folders += 1;
    }

    if folders == 0 {
        return Err(ToolError::CommandRejected("mkdir needs a folder name".to_string()));
    }

    Ok(())
}

/// Runs a host command in the workspace root. Output on stderr counts as a
/// failure even when the exit status is zero.
pub struct RunCommandTool {
    base_path: PathBuf,
    policy: CommandPolicy,
    timeout: Duration,
}

impl RunCommandTool {
    pub fn new(base_path: PathBuf, policy: CommandPolicy) -> Self {
        Self {
            base_path,
            policy,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl ToolTrait for RunCommandTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: RUN_SHELL_COMMAND.to_string(),
            description: "Execute a single terminal command. Use it ONLY to create the project folder."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "A single terminal command. Ex: \"mkdir calculator\""
                    }
                },
                "required": ["command"]
            }),
        }
    }

    fn execute(&self, call: ToolCall) -> ToolFuture {
        let base_path = self.base_path.clone();
        let policy = self.policy;
        let timeout = self.timeout;
        Box::pin(async move {
            let command = match call {
                ToolCall::RunShellCommand { command } => command,
                other => {
                    return Err(ToolError::InvalidArguments(format!(
                        "{} cannot handle {}",
                        RUN_SHELL_COMMAND,
                        other.name()
                    )));
                }
            };

            if let Err(e) = policy.check(&command) {
                warn!(command = %command, "shell command rejected");
                return Err(e);
            }

            debug!(command = %command, "running shell command");

            let mut process = tokio::process::Command::new("sh");
            process
                .arg("-c")
                .arg(&command)
                .current_dir(&base_path)
                .kill_on_drop(true);

            let output = tokio::time::timeout(timeout, process.output())
                .await
                .map_err(|_| ToolError::Timeout(timeout))?
                .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

            let stdout = String::from_utf8_lossy(&output.stdout).to_string();
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();

            if !stderr.trim().is_empty() {
                return Err(ToolError::ExecutionFailed(stderr));
            }

            if !output.status.success() {
                return Err(ToolError::ExecutionFailed(format!("command exited with {}", output.status)));
            }

            Ok(format!("Success: {} || Task executed completely", stdout))
        })
    }
}
