use futures::Future;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::clients::ToolDefinition;
use crate::memory::{ToolCallRequest, ToolResult};
use crate::projects::{PROJECT_PREFIX, ProjectName};

mod shell;
mod write_file;

pub use shell::{CommandPolicy, RunCommandTool};
pub use write_file::FileWriteTool;

pub const RUN_SHELL_COMMAND: &str = "run_shell_command";
pub const WRITE_FILE: &str = "write_file";

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Error: {0}")]
    ExecutionFailed(String),
    #[error("Error: command rejected: {0}")]
    CommandRejected(String),
    #[error("Error: command timed out after {0:?}")]
    Timeout(Duration),
    #[error("Error writing file: {0}")]
    WriteFailed(String),
    #[error("Error: path escapes the workspace: {0}")]
    PathEscapesWorkspace(String),
    #[error("Error: files must be written inside the project folder {project}: {path}")]
    OutsideProject { path: String, project: String },
    #[error("Error: invalid arguments: {0}")]
    InvalidArguments(String),
}

/// Why a raw tool request could not be turned into a [`ToolCall`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolCallError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },
}

/// The closed set of tools the model may call, with validated arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    RunShellCommand { command: String },
    WriteFile { path: String, content: String },
}

#[derive(Deserialize)]
struct RunShellCommandArgs {
    command: String,
}

#[derive(Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

impl ToolCall {
    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::RunShellCommand { .. } => RUN_SHELL_COMMAND,
            ToolCall::WriteFile { .. } => WRITE_FILE,
        }
    }

    /// Writes of a run may only land in that run's project folder.
    pub fn check_scope(&self, project: &ProjectName) -> Result<(), ToolError> {
        match self {
            ToolCall::RunShellCommand { .. } => Ok(()),
            ToolCall::WriteFile { path, .. } => {
                let folder = Path::new(path).components().find_map(|c| match c {
                    Component::Normal(name) => Some(name),
                    _ => None,
                });
                if folder.is_some_and(|f| f == project.as_str()) {
                    Ok(())
                } else {
                    Err(ToolError::OutsideProject {
                        path: path.clone(),
                        project: project.to_string(),
                    })
                }
            }
        }
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(request: &ToolCallRequest) -> Result<T, ToolCallError> {
    serde_json::from_value(request.arguments.clone()).map_err(|e| ToolCallError::InvalidArguments {
        tool: request.name.clone(),
        reason: e.to_string(),
    })
}

impl TryFrom<&ToolCallRequest> for ToolCall {
    type Error = ToolCallError;

    fn try_from(request: &ToolCallRequest) -> Result<Self, Self::Error> {
        match request.name.as_str() {
            RUN_SHELL_COMMAND => {
                let args: RunShellCommandArgs = parse_args(request)?;
                Ok(ToolCall::RunShellCommand { command: args.command })
            }
            WRITE_FILE => {
                let args: WriteFileArgs = parse_args(request)?;
                Ok(ToolCall::WriteFile {
                    path: args.path,
                    content: args.content,
                })
            }
            other => Err(ToolCallError::UnknownTool(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

pub type ToolFuture = Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send>>;

pub trait ToolTrait: Send + Sync {
    fn info(&self) -> ToolInfo;
    fn execute(&self, call: ToolCall) -> ToolFuture;
}

/// Resolves a relative path against the workspace root, refusing absolute
/// paths and `..` components.
pub(crate) fn resolve_in_workspace(root: &Path, relative: &str) -> Result<PathBuf, ToolError> {
    let candidate = Path::new(relative);
    let confined = !relative.trim().is_empty()
        && candidate
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));

    if !confined {
        return Err(ToolError::PathEscapesWorkspace(relative.to_string()));
    }

    Ok(root.join(candidate))
}

/// Like [`resolve_in_workspace`], but the file must sit below a
/// `website_*` folder and no component may be hidden. This keeps the model
/// away from the config file and `.env` that share the workspace root.
pub(crate) fn resolve_in_project(root: &Path, relative: &str) -> Result<PathBuf, ToolError> {
    let full_path = resolve_in_workspace(root, relative)?;

    let names: Vec<&str> = Path::new(relative)
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => name.to_str(),
            _ => None,
        })
        .collect();

    let in_project = names.len() >= 2
        && names[0].starts_with(PROJECT_PREFIX)
        && names.iter().all(|name| !name.starts_with('.'));

    if !in_project {
        return Err(ToolError::OutsideProject {
            path: relative.to_string(),
            project: format!("{}<id>", PROJECT_PREFIX),
        });
    }

    Ok(full_path)
}

/// Registry of the tools offered to the model, kept in registration order.
pub struct ToolManager {
    tools: HashMap<String, Box<dyn ToolTrait>>,
    order: Vec<String>,
}

impl Default for ToolManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolManager {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn register(&mut self, tool: Box<dyn ToolTrait>) {
        let name = tool.info().name;
        if !self.tools.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn ToolTrait> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn list(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn get_definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                let info = tool.info();
                ToolDefinition {
                    name: info.name,
                    description: info.description,
                    parameters: info.parameters,
                }
            })
            .collect()
    }

    /// Runs a model request to completion for the run that owns `project`.
    /// Every problem, from an unknown name to a write outside the project
    /// folder, comes back as a failure result.
    pub async fn dispatch_in(&self, request: &ToolCallRequest, project: &ProjectName) -> ToolResult {
        self.dispatch_scoped(request, Some(project)).await
    }

    async fn dispatch_scoped(&self, request: &ToolCallRequest, project: Option<&ProjectName>) -> ToolResult {
        let call = match ToolCall::try_from(request) {
            Ok(call) => call,
            Err(e) => return ToolResult::failure(e.to_string()),
        };

        let Some(tool) = self.get(call.name()) else {
            return ToolResult::failure(ToolCallError::UnknownTool(request.name.clone()).to_string());
        };

        if let Some(project) = project {
            if let Err(e) = call.check_scope(project) {
                warn!(tool = call.name(), project = %project, "tool call outside the project folder");
                return ToolResult::failure(e.to_string());
            }
        }

        debug!(tool = call.name(), "dispatching tool call");

        match tool.execute(call).await {
            Ok(message) => ToolResult::success(message),
            Err(e) => ToolResult::failure(e.to_string()),
        }
    }
}

pub fn website_tools(workspace_root: PathBuf, policy: CommandPolicy, command_timeout: Duration) -> ToolManager {
    let mut manager = ToolManager::new();

    manager.register(Box::new(
        RunCommandTool::new(workspace_root.clone(), policy).with_timeout(command_timeout),
    ));
    manager.register(Box::new(FileWriteTool::new(workspace_root)));

    manager
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::tempdir;

    #[test]
    fn test_website_tools_catalog_order() {
        let manager = website_tools(PathBuf::from("."), CommandPolicy::FoldersOnly, DEFAULT_COMMAND_TIMEOUT);

        assert_eq!(manager.list(), vec![RUN_SHELL_COMMAND.to_string(), WRITE_FILE.to_string()]);
        let defs = manager.get_definitions();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].parameters["required"], serde_json::json!(["command"]));
        assert_eq!(defs[1].parameters["required"], serde_json::json!(["path", "content"]));
        assert!(manager.get("delete_everything").is_none());
    }

    #[test]
    fn test_tool_call_conversion() {
        let request = ToolCallRequest::new(WRITE_FILE, serde_json::json!({"path": "a/b.html", "content": "<p>"}));
        assert_eq!(
            ToolCall::try_from(&request).unwrap(),
            ToolCall::WriteFile {
                path: "a/b.html".to_string(),
                content: "<p>".to_string()
            }
        );

        let unknown = ToolCallRequest::new("executeCommand", serde_json::json!({"command": "ls"}));
        assert_eq!(
            ToolCall::try_from(&unknown).unwrap_err(),
            ToolCallError::UnknownTool("executeCommand".to_string())
        );

        let malformed = ToolCallRequest::new(RUN_SHELL_COMMAND, serde_json::json!({"cmd": "ls"}));
        assert!(matches!(
            ToolCall::try_from(&malformed),
            Err(ToolCallError::InvalidArguments { .. })
        ));
    }

    #[rstest]
    #[case("site/index.html", true)]
    #[case("./site/style.css", true)]
    #[case("site", true)]
    #[case("../outside.html", false)]
    #[case("site/../../outside.html", false)]
    #[case("/etc/passwd", false)]
    #[case("", false)]
    fn test_resolve_in_workspace(#[case] path: &str, #[case] allowed: bool) {
        let root = PathBuf::from("/workspace");
        assert_eq!(resolve_in_workspace(&root, path).is_ok(), allowed);
    }

    #[rstest]
    #[case("website_1/index.html", true)]
    #[case("./website_1/css/style.css", true)]
    #[case("website_1", false)]
    #[case("sitesmith.json", false)]
    #[case(".env", false)]
    #[case("site/index.html", false)]
    #[case("website_1/.hidden/x.js", false)]
    #[case("website_1/../sitesmith.json", false)]
    fn test_resolve_in_project(#[case] path: &str, #[case] allowed: bool) {
        let root = PathBuf::from("/workspace");
        assert_eq!(resolve_in_project(&root, path).is_ok(), allowed);
    }

    #[tokio::test]
    async fn test_model_cannot_rewrite_config_or_env() {
        let dir = tempdir().unwrap();
        let manager = website_tools(dir.path().to_path_buf(), CommandPolicy::FoldersOnly, DEFAULT_COMMAND_TIMEOUT);

        for path in [crate::config::DEFAULT_CONFIG_FILE, ".env"] {
            let request = ToolCallRequest::new(
                WRITE_FILE,
                serde_json::json!({"path": path, "content": "{\"allow_any_command\": true}"}),
            );
            let result = manager.dispatch_scoped(&request, None).await;
            assert!(!result.is_success(), "{} was written", path);
            assert!(!dir.path().join(path).exists());
        }

        let config = crate::config::load_config(&dir.path().join(crate::config::DEFAULT_CONFIG_FILE))
            .await
            .unwrap();
        assert_eq!(config.command_policy(), CommandPolicy::FoldersOnly);
    }

    #[tokio::test]
    async fn test_dispatch_in_keeps_writes_in_the_run_project() {
        let dir = tempdir().unwrap();
        let manager = website_tools(dir.path().to_path_buf(), CommandPolicy::FoldersOnly, DEFAULT_COMMAND_TIMEOUT);
        let project: ProjectName = "website_20".parse().unwrap();

        let own = manager
            .dispatch_in(
                &ToolCallRequest::new(WRITE_FILE, serde_json::json!({"path": "website_20/index.html", "content": "<p>"})),
                &project,
            )
            .await;
        let other = manager
            .dispatch_in(
                &ToolCallRequest::new(WRITE_FILE, serde_json::json!({"path": "website_10/index.html", "content": "<p>"})),
                &project,
            )
            .await;

        assert!(own.is_success(), "{}", own.message);
        assert!(!other.is_success());
        assert!(other.message.contains("website_20"));
        assert!(!dir.path().join("website_10").exists());
    }

    #[tokio::test]
    async fn test_dispatch_unknown_tool_is_failure() {
        let dir = tempdir().unwrap();
        let manager = website_tools(dir.path().to_path_buf(), CommandPolicy::FoldersOnly, DEFAULT_COMMAND_TIMEOUT);

        let result = manager
            .dispatch_scoped(&ToolCallRequest::new("deploy", serde_json::json!({})), None)
            .await;

        assert!(!result.is_success());
        assert_eq!(result.message, "Unknown tool: deploy");
    }

    #[tokio::test]
    async fn test_dispatch_unregistered_known_tool_is_failure() {
        let dir = tempdir().unwrap();
        let mut manager = ToolManager::new();
        manager.register(Box::new(FileWriteTool::new(dir.path().to_path_buf())));

        let result = manager
            .dispatch_scoped(&ToolCallRequest::new(RUN_SHELL_COMMAND, serde_json::json!({"command": "mkdir a"})), None)
            .await;

        assert!(!result.is_success());
        assert!(result.message.contains("Unknown tool"));
        assert!(!dir.path().join("a").exists());
    }

    #[tokio::test]
    async fn test_dispatch_write_then_overwrite() {
        let dir = tempdir().unwrap();
        let manager = website_tools(dir.path().to_path_buf(), CommandPolicy::FoldersOnly, DEFAULT_COMMAND_TIMEOUT);

        for content in ["first", "second"] {
            let request = ToolCallRequest::new(
                WRITE_FILE,
                serde_json::json!({"path": "website_1/index.html", "content": content}),
            );
            let result = manager.dispatch_scoped(&request, None).await;
            assert!(result.is_success(), "{}", result.message);
        }

        let written = std::fs::read_to_string(dir.path().join("website_1/index.html")).unwrap();
        assert_eq!(written, "second");
    }

    #[tokio::test]
    async fn test_dispatch_invalid_arguments_is_failure() {
        let dir = tempdir().unwrap();
        let manager = website_tools(dir.path().to_path_buf(), CommandPolicy::FoldersOnly, DEFAULT_COMMAND_TIMEOUT);

        let result = manager
            .dispatch_scoped(&ToolCallRequest::new(WRITE_FILE, serde_json::json!({"path": "a.html"})), None)
            .await;

        assert!(!result.is_success());
        assert!(result.message.starts_with("Invalid arguments for write_file"));
    }
}
