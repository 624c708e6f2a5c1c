use std::path::PathBuf;
use tracing::debug;

use super::{ToolCall, ToolError, ToolFuture, ToolInfo, ToolTrait, WRITE_FILE, resolve_in_project};

pub struct FileWriteTool {
    base_path: PathBuf,
}

impl FileWriteTool {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }
}

impl ToolTrait for FileWriteTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: WRITE_FILE.to_string(),
            description: "Create or overwrite a file with the given content".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "File path inside the project folder, e.g., 'website_1700000000000/index.html'"
                    },
                    "content": {
                        "type": "string",
                        "description": "Content to write inside the file"
                    }
                },
                "required": ["path", "content"]
            }),
        }
    }

    fn execute(&self, call: ToolCall) -> ToolFuture {
        let base_path = self.base_path.clone();
        Box::pin(async move {
            let (path, content) = match call {
                ToolCall::WriteFile { path, content } => (path, content),
                other => {
                    return Err(ToolError::InvalidArguments(format!(
                        "{} cannot handle {}",
                        WRITE_FILE,
                        other.name()
                    )));
                }
            };

            let full_path = resolve_in_project(&base_path, &path)?;

            if let Some(parent) = full_path.parent() {
                if !parent.exists() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| ToolError::WriteFailed(e.to_string()))?;
                }
            }

            tokio::fs::write(&full_path, content.as_bytes())
                .await
                .map_err(|e| ToolError::WriteFailed(e.to_string()))?;

            debug!(path = %path, bytes = content.len(), "file written");
            Ok(format!("File written successfully: {}", path))
        })
    }
}
