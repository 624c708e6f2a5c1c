pub mod clients;
pub mod config;
pub mod core;
pub mod memory;
pub mod projects;
pub mod prompts;
pub mod tools;

pub use clients::{
    Decision, GeminiClient, LLMClient, LLMError, ModelRequest, OpenAIClient, ToolDefinition,
    create_llm_client,
};
pub use config::{AgentConfig, ConfigError, ConfigOverrides, Provider, load_config};
pub use core::{AgentError, GenerationService, Outcome, RunReport, Step, WebsiteAgent};
pub use memory::{ConversationHistory, ToolCallRequest, ToolResult, Turn};
pub use projects::{ProjectArtifacts, ProjectError, ProjectName, ProjectStore, ProjectSummary};
pub use prompts::{build_system_instruction, build_task_prompt};
pub use tools::{CommandPolicy, ToolCall, ToolManager, ToolTrait, website_tools};
