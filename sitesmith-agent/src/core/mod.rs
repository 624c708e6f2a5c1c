use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::clients::{Decision, LLMClient, LLMError, ModelInfo, ModelRequest};
use crate::config::DEFAULT_MAX_STEPS;
use crate::memory::{ConversationHistory, ToolResult};
use crate::projects::ProjectName;
use crate::prompts::{build_system_instruction, build_task_prompt, current_platform};
use crate::tools::ToolManager;

/// One tool round trip of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub tool: String,
    pub arguments: Value,
    pub result: ToolResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Outcome {
    /// The model answered with text.
    Done { final_text: String },
    /// The step ceiling was reached while the model still wanted tools.
    Aborted { step_limit: usize },
}

impl Outcome {
    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub project: ProjectName,
    pub outcome: Outcome,
    pub queries: usize,
    pub steps: Vec<Step>,
    pub transcript: ConversationHistory,
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    LLMError(#[from] LLMError),
}

pub type StepCallback = Arc<dyn Fn(usize, &Step) + Send + Sync>;

pub struct WebsiteAgent {
    client: Arc<dyn LLMClient>,
    tools: ToolManager,
    max_steps: usize,
    system_instruction: String,
    step_callback: Option<StepCallback>,
}

impl WebsiteAgent {
    pub fn new(
        client: Box<dyn LLMClient>,
        tools: ToolManager,
        max_steps: Option<usize>,
        step_callback: Option<StepCallback>,
    ) -> Self {
        let system_instruction = build_system_instruction(current_platform(), &tools.get_definitions(), None);
        Self {
            client: Arc::from(client),
            tools,
            max_steps: max_steps.unwrap_or(DEFAULT_MAX_STEPS).max(1),
            system_instruction,
            step_callback,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: Option<String>) -> Self {
        self.system_instruction =
            build_system_instruction(current_platform(), &self.tools.get_definitions(), system_prompt);
        self
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn model_info(&self) -> ModelInfo {
        self.client.model_info()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.list()
    }

    /// Generates a website and returns the project name, whether the model
    /// finished or the step ceiling cut it short.
    pub async fn generate(&self, prompt: &str) -> Result<ProjectName, AgentError> {
        Ok(self.run(prompt).await?.project)
    }

    /// Drives the model until it answers with text or `max_steps` queries
    /// have been made. Only a failing model call is an error; tool problems
    /// are recorded in the transcript for the model to react to.
    #[instrument(skip(self, prompt), fields(max_steps = self.max_steps))]
    pub async fn run(&self, prompt: &str) -> Result<RunReport, AgentError> {
        let project = ProjectName::generate();
        let mut history = ConversationHistory::with_prompt(build_task_prompt(prompt, &project));
        let definitions = self.tools.get_definitions();
        let mut steps = Vec::new();
        let mut queries = 0;

        info!(project = %project, "starting generation run");

        let outcome = loop {
            if queries >= self.max_steps {
                warn!(project = %project, step_limit = self.max_steps, "step ceiling reached, stopping run");
                break Outcome::Aborted {
                    step_limit: self.max_steps,
                };
            }
            queries += 1;

            let request = ModelRequest {
                system_instruction: &self.system_instruction,
                tools: &definitions,
                transcript: history.turns(),
            };

            match self.client.query(&request).await? {
                Decision::ToolCall(call) => {
                    info!(project = %project, step = queries, tool = %call.name, "model requested tool");

                    let result = self.tools.dispatch_in(&call, &project).await;
                    if !result.is_success() {
                        warn!(project = %project, step = queries, tool = %call.name, message = %result.message, "tool failed");
                    }

                    let step = Step {
                        tool: call.name.clone(),
                        arguments: call.arguments.clone(),
                        result: result.clone(),
                    };
                    history.push_tool_exchange(call, result);

                    if let Some(ref callback) = self.step_callback {
                        callback(queries, &step);
                    }
                    steps.push(step);
                }
                Decision::Text(text) => {
                    info!(project = %project, step = queries, "model finished");
                    history.push_model_text(text.clone());
                    break Outcome::Done { final_text: text };
                }
            }
        };

        Ok(RunReport {
            project,
            outcome,
            queries,
            steps,
            transcript: history,
        })
    }
}

/// Serializes generation runs: callers queue on the lock in arrival order,
/// so at most one run talks to the model and the filesystem at a time.
pub struct GenerationService {
    agent: Arc<WebsiteAgent>,
    run_lock: Mutex<()>,
}

impl GenerationService {
    pub fn new(agent: WebsiteAgent) -> Self {
        Self {
            agent: Arc::new(agent),
            run_lock: Mutex::new(()),
        }
    }

    pub fn agent(&self) -> &WebsiteAgent {
        &self.agent
    }

    pub async fn generate(&self, prompt: &str) -> Result<RunReport, AgentError> {
        let _guard = self.run_lock.lock().await;
        self.agent.run(prompt).await
    }
}
