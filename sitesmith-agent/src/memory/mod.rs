use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Model,
    ToolResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Failure,
}

/// Outcome of a single tool execution. Tools never raise; failures are
/// carried in `message` so the model can read them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub status: ToolStatus,
    pub message: String,
}

impl ToolResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Success,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Failure,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }
}

/// A tool invocation as requested by the model, before any validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPayload {
    Text(String),
    ToolCallRequest(ToolCallRequest),
    ToolCallResult { name: String, result: ToolResult },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub payload: TurnPayload,
}

impl Turn {
    fn user_text(text: String) -> Self {
        Self {
            role: Role::User,
            payload: TurnPayload::Text(text),
        }
    }

    fn model_text(text: String) -> Self {
        Self {
            role: Role::Model,
            payload: TurnPayload::Text(text),
        }
    }

    fn model_tool_call(request: ToolCallRequest) -> Self {
        Self {
            role: Role::Model,
            payload: TurnPayload::ToolCallRequest(request),
        }
    }

    fn tool_result(name: String, result: ToolResult) -> Self {
        Self {
            role: Role::ToolResult,
            payload: TurnPayload::ToolCallResult { name, result },
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            TurnPayload::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn is_tool_call(&self) -> bool {
        matches!(self.payload, TurnPayload::ToolCallRequest(_))
    }
}

/// Transcript of one generation run, replayed to the model on every query.
///
/// The only constructor seeds a user turn, and tool calls can only be
/// appended together with their result, so the transcript always starts
/// with the user's request and never holds a dangling tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
}

impl ConversationHistory {
    pub fn with_prompt(prompt: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn::user_text(prompt.into())],
        }
    }

    pub fn push_model_text(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::model_text(text.into()));
    }

    pub fn push_tool_exchange(&mut self, request: ToolCallRequest, result: ToolResult) {
        let name = request.name.clone();
        self.turns.push(Turn::model_tool_call(request));
        self.turns.push(Turn::tool_result(name, result));
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn tool_call_count(&self) -> usize {
        self.turns.iter().filter(|t| t.is_tool_call()).count()
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
