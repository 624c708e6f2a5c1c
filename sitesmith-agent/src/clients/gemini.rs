use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use std::time::Duration;
use tracing::{debug, warn};

use super::{DEFAULT_TIMEOUT, Decision, LLMClient, LLMError, ModelInfo, ModelRequest, ToolDefinition};
use crate::memory::{Role, ToolCallRequest, Turn, TurnPayload};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Client for the Gemini `generateContent` endpoint.
pub struct GeminiClient {
    api_key: String,
    model: String,
    client: reqwest::Client,
    timeout: Duration,
    base_url: String,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Content {
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    function_call: Option<FunctionCall>,
    function_response: Option<FunctionResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    system_instruction: Content,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiTool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String, base_url: Option<String>) -> Self {
        Self {
            api_key,
            model,
            client: reqwest::Client::new(),
            timeout: DEFAULT_TIMEOUT,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    fn build_request(&self, request: &ModelRequest<'_>) -> GenerateContentRequest {
        let contents = request.transcript.iter().map(content_from_turn).collect();

        let tools = if request.tools.is_empty() {
            Vec::new()
        } else {
            vec![GeminiTool {
                function_declarations: request.tools.iter().map(declaration).collect(),
            }]
        };

        GenerateContentRequest {
            contents,
            system_instruction: Content {
                role: None,
                parts: vec![text_part(request.system_instruction.to_string())],
            },
            tools,
        }
    }
}

fn text_part(text: String) -> Part {
    Part {
        text: Some(text),
        ..Part::default()
    }
}

fn declaration(tool: &ToolDefinition) -> FunctionDeclaration {
    FunctionDeclaration {
        name: tool.name.clone(),
        description: tool.description.clone(),
        parameters: tool.parameters.clone(),
    }
}

// Tool results travel back under the "user" role, as Gemini expects.
fn content_from_turn(turn: &Turn) -> Content {
    let (role, part) = match &turn.payload {
        TurnPayload::Text(text) => {
            let role = match turn.role {
                Role::Model => "model",
                _ => "user",
            };
            (role, text_part(text.clone()))
        }
        TurnPayload::ToolCallRequest(call) => (
            "model",
            Part {
                function_call: Some(FunctionCall {
                    name: call.name.clone(),
                    args: call.arguments.clone(),
                }),
                ..Part::default()
            },
        ),
        TurnPayload::ToolCallResult { name, result } => (
            "user",
            Part {
                function_response: Some(FunctionResponse {
                    name: name.clone(),
                    response: serde_json::json!({ "result": result.message }),
                }),
                ..Part::default()
            },
        ),
    };

    Content {
        role: Some(role.to_string()),
        parts: vec![part],
    }
}

fn decision_from_response(response: GenerateContentResponse) -> Decision {
    let Some(candidate) = response.candidates.into_iter().next() else {
        warn!("Gemini response carried no candidates");
        return Decision::Text(String::new());
    };

    if let Some(reason) = &candidate.finish_reason {
        debug!(finish_reason = %reason, "Gemini candidate finished");
    }

    let parts = candidate.content.map(|c| c.parts).unwrap_or_default();

    if let Some(call) = parts.iter().find_map(|p| p.function_call.clone()) {
        let arguments = if call.args.is_null() {
            serde_json::json!({})
        } else {
            call.args
        };
        return Decision::ToolCall(ToolCallRequest::new(call.name, arguments));
    }

    let text: String = parts.into_iter().filter_map(|p| p.text).collect();
    Decision::Text(text)
}

#[async_trait]
impl LLMClient for GeminiClient {
    async fn query(&self, request: &ModelRequest<'_>) -> Result<Decision, LLMError> {
        let body = self.build_request(request);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| LLMError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| LLMError::RequestFailed(e.to_string()))?;

        if !status.is_success() {
            return Err(LLMError::ApiError(format!("{}: {}", status, text)));
        }

        let parsed: GenerateContentResponse =
            serde_json::from_str(&text).map_err(|e| LLMError::ParseError(e.to_string()))?;

        Ok(decision_from_response(parsed))
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.model.clone(),
            provider: "gemini".to_string(),
            supports_streaming: false,
        }
    }
}
