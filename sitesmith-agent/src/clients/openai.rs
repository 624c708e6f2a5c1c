use async_trait::async_trait;
use futures::Stream;
use futures::StreamExt;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

use super::{DEFAULT_TIMEOUT, Decision, LLMClient, LLMError, ModelInfo, ModelRequest};
use crate::memory::{Role, ToolCallRequest, TurnPayload};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Clone, PartialEq)]
enum ChunkType {
    Content,
    ToolCall,
    ToolArgs,
    Done,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
struct StreamChunk {
    content: String,
    chunk_type: ChunkType,
}

impl StreamChunk {
    fn new(chunk_type: ChunkType, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            chunk_type,
        }
    }
}

type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, LLMError>> + Send>>;

/// Client for OpenAI-compatible chat completion endpoints. Responses are
/// streamed and folded into a single [`Decision`].
pub struct OpenAIClient {
    api_key: String,
    model: String,
    client: reqwest::Client,
    timeout: Duration,
    base_url: String,
}

impl OpenAIClient {
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

    fn build_request(&self, request: &ModelRequest<'_>) -> serde_json::Value {
        let mut messages = vec![serde_json::json!({
            "role": "system",
            "content": request.system_instruction,
        })];

        // Tool call ids are synthesized from the transcript position of the call.
        let mut pending_call_id: Option<String> = None;

        for (index, turn) in request.transcript.iter().enumerate() {
            let message = match &turn.payload {
                TurnPayload::Text(text) => {
                    let role = match turn.role {
                        Role::Model => "assistant",
                        _ => "user",
                    };
                    serde_json::json!({ "role": role, "content": text })
                }
                TurnPayload::ToolCallRequest(call) => {
                    let id = format!("call_{}", index);
                    pending_call_id = Some(id.clone());
                    serde_json::json!({
                        "role": "assistant",
                        "content": serde_json::Value::Null,
                        "tool_calls": [{
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.arguments.to_string()
                            }
                        }]
                    })
                }
                TurnPayload::ToolCallResult { result, .. } => {
                    let id = pending_call_id
                        .take()
                        .unwrap_or_else(|| format!("call_{}", index.saturating_sub(1)));
                    serde_json::json!({
                        "role": "tool",
                        "tool_call_id": id,
                        "content": result.message
                    })
                }
            };
            messages.push(message);
        }

        let mut body = serde_json::Map::new();
        body.insert("model".to_string(), serde_json::Value::String(self.model.clone()));
        body.insert("messages".to_string(), serde_json::Value::Array(messages));
        body.insert("stream".to_string(), serde_json::Value::Bool(true));

        if !request.tools.is_empty() {
            let tools_json: Vec<serde_json::Value> = request
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters
                        }
                    })
                })
                .collect();
            body.insert("tools".to_string(), serde_json::Value::Array(tools_json));
        }

        serde_json::Value::Object(body)
    }
}

/// Only the first tool call (index 0) of a response is tracked.
fn delta_chunks(json: &serde_json::Value) -> Vec<StreamChunk> {
    let mut chunks = Vec::new();

    if let Some(error) = json.get("error") {
        chunks.push(StreamChunk::new(ChunkType::Error, error.to_string()));
        return chunks;
    }

    let Some(choice) = json.get("choices").and_then(|c| c.as_array()).and_then(|c| c.first()) else {
        return chunks;
    };

    let body = choice.get("delta").or_else(|| choice.get("message"));
    let Some(body) = body else {
        return chunks;
    };

    if let Some(content) = body.get("content").and_then(|c| c.as_str()) {
        if !content.is_empty() {
            chunks.push(StreamChunk::new(ChunkType::Content, content));
        }
    }

    if let Some(tool_calls) = body.get("tool_calls").and_then(|t| t.as_array()) {
        for call in tool_calls {
            let index = call.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
            if index != 0 {
                continue;
            }
            let Some(function) = call.get("function") else {
                continue;
            };
            if let Some(name) = function.get("name").and_then(|n| n.as_str()) {
                if !name.is_empty() {
                    chunks.push(StreamChunk::new(ChunkType::ToolCall, name));
                }
            }
            if let Some(args) = function.get("arguments").and_then(|a| a.as_str()) {
                if !args.is_empty() {
                    chunks.push(StreamChunk::new(ChunkType::ToolArgs, args));
                }
            }
        }
    }

    chunks
}

fn parse_stream(response: reqwest::Response) -> impl Stream<Item = Result<StreamChunk, LLMError>> + Send {
    async_stream::stream! {
        let mut bytes_stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut raw: Vec<u8> = Vec::new();
        let mut saw_event = false;

        while let Some(chunk) = bytes_stream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    yield Err(LLMError::RequestFailed(e.to_string()));
                    return;
                }
            };
            if !saw_event {
                raw.extend_from_slice(&bytes);
            }
            buffer.extend_from_slice(&bytes);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line_bytes: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line_bytes);
                let Some(data) = line.trim().strip_prefix("data:") else {
                    continue;
                };
                saw_event = true;
                let data = data.trim();

                if data == "[DONE]" {
                    yield Ok(StreamChunk::new(ChunkType::Done, ""));
                    return;
                }

                match serde_json::from_str::<serde_json::Value>(data) {
                    Ok(json) => {
                        for chunk in delta_chunks(&json) {
                            yield Ok(chunk);
                        }
                    }
                    Err(e) => {
                        yield Err(LLMError::ParseError(e.to_string()));
                        return;
                    }
                }
            }
        }

        // Servers that ignore `stream: true` answer with one JSON document.
        if !saw_event {
            let full_response = String::from_utf8_lossy(&raw);
            match serde_json::from_str::<serde_json::Value>(&full_response) {
                Ok(json) => {
                    for chunk in delta_chunks(&json) {
                        yield Ok(chunk);
                    }
                }
                Err(_) => {
                    yield Err(LLMError::ParseError(format!("Failed to parse response: {}", full_response)));
                    return;
                }
            }
        }

        yield Ok(StreamChunk::new(ChunkType::Done, ""));
    }
}

async fn collect_decision(mut stream: ChunkStream) -> Result<Decision, LLMError> {
    let mut text = String::new();
    let mut tool_name: Option<String> = None;
    let mut tool_args = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        match chunk.chunk_type {
            ChunkType::Content => text.push_str(&chunk.content),
            ChunkType::ToolCall => {
                if tool_name.is_none() {
                    tool_name = Some(chunk.content);
                }
            }
            ChunkType::ToolArgs => tool_args.push_str(&chunk.content),
            ChunkType::Done => break,
            ChunkType::Error => return Err(LLMError::ApiError(chunk.content)),
        }
    }

    let Some(name) = tool_name else {
        return Ok(Decision::Text(text));
    };

    // Unparseable arguments are passed through as a string so that
    // validation reports them to the model instead of failing the run.
    let arguments = if tool_args.trim().is_empty() {
        serde_json::json!({})
    } else {
        serde_json::from_str(&tool_args).unwrap_or(serde_json::Value::String(tool_args))
    };

    debug!(tool = %name, "OpenAI response requested a tool");
    Ok(Decision::ToolCall(ToolCallRequest::new(name, arguments)))
}

#[async_trait]
impl LLMClient for OpenAIClient {
    async fn query(&self, request: &ModelRequest<'_>) -> Result<Decision, LLMError> {
        let body = self.build_request(request);

        let response = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| LLMError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LLMError::ApiError(format!("{}: {}", status, text)));
        }

        collect_decision(Box::pin(parse_stream(response))).await
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.model.clone(),
            provider: "openai".to_string(),
            supports_streaming: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ToolDefinition;
    use crate::memory::{ConversationHistory, ToolResult};
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chunks(items: Vec<StreamChunk>) -> ChunkStream {
        Box::pin(futures::stream::iter(items.into_iter().map(Ok)))
    }

    #[test]
    fn test_build_request_links_tool_results_to_calls() {
        let client = OpenAIClient::new("k".to_string(), "gpt-4o".to_string(), None);
        let mut history = ConversationHistory::with_prompt("Make a site");
        history.push_tool_exchange(
            ToolCallRequest::new("write_file", serde_json::json!({"path": "a/index.html", "content": "<p>"})),
            ToolResult::failure("Error writing file: denied"),
        );
        history.push_model_text("Gave up.");
        let tools = vec![ToolDefinition {
            name: "write_file".to_string(),
            description: "Write".to_string(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let request = ModelRequest {
            system_instruction: "sys",
            tools: &tools,
            transcript: history.turns(),
        };

        let body = client.build_request(&request);
        let messages = body["messages"].as_array().unwrap();

        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[2]["tool_calls"][0]["id"], "call_1");
        assert_eq!(messages[3]["role"], "tool");
        assert_eq!(messages[3]["tool_call_id"], "call_1");
        assert_eq!(messages[3]["content"], "Error writing file: denied");
        assert_eq!(messages[4]["role"], "assistant");
        assert_eq!(body["tools"][0]["function"]["name"], "write_file");
        assert_eq!(body["stream"], true);
    }

    #[tokio::test]
    async fn test_collect_decision_assembles_tool_arguments() {
        let stream = chunks(vec![
            StreamChunk::new(ChunkType::ToolCall, "run_shell_command"),
            StreamChunk::new(ChunkType::ToolArgs, "{\"command\":"),
            StreamChunk::new(ChunkType::ToolArgs, "\"mkdir site\"}"),
            StreamChunk::new(ChunkType::Done, ""),
        ]);

        let decision = collect_decision(stream).await.unwrap();
        assert_eq!(
            decision,
            Decision::ToolCall(ToolCallRequest::new(
                "run_shell_command",
                serde_json::json!({"command": "mkdir site"})
            ))
        );
    }

    #[tokio::test]
    async fn test_collect_decision_keeps_malformed_arguments_as_string() {
        let stream = chunks(vec![
            StreamChunk::new(ChunkType::ToolCall, "write_file"),
            StreamChunk::new(ChunkType::ToolArgs, "{not json"),
        ]);

        match collect_decision(stream).await.unwrap() {
            Decision::ToolCall(call) => assert_eq!(call.arguments, serde_json::json!("{not json")),
            other => panic!("expected tool call, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_collect_decision_empty_response_is_empty_text() {
        let stream = chunks(vec![StreamChunk::new(ChunkType::Done, "")]);

        let decision = collect_decision(stream).await.unwrap();

        assert_eq!(decision, Decision::Text(String::new()));
    }

    #[tokio::test]
    async fn test_collect_decision_error_chunk() {
        let stream = chunks(vec![StreamChunk::new(ChunkType::Error, "rate limited")]);
        let err = collect_decision(stream).await.unwrap_err();
        assert!(matches!(err, LLMError::ApiError(_)));
    }

    #[tokio::test]
    async fn test_query_parses_sse_stream() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Site \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ready.\"}}]}\n\n",
            "data: [DONE]\n\n"
        );
        Mock::given(method("POST"))
            .and(header("Authorization", "Bearer secret"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let client = OpenAIClient::new("secret".to_string(), "gpt-4o".to_string(), Some(server.uri()));
        let history = ConversationHistory::with_prompt("hi");
        let request = ModelRequest {
            system_instruction: "sys",
            tools: &[],
            transcript: history.turns(),
        };

        let decision = client.query(&request).await.unwrap();
        assert_eq!(decision, Decision::Text("Site ready.".to_string()));
    }

    #[tokio::test]
    async fn test_query_accepts_non_streaming_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "x",
                            "type": "function",
                            "function": {"name": "write_file", "arguments": "{\"path\":\"a\",\"content\":\"b\"}"}
                        }]
                    }
                }]
            })))
            .mount(&server)
            .await;

        let client = OpenAIClient::new("k".to_string(), "gpt-4o".to_string(), Some(server.uri()));
        let history = ConversationHistory::with_prompt("hi");
        let request = ModelRequest {
            system_instruction: "sys",
            tools: &[],
            transcript: history.turns(),
        };

        match client.query(&request).await.unwrap() {
            Decision::ToolCall(call) => {
                assert_eq!(call.name, "write_file");
                assert_eq!(call.arguments["path"], "a");
            }
            other => panic!("expected tool call, got {:?}", other),
        }
    }
}
