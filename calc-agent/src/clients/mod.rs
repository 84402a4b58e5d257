use async_trait::async_trait;
use futures::Stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Display;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn plain(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::User, content)
    }

    pub fn assistant_tool_call(content: impl Into<String>, call: ToolCall) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            tool_calls: Some(vec![call]),
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub function: ToolFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFunction {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    Auto,
    Required,
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkType {
    Content,
    /// Start of a tool call: `content` holds the function name, `id` the call id.
    ToolCall,
    /// Argument fragment for the tool call at `index`.
    ToolArgs,
    Done,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamChunk {
    pub content: String,
    pub chunk_type: ChunkType,
    pub delta: bool,
    pub index: usize,
    pub id: Option<String>,
}

impl StreamChunk {
    pub fn content(content: impl Into<String>, delta: bool) -> Self {
        Self {
            content: content.into(),
            chunk_type: ChunkType::Content,
            delta,
            index: 0,
            id: None,
        }
    }

    pub fn tool_call(index: usize, id: Option<String>, name: impl Into<String>) -> Self {
        Self {
            content: name.into(),
            chunk_type: ChunkType::ToolCall,
            delta: true,
            index,
            id,
        }
    }

    pub fn tool_args(index: usize, arguments: impl Into<String>) -> Self {
        Self {
            content: arguments.into(),
            chunk_type: ChunkType::ToolArgs,
            delta: true,
            index,
            id: None,
        }
    }

    pub fn done() -> Self {
        Self {
            content: String::new(),
            chunk_type: ChunkType::Done,
            delta: false,
            index: 0,
            id: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            chunk_type: ChunkType::Error,
            delta: false,
            index: 0,
            id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub supports_streaming: bool,
}

#[derive(Debug, Error)]
pub enum LLMError {
    #[error("Request failed: {0}")]
    RequestFailed(String),
    #[error("API error: {0}")]
    ApiError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, LLMError>> + Send>>;

#[async_trait]
pub trait LLMClient: Send + Sync {
    async fn stream_complete(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        tool_choice: ToolChoice,
    ) -> Result<ChunkStream, LLMError>;

    fn model_info(&self) -> ModelInfo;
}

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
            timeout: Duration::from_secs(120),
            base_url: base_url.unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
        }
    }

    fn build_request(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        tool_choice: ToolChoice,
    ) -> Value {
        let messages_json: Vec<Value> = messages
            .into_iter()
            .map(|msg| {
                let mut map = serde_json::Map::new();
                map.insert(
                    "role".to_string(),
                    Value::String(match msg.role {
                        MessageRole::System => "system".to_string(),
                        MessageRole::User => "user".to_string(),
                        MessageRole::Assistant => "assistant".to_string(),
                        MessageRole::Tool => "tool".to_string(),
                    }),
                );
                map.insert("content".to_string(), Value::String(msg.content));

                if let Some(tool_calls) = msg.tool_calls {
                    let tool_calls_json: Vec<Value> = tool_calls
                        .into_iter()
                        .map(|tc| {
                            serde_json::json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {
                                    "name": tc.function.name,
                                    "arguments": tc.function.arguments
                                }
                            })
                        })
                        .collect();
                    map.insert("tool_calls".to_string(), Value::Array(tool_calls_json));
                }

                if let Some(tool_call_id) = msg.tool_call_id {
                    map.insert("tool_call_id".to_string(), Value::String(tool_call_id));
                }

                Value::Object(map)
            })
            .collect();

        let mut request = serde_json::Map::new();
        request.insert("model".to_string(), Value::String(self.model.clone()));
        request.insert("messages".to_string(), Value::Array(messages_json));
        request.insert("stream".to_string(), Value::Bool(true));

        if !tools.is_empty() {
            let tools_json: Vec<Value> = tools
                .into_iter()
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
            request.insert("tools".to_string(), Value::Array(tools_json));
            request.insert(
                "tool_choice".to_string(),
                serde_json::to_value(tool_choice).unwrap_or(Value::Null),
            );
            request.insert("parallel_tool_calls".to_string(), Value::Bool(false));
        }

        Value::Object(request)
    }
}

fn chunks_from_event(json: &Value) -> Vec<StreamChunk> {
    let mut chunks = Vec::new();

    if let Some(error) = json.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        chunks.push(StreamChunk::error(message));
        return chunks;
    }

    let Some(choices) = json.get("choices").and_then(|c| c.as_array()) else {
        return chunks;
    };

    for choice in choices {
        let Some(delta) = choice.get("delta").and_then(|d| d.as_object()) else {
            continue;
        };

        if let Some(content) = delta.get("content").and_then(|c| c.as_str()) {
            if !content.is_empty() {
                chunks.push(StreamChunk::content(content, true));
            }
        }

        let Some(tool_calls) = delta.get("tool_calls").and_then(|t| t.as_array()) else {
            continue;
        };

        for (position, tc) in tool_calls.iter().enumerate() {
            let index = tc
                .get("index")
                .and_then(|i| i.as_u64())
                .map(|i| i as usize)
                .unwrap_or(position);
            let id = tc.get("id").and_then(|i| i.as_str()).map(str::to_string);
            let function = tc.get("function");

            if let Some(name) = function.and_then(|f| f.get("name")).and_then(|n| n.as_str()) {
                if !name.is_empty() {
                    chunks.push(StreamChunk::tool_call(index, id, name));
                }
            }
            if let Some(args) = function
                .and_then(|f| f.get("arguments"))
                .and_then(|a| a.as_str())
            {
                if !args.is_empty() {
                    chunks.push(StreamChunk::tool_args(index, args));
                }
            }
        }
    }

    chunks
}

fn chunks_from_completion(json: &Value) -> Result<Vec<StreamChunk>, LLMError> {
    if let Some(error) = json.get("error") {
        return Err(LLMError::ApiError(error.to_string()));
    }

    let choices = json
        .get("choices")
        .and_then(|c| c.as_array())
        .ok_or_else(|| LLMError::ParseError(format!("Missing choices in response: {}", json)))?;

    let mut chunks = Vec::new();
    for choice in choices {
        let Some(message) = choice.get("message").and_then(|m| m.as_object()) else {
            continue;
        };

        if let Some(content) = message.get("content").and_then(|c| c.as_str()) {
            if !content.is_empty() {
                chunks.push(StreamChunk::content(content, false));
            }
        }

        if let Some(tool_calls) = message.get("tool_calls").and_then(|t| t.as_array()) {
            for (index, tc) in tool_calls.iter().enumerate() {
                let id = tc.get("id").and_then(|i| i.as_str()).map(str::to_string);
                let function = tc.get("function");
                let name = function
                    .and_then(|f| f.get("name"))
                    .and_then(|n| n.as_str())
                    .unwrap_or_default();
                let arguments = function
                    .and_then(|f| f.get("arguments"))
                    .and_then(|a| a.as_str())
                    .unwrap_or_default();

                chunks.push(StreamChunk::tool_call(index, id, name));
                chunks.push(StreamChunk::tool_args(index, arguments));
            }
        }
    }

    Ok(chunks)
}

enum Line {
    Chunks(Vec<StreamChunk>),
    Done,
    Ignored,
}

fn parse_sse_line(line: &str) -> Result<Line, LLMError> {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(Line::Ignored);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(Line::Done);
    }
    if data.is_empty() {
        return Ok(Line::Ignored);
    }
    serde_json::from_str::<Value>(data)
        .map(|json| Line::Chunks(chunks_from_event(&json)))
        .map_err(|e| LLMError::ParseError(format!("Invalid stream event {}: {}", data, e)))
}

/// Parses a response body that is either an SSE stream or a plain JSON
/// completion. SSE lines may be split across network chunks.
fn parse_stream<S, B, E>(body: S) -> impl Stream<Item = Result<StreamChunk, LLMError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Display + Send,
{
    async_stream::stream! {
        let mut body = Box::pin(body);
        let mut pending: Vec<u8> = Vec::new();
        let mut raw: Vec<u8> = Vec::new();
        let mut is_sse = false;

        while let Some(chunk) = body.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    yield Err(LLMError::RequestFailed(e.to_string()));
                    return;
                }
            };
            raw.extend_from_slice(bytes.as_ref());
            pending.extend_from_slice(bytes.as_ref());

            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                if line.trim_start().starts_with("data:") {
                    is_sse = true;
                }
                if !is_sse {
                    continue;
                }
                match parse_sse_line(&line) {
                    Ok(Line::Chunks(chunks)) => {
                        for chunk in chunks {
                            yield Ok(chunk);
                        }
                    }
                    Ok(Line::Done) => {
                        yield Ok(StreamChunk::done());
                        return;
                    }
                    Ok(Line::Ignored) => {}
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }

        if is_sse {
            let line = String::from_utf8_lossy(&pending).to_string();
            match parse_sse_line(&line) {
                Ok(Line::Chunks(chunks)) => {
                    for chunk in chunks {
                        yield Ok(chunk);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        } else {
            // Not SSE format, the provider answered with a full completion
            match serde_json::from_slice::<Value>(&raw) {
                Ok(json) => match chunks_from_completion(&json) {
                    Ok(chunks) => {
                        for chunk in chunks {
                            yield Ok(chunk);
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                },
                Err(_) => {
                    yield Err(LLMError::ParseError(format!(
                        "Failed to parse response: {}",
                        String::from_utf8_lossy(&raw)
                    )));
                    return;
                }
            }
        }

        yield Ok(StreamChunk::done());
    }
}

#[async_trait]
impl LLMClient for OpenAIClient {
    async fn stream_complete(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        tool_choice: ToolChoice,
    ) -> Result<ChunkStream, LLMError> {
        let request = self.build_request(messages, tools, tool_choice);
        debug!(
            model = self.model.as_str(),
            url = self.base_url.as_str(),
            "Sending chat completion request"
        );

        let response = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| LLMError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LLMError::ApiError(format!("{}: {}", status, body)));
        }

        Ok(Box::pin(parse_stream(response.bytes_stream())))
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.model.clone(),
            max_tokens: Some(16384),
            supports_streaming: true,
        }
    }
}

pub fn create_llm_client(
    provider: &str,
    api_key: String,
    model: String,
    base_url: Option<String>,
) -> Result<Box<dyn LLMClient>, LLMError> {
    match provider {
        "openai" | "OpenAI" => Ok(Box::new(OpenAIClient::new(api_key, model, base_url))),
        _ => Err(LLMError::ConfigError(format!("Unknown provider: {}", provider))),
    }
}
