use crate::clients::{
    ChunkType, LLMClient, LLMError, Message, ModelInfo, ToolCall, ToolChoice, ToolDefinition,
    ToolFunction,
};
use crate::tools::{CALCULATE_TOOL_NAME, CalculateArgs, calculate_tool_definition};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    #[error(transparent)]
    LLM(#[from] LLMError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallResponse {
    pub call_id: String,
    pub a: f64,
    pub b: f64,
    /// Raw operator text; validated by the arithmetic tool, not here.
    pub op: String,
    pub is_final_step: bool,
    pub raw_arguments: String,
    pub content: String,
}

impl ToolCallResponse {
    pub fn to_message(&self) -> Message {
        Message::assistant_tool_call(
            self.content.clone(),
            ToolCall {
                id: self.call_id.clone(),
                function: ToolFunction {
                    name: CALCULATE_TOOL_NAME.to_string(),
                    arguments: self.raw_arguments.clone(),
                },
            },
        )
    }
}

#[derive(Default)]
struct PendingCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

#[derive(Clone)]
pub struct ModelClient {
    client: Arc<dyn LLMClient>,
    tool: ToolDefinition,
}

impl ModelClient {
    pub fn new(client: Arc<dyn LLMClient>) -> Self {
        Self {
            client,
            tool: calculate_tool_definition(),
        }
    }

    pub fn model_info(&self) -> ModelInfo {
        self.client.model_info()
    }

    pub async fn next_step(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        history: &[Message],
    ) -> Result<ToolCallResponse, ModelError> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(system_prompt));
        messages.extend(history.iter().cloned());
        messages.push(Message::user(user_prompt));

        debug!(messages = messages.len(), prompt = user_prompt, "Requesting next step");

        let mut stream = self
            .client
            .stream_complete(messages, vec![self.tool.clone()], ToolChoice::Required)
            .await?;

        let mut content = String::new();
        let mut calls: BTreeMap<usize, PendingCall> = BTreeMap::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            match chunk.chunk_type {
                ChunkType::Content => content.push_str(&chunk.content),
                ChunkType::ToolCall => {
                    let call = calls.entry(chunk.index).or_default();
                    if chunk.id.is_some() {
                        call.id = chunk.id;
                    }
                    call.name.push_str(&chunk.content);
                }
                ChunkType::ToolArgs => {
                    calls
                        .entry(chunk.index)
                        .or_default()
                        .arguments
                        .push_str(&chunk.content);
                }
                ChunkType::Done => break,
                ChunkType::Error => return Err(LLMError::ApiError(chunk.content).into()),
            }
        }

        if calls.len() != 1 {
            return Err(ModelError::MalformedResponse(format!(
                "expected exactly one tool call, received {}",
                calls.len()
            )));
        }
        let Some((_, call)) = calls.pop_first() else {
            return Err(ModelError::MalformedResponse("expected a tool call".to_string()));
        };

        if call.name != CALCULATE_TOOL_NAME {
            return Err(ModelError::MalformedResponse(format!(
                "unexpected tool '{}'",
                call.name
            )));
        }

        debug!(arguments = call.arguments.as_str(), "Received tool call");

        let args = CalculateArgs::parse(&call.arguments).map_err(|e| {
            ModelError::MalformedResponse(format!(
                "invalid tool call arguments {}: {}",
                call.arguments, e
            ))
        })?;

        Ok(ToolCallResponse {
            call_id: call.id.unwrap_or_else(|| "call_0".to_string()),
            a: args.a,
            b: args.b,
            op: args.op,
            is_final_step: args.is_final_step,
            raw_arguments: call.arguments,
            content: content.trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{MessageRole, StreamChunk};
    use crate::testing::ScriptedClient;

    fn model(script: Vec<Vec<StreamChunk>>) -> (ModelClient, ScriptedClient) {
        let scripted = ScriptedClient::new(script);
        (ModelClient::new(Arc::new(scripted.clone())), scripted)
    }

    #[tokio::test]
    async fn test_next_step_parses_single_call() {
        let (model, scripted) = model(vec![ScriptedClient::call(5.0, 3.0, "*", false)]);
        let history = vec![Message::user("earlier")];

        let response = model.next_step("sys", "next", &history).await.unwrap();

        assert_eq!(response.a, 5.0);
        assert_eq!(response.b, 3.0);
        assert_eq!(response.op, "*");
        assert!(!response.is_final_step);

        let requests = scripted.requests();
        assert_eq!(requests.len(), 1);
        let roles: Vec<MessageRole> = requests[0].messages.iter().map(|m| m.role.clone()).collect();
        assert_eq!(roles, vec![MessageRole::System, MessageRole::User, MessageRole::User]);
        assert_eq!(requests[0].messages[2].content, "next");
        assert_eq!(requests[0].tools[0].name, "calculate");
        assert_eq!(requests[0].tool_choice, ToolChoice::Required);
    }

    #[tokio::test]
    async fn test_next_step_assembles_fragmented_arguments() {
        let (model, _) = model(vec![vec![
            StreamChunk::content("Multiplying first.", true),
            StreamChunk::tool_call(0, Some("call_7".to_string()), "calculate"),
            StreamChunk::tool_args(0, "{\"a\": \"2\", \"b\": 4,"),
            StreamChunk::tool_args(0, " \"op\": \"+\", \"is_final_step\": true}"),
            StreamChunk::done(),
        ]]);

        let response = model.next_step("sys", "go", &[]).await.unwrap();

        assert_eq!(response.call_id, "call_7");
        assert_eq!(response.a, 2.0);
        assert!(response.is_final_step);
        assert_eq!(response.content, "Multiplying first.");
        let message = response.to_message();
        assert_eq!(message.role, MessageRole::Assistant);
        assert_eq!(
            message.tool_calls.unwrap()[0].function.arguments,
            response.raw_arguments
        );
    }

    #[tokio::test]
    async fn test_next_step_without_tool_call_is_malformed() {
        let (model, _) = model(vec![vec![
            StreamChunk::content("The answer is 4", false),
            StreamChunk::done(),
        ]]);

        let err = model.next_step("sys", "go", &[]).await.unwrap_err();
        assert!(matches!(err, ModelError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_next_step_multiple_calls_is_malformed() {
        let mut chunks = ScriptedClient::call(1.0, 2.0, "+", false);
        chunks.pop();
        chunks.push(StreamChunk::tool_call(1, Some("call_b".to_string()), "calculate"));
        let arguments = r#"{"a":3,"b":4,"op":"*","is_final_step":false}"#;
        chunks.push(StreamChunk::tool_args(1, arguments));
        chunks.push(StreamChunk::done());
        let (model, _) = model(vec![chunks]);

        let err = model.next_step("sys", "go", &[]).await.unwrap_err();
        assert!(matches!(err, ModelError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_next_step_foreign_tool_is_malformed() {
        let (model, _) = model(vec![vec![
            StreamChunk::tool_call(0, Some("call_1".to_string()), "search"),
            StreamChunk::tool_args(0, "{}"),
            StreamChunk::done(),
        ]]);

        let err = model.next_step("sys", "go", &[]).await.unwrap_err();
        assert!(matches!(err, ModelError::MalformedResponse(msg) if msg.contains("search")));
    }

    #[tokio::test]
    async fn test_next_step_garbled_arguments_is_malformed() {
        let (model, _) = model(vec![vec![
            StreamChunk::tool_call(0, Some("call_1".to_string()), "calculate"),
            StreamChunk::tool_args(0, "{\"a\": 1, \"b\":"),
            StreamChunk::done(),
        ]]);

        let err = model.next_step("sys", "go", &[]).await.unwrap_err();
        assert!(matches!(err, ModelError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_next_step_error_chunk_is_transport_error() {
        let (model, _) = model(vec![vec![StreamChunk::error("overloaded")]]);

        let err = model.next_step("sys", "go", &[]).await.unwrap_err();
        assert!(matches!(err, ModelError::LLM(LLMError::ApiError(_))));
    }
}
