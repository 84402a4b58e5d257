//! Scripted chat-completion client used by the agent and orchestrator tests.

use crate::clients::{
    ChunkStream, LLMClient, LLMError, Message, ModelInfo, StreamChunk, ToolChoice, ToolDefinition,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub(crate) messages: Vec<Message>,
    pub(crate) tools: Vec<ToolDefinition>,
    pub(crate) tool_choice: ToolChoice,
}

#[derive(Clone)]
pub(crate) struct ScriptedClient {
    responses: Arc<Mutex<VecDeque<Vec<StreamChunk>>>>,
    recordings: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl ScriptedClient {
    pub(crate) fn new(responses: Vec<Vec<StreamChunk>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            recordings: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn call(a: f64, b: f64, op: &str, is_final_step: bool) -> Vec<StreamChunk> {
        let arguments = serde_json::json!({
            "a": a,
            "b": b,
            "op": op,
            "is_final_step": is_final_step,
        })
        .to_string();
        vec![
            StreamChunk::tool_call(0, Some(format!("call_{}_{}_{}", a, op, b)), "calculate"),
            StreamChunk::tool_args(0, arguments),
            StreamChunk::done(),
        ]
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.recordings.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LLMClient for ScriptedClient {
    async fn stream_complete(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        tool_choice: ToolChoice,
    ) -> Result<ChunkStream, LLMError> {
        if let Ok(mut recordings) = self.recordings.lock() {
            recordings.push(RecordedRequest {
                messages,
                tools,
                tool_choice,
            });
        }

        let next = self
            .responses
            .lock()
            .ok()
            .and_then(|mut responses| responses.pop_front())
            .ok_or_else(|| LLMError::RequestFailed("script exhausted".to_string()))?;

        let chunks: Vec<Result<StreamChunk, LLMError>> = next.into_iter().map(Ok).collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: "scripted".to_string(),
            max_tokens: None,
            supports_streaming: true,
        }
    }
}
