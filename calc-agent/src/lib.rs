pub mod clients;
pub mod config;
pub mod core;
pub mod model;
pub mod orchestrator;
pub mod prompts;
pub mod tools;

#[cfg(test)]
mod testing;

pub use clients::{
    LLMClient, LLMError, Message, MessageRole, OpenAIClient, StreamChunk, ToolChoice,
    ToolDefinition, create_llm_client,
};
pub use config::{AgentConfig, ConfigError, ReducingConfig, StepwiseConfig};
pub use core::{AgentError, AgentKind, AgentLoop, AgentState, RunState, Step, validate_expression};
pub use model::{ModelClient, ModelError, ToolCallResponse};
pub use orchestrator::{Evaluation, Orchestrator, RunFailure};
pub use tools::{Operator, ToolError, apply};
