use crate::clients::LLMClient;
use crate::config::AgentConfig;
use crate::core::{AgentError, AgentKind, AgentLoop, AgentState, Step, validate_expression};
use crate::model::ModelClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub expression: String,
    pub agent: AgentKind,
    pub steps: Vec<Step>,
    pub result: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{error}")]
pub struct RunFailure {
    pub error: AgentError,
    pub steps: Vec<Step>,
}

impl RunFailure {
    fn new(error: AgentError, steps: Vec<Step>) -> Self {
        Self { error, steps }
    }

    pub fn kind(&self) -> &'static str {
        self.error.kind()
    }
}

pub type StepCallback = Arc<dyn Fn(&Step) + Send + Sync>;

pub struct Orchestrator {
    config: AgentConfig,
    model: ModelClient,
    agent_kind: AgentKind,
    step_callback: Option<StepCallback>,
}

impl Orchestrator {
    pub fn new(client: Arc<dyn LLMClient>, config: AgentConfig, agent_kind: AgentKind) -> Self {
        Self {
            config,
            model: ModelClient::new(client),
            agent_kind,
            step_callback: None,
        }
    }

    /// Called after every completed step, in order.
    pub fn with_step_callback(mut self, callback: StepCallback) -> Self {
        self.step_callback = Some(callback);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn agent_kind(&self) -> AgentKind {
        self.agent_kind
    }

    pub fn change_agent(&mut self, agent_kind: AgentKind) {
        info!(from = %self.agent_kind, to = %agent_kind, "Switching agent");
        self.agent_kind = agent_kind;
    }

    pub async fn evaluate(&self, expression: &str) -> Result<Evaluation, RunFailure> {
        self.run(expression, self.agent_kind).await
    }

    pub async fn run(
        &self,
        expression: &str,
        agent_kind: AgentKind,
    ) -> Result<Evaluation, RunFailure> {
        validate_expression(expression, self.config.max_expression_length)
            .map_err(|e| RunFailure::new(e, Vec::new()))?;

        let model = self.model.model_info();
        info!(expression, agent = %agent_kind, model = model.name.as_str(), "Starting evaluation");

        let mut agent = AgentLoop::new(agent_kind, expression, &self.config);
        let mut reported = 0;

        let status = loop {
            let status = agent.advance(&self.model).await;

            if let Some(callback) = &self.step_callback {
                for step in &agent.state().steps()[reported..] {
                    callback(step);
                }
            }
            reported = agent.state().steps().len();

            if status.is_terminal() {
                break status;
            }
        };

        let calls = agent.state().llm_calls();
        let kind = agent.kind();
        let steps = agent.into_state().into_steps();
        match status {
            AgentState::Done(result) => {
                info!(result, steps = steps.len(), calls, "Evaluation complete");
                Ok(Evaluation {
                    expression: expression.to_string(),
                    agent: kind,
                    steps,
                    result,
                })
            }
            AgentState::Failed(error) => {
                warn!(
                    kind = error.kind(),
                    steps = steps.len(),
                    calls,
                    "Evaluation failed: {}",
                    error
                );
                Err(RunFailure::new(error, steps))
            }
            AgentState::Running => Err(RunFailure::new(
                AgentError::CallBudgetExhausted(self.config.max_llm_calls),
                steps,
            )),
        }
    }
}
