use super::{AgentError, AgentState, RunState, execute, reduce_expression};
use crate::config::{AgentConfig, ReducingConfig};
use crate::model::ModelClient;
use crate::prompts::render;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Prompts with the current expression only, rewriting it after every step
/// so the model sees an ever shorter expression.
pub struct ReducingAgent {
    config: ReducingConfig,
    max_llm_calls: usize,
    state: RunState,
    seen: HashSet<String>,
}

impl ReducingAgent {
    pub fn new(expression: &str, config: &AgentConfig) -> Self {
        let state = RunState::new(expression).with_current_expression();
        Self {
            config: config.reducing.clone(),
            max_llm_calls: config.max_llm_calls,
            state,
            seen: HashSet::from([expression.to_string()]),
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn into_state(self) -> RunState {
        self.state
    }

    pub async fn advance(&mut self, model: &ModelClient) -> AgentState {
        if self.state.is_terminal() {
            return self.state.status().clone();
        }
        if self.state.llm_calls() >= self.max_llm_calls {
            return self
                .state
                .finish(AgentState::Failed(AgentError::CallBudgetExhausted(self.max_llm_calls)));
        }

        match self.turn(model).await {
            Ok(AgentState::Running) if self.state.llm_calls() >= self.max_llm_calls => self
                .state
                .finish(AgentState::Failed(AgentError::CallBudgetExhausted(self.max_llm_calls))),
            Ok(status) => status,
            Err(e) => self.state.finish(AgentState::Failed(e)),
        }
    }

    async fn turn(&mut self, model: &ModelClient) -> Result<AgentState, AgentError> {
        let current = self
            .state
            .current_expression()
            .unwrap_or(self.state.expression())
            .to_string();
        let prompt = render(&self.config.prompt, &current, None);
        debug!(prompt = prompt.as_str(), "Reducing prompt");

        self.state.record_call();
        let call = model.next_step(&self.config.system_prompt, &prompt, &[]).await?;

        let step = execute(&self.state, &call)?;
        let reduced = reduce_expression(
            &current,
            step.a,
            step.b,
            step.op,
            step.result,
            self.config.strict_substitution,
        )?;
        debug!(from = current.as_str(), to = reduced.as_str(), "Reduced expression");

        if !self.seen.insert(reduced.clone()) && !step.is_final_step {
            warn!(expression = reduced.as_str(), "Expression has been seen before, possible loop");
        }

        self.state.set_current_expression(reduced);
        Ok(self.state.push_step(step))
    }
}
