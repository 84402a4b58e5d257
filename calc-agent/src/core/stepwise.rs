use super::{AgentError, AgentState, RunState, execute};
use crate::clients::Message;
use crate::config::{AgentConfig, StepwiseConfig};
use crate::model::ModelClient;
use crate::prompts::{build_tool_result_content, format_steps, render};
use tracing::debug;

pub struct StepwiseAgent {
    config: StepwiseConfig,
    max_llm_calls: usize,
    state: RunState,
    history: Vec<Message>,
    next_prompt: String,
}

impl StepwiseAgent {
    pub fn new(expression: &str, config: &AgentConfig) -> Self {
        let next_prompt = render(&config.stepwise.initial_prompt, expression, None);
        Self {
            config: config.stepwise.clone(),
            max_llm_calls: config.max_llm_calls,
            state: RunState::new(expression),
            history: Vec::new(),
            next_prompt,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn into_state(self) -> RunState {
        self.state
    }

    pub fn history(&self) -> &[Message] {
        &self.history
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
        debug!(prompt = self.next_prompt.as_str(), "Stepwise prompt");
        self.state.record_call();
        let call = model
            .next_step(&self.config.system_prompt, &self.next_prompt, &self.history)
            .await?;

        let step = execute(&self.state, &call)?;
        let result = step.result;
        let status = self.state.push_step(step);
        if status.is_terminal() {
            return Ok(status);
        }

        let prompt = render(
            &self.config.subsequent_prompt,
            self.state.expression(),
            Some(&format_steps(self.state.steps())),
        );

        if self.config.append_messages {
            let previous = std::mem::replace(&mut self.next_prompt, prompt);
            self.history.push(Message::user(previous));
            if self.config.return_tool_call_msgs {
                self.history.push(call.to_message());
                self.history
                    .push(Message::tool_result(&call.call_id, build_tool_result_content(result)));
            }
        } else {
            self.history.clear();
            self.next_prompt = prompt;
        }

        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{MessageRole, StreamChunk};
    use crate::testing::ScriptedClient;
    use std::sync::Arc;

    fn agent(
        expression: &str,
        config: &AgentConfig,
        script: Vec<Vec<StreamChunk>>,
    ) -> (StepwiseAgent, ModelClient, ScriptedClient) {
        let scripted = ScriptedClient::new(script);
        let model = ModelClient::new(Arc::new(scripted.clone()));
        (StepwiseAgent::new(expression, config), model, scripted)
    }

    async fn drive(agent: &mut StepwiseAgent, model: &ModelClient) -> AgentState {
        loop {
            let status = agent.advance(model).await;
            if status.is_terminal() {
                return status;
            }
        }
    }

    #[tokio::test]
    async fn test_stepwise_reaches_final_result() {
        let config = AgentConfig::default();
        let (mut agent, model, scripted) = agent(
            "10 + 5 * 3 - 8 / 2",
            &config,
            vec![
                ScriptedClient::call(5.0, 3.0, "*", false),
                ScriptedClient::call(8.0, 2.0, "/", false),
                ScriptedClient::call(10.0, 15.0, "+", false),
                ScriptedClient::call(25.0, 4.0, "-", true),
            ],
        );

        assert_eq!(drive(&mut agent, &model).await, AgentState::Done(21.0));

        let steps = agent.state().steps();
        assert_eq!(steps.len(), 4);
        assert_eq!(steps.iter().map(|s| s.index).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert_eq!(steps.iter().filter(|s| s.is_final_step).count(), 1);
        assert!(steps[3].is_final_step);

        let requests = scripted.requests();
        assert_eq!(requests.len(), 4);
        let last = requests[3].messages.last().unwrap();
        assert!(last.content.contains("10 + 5 * 3 - 8 / 2"));
        assert!(last.content.contains("5 * 3 = 15\n8 / 2 = 4\n10 + 15 = 25"));
    }

    #[tokio::test]
    async fn test_stepwise_append_mode_replays_tool_calls() {
        let config = AgentConfig::default();
        let (mut agent, model, scripted) = agent(
            "2 + 3 * 4",
            &config,
            vec![
                ScriptedClient::call(3.0, 4.0, "*", false),
                ScriptedClient::call(2.0, 12.0, "+", true),
            ],
        );

        assert_eq!(drive(&mut agent, &model).await, AgentState::Done(14.0));

        let second = &scripted.requests()[1].messages;
        let roles: Vec<MessageRole> = second.iter().map(|m| m.role.clone()).collect();
        assert_eq!(
            roles,
            vec![
                MessageRole::System,
                MessageRole::User,
                MessageRole::Assistant,
                MessageRole::Tool,
                MessageRole::User,
            ]
        );
        let tool_call_id = second[2].tool_calls.as_ref().unwrap()[0].id.clone();
        assert_eq!(second[3].tool_call_id.as_deref(), Some(tool_call_id.as_str()));
        assert_eq!(second[3].content, "{\"result\":12.0}");
    }

    #[tokio::test]
    async fn test_stepwise_append_without_tool_messages() {
        let mut config = AgentConfig::default();
        config.stepwise.return_tool_call_msgs = false;
        let (mut agent, model, scripted) = agent(
            "2 + 3 * 4",
            &config,
            vec![
                ScriptedClient::call(3.0, 4.0, "*", false),
                ScriptedClient::call(2.0, 12.0, "+", true),
            ],
        );

        drive(&mut agent, &model).await;

        let roles: Vec<MessageRole> = scripted.requests()[1]
            .messages
            .iter()
            .map(|m| m.role.clone())
            .collect();
        assert_eq!(roles, vec![MessageRole::System, MessageRole::User, MessageRole::User]);
    }

    #[tokio::test]
    async fn test_stepwise_fresh_history_mode() {
        let mut config = AgentConfig::default();
        config.stepwise.append_messages = false;
        let (mut agent, model, scripted) = agent(
            "2 + 3 * 4",
            &config,
            vec![
                ScriptedClient::call(3.0, 4.0, "*", false),
                ScriptedClient::call(2.0, 12.0, "+", true),
            ],
        );

        drive(&mut agent, &model).await;

        let second = &scripted.requests()[1].messages;
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].role, MessageRole::System);
        assert!(second[1].content.contains("3 * 4 = 12"));
        assert!(agent.history().is_empty());
    }

    #[tokio::test]
    async fn test_stepwise_budget_exhausted() {
        let config = AgentConfig {
            max_llm_calls: 2,
            ..AgentConfig::default()
        };
        let (mut agent, model, scripted) = agent(
            "1 + 1 + 1 + 1",
            &config,
            vec![
                ScriptedClient::call(1.0, 1.0, "+", false),
                ScriptedClient::call(2.0, 1.0, "+", false),
                ScriptedClient::call(3.0, 1.0, "+", true),
            ],
        );

        assert_eq!(
            drive(&mut agent, &model).await,
            AgentState::Failed(AgentError::CallBudgetExhausted(2))
        );
        assert_eq!(scripted.requests().len(), 2);
        assert_eq!(agent.state().steps().len(), 2);

        // terminal: no further model calls
        agent.advance(&model).await;
        assert_eq!(scripted.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_stepwise_final_step_on_last_permitted_call() {
        let config = AgentConfig {
            max_llm_calls: 2,
            ..AgentConfig::default()
        };
        let (mut agent, model, scripted) = agent(
            "2 + 3 * 4",
            &config,
            vec![
                ScriptedClient::call(3.0, 4.0, "*", false),
                ScriptedClient::call(2.0, 12.0, "+", true),
            ],
        );

        assert_eq!(drive(&mut agent, &model).await, AgentState::Done(14.0));
        assert_eq!(scripted.requests().len(), 2);
        assert!(agent.state().steps()[1].is_final_step);
    }

    #[tokio::test]
    async fn test_stepwise_history_keeps_full_precision() {
        let config = AgentConfig::default();
        let (mut agent, model, scripted) = agent(
            "1 / 3 * 3",
            &config,
            vec![
                ScriptedClient::call(1.0, 3.0, "/", false),
                ScriptedClient::call(1.0 / 3.0, 3.0, "*", true),
            ],
        );

        assert_eq!(drive(&mut agent, &model).await, AgentState::Done(1.0));
        let last = scripted.requests()[1].messages.last().unwrap().content.clone();
        assert!(last.contains("1 / 3 = 0.3333333333333333"));
    }

    #[tokio::test]
    async fn test_stepwise_malformed_response_skips_tool() {
        let config = AgentConfig::default();
        let (mut agent, model, _) = agent(
            "2 + 3",
            &config,
            vec![vec![StreamChunk::content("5", false), StreamChunk::done()]],
        );

        let status = drive(&mut agent, &model).await;

        assert!(matches!(status, AgentState::Failed(AgentError::MalformedResponse(_))));
        assert!(agent.state().steps().is_empty());
    }

    #[tokio::test]
    async fn test_stepwise_division_by_zero_fails() {
        let config = AgentConfig::default();
        let (mut agent, model, _) = agent(
            "5 / 0",
            &config,
            vec![ScriptedClient::call(5.0, 0.0, "/", true)],
        );

        assert_eq!(
            drive(&mut agent, &model).await,
            AgentState::Failed(AgentError::DivisionByZero { a: 5.0 })
        );
        assert!(agent.state().steps().is_empty());
    }
}
