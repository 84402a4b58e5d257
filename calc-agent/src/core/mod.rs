mod reduce;
mod reducing;
mod stepwise;

pub use reduce::reduce_expression;
pub use reducing::ReducingAgent;
pub use stepwise::StepwiseAgent;

use crate::config::AgentConfig;
use crate::model::{ModelClient, ModelError, ToolCallResponse};
use crate::tools::{Operator, ToolError, format_exact};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::info;

static EXPRESSION_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\d\s+\-*/().]+$").expect("expression regex is valid"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// 1-based position in the run.
    pub index: usize,
    pub a: f64,
    pub b: f64,
    pub op: Operator,
    pub result: f64,
    pub is_final_step: bool,
}

impl Step {
    pub fn new(
        index: usize,
        a: f64,
        b: f64,
        op: Operator,
        result: f64,
        is_final_step: bool,
    ) -> Self {
        Self {
            index,
            a,
            b,
            op,
            result,
            is_final_step,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} = {}",
            format_exact(self.a),
            self.op,
            format_exact(self.b),
            format_exact(self.result)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AgentError {
    #[error("Expression exceeds maximum length of {max} characters (got {length})")]
    ExpressionTooLong { length: usize, max: usize },
    #[error("Invalid characters in the expression: {0}")]
    InvalidExpression(String),
    #[error("Invalid operation: '{0}'. Must be one of: +, -, *, /")]
    InvalidOperator(String),
    #[error("Division by zero is not allowed (a = {a}, b = 0)")]
    DivisionByZero { a: f64 },
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    #[error("Max LLM calls reached before final result. Max calls: {0}")]
    CallBudgetExhausted(usize),
    #[error("Cannot substitute '{operation}' in '{expression}': {reason}")]
    AmbiguousSubstitution {
        expression: String,
        operation: String,
        reason: String,
    },
    #[error("LLM error: {0}")]
    LLMError(String),
}

impl AgentError {
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::ExpressionTooLong { .. } => "ExpressionTooLong",
            AgentError::InvalidExpression(_) => "InvalidExpression",
            AgentError::InvalidOperator(_) => "InvalidOperator",
            AgentError::DivisionByZero { .. } => "DivisionByZero",
            AgentError::MalformedResponse(_) => "MalformedResponse",
            AgentError::CallBudgetExhausted(_) => "CallBudgetExhausted",
            AgentError::AmbiguousSubstitution { .. } => "AmbiguousSubstitution",
            AgentError::LLMError(_) => "LLMError",
        }
    }
}

impl From<ToolError> for AgentError {
    fn from(error: ToolError) -> Self {
        match error {
            ToolError::DivisionByZero { a } => AgentError::DivisionByZero { a },
            ToolError::InvalidOperator(op) => AgentError::InvalidOperator(op),
        }
    }
}

impl From<ModelError> for AgentError {
    fn from(error: ModelError) -> Self {
        match error {
            ModelError::MalformedResponse(msg) => AgentError::MalformedResponse(msg),
            ModelError::LLM(e) => AgentError::LLMError(e.to_string()),
        }
    }
}

/// Rejects expressions that are too long or contain anything besides digits,
/// whitespace, `+ - * /`, parentheses and decimal points.
pub fn validate_expression(expression: &str, max_length: usize) -> Result<(), AgentError> {
    let length = expression.chars().count();
    if length > max_length {
        return Err(AgentError::ExpressionTooLong {
            length,
            max: max_length,
        });
    }
    if expression.trim().is_empty() || !EXPRESSION_CHARS.is_match(expression) {
        return Err(AgentError::InvalidExpression(expression.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Stepwise,
    Reducing,
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentKind::Stepwise => f.write_str("stepwise"),
            AgentKind::Reducing => f.write_str("reducing"),
        }
    }
}

impl std::str::FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stepwise" => Ok(AgentKind::Stepwise),
            "reducing" => Ok(AgentKind::Reducing),
            other => Err(format!(
                "Invalid agent type: {}. Must be one of stepwise, reducing",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentState {
    Running,
    Done(f64),
    Failed(AgentError),
}

impl AgentState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AgentState::Running)
    }
}

#[derive(Debug, Clone)]
pub struct RunState {
    expression: String,
    steps: Vec<Step>,
    current_expression: Option<String>,
    llm_calls: usize,
    status: AgentState,
}

impl RunState {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            steps: Vec::new(),
            current_expression: None,
            llm_calls: 0,
            status: AgentState::Running,
        }
    }

    fn with_current_expression(mut self) -> Self {
        self.current_expression = Some(self.expression.clone());
        self
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn into_steps(self) -> Vec<Step> {
        self.steps
    }

    pub fn current_expression(&self) -> Option<&str> {
        self.current_expression.as_deref()
    }

    pub fn llm_calls(&self) -> usize {
        self.llm_calls
    }

    pub fn status(&self) -> &AgentState {
        &self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn set_current_expression(&mut self, expression: String) {
        self.current_expression = Some(expression);
    }

    fn record_call(&mut self) {
        self.llm_calls += 1;
    }

    fn finish(&mut self, status: AgentState) -> AgentState {
        self.status = status;
        self.status.clone()
    }

    fn push_step(&mut self, step: Step) -> AgentState {
        let is_final = step.is_final_step;
        let result = step.result;
        self.steps.push(step);
        if is_final {
            self.finish(AgentState::Done(result))
        } else {
            AgentState::Running
        }
    }
}

fn execute(state: &RunState, call: &ToolCallResponse) -> Result<Step, AgentError> {
    let op: Operator = call.op.parse()?;
    let result = op.apply(call.a, call.b)?;
    let step = Step::new(state.steps.len() + 1, call.a, call.b, op, result, call.is_final_step);
    info!(index = step.index, final_step = step.is_final_step, "Step {}", step);
    Ok(step)
}

pub enum AgentLoop {
    Stepwise(StepwiseAgent),
    Reducing(ReducingAgent),
}

impl AgentLoop {
    pub fn new(kind: AgentKind, expression: &str, config: &AgentConfig) -> Self {
        match kind {
            AgentKind::Stepwise => AgentLoop::Stepwise(StepwiseAgent::new(expression, config)),
            AgentKind::Reducing => AgentLoop::Reducing(ReducingAgent::new(expression, config)),
        }
    }

    pub fn kind(&self) -> AgentKind {
        match self {
            AgentLoop::Stepwise(_) => AgentKind::Stepwise,
            AgentLoop::Reducing(_) => AgentKind::Reducing,
        }
    }

    pub fn state(&self) -> &RunState {
        match self {
            AgentLoop::Stepwise(agent) => agent.state(),
            AgentLoop::Reducing(agent) => agent.state(),
        }
    }

    pub fn into_state(self) -> RunState {
        match self {
            AgentLoop::Stepwise(agent) => agent.into_state(),
            AgentLoop::Reducing(agent) => agent.into_state(),
        }
    }

    /// Performs one turn. Once the run is terminal, the terminal state is
    /// returned again without contacting the model.
    pub async fn advance(&mut self, model: &ModelClient) -> AgentState {
        match self {
            AgentLoop::Stepwise(agent) => agent.advance(model).await,
            AgentLoop::Reducing(agent) => agent.advance(model).await,
        }
    }
}
