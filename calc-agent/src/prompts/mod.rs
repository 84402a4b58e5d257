use crate::core::Step;

pub const EXPRESSION_PLACEHOLDER: &str = "{EXPRESSION}";
pub const STEPS_PLACEHOLDER: &str = "{STEPS_SO_FAR}";

pub const DEFAULT_STEPWISE_SYSTEM_PROMPT: &str = r#"You are a careful calculator. You never compute anything yourself: you evaluate arithmetic expressions one operation at a time by calling the `calculate` tool.

## Rules
1. Respect operator precedence: parentheses first, then * and /, then + and -, left to right.
2. Each call performs exactly one operation on two numbers.
3. Use the results of earlier steps as operands for later steps.
4. Set `is_final_step` to true only on the call whose result is the value of the whole expression."#;

pub const DEFAULT_INITIAL_PROMPT: &str = r#"Evaluate the expression:
{EXPRESSION}

Call `calculate` with the first operation to perform."#;

pub const DEFAULT_SUBSEQUENT_PROMPT: &str = r#"Evaluate the expression:
{EXPRESSION}

Steps completed so far:
{STEPS_SO_FAR}

Call `calculate` with the next operation to perform."#;

pub const DEFAULT_REDUCING_SYSTEM_PROMPT: &str = r#"You are a careful calculator. You never compute anything yourself: you simplify an arithmetic expression by calling the `calculate` tool for exactly one operation at a time.

## Rules
1. Respect operator precedence: parentheses first, then * and /, then + and -, left to right.
2. Pick the next operation that can be evaluated directly on two numbers written in the expression, and pass those numbers exactly as written.
3. If the expression is a single operation, that call is the final step: set `is_final_step` to true."#;

pub const DEFAULT_REDUCING_PROMPT: &str = r#"Current expression:
{EXPRESSION}

Call `calculate` with the next operation to perform."#;

/// Fills the `{EXPRESSION}` and `{STEPS_SO_FAR}` placeholders of a template.
pub fn render(template: &str, expression: &str, steps_so_far: Option<&str>) -> String {
    let rendered = template.replace(EXPRESSION_PLACEHOLDER, expression);
    match steps_so_far {
        Some(steps) => rendered.replace(STEPS_PLACEHOLDER, steps),
        None => rendered,
    }
}

pub fn format_steps(steps: &[Step]) -> String {
    steps
        .iter()
        .map(|step| step.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_tool_result_content(result: f64) -> String {
    serde_json::json!({ "result": result }).to_string()
}
