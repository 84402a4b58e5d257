use crate::clients::ToolDefinition;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, PickFirst, serde_as};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const CALCULATE_TOOL_NAME: &str = "calculate";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolError {
    #[error("Division by zero is not allowed (a = {a}, b = 0)")]
    DivisionByZero { a: f64 },
    #[error("Unsupported operation: \"{0}\". Supported operations are +, -, *, /")]
    InvalidOperator(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
}

impl Operator {
    pub const ALL: [Operator; 4] = [Operator::Add, Operator::Sub, Operator::Mul, Operator::Div];

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
        }
    }

    pub fn apply(self, a: f64, b: f64) -> Result<f64, ToolError> {
        match self {
            Operator::Add => Ok(a + b),
            Operator::Sub => Ok(a - b),
            Operator::Mul => Ok(a * b),
            Operator::Div => {
                if b == 0.0 {
                    return Err(ToolError::DivisionByZero { a });
                }
                Ok(a / b)
            }
        }
    }
}

impl FromStr for Operator {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "+" => Ok(Operator::Add),
            "-" => Ok(Operator::Sub),
            "*" => Ok(Operator::Mul),
            "/" => Ok(Operator::Div),
            other => Err(ToolError::InvalidOperator(other.to_string())),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

pub fn apply(a: f64, b: f64, op: &str) -> Result<f64, ToolError> {
    op.parse::<Operator>()?.apply(a, b)
}

// Models occasionally quote numbers or booleans, and sometimes emit the key "op:".
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculateArgs {
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub a: f64,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub b: f64,
    #[serde(alias = "op:")]
    pub op: String,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub is_final_step: bool,
}

impl CalculateArgs {
    pub fn parse(arguments: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(arguments)
    }
}

pub fn calculate_tool_definition() -> ToolDefinition {
    ToolDefinition {
        name: CALCULATE_TOOL_NAME.to_string(),
        description: "Perform exactly one arithmetic operation on two numbers and report whether it is the last step of the expression".to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "a": {
                    "type": "number",
                    "description": "Left operand"
                },
                "b": {
                    "type": "number",
                    "description": "Right operand"
                },
                "op": {
                    "type": "string",
                    "enum": Operator::ALL.iter().map(|op| op.symbol()).collect::<Vec<_>>(),
                    "description": "Operation to perform"
                },
                "is_final_step": {
                    "type": "boolean",
                    "description": "True when this operation produces the final answer of the whole expression"
                }
            },
            "required": ["a", "b", "op", "is_final_step"],
            "additionalProperties": false
        }),
    }
}

/// Shortest text that parses back to exactly `value`.
pub fn format_exact(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    value.to_string()
}

pub fn format_number(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }
    if value.fract() == 0.0 {
        return format!("{:.0}", value);
    }
    let text = format!("{:.10}", value);
    match text.trim_end_matches('0').trim_end_matches('.') {
        "-0" => "0".to_string(),
        trimmed => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(6.0, 3.0, "/", 2.0)]
    #[case(10.0, 5.0, "+", 15.0)]
    #[case(25.0, 4.0, "-", 21.0)]
    #[case(5.0, 3.0, "*", 15.0)]
    #[case(1.0, 4.0, " / ", 0.25)]
    fn test_apply(#[case] a: f64, #[case] b: f64, #[case] op: &str, #[case] expected: f64) {
        assert_eq!(apply(a, b, op).unwrap(), expected);
    }

    #[test]
    fn test_apply_division_by_zero() {
        assert_eq!(
            apply(5.0, 0.0, "/"),
            Err(ToolError::DivisionByZero { a: 5.0 })
        );
    }

    #[rstest]
    #[case("%")]
    #[case("x")]
    #[case("")]
    #[case("**")]
    fn test_apply_invalid_operator(#[case] op: &str) {
        assert!(matches!(apply(2.0, 3.0, op), Err(ToolError::InvalidOperator(_))));
    }

    #[test]
    fn test_calculate_args_plain() {
        let raw = r#"{"a": 10, "b": 5.5, "op": "+", "is_final_step": false}"#;
        let args = CalculateArgs::parse(raw).unwrap();
        assert_eq!(args.a, 10.0);
        assert_eq!(args.b, 5.5);
        assert_eq!(args.op, "+");
        assert!(!args.is_final_step);
    }

    #[test]
    fn test_calculate_args_quoted_values_and_op_typo() {
        let raw = r#"{"a": "12", "b": "3", "op:": "/", "is_final_step": "true"}"#;
        let args = CalculateArgs::parse(raw).unwrap();
        assert_eq!(args.a, 12.0);
        assert_eq!(args.b, 3.0);
        assert_eq!(args.op, "/");
        assert!(args.is_final_step);
    }

    #[test]
    fn test_calculate_args_missing_field() {
        assert!(CalculateArgs::parse(r#"{"a": 1, "b": 2, "op": "+"}"#).is_err());
    }

    #[test]
    fn test_tool_definition_schema() {
        let definition = calculate_tool_definition();
        assert_eq!(definition.name, "calculate");
        assert_eq!(
            definition.parameters["properties"]["op"]["enum"],
            serde_json::json!(["+", "-", "*", "/"])
        );
        assert_eq!(
            definition.parameters["required"],
            serde_json::json!(["a", "b", "op", "is_final_step"])
        );
    }

    #[rstest]
    #[case(15.0, "15")]
    #[case(-4.0, "-4")]
    #[case(0.25, "0.25")]
    #[case(1.0 / 3.0, "0.3333333333")]
    #[case(0.1 + 0.2, "0.3")]
    #[case(-0.0, "0")]
    fn test_format_number(#[case] value: f64, #[case] expected: &str) {
        assert_eq!(format_number(value), expected);
    }

    #[rstest]
    #[case(15.0, "15")]
    #[case(-4.0, "-4")]
    #[case(1e-11, "0.00000000001")]
    #[case(0.1 + 0.2, "0.30000000000000004")]
    #[case(1e11, "100000000000")]
    #[case(-0.0, "0")]
    fn test_format_exact(#[case] value: f64, #[case] expected: &str) {
        let text = format_exact(value);
        assert_eq!(text, expected);
        assert_eq!(text.parse::<f64>().unwrap(), value);
    }
}
