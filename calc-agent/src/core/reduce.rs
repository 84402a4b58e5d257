use super::AgentError;
use crate::tools::{Operator, format_exact};
use regex::Regex;
use std::ops::Range;
use std::sync::LazyLock;
use tracing::warn;

static PARENTHESIZED_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(\s*(-?\d+(?:\.\d+)?)\s*\)").expect("parenthesized number regex is valid")
});

/// Matches the textual forms of `value` at full precision: `15` also matches
/// `15.0`, and `0.5` also matches `0.50`.
fn number_pattern(value: f64) -> String {
    let text = regex::escape(&format_exact(value));
    if value.fract() == 0.0 {
        format!(r"{}(?:\.0+)?", text)
    } else {
        format!("{}0*", text)
    }
}

fn is_number_char(c: char) -> bool {
    c.is_ascii_digit() || c == '.'
}

/// Leftmost-first, non-overlapping matches of `re`. With `bounded`, a match
/// touching another digit or decimal point on either side (the `15` inside
/// `115` or `2.15`) is skipped.
fn find_matches(re: &Regex, text: &str, bounded: bool) -> Vec<Range<usize>> {
    let mut matches = Vec::new();
    let mut start = 0;

    while start <= text.len() {
        let Some(m) = re.find_at(text, start) else {
            break;
        };
        let before_ok = text[..m.start()].chars().next_back().is_none_or(|c| !is_number_char(c));
        let after_ok = text[m.end()..].chars().next().is_none_or(|c| !is_number_char(c));

        if !bounded || (before_ok && after_ok) {
            matches.push(m.range());
            start = if m.end() > m.start() { m.end() } else { m.end() + 1 };
        } else {
            start = m.start() + text[m.start()..].chars().next().map_or(1, char::len_utf8);
        }
    }

    matches
}

/// Replaces `(n)` with `n` until no parenthesized lone number remains.
fn strip_redundant_parentheses(expression: String) -> String {
    let mut current = expression;
    loop {
        let next = PARENTHESIZED_NUMBER.replace_all(&current, "$1").into_owned();
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Rewrites `expression` by substituting `result` for the text of the
/// operation `a op b`.
///
/// A parenthesized occurrence `(a op b)` is preferred and replaced together
/// with its parentheses; otherwise the bare `a op b` is replaced. When several
/// occurrences exist the leftmost one wins. In strict mode, zero or several
/// occurrences fail with [`AgentError::AmbiguousSubstitution`]; otherwise a
/// missing occurrence leaves the expression unchanged.
pub fn reduce_expression(
    expression: &str,
    a: f64,
    b: f64,
    op: Operator,
    result: f64,
    strict: bool,
) -> Result<String, AgentError> {
    let operation = format!("{} {} {}", format_exact(a), op, format_exact(b));
    let ambiguous = |reason: String| AgentError::AmbiguousSubstitution {
        expression: expression.to_string(),
        operation: operation.clone(),
        reason,
    };

    let bare = format!(
        r"{}\s*{}\s*{}",
        number_pattern(a),
        regex::escape(op.symbol()),
        number_pattern(b)
    );
    let parenthesized = format!(r"\(\s*{}\s*\)", bare);

    let bare_re = Regex::new(&bare).map_err(|e| ambiguous(e.to_string()))?;
    let parenthesized_re = Regex::new(&parenthesized).map_err(|e| ambiguous(e.to_string()))?;

    let mut candidates = find_matches(&parenthesized_re, expression, false);
    if candidates.is_empty() {
        candidates = find_matches(&bare_re, expression, true);
    }

    let Some(first) = candidates.first().cloned() else {
        if strict {
            return Err(ambiguous("operation not found in expression".to_string()));
        }
        warn!(
            expression,
            operation = operation.as_str(),
            "Operation not found in expression, leaving it unchanged"
        );
        return Ok(expression.to_string());
    };

    if strict && candidates.len() > 1 {
        return Err(ambiguous(format!(
            "operation occurs {} times",
            candidates.len()
        )));
    }

    let mut reduced = String::with_capacity(expression.len());
    reduced.push_str(&expression[..first.start]);
    reduced.push_str(&format_exact(result));
    reduced.push_str(&expression[first.end..]);

    Ok(strip_redundant_parentheses(reduced))
}
