//! Condition parsing and evaluation
//!
//! Accepted shapes:
//!
//! | Input          | Parsed as        |
//! |----------------|------------------|
//! | `== 50`        | `==` `50`        |
//! | `!on`          | `!=` `on`        |
//! | `on`           | `==` `on`        |
//! | `battery > 20` | attribute form   |
//!
//! Evaluation never raises: an unsupported comparison counts as no match.

use crate::comparison::{ComparisonOperator, ValueComparator};
use crate::error::{CalcError, Result};
use crate::value::Value;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

#[allow(clippy::disallowed_methods)]
static ATTRIBUTE_CONDITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*([=!<>]+)\s*(.*?)\s*$").expect("valid pattern")
});

/// Parsed state condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateCondition {
    pub operator: ComparisonOperator,
    pub raw_value: String,
}

/// Parsed attribute condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeCondition {
    pub attribute: String,
    pub operator: ComparisonOperator,
    pub raw_value: String,
}

impl AttributeCondition {
    pub fn as_state_condition(&self) -> StateCondition {
        StateCondition {
            operator: self.operator,
            raw_value: self.raw_value.clone(),
        }
    }
}

/// Strip one layer of matching quotes. Whitespace inside the quotes is kept.
fn unquote(text: &str) -> &str {
    let trimmed = text.trim();
    let bytes = trimmed.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'\'' || first == b'"') && first == last {
            return &trimmed[1..trimmed.len() - 1];
        }
    }
    trimmed
}

fn parse_operator_token(token: &str) -> Result<ComparisonOperator> {
    match token {
        "!" => Ok(ComparisonOperator::NotEqual),
        "=" => Err(CalcError::validation(
            "Invalid operator '=' in condition, use '=='",
        )),
        _ => ComparisonOperator::RELATIONAL
            .into_iter()
            .find(|op| op.symbol() == token)
            .ok_or_else(|| {
                CalcError::validation(format!("Invalid operator '{}' in condition", token))
            }),
    }
}

fn require_value(token: &str, rest: &str) -> Result<String> {
    let value = unquote(rest);
    if rest.trim().is_empty() {
        return Err(CalcError::validation(format!(
            "Operator '{}' requires a value",
            token
        )));
    }
    Ok(value.to_string())
}

/// Parse a state condition such as `== 50`, `!off` or `heat`.
pub fn parse_state_condition(text: &str) -> Result<StateCondition> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(CalcError::validation("Condition cannot be empty"));
    }

    let op_len = trimmed
        .find(|c: char| !matches!(c, '=' | '!' | '<' | '>'))
        .unwrap_or(trimmed.len());
    let (token, rest) = trimmed.split_at(op_len);

    if token.is_empty() {
        return Ok(StateCondition {
            operator: ComparisonOperator::Equal,
            raw_value: unquote(trimmed).to_string(),
        });
    }

    let operator = parse_operator_token(token)?;
    let raw_value = require_value(token, rest)?;
    Ok(StateCondition {
        operator,
        raw_value,
    })
}

/// Parse `<attribute> <op> <value>`.
///
/// Returns `Ok(None)` when the text is not in attribute form at all.
pub fn parse_attribute_condition(text: &str) -> Result<Option<AttributeCondition>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(CalcError::validation("Condition cannot be empty"));
    }

    let Some(caps) = ATTRIBUTE_CONDITION_RE.captures(trimmed) else {
        return Ok(None);
    };
    let (Some(attribute), Some(token), Some(rest)) = (caps.get(1), caps.get(2), caps.get(3)) else {
        return Ok(None);
    };

    let operator = parse_operator_token(token.as_str())?;
    if operator == ComparisonOperator::NotEqual && token.as_str() == "!" {
        // `!` shorthand is only valid in state conditions
        return Err(CalcError::validation(format!(
            "Invalid operator '!' in attribute condition '{}'",
            trimmed
        )));
    }
    let raw_value = require_value(token.as_str(), rest.as_str())?;

    Ok(Some(AttributeCondition {
        attribute: attribute.as_str().to_string(),
        operator,
        raw_value,
    }))
}

/// Evaluate a parsed condition against a candidate with the default comparator.
pub fn evaluate_condition(candidate: &Value, condition: &StateCondition) -> bool {
    evaluate_condition_with(&ValueComparator::default(), candidate, condition)
}

/// Evaluate a parsed condition with a specific comparator.
///
/// Comparison errors are logged and reported as no match.
pub fn evaluate_condition_with(
    comparator: &ValueComparator,
    candidate: &Value,
    condition: &StateCondition,
) -> bool {
    let expected = Value::String(condition.raw_value.clone());
    match comparator.compare_values(candidate, condition.operator, &expected) {
        Ok(matched) => matched,
        Err(e) => {
            debug!(
                candidate = %candidate,
                operator = %condition.operator,
                expected = %condition.raw_value,
                error = %e,
                "Condition comparison unsupported, treating as no match"
            );
            false
        },
    }
}
