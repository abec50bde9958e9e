//! Delegated expression evaluation on top of evalexpr
//!
//! Provides:
//! - Arithmetic: +, -, *, /, ^, %
//! - Comparison: <, >, <=, >=, ==, !=
//! - Logic: &&, ||, !
//! - Built-in functions: scale, clamp, abs, min, max, round, sign, minutes, hours, days

use crate::builtin_functions;
use crate::error::{CalcError, Result};
use crate::value::Value;
use evalexpr::{
    ContextWithMutableFunctions, ContextWithMutableVariables, EvalexprError, Function,
    HashMapContext, Value as ExprValue,
};
use std::collections::HashMap;

/// Convert an engine value into an evalexpr value
pub fn to_expr_value(value: &Value) -> ExprValue {
    match value {
        Value::Null => ExprValue::Empty,
        Value::Bool(b) => ExprValue::Boolean(*b),
        Value::Int(i) => ExprValue::Int(*i),
        Value::Float(f) => ExprValue::Float(*f),
        Value::String(s) => ExprValue::String(s.clone()),
        Value::List(items) => ExprValue::Tuple(items.iter().map(to_expr_value).collect()),
        Value::Duration(d) => ExprValue::Float(d.as_secs_f64()),
        Value::Map(_) | Value::DateTime(_) | Value::Date(_) => ExprValue::String(value.to_string()),
    }
}

/// Convert an evalexpr result back into an engine value
pub fn from_expr_value(value: ExprValue) -> Value {
    match value {
        ExprValue::Empty => Value::Null,
        ExprValue::Boolean(b) => Value::Bool(b),
        ExprValue::Int(i) => Value::Int(i),
        ExprValue::Float(f) => Value::Float(f),
        ExprValue::String(s) => Value::String(s),
        ExprValue::Tuple(items) => Value::List(items.into_iter().map(from_expr_value).collect()),
    }
}

/// Evaluate an expression against plain variable values
pub fn evaluate_expression(formula: &str, variables: &HashMap<String, Value>) -> Result<Value> {
    let mut context = HashMapContext::new();

    for (name, value) in variables {
        context
            .set_value(name.to_string(), to_expr_value(value))
            .map_err(|e| CalcError::expression(format!("Failed to set variable {}: {}", name, e)))?;
    }

    register_builtin_functions(&mut context)?;

    let result = evalexpr::eval_with_context(formula, &context).map_err(|e| {
        CalcError::expression(format!("Failed to evaluate '{}': {}", formula, e))
    })?;

    Ok(from_expr_value(result))
}

// Helper to convert Value to f64 (handles both Int and Float)
fn to_f64(value: &ExprValue) -> std::result::Result<f64, EvalexprError> {
    match value {
        ExprValue::Float(f) => Ok(*f),
        ExprValue::Int(i) => Ok(*i as f64),
        _ => Err(EvalexprError::expected_number(value.clone())),
    }
}

/// Arguments as numbers: a single value or a tuple of values
fn numeric_args(args: &ExprValue) -> std::result::Result<Vec<f64>, EvalexprError> {
    match args {
        ExprValue::Tuple(items) => items.iter().map(to_f64).collect(),
        single => Ok(vec![to_f64(single)?]),
    }
}

fn register(context: &mut HashMapContext, name: &str, function: Function) -> Result<()> {
    context
        .set_function(name.to_string(), function)
        .map_err(|e| CalcError::expression(format!("Failed to register {}: {}", name, e)))
}

/// Register built-in functions with an evalexpr context
pub fn register_builtin_functions(context: &mut HashMapContext) -> Result<()> {
    // scale(value, factor)
    register(
        context,
        "scale",
        Function::new(|args| {
            let tuple = args.as_fixed_len_tuple(2)?;
            Ok(ExprValue::Float(builtin_functions::scale(
                to_f64(&tuple[0])?,
                to_f64(&tuple[1])?,
            )))
        }),
    )?;

    // clamp(value, min, max)
    register(
        context,
        "clamp",
        Function::new(|args| {
            let tuple = args.as_fixed_len_tuple(3)?;
            Ok(ExprValue::Float(builtin_functions::clamp(
                to_f64(&tuple[0])?,
                to_f64(&tuple[1])?,
                to_f64(&tuple[2])?,
            )))
        }),
    )?;

    // abs(value)
    register(
        context,
        "abs",
        Function::new(|args| Ok(ExprValue::Float(builtin_functions::abs(to_f64(args)?)))),
    )?;

    // min(a, b, ...)
    register(
        context,
        "min",
        Function::new(|args| {
            builtin_functions::min(&numeric_args(args)?)
                .map(ExprValue::Float)
                .ok_or_else(|| EvalexprError::CustomMessage("min() needs arguments".to_string()))
        }),
    )?;

    // max(a, b, ...)
    register(
        context,
        "max",
        Function::new(|args| {
            builtin_functions::max(&numeric_args(args)?)
                .map(ExprValue::Float)
                .ok_or_else(|| EvalexprError::CustomMessage("max() needs arguments".to_string()))
        }),
    )?;

    // round(value) or round(value, decimals)
    register(
        context,
        "round",
        Function::new(|args| match args {
            ExprValue::Tuple(_) => {
                let tuple = args.as_fixed_len_tuple(2)?;
                let value = to_f64(&tuple[0])?;
                let decimals = tuple[1].as_int()? as i32;
                Ok(ExprValue::Float(builtin_functions::round(value, decimals)))
            },
            single => Ok(ExprValue::Float(builtin_functions::round(to_f64(single)?, 0))),
        }),
    )?;

    // sign(value)
    register(
        context,
        "sign",
        Function::new(|args| Ok(ExprValue::Float(builtin_functions::sign(to_f64(args)?)))),
    )?;

    // minutes(n), hours(n), days(n) -> seconds
    register(
        context,
        "minutes",
        Function::new(|args| Ok(ExprValue::Float(builtin_functions::minutes(to_f64(args)?)))),
    )?;
    register(
        context,
        "hours",
        Function::new(|args| Ok(ExprValue::Float(builtin_functions::hours(to_f64(args)?)))),
    )?;
    register(
        context,
        "days",
        Function::new(|args| Ok(ExprValue::Float(builtin_functions::days(to_f64(args)?)))),
    )?;

    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
#[allow(clippy::approx_constant)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_basic_arithmetic() {
        let v = vars(&[("a", Value::Float(10.0)), ("b", Value::Float(5.0))]);
        assert_eq!(evaluate_expression("a + b", &v).unwrap(), Value::Float(15.0));
        assert_eq!(evaluate_expression("a * b", &v).unwrap(), Value::Float(50.0));
        assert_eq!(evaluate_expression("a / b", &v).unwrap(), Value::Float(2.0));
    }

    #[test]
    fn test_integer_result_stays_integer() {
        let v = vars(&[("a", Value::Int(2))]);
        assert_eq!(evaluate_expression("a + 3", &v).unwrap(), Value::Int(5));
    }

    #[test]
    fn test_operator_precedence() {
        let v = HashMap::new();
        assert_eq!(evaluate_expression("2 + 3 * 4", &v).unwrap(), Value::Int(14));
        assert_eq!(evaluate_expression("(2 + 3) * 4", &v).unwrap(), Value::Int(20));
    }

    #[test]
    fn test_dotted_identifier() {
        let v = vars(&[("sensor.temp", Value::Float(21.5))]);
        assert_eq!(
            evaluate_expression("sensor.temp + 1.0", &v).unwrap(),
            Value::Float(22.5)
        );
    }

    #[test]
    fn test_builtins() {
        let v = HashMap::new();
        assert_eq!(evaluate_expression("scale(100, 0.5)", &v).unwrap(), Value::Float(50.0));
        assert_eq!(evaluate_expression("clamp(150, 0, 100)", &v).unwrap(), Value::Float(100.0));
        assert_eq!(evaluate_expression("abs(-5)", &v).unwrap(), Value::Float(5.0));
        assert_eq!(evaluate_expression("min(10, 5, 7)", &v).unwrap(), Value::Float(5.0));
        assert_eq!(evaluate_expression("max(10, 5)", &v).unwrap(), Value::Float(10.0));
        assert_eq!(evaluate_expression("round(3.14159, 2)", &v).unwrap(), Value::Float(3.14));
        assert_eq!(evaluate_expression("round(2.6)", &v).unwrap(), Value::Float(3.0));
        assert_eq!(evaluate_expression("sign(-10)", &v).unwrap(), Value::Float(-1.0));
        assert_eq!(
            evaluate_expression("hours(2) + minutes(30)", &v).unwrap(),
            Value::Float(9000.0)
        );
    }

    #[test]
    fn test_string_and_bool_values() {
        let v = vars(&[("mode", Value::from("heat")), ("on", Value::Bool(true))]);
        assert_eq!(
            evaluate_expression("mode == \"heat\" && on", &v).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_arithmetic_on_text_fails() {
        let v = vars(&[("x", Value::from("unavailable"))]);
        assert!(matches!(
            evaluate_expression("x * 2", &v),
            Err(CalcError::Expression(_))
        ));
    }
}
