//! CoreFormulaEvaluator - evaluation boundary with alternate-state handling
//!
//! Pipeline for one call:
//!
//! 1. screen variables referenced by the original formula text
//! 2. rewrite metadata-function calls (optional handler)
//! 3. evaluate against the flattened context
//! 4. normalize the result type
//! 5. screen the result
//!
//! Only two outcomes leave this module: a normalized [`Value`] or an
//! [`AlternateStateDetected`] signal.

use crate::alternate_state::{identify_alternate_state, AlternateState};
use crate::dependency_parser::extract_variable_references;
use crate::error::AlternateStateDetected;
use crate::expression::evaluate_expression;
use crate::metadata::MetadataFunctionHandler;
use crate::value::{EvaluationContext, Value};
use chrono::SecondsFormat;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Result of one evaluation
pub type EvaluationResult = std::result::Result<Value, AlternateStateDetected>;

/// Formula evaluator
///
/// # Example
/// ```ignore
/// use synthetic_calc::{CoreFormulaEvaluator, ContextEntry, EvaluationContext, Value};
///
/// let evaluator = CoreFormulaEvaluator::new();
/// let ctx = EvaluationContext::new()
///     .with("base", ContextEntry::reference("sensor.base", Value::Float(25.0)))
///     .with("k", Value::Float(2.0));
///
/// let result = evaluator.evaluate_formula("base * k", "base * k", &ctx)?;
/// assert_eq!(result, Value::Float(50.0));
/// ```
#[derive(Clone, Default)]
pub struct CoreFormulaEvaluator {
    /// Skip early input screening and let evaluation see raw alternate values
    allow_unresolved_states: bool,
    metadata_handler: Option<Arc<dyn MetadataFunctionHandler>>,
}

impl fmt::Debug for CoreFormulaEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreFormulaEvaluator")
            .field("allow_unresolved_states", &self.allow_unresolved_states)
            .field("metadata_handler", &self.metadata_handler.is_some())
            .finish()
    }
}

impl CoreFormulaEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unresolved_states(mut self, allow: bool) -> Self {
        self.allow_unresolved_states = allow;
        self
    }

    pub fn with_metadata_handler(mut self, handler: Arc<dyn MetadataFunctionHandler>) -> Self {
        self.metadata_handler = Some(handler);
        self
    }

    pub fn allows_unresolved_states(&self) -> bool {
        self.allow_unresolved_states
    }

    /// Evaluate `resolved_formula` against the context.
    ///
    /// `original_formula` decides which context entries are screened for
    /// alternate states; entries it does not mention are never inspected.
    pub fn evaluate_formula(
        &self,
        resolved_formula: &str,
        original_formula: &str,
        context: &EvaluationContext,
    ) -> EvaluationResult {
        if !self.allow_unresolved_states {
            self.detect_referenced_alternate_states(original_formula, context)?;
        }

        let (formula, extra) = match &self.metadata_handler {
            Some(handler) if handler.can_handle(resolved_formula) => handler
                .evaluate(resolved_formula, context)
                .map_err(|e| AlternateStateDetected::evaluation_failure(e.to_string()))?,
            _ => (resolved_formula.to_string(), Default::default()),
        };

        let mut variables = context.flattened();
        variables.extend(extra);

        // A formula that is exactly one context key is a direct reference
        let raw = match variables.get(formula.trim()) {
            Some(value) => value.clone(),
            None => evaluate_expression(&formula, &variables)
                .map_err(|e| AlternateStateDetected::evaluation_failure(e.to_string()))?,
        };

        let result = normalize_result(raw);
        screen_result(&result)?;
        Ok(result)
    }

    fn detect_referenced_alternate_states(
        &self,
        original_formula: &str,
        context: &EvaluationContext,
    ) -> std::result::Result<(), AlternateStateDetected> {
        for name in extract_variable_references(original_formula, context.names()) {
            let Some(value) = context.value(&name) else {
                continue;
            };
            if let Some(state) = identify_alternate_state(value) {
                if state.blocks_evaluation() {
                    debug!(
                        variable = %name,
                        state = %state,
                        "Referenced variable in alternate state, skipping evaluation"
                    );
                    return Err(AlternateStateDetected::input(state, &name));
                }
            }
        }
        Ok(())
    }
}

/// Normalize an evaluation result.
///
/// Durations become total seconds, timestamps become RFC 3339 text, dates
/// become `YYYY-MM-DD`, containers use their string form. Primitives keep
/// their exact type.
pub fn normalize_result(value: Value) -> Value {
    match value {
        Value::Duration(d) => Value::Float(d.as_secs_f64()),
        Value::DateTime(dt) => Value::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, false)),
        Value::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
        Value::List(_) | Value::Map(_) => Value::String(value.to_string()),
        primitive => primitive,
    }
}

/// Reject results that are themselves alternate states.
///
/// `unavailable` and `unknown` text (any case) and `null` raise; `none` text
/// is an ordinary string result.
fn screen_result(value: &Value) -> std::result::Result<(), AlternateStateDetected> {
    match (value, identify_alternate_state(value)) {
        (Value::Null, _) => Err(AlternateStateDetected::result(AlternateState::None)),
        (_, Some(state @ (AlternateState::Unavailable | AlternateState::Unknown))) => {
            debug!(state = %state, "Formula result is an alternate state");
            Err(AlternateStateDetected::result(state))
        },
        _ => Ok(()),
    }
}
