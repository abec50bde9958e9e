//! Metadata functions - read properties of an identifier instead of its value
//!
//! `metadata(power, 'last_changed')` is rewritten to a placeholder identifier
//! before expression evaluation; the placeholder is bound to the property value
//! in an extra context entry.

use crate::error::{CalcError, Result};
use crate::provider::MetadataProvider;
use crate::value::{EvaluationContext, Value};
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::debug;

#[allow(clippy::disallowed_methods)]
static METADATA_CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bmetadata\s*\(\s*([A-Za-z_][A-Za-z0-9_.]*)\s*,\s*(?:'([^']+)'|"([^"]+)")\s*\)"#)
        .expect("valid pattern")
});

/// Prefix of placeholder identifiers introduced by rewriting
pub const METADATA_PLACEHOLDER_PREFIX: &str = "_metadata_";

/// Pluggable rewrite of metadata-function calls
pub trait MetadataFunctionHandler: Send + Sync {
    /// Whether the formula contains a call this handler rewrites
    fn can_handle(&self, formula: &str) -> bool;

    /// Rewrite the formula, returning the new text and extra context values
    fn evaluate(
        &self,
        formula: &str,
        context: &EvaluationContext,
    ) -> Result<(String, HashMap<String, Value>)>;
}

/// Handles `metadata(<name or entity>, '<key>')` through a [`MetadataProvider`]
pub struct EntityMetadataHandler {
    provider: Arc<dyn MetadataProvider>,
}

impl EntityMetadataHandler {
    pub fn new(provider: Arc<dyn MetadataProvider>) -> Self {
        Self { provider }
    }

    /// Identifier whose metadata is read.
    ///
    /// A context entry with a reference identity resolves to that identity; a
    /// plain string entry is taken as an identifier; anything else names an
    /// identifier directly.
    fn target_id(&self, argument: &str, context: &EvaluationContext) -> Result<String> {
        match context.get(argument) {
            Some(entry) => match (entry.reference_id(), entry.value()) {
                (Some(id), _) => Ok(id.to_string()),
                (None, Value::String(id)) => Ok(id.clone()),
                (None, other) => Err(CalcError::expression(format!(
                    "metadata(): '{}' has no identifier (value {})",
                    argument, other
                ))),
            },
            None => Ok(argument.to_string()),
        }
    }
}

impl MetadataFunctionHandler for EntityMetadataHandler {
    fn can_handle(&self, formula: &str) -> bool {
        METADATA_CALL_RE.is_match(formula)
    }

    fn evaluate(
        &self,
        formula: &str,
        context: &EvaluationContext,
    ) -> Result<(String, HashMap<String, Value>)> {
        let mut rewritten = String::with_capacity(formula.len());
        let mut extra = HashMap::new();
        let mut cursor = 0;

        for (index, caps) in METADATA_CALL_RE.captures_iter(formula).enumerate() {
            let whole = caps
                .get(0)
                .ok_or_else(|| CalcError::expression("Regex capture group 0 missing"))?;
            let argument = caps
                .get(1)
                .ok_or_else(|| CalcError::expression("metadata: missing target"))?
                .as_str();
            let key = caps
                .get(2)
                .or_else(|| caps.get(3))
                .ok_or_else(|| CalcError::expression("metadata: missing key"))?
                .as_str();

            let id = self.target_id(argument, context)?;
            let value = self.provider.metadata_value(&id, key).ok_or_else(|| {
                CalcError::expression(format!("metadata '{}' not available for '{}'", key, id))
            })?;

            let placeholder = format!("{}{}", METADATA_PLACEHOLDER_PREFIX, index);
            debug!(id = %id, key, placeholder = %placeholder, "Metadata call rewritten");

            rewritten.push_str(&formula[cursor..whole.start()]);
            rewritten.push_str(&placeholder);
            cursor = whole.end();
            extra.insert(placeholder, value);
        }
        rewritten.push_str(&formula[cursor..]);

        Ok((rewritten, extra))
    }
}
