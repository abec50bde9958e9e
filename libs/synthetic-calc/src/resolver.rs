//! Variable resolution
//!
//! Simple variables (literals and external references) are resolved first
//! through a [`SimpleVariableResolver`]. Computed variables are then resolved
//! by iterative fixpoint: each pass evaluates every computed variable whose
//! dependencies are already in the context. A pass without progress means the
//! remaining variables are circular or depend on something that never
//! resolves.

use crate::dependency_parser::{is_entity_domain, parse_formula_dependencies};
use crate::error::{CalcError, Result};
use crate::evaluator::CoreFormulaEvaluator;
use crate::formula::{ComputedVariable, Formula, VariableValue};
use crate::provider::LiveValueProvider;
use crate::value::{ContextEntry, EvaluationContext, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Default ceiling on fixpoint passes
pub const DEFAULT_MAX_RESOLUTION_PASSES: usize = 100;

/// Per-variable resolution state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableState {
    Unresolved,
    Resolving,
    Resolved,
    Failed,
}

/// Resolves literal and external-reference variables
pub trait SimpleVariableResolver {
    fn resolve(&self, name: &str, value: &VariableValue) -> Result<ContextEntry>;

    /// Attribute of an external reference, if this resolver can read one
    fn resolve_attribute(&self, _id: &str, _attribute: &str) -> Option<Value> {
        None
    }
}

impl<F> SimpleVariableResolver for F
where
    F: Fn(&str, &VariableValue) -> Result<ContextEntry>,
{
    fn resolve(&self, name: &str, value: &VariableValue) -> Result<ContextEntry> {
        self(name, value)
    }
}

/// Simple resolver backed by a [`LiveValueProvider`]
///
/// Numeric state text is read as a number; anything else, including
/// alternate-state sentinels, stays text. `sensor.x.attr` falls back to the
/// `attr` attribute of `sensor.x`.
pub struct ProviderVariableResolver {
    provider: Arc<dyn LiveValueProvider>,
}

impl ProviderVariableResolver {
    pub fn new(provider: Arc<dyn LiveValueProvider>) -> Self {
        Self { provider }
    }

    fn lookup(&self, id: &str) -> Option<Value> {
        if let Some(value) = self.provider.get_value(id) {
            return Some(value);
        }
        let mut segments = id.splitn(3, '.');
        match (segments.next(), segments.next(), segments.next()) {
            (Some(domain), Some(object_id), Some(attribute)) if is_entity_domain(domain) => self
                .provider
                .get_attribute(&format!("{}.{}", domain, object_id), attribute),
            _ => None,
        }
    }
}

impl SimpleVariableResolver for ProviderVariableResolver {
    fn resolve(&self, name: &str, value: &VariableValue) -> Result<ContextEntry> {
        match value {
            VariableValue::Literal(v) => Ok(ContextEntry::Raw(v.clone())),
            VariableValue::Reference(id) => {
                let value = self
                    .lookup(id)
                    .ok_or_else(|| CalcError::missing_dependency(id.clone()))?;
                let value = match value {
                    Value::String(s) => Value::from_state(&s),
                    other => other,
                };
                Ok(ContextEntry::reference(id.clone(), value))
            },
            VariableValue::Computed(_) => Err(CalcError::validation(format!(
                "Variable '{}' is computed and cannot be resolved directly",
                name
            ))),
        }
    }

    fn resolve_attribute(&self, id: &str, attribute: &str) -> Option<Value> {
        self.provider.get_attribute(id, attribute)
    }
}

/// Bind `name.attribute` reads into the context.
///
/// When `name` is a context entry with a reference identity, the attribute is
/// read from that identity. Otherwise the whole reference is resolved as an
/// external id (`sensor.phone.battery`). Reads that resolve to nothing are left
/// unbound.
pub fn bind_attribute_references<'a, I>(
    context: &mut EvaluationContext,
    references: I,
    resolve_simple: &dyn SimpleVariableResolver,
) where
    I: IntoIterator<Item = &'a String>,
{
    for reference in references {
        if context.contains(reference) {
            continue;
        }
        let Some((owner, attribute)) = reference.split_once('.') else {
            continue;
        };
        let value = match context.get(owner).and_then(|entry| entry.reference_id()) {
            Some(id) => resolve_simple.resolve_attribute(id, attribute),
            None => resolve_simple
                .resolve(reference, &VariableValue::reference(reference.clone()))
                .ok()
                .map(|entry| entry.value().clone()),
        };
        match value {
            Some(value) => {
                context.insert(reference.clone(), value);
            },
            None => debug!(reference = %reference, "Attribute reference not available"),
        }
    }
}

/// Resolves a formula's variable map into an evaluation context
#[derive(Clone)]
pub struct ComputedVariableResolver {
    evaluator: Arc<CoreFormulaEvaluator>,
    max_passes: usize,
}

impl fmt::Debug for ComputedVariableResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedVariableResolver")
            .field("evaluator", &self.evaluator)
            .field("max_passes", &self.max_passes)
            .finish()
    }
}

impl ComputedVariableResolver {
    pub fn new(evaluator: Arc<CoreFormulaEvaluator>, max_passes: usize) -> Self {
        Self {
            evaluator,
            max_passes,
        }
    }

    pub fn max_passes(&self) -> usize {
        self.max_passes
    }

    /// Resolve every variable of `formula` into `context`.
    ///
    /// Entries already in the context are kept as they are. Fails with
    /// [`CalcError::UnresolvedVariables`] when a pass makes no progress and
    /// with [`CalcError::PassLimitExceeded`] if the pass ceiling is reached.
    pub fn resolve_config_variables(
        &self,
        context: &mut EvaluationContext,
        formula: &Formula,
        resolve_simple: &dyn SimpleVariableResolver,
    ) -> Result<()> {
        let mut simple: Vec<_> = formula.simple_variables().collect();
        simple.sort_by_key(|(name, _)| *name);
        for (name, value) in simple {
            if context.contains(name) {
                continue;
            }
            let entry = resolve_simple.resolve(name, value)?;
            context.insert(name, entry);
        }

        let computed: BTreeMap<&str, &ComputedVariable> = formula.computed_variables().collect();
        let mut states: BTreeMap<&str, VariableState> = computed
            .keys()
            .map(|name| {
                let state = if context.contains(name) {
                    VariableState::Resolved
                } else {
                    VariableState::Unresolved
                };
                (*name, state)
            })
            .collect();

        for pass in 1..=self.max_passes {
            let pending = pending_names(&states);
            if pending.is_empty() {
                return Ok(());
            }

            let mut progressed = 0;
            for name in pending {
                let Some(variable) = computed.get(name).copied() else {
                    continue;
                };
                if !self.dependencies_ready(context, formula, variable, resolve_simple) {
                    continue;
                }

                states.insert(name, VariableState::Resolving);
                match self
                    .evaluator
                    .evaluate_formula(&variable.formula, &variable.formula, context)
                {
                    Ok(value) => {
                        context.insert(name, value);
                    },
                    Err(signal) if !signal.is_evaluation_failure() => {
                        debug!(
                            variable = name,
                            state = %signal.state,
                            "Computed variable resolved to alternate state"
                        );
                        context.insert(name, signal.state.sentinel_value());
                    },
                    Err(signal) => {
                        states.insert(name, VariableState::Failed);
                        return Err(CalcError::ComputedVariable {
                            name: name.to_string(),
                            message: signal.message,
                        });
                    },
                }
                states.insert(name, VariableState::Resolved);
                progressed += 1;
            }

            let remaining = pending_names(&states);
            debug!(pass, progressed, remaining = remaining.len(), "Computed variable pass");

            if progressed == 0 {
                return Err(CalcError::UnresolvedVariables {
                    remaining: remaining.into_iter().map(String::from).collect(),
                });
            }
        }

        let remaining = pending_names(&states);
        if remaining.is_empty() {
            Ok(())
        } else {
            Err(CalcError::PassLimitExceeded {
                passes: self.max_passes,
                remaining: remaining.into_iter().map(String::from).collect(),
            })
        }
    }

    /// Whether every free identifier of the variable's formula is in context.
    ///
    /// Entity ids that are not variables are fetched on demand. Once ready,
    /// the formula's `name.attribute` reads are bound as well.
    fn dependencies_ready(
        &self,
        context: &mut EvaluationContext,
        formula: &Formula,
        variable: &ComputedVariable,
        resolve_simple: &dyn SimpleVariableResolver,
    ) -> bool {
        let parsed = parse_formula_dependencies(&variable.formula, &HashMap::new());
        let mut dependencies: BTreeSet<String> = parsed.static_dependencies;
        dependencies.extend(variable.dependencies.iter().cloned());

        let ready = dependencies.iter().all(|dep| {
            if context.contains(dep) {
                return true;
            }
            if formula.variables.contains_key(dep) || !dep.contains('.') {
                return false;
            }
            match resolve_simple.resolve(dep, &VariableValue::reference(dep.clone())) {
                Ok(entry) => {
                    context.insert(dep.clone(), entry);
                    true
                },
                Err(e) => {
                    debug!(dependency = %dep, error = %e, "Dependency not available yet");
                    false
                },
            }
        });

        if ready {
            bind_attribute_references(context, &parsed.dot_notation_refs, resolve_simple);
        }
        ready
    }
}

fn pending_names<'a>(states: &BTreeMap<&'a str, VariableState>) -> Vec<&'a str> {
    states
        .iter()
        .filter(|(_, state)| **state == VariableState::Unresolved)
        .map(|(name, _)| *name)
        .collect()
}
