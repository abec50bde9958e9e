//! FormulaEngine - evaluate one formula definition end to end
//!
//! 1. replace collection calls with their aggregates
//! 2. resolve simple and computed variables into the context
//! 3. fetch entity ids and attribute references the formula names directly
//! 4. run the core evaluator
//!
//! With the cache enabled, [`FormulaEngine::evaluate_cached`] reuses outcomes
//! for the same formula and live-value snapshot.

use crate::cache::{CacheKey, CacheStats, EvaluationCache};
use crate::collection::CollectionResolver;
use crate::comparison::ValueComparator;
use crate::config::EngineConfig;
use crate::dependency_parser::parse_formula_dependencies;
use crate::error::{CalcError, Result};
use crate::evaluator::{CoreFormulaEvaluator, EvaluationResult};
use crate::formula::{Formula, VariableValue};
use crate::metadata::{EntityMetadataHandler, MetadataFunctionHandler};
use crate::provider::{EntityRegistry, LiveValueProvider, MemoryEntityStore};
use crate::resolver::{
    bind_attribute_references, ComputedVariableResolver, ProviderVariableResolver,
    SimpleVariableResolver,
};
use crate::type_analyzer::TypeAnalyzer;
use crate::value::{EvaluationContext, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Formula engine
///
/// # Example
/// ```ignore
/// use synthetic_calc::{EngineConfig, Formula, FormulaEngine, MemoryEntityStore, VariableValue};
/// use std::sync::Arc;
///
/// let store = Arc::new(MemoryEntityStore::new());
/// store.set_state("sensor.base", 25.0);
///
/// let engine = FormulaEngine::from_store(EngineConfig::default(), store)?;
/// let formula = Formula::new("doubled", "base * 2")
///     .with_variable("base", VariableValue::reference("sensor.base"));
///
/// let value = engine.evaluate(&formula, Default::default())?;
/// ```
pub struct FormulaEngine {
    config: EngineConfig,
    collections: CollectionResolver,
    evaluator: Arc<CoreFormulaEvaluator>,
    resolver: ComputedVariableResolver,
    simple: ProviderVariableResolver,
    cache: Option<EvaluationCache>,
}

impl FormulaEngine {
    pub fn new(
        config: EngineConfig,
        registry: Arc<dyn EntityRegistry>,
        provider: Arc<dyn LiveValueProvider>,
    ) -> Result<Self> {
        config.validate()?;

        let evaluator = Arc::new(
            CoreFormulaEvaluator::new().with_unresolved_states(config.allow_unresolved_states),
        );
        let collections = CollectionResolver::new(registry, provider.clone())
            .with_empty_pattern_policy(config.empty_pattern_policy);
        let cache = config
            .cache_enabled
            .then(|| EvaluationCache::new(config.cache_capacity));

        Ok(Self {
            resolver: ComputedVariableResolver::new(evaluator.clone(), config.max_resolution_passes),
            simple: ProviderVariableResolver::new(provider),
            evaluator,
            collections,
            cache,
            config,
        })
    }

    /// Engine over an in-memory store, with `metadata()` support
    pub fn from_store(config: EngineConfig, store: Arc<MemoryEntityStore>) -> Result<Self> {
        let engine = Self::new(config, store.clone(), store.clone())?;
        Ok(engine.with_metadata_handler(Arc::new(EntityMetadataHandler::new(store))))
    }

    pub fn with_metadata_handler(mut self, handler: Arc<dyn MetadataFunctionHandler>) -> Self {
        let evaluator = Arc::new(
            CoreFormulaEvaluator::new()
                .with_unresolved_states(self.config.allow_unresolved_states)
                .with_metadata_handler(handler),
        );
        self.resolver = ComputedVariableResolver::new(evaluator.clone(), self.config.max_resolution_passes);
        self.evaluator = evaluator;
        self
    }

    /// Use a type analyzer with user type plugins for collection conditions
    pub fn with_type_analyzer(mut self, analyzer: TypeAnalyzer) -> Self {
        self.collections = self
            .collections
            .with_comparator(ValueComparator::new(analyzer));
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &CoreFormulaEvaluator {
        &self.evaluator
    }

    pub fn collections(&self) -> &CollectionResolver {
        &self.collections
    }

    /// Evaluate a formula, seeding the context with caller values.
    ///
    /// An alternate-state outcome is returned as [`CalcError::AlternateState`].
    pub fn evaluate(&self, formula: &Formula, seed: EvaluationContext) -> Result<Value> {
        self.evaluate_outcome(formula, seed)?
            .map_err(CalcError::from)
    }

    /// Evaluate with the result cache, keyed by `snapshot`.
    ///
    /// Falls back to [`FormulaEngine::evaluate`] when the cache is disabled.
    pub fn evaluate_cached(&self, formula: &Formula, snapshot: u64) -> Result<Value> {
        let Some(cache) = &self.cache else {
            return self.evaluate(formula, EvaluationContext::new());
        };
        let key = CacheKey::for_formula(formula, snapshot);
        cache
            .get_or_compute(&key, || self.evaluate_outcome(formula, EvaluationContext::new()))?
            .map_err(CalcError::from)
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(EvaluationCache::stats)
    }

    fn evaluate_outcome(&self, formula: &Formula, seed: EvaluationContext) -> Result<EvaluationResult> {
        formula.validate()?;

        let prepared = self.substitute_collections(formula);
        let mut context = seed;
        self.resolver
            .resolve_config_variables(&mut context, &prepared, &self.simple)?;
        self.resolve_direct_references(&prepared.formula, &mut context)?;

        debug!(
            formula_id = %formula.id,
            formula = %prepared.formula,
            variables = context.len(),
            "Evaluating formula"
        );
        Ok(self
            .evaluator
            .evaluate_formula(&prepared.formula, &formula.formula, &context))
    }

    /// Copy of the formula with collection calls replaced, including inside
    /// computed variables
    fn substitute_collections(&self, formula: &Formula) -> Formula {
        let mut prepared = formula.clone();
        prepared.formula = self
            .collections
            .substitute_collections(&formula.formula, &formula.variables);
        for value in prepared.variables.values_mut() {
            if let VariableValue::Computed(computed) = value {
                computed.formula = self
                    .collections
                    .substitute_collections(&computed.formula, &formula.variables);
            }
        }
        prepared
    }

    /// Bring entity ids and `name.attribute` reads used directly in the formula
    /// text into the context
    fn resolve_direct_references(&self, formula: &str, context: &mut EvaluationContext) -> Result<()> {
        let parsed = parse_formula_dependencies(formula, &HashMap::new());

        for dep in &parsed.static_dependencies {
            if context.contains(dep) || !dep.contains('.') {
                continue;
            }
            let entry = self
                .simple
                .resolve(dep, &VariableValue::reference(dep.clone()))?;
            context.insert(dep.clone(), entry);
        }

        bind_attribute_references(context, &parsed.dot_notation_refs, &self.simple);
        Ok(())
    }
}
