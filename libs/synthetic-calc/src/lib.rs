//! synthetic-calc - Synthetic value engine
//!
//! Evaluates user formulas over live entity values: dependency extraction,
//! computed variables resolved to a fixpoint, collection aggregates,
//! type-aware comparisons and alternate-state (`unavailable` / `unknown` /
//! `none`) handling.
//!
//! # Example
//!
//! ```rust
//! use synthetic_calc::{EngineConfig, EvaluationContext, Formula, FormulaEngine, MemoryEntityStore, Value, VariableValue};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryEntityStore::new());
//! store.set_state("sensor.base", 25.0);
//!
//! let engine = FormulaEngine::from_store(EngineConfig::default(), store).unwrap();
//! let formula = Formula::new("total", "adjusted + 100")
//!     .with_variable("base", VariableValue::reference("sensor.base"))
//!     .with_variable("adjusted", VariableValue::computed("base * 2").unwrap());
//!
//! let value = engine.evaluate(&formula, EvaluationContext::new()).unwrap();
//! assert_eq!(value, Value::Float(150.0));
//! ```
//!
//! # Collection Functions
//!
//! | Function | Example | Aggregate |
//! |----------|---------|-----------|
//! | `sum` | `sum("device_class:power")` | Sum of matching values |
//! | `avg` | `avg("area:kitchen")` | Arithmetic mean |
//! | `count` | `count("device_class:door\|window")` | Number of matches |
//! | `min` / `max` | `max("regex:sensor\\.temp_.*")` | Extremes |
//! | `std` / `var` | `std("label:critical")` | Population deviation / variance |
//!
//! Query types: `regex`, `device_class`, `area`, `label`, `tags`, `attribute`.
//!
//! # Built-in Functions
//!
//! | Function | Signature | Description |
//! |----------|-----------|-------------|
//! | `scale` | `scale(value, factor)` | Multiply by factor |
//! | `clamp` | `clamp(value, min, max)` | Limit to range |
//! | `abs` | `abs(value)` | Absolute value |
//! | `min` / `max` | `min(a, b, ...)` | Extremes of the arguments |
//! | `round` | `round(value)` or `round(value, decimals)` | Round to decimals |
//! | `sign` | `sign(value)` | Sign: -1, 0, or 1 |
//! | `minutes` / `hours` / `days` | `hours(2)` | Duration in seconds |
//! | `metadata` | `metadata(var, 'area')` | Entity metadata lookup |

pub mod alternate_state;
pub mod builtin_functions;
pub mod cache;
pub mod collection;
pub mod comparison;
pub mod condition;
pub mod config;
pub mod dependency_parser;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod expression;
pub mod formula;
pub mod metadata;
pub mod provider;
pub mod resolver;
pub mod type_analyzer;
pub mod type_reducer;
pub mod value;

// Re-exports for convenience
pub use alternate_state::{identify_alternate_state, AlternateState};
pub use cache::{CacheKey, CacheStats, EvaluationCache};
pub use collection::{CollectionResolver, EmptyPatternPolicy};
pub use comparison::{compare_values, ComparisonHandler, ComparisonOperator, ValueComparator};
pub use condition::{evaluate_condition, parse_attribute_condition, parse_state_condition};
pub use config::EngineConfig;
pub use dependency_parser::{parse_formula_dependencies, DynamicQuery, ParsedFormulaDependencies};
pub use engine::FormulaEngine;
pub use error::{AlternateStateDetected, CalcError, Result};
pub use evaluator::{CoreFormulaEvaluator, EvaluationResult};
pub use formula::{ComputedVariable, Formula, VariableValue};
pub use metadata::{EntityMetadataHandler, MetadataFunctionHandler};
pub use provider::{EntityMetadata, EntityRegistry, LiveValueProvider, MemoryEntityStore, MetadataProvider};
pub use resolver::{ComputedVariableResolver, ProviderVariableResolver, SimpleVariableResolver};
pub use type_analyzer::{TypeAnalyzer, TypeCategory, UserTypePlugin, Version};
pub use type_reducer::{ReducedValue, TypeReducer};
pub use value::{ContextEntry, EvaluationContext, Value};
