//! Collection queries - resolve, fetch and aggregate
//!
//! A collection call such as `sum("device_class:power")` is resolved to a set of
//! identifiers through the [`EntityRegistry`], their live values are fetched
//! through the [`LiveValueProvider`], and the aggregate replaces the call in
//! the formula text before expression evaluation.
//!
//! Resolution is lenient: unknown query types, invalid regular expressions and
//! malformed attribute conditions are logged and resolve to an empty set.

use crate::comparison::ValueComparator;
use crate::condition::{evaluate_condition_with, parse_attribute_condition};
use crate::dependency_parser::{
    is_entity_domain, locate_dynamic_queries, AggregationFunction, DynamicQuery, QueryType,
};
use crate::formula::VariableValue;
use crate::provider::{EntityMetadata, EntityRegistry, LiveValueProvider};
use crate::value::Value;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Handling of empty `|` components (`door||window`, `door|`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyPatternPolicy {
    /// Ignore empty components
    #[default]
    Skip,
    /// Resolve the whole query to an empty set
    Reject,
}

/// Aggregate values. Every function yields 0.0 for empty input.
///
/// `std` and `var` are population statistics.
pub fn aggregate(function: AggregationFunction, values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let sum: f64 = values.iter().sum();
    match function {
        AggregationFunction::Sum => sum,
        AggregationFunction::Avg => sum / n,
        AggregationFunction::Count => n,
        AggregationFunction::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        AggregationFunction::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        AggregationFunction::Std => population_variance(values, sum / n).sqrt(),
        AggregationFunction::Var => population_variance(values, sum / n),
    }
}

fn population_variance(values: &[f64], mean: f64) -> f64 {
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

/// Render an aggregate as an expression literal that always parses as a float
fn format_literal(value: f64) -> String {
    let value = if value.is_finite() { value } else { 0.0 };
    let mut text = format!("{}", value);
    if !text.contains(['.', 'e', 'E']) {
        text.push_str(".0");
    }
    if value < 0.0 {
        format!("({})", text)
    } else {
        text
    }
}

/// Resolves collection queries against a registry and a value provider
#[derive(Clone)]
pub struct CollectionResolver {
    registry: Arc<dyn EntityRegistry>,
    provider: Arc<dyn LiveValueProvider>,
    comparator: ValueComparator,
    empty_pattern_policy: EmptyPatternPolicy,
}

impl fmt::Debug for CollectionResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionResolver")
            .field("comparator", &self.comparator)
            .field("empty_pattern_policy", &self.empty_pattern_policy)
            .finish_non_exhaustive()
    }
}

impl CollectionResolver {
    pub fn new(registry: Arc<dyn EntityRegistry>, provider: Arc<dyn LiveValueProvider>) -> Self {
        Self {
            registry,
            provider,
            comparator: ValueComparator::default(),
            empty_pattern_policy: EmptyPatternPolicy::default(),
        }
    }

    pub fn with_comparator(mut self, comparator: ValueComparator) -> Self {
        self.comparator = comparator;
        self
    }

    pub fn with_empty_pattern_policy(mut self, policy: EmptyPatternPolicy) -> Self {
        self.empty_pattern_policy = policy;
        self
    }

    /// Resolve a query to the matching identifiers, in registry order
    pub fn resolve_collection(&self, query: &DynamicQuery) -> Vec<String> {
        self.resolve_collection_with(query, &HashMap::new())
    }

    /// Resolve a query whose pattern tokens may name variables
    pub fn resolve_collection_with(
        &self,
        query: &DynamicQuery,
        variables: &HashMap<String, VariableValue>,
    ) -> Vec<String> {
        let ids = match query.query_type {
            QueryType::Regex => self.resolve_regex(&query.pattern),
            QueryType::Attribute => self.resolve_attribute(&query.pattern),
            QueryType::DeviceClass | QueryType::Label | QueryType::Area | QueryType::Tags => {
                match self.pattern_tokens(&query.pattern, variables) {
                    Some(tokens) => self.resolve_metadata(query.query_type, &tokens),
                    None => Vec::new(),
                }
            },
        };
        debug!(
            query = %query,
            matched = ids.len(),
            "Collection resolved"
        );
        ids
    }

    /// Resolve a query given as raw text parts; unknown types resolve to nothing
    pub fn resolve_raw(&self, query_type: &str, pattern: &str, function: AggregationFunction) -> Vec<String> {
        match query_type.parse::<QueryType>() {
            Ok(query_type) => {
                self.resolve_collection(&DynamicQuery::new(query_type, pattern, function))
            },
            Err(_) => {
                warn!(query_type, pattern, "Unknown collection query type");
                Vec::new()
            },
        }
    }

    fn resolve_regex(&self, pattern: &str) -> Vec<String> {
        let re = match Regex::new(pattern) {
            Ok(re) => re,
            Err(e) => {
                warn!(pattern, error = %e, "Invalid collection regex");
                return Vec::new();
            },
        };
        self.registry
            .entity_ids()
            .into_iter()
            .filter(|id| re.is_match(id))
            .collect()
    }

    fn resolve_attribute(&self, pattern: &str) -> Vec<String> {
        let mut conditions = Vec::new();
        for part in pattern.split('|') {
            if part.trim().is_empty() {
                if self.empty_pattern_policy == EmptyPatternPolicy::Reject {
                    warn!(pattern, "Empty component in attribute pattern, query rejected");
                    return Vec::new();
                }
                continue;
            }
            match parse_attribute_condition(part) {
                Ok(Some(condition)) => conditions.push(condition),
                Ok(None) => {
                    warn!(pattern = part, "Attribute pattern is not a condition");
                    return Vec::new();
                },
                Err(e) => {
                    warn!(pattern = part, error = %e, "Invalid attribute condition");
                    return Vec::new();
                },
            }
        }

        self.registry
            .entity_ids()
            .into_iter()
            .filter(|id| {
                conditions.iter().any(|condition| {
                    self.provider
                        .get_attribute(id, &condition.attribute)
                        .is_some_and(|value| {
                            evaluate_condition_with(
                                &self.comparator,
                                &value,
                                &condition.as_state_condition(),
                            )
                        })
                })
            })
            .collect()
    }

    /// Split an OR pattern and resolve placeholder tokens.
    ///
    /// Returns `None` when the empty-component policy rejects the pattern.
    fn pattern_tokens(
        &self,
        pattern: &str,
        variables: &HashMap<String, VariableValue>,
    ) -> Option<Vec<String>> {
        let mut tokens = Vec::new();
        for part in pattern.split('|') {
            let part = part.trim();
            if part.is_empty() {
                match self.empty_pattern_policy {
                    EmptyPatternPolicy::Skip => {
                        debug!(pattern, "Skipping empty pattern component");
                        continue;
                    },
                    EmptyPatternPolicy::Reject => {
                        warn!(pattern, "Empty pattern component, query rejected");
                        return None;
                    },
                }
            }
            tokens.push(self.resolve_token(part, variables));
        }
        Some(tokens)
    }

    /// A token naming a variable or a live entity is replaced by its current value
    fn resolve_token(&self, token: &str, variables: &HashMap<String, VariableValue>) -> String {
        let live = |id: &str| {
            self.provider
                .get_value(id)
                .filter(|v| !v.is_null())
                .map(|v| v.to_string())
        };

        let resolved = match variables.get(token) {
            Some(VariableValue::Reference(id)) => live(id),
            Some(VariableValue::Literal(value)) => Some(value.to_string()),
            Some(VariableValue::Computed(_)) => None,
            None => match token.split_once('.') {
                Some((domain, _)) if is_entity_domain(domain) => live(token),
                _ => None,
            },
        };

        match resolved {
            Some(value) => {
                debug!(token, value = %value, "Pattern placeholder resolved");
                value
            },
            None => token.to_string(),
        }
    }

    fn resolve_metadata(&self, query_type: QueryType, tokens: &[String]) -> Vec<String> {
        if tokens.is_empty() {
            return Vec::new();
        }
        self.registry
            .entity_ids()
            .into_iter()
            .filter(|id| {
                self.registry
                    .metadata(id)
                    .is_some_and(|metadata| metadata_matches(&metadata, query_type, tokens))
            })
            .collect()
    }

    /// Numeric values of the given identifiers; anything non-numeric counts as 0.0
    pub fn get_entity_values(&self, ids: &[String]) -> Vec<f64> {
        let analyzer = self.comparator.reducer().analyzer();
        ids.iter()
            .map(|id| {
                let value = self.provider.get_value(id).unwrap_or(Value::Null);
                analyzer.to_numeric(&value).unwrap_or_else(|| {
                    debug!(id = %id, value = %value, "Non-numeric collection member, using 0.0");
                    0.0
                })
            })
            .collect()
    }

    /// Resolve, fetch and aggregate one query
    pub fn evaluate_query(
        &self,
        query: &DynamicQuery,
        variables: &HashMap<String, VariableValue>,
    ) -> f64 {
        let ids = self.resolve_collection_with(query, variables);
        let values = self.get_entity_values(&ids);
        aggregate(query.function, &values)
    }

    /// Replace every collection call in the formula with its aggregate literal.
    ///
    /// Calls are replaced positionally so repeated identical calls each get
    /// their own value.
    pub fn substitute_collections(
        &self,
        formula: &str,
        variables: &HashMap<String, VariableValue>,
    ) -> String {
        let located = locate_dynamic_queries(formula);
        if located.is_empty() {
            return formula.to_string();
        }

        let mut result = String::with_capacity(formula.len());
        let mut cursor = 0;
        for item in located {
            let value = match item.query() {
                Some(query) => self.evaluate_query(&query, variables),
                None => {
                    let ids = self.resolve_raw(&item.query_type, &item.pattern, item.function);
                    aggregate(item.function, &self.get_entity_values(&ids))
                },
            };
            result.push_str(&formula[cursor..item.span.start]);
            result.push_str(&format_literal(value));
            cursor = item.span.end;
        }
        result.push_str(&formula[cursor..]);
        result
    }
}

/// Metadata tokens match ignoring ASCII case
fn metadata_matches(metadata: &EntityMetadata, query_type: QueryType, tokens: &[String]) -> bool {
    let eq = |candidate: &str| tokens.iter().any(|t| t.eq_ignore_ascii_case(candidate));
    match query_type {
        QueryType::DeviceClass => metadata.device_class.as_deref().is_some_and(eq),
        QueryType::Area => metadata.area.as_deref().is_some_and(eq),
        QueryType::Label => metadata.labels.iter().any(|l| eq(l.as_str())),
        QueryType::Tags => metadata.tags.iter().any(|t| eq(t.as_str())),
        QueryType::Regex | QueryType::Attribute => false,
    }
}
