//! Dependency extraction from formula text
//!
//! A formula is split into three kinds of dependency:
//!
//! - static dependencies: plain identifiers and entity ids (`temp`, `sensor.power`)
//! - dot-notation references: attribute reads (`battery.level`, `sensor.phone.battery`)
//! - dynamic queries: collection calls such as `sum("device_class:power")`
//!
//! Parsing is lenient. Any input string is accepted; at worst nothing is
//! extracted.

use crate::error::CalcError;
use crate::formula::VariableValue;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::LazyLock;

/// Any lowercase word is captured as a query type so unknown types still
/// reach collection resolution
const QUERY_TYPE_PATTERN: &str = "[a-z_]+";

#[allow(clippy::disallowed_methods)]
static COLLECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(
        r#"\b(sum|avg|count|min|max|std|var)\s*\(\s*(?:"({types}):([^"]*)"|'({types}):([^']*)'|({types}):([^\s()"',]+))\s*\)"#,
        types = QUERY_TYPE_PATTERN
    );
    Regex::new(&pattern).expect("valid pattern")
});

#[allow(clippy::disallowed_methods)]
static QUOTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""[^"]*"|'[^']*'"#).expect("valid pattern"));

/// A bare word directly followed by a bracket group is a literal, not an index
#[allow(clippy::disallowed_methods)]
static SUBSCRIPT_LITERAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]*\s*\[[^\]]*\]").expect("valid pattern")
});

#[allow(clippy::disallowed_methods)]
static IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*").expect("valid pattern")
});

/// Words that are part of the expression language, never dependencies
const KEYWORDS: &[&str] = &[
    "and", "or", "not", "if", "else", "in", "is", "true", "false", "True", "False", "None", "null",
];

/// Entity id domains recognised in dotted identifiers
const ENTITY_DOMAINS: &[&str] = &[
    "sensor",
    "binary_sensor",
    "input_number",
    "input_boolean",
    "input_select",
    "input_text",
    "input_datetime",
    "switch",
    "light",
    "climate",
    "cover",
    "fan",
    "lock",
    "device_tracker",
    "person",
    "sun",
    "weather",
    "counter",
    "timer",
    "zone",
    "media_player",
    "alarm_control_panel",
    "vacuum",
    "water_heater",
    "humidifier",
    "automation",
    "script",
    "scene",
    "group",
    "update",
    "valve",
];

pub fn is_entity_domain(domain: &str) -> bool {
    ENTITY_DOMAINS.contains(&domain)
}

/// Collection query type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Regex,
    DeviceClass,
    Label,
    Area,
    Attribute,
    Tags,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regex => "regex",
            Self::DeviceClass => "device_class",
            Self::Label => "label",
            Self::Area => "area",
            Self::Attribute => "attribute",
            Self::Tags => "tags",
        }
    }
}

impl FromStr for QueryType {
    type Err = CalcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "regex" => Ok(Self::Regex),
            "device_class" => Ok(Self::DeviceClass),
            "label" => Ok(Self::Label),
            "area" => Ok(Self::Area),
            "attribute" => Ok(Self::Attribute),
            "tags" => Ok(Self::Tags),
            _ => Err(CalcError::validation(format!("Unknown query type: {}", s))),
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Aggregation applied over a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationFunction {
    Sum,
    Avg,
    Count,
    Min,
    Max,
    Std,
    Var,
}

impl AggregationFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Count => "count",
            Self::Min => "min",
            Self::Max => "max",
            Self::Std => "std",
            Self::Var => "var",
        }
    }
}

impl FromStr for AggregationFunction {
    type Err = CalcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sum" => Ok(Self::Sum),
            "avg" => Ok(Self::Avg),
            "count" => Ok(Self::Count),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "std" => Ok(Self::Std),
            "var" => Ok(Self::Var),
            _ => Err(CalcError::validation(format!(
                "Unknown aggregation function: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for AggregationFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Collection query found in a formula
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DynamicQuery {
    pub query_type: QueryType,
    /// Raw pattern text, kept verbatim
    pub pattern: String,
    pub function: AggregationFunction,
}

impl DynamicQuery {
    pub fn new(query_type: QueryType, pattern: impl Into<String>, function: AggregationFunction) -> Self {
        Self {
            query_type,
            pattern: pattern.into(),
            function,
        }
    }
}

impl fmt::Display for DynamicQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(\"{}:{}\")", self.function, self.query_type, self.pattern)
    }
}

/// Everything a formula depends on
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFormulaDependencies {
    pub static_dependencies: BTreeSet<String>,
    pub dot_notation_refs: BTreeSet<String>,
    /// In textual order; replaced positionally during preprocessing
    pub dynamic_queries: Vec<DynamicQuery>,
}

/// A collection call and the byte span it occupies in the formula text.
///
/// The query type is kept as written; it may not be a known [`QueryType`].
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedQuery {
    pub span: Range<usize>,
    pub query_type: String,
    pub pattern: String,
    pub function: AggregationFunction,
}

impl LocatedQuery {
    /// The typed query, `None` for an unknown query type
    pub fn query(&self) -> Option<DynamicQuery> {
        let query_type = self.query_type.parse().ok()?;
        Some(DynamicQuery::new(query_type, self.pattern.clone(), self.function))
    }
}

/// Locate every collection call, left to right
pub fn locate_dynamic_queries(formula: &str) -> Vec<LocatedQuery> {
    COLLECTION_RE
        .captures_iter(formula)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let function = caps.get(1)?.as_str().parse().ok()?;
            let (query_type, pattern) = [(2, 3), (4, 5), (6, 7)]
                .into_iter()
                .find_map(|(t, p)| Some((caps.get(t)?, caps.get(p)?)))?;
            Some(LocatedQuery {
                span: whole.range(),
                query_type: query_type.as_str().to_string(),
                pattern: pattern.as_str().trim().to_string(),
                function,
            })
        })
        .collect()
}

/// Collection queries with a known type, left to right
pub fn extract_dynamic_queries(formula: &str) -> Vec<DynamicQuery> {
    locate_dynamic_queries(formula)
        .iter()
        .filter_map(LocatedQuery::query)
        .collect()
}

/// Blank out collection calls, quoted strings and subscript literals so the
/// identifier scan cannot see them. Byte offsets are preserved.
fn mask_literals(formula: &str) -> String {
    fn blank(range: Range<usize>, text: &mut String) {
        let spaces = " ".repeat(range.len());
        text.replace_range(range, &spaces);
    }

    let mut masked = formula.to_string();
    for located in locate_dynamic_queries(formula) {
        blank(located.span, &mut masked);
    }
    let spans: Vec<_> = QUOTED_RE.find_iter(&masked).map(|m| m.range()).collect();
    for span in spans {
        blank(span, &mut masked);
    }
    let spans: Vec<_> = SUBSCRIPT_LITERAL_RE
        .find_iter(&masked)
        .map(|m| m.range())
        .collect();
    for span in spans {
        blank(span, &mut masked);
    }
    masked
}

/// Identifiers in textual order, skipping keywords, function names and
/// fragments of numeric literals such as the `e5` in `1e5`
fn scan_identifiers(formula: &str) -> Vec<String> {
    let masked = mask_literals(formula);
    let bytes = masked.as_bytes();

    IDENTIFIER_RE
        .find_iter(&masked)
        .filter(|m| {
            if m.start() > 0 {
                let prev = bytes[m.start() - 1];
                if prev.is_ascii_alphanumeric() || prev == b'_' || prev == b'.' {
                    return false;
                }
            }
            let next = masked[m.end()..].trim_start().chars().next();
            next != Some('(') && !KEYWORDS.contains(&m.as_str())
        })
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Dependencies of a formula, without variable-map expansion
pub fn extract_dependencies(formula: &str) -> BTreeSet<String> {
    parse_formula_dependencies(formula, &HashMap::new()).static_dependencies
}

/// Parse a formula into its static, dot-notation and dynamic dependencies.
///
/// A dotted identifier is classified as follows:
///
/// | Shape                     | Static dependency | Dot reference |
/// |---------------------------|-------------------|---------------|
/// | `var.attr` (known var)    | `var`             | yes           |
/// | `sensor.x`                | `sensor.x`        | no            |
/// | `sensor.x.attr`           | `sensor.x`        | yes           |
/// | `obj.attr` (other)        | `obj`             | yes           |
///
/// Variables that reference an external entity also contribute that entity
/// id as a static dependency.
pub fn parse_formula_dependencies(
    formula: &str,
    variables: &HashMap<String, VariableValue>,
) -> ParsedFormulaDependencies {
    let mut parsed = ParsedFormulaDependencies {
        dynamic_queries: extract_dynamic_queries(formula),
        ..Default::default()
    };

    for identifier in scan_identifiers(formula) {
        let segments: Vec<&str> = identifier.split('.').collect();
        match segments.as_slice() {
            [single] => {
                parsed.static_dependencies.insert((*single).to_string());
            },
            [first, ..] if variables.contains_key(*first) => {
                parsed.static_dependencies.insert((*first).to_string());
                parsed.dot_notation_refs.insert(identifier.clone());
            },
            [domain, object_id] if is_entity_domain(domain) => {
                parsed
                    .static_dependencies
                    .insert(format!("{}.{}", domain, object_id));
            },
            [domain, object_id, ..] if is_entity_domain(domain) => {
                parsed
                    .static_dependencies
                    .insert(format!("{}.{}", domain, object_id));
                parsed.dot_notation_refs.insert(identifier.clone());
            },
            [first, ..] => {
                parsed.static_dependencies.insert((*first).to_string());
                parsed.dot_notation_refs.insert(identifier.clone());
            },
            [] => {},
        }
    }

    let referenced: Vec<String> = parsed
        .static_dependencies
        .iter()
        .filter_map(|name| match variables.get(name) {
            Some(VariableValue::Reference(id)) => Some(id.clone()),
            _ => None,
        })
        .collect();
    parsed.static_dependencies.extend(referenced);

    parsed
}

/// Names from `candidates` that the formula text actually mentions, in
/// order of first appearance.
///
/// A dotted identifier mentions both its full text and its first segment.
pub fn extract_variable_references<'a, I>(formula: &str, candidates: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let candidates: HashSet<&str> = candidates.into_iter().collect();
    let mut seen = HashSet::new();
    let mut ordered = Vec::new();

    for identifier in scan_identifiers(formula) {
        let first = identifier.split('.').next().unwrap_or(identifier.as_str());
        for name in [identifier.as_str(), first] {
            if candidates.contains(name) && seen.insert(name.to_string()) {
                ordered.push(name.to_string());
            }
        }
    }
    ordered
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_plain_identifiers() {
        assert_eq!(
            extract_dependencies("temp + humidity * 2"),
            set(&["temp", "humidity"])
        );
    }

    #[test]
    fn test_subscript_literals_are_not_dependencies() {
        assert!(!extract_dependencies("tabs[16]").contains("tabs"));
        assert!(!extract_dependencies("tabs [22]").contains("tabs"));
        assert!(!extract_dependencies("tabs [30:32]").contains("tabs"));
        assert!(!extract_dependencies("\"tabs[16]\" + x").contains("tabs"));
        assert_eq!(extract_dependencies("tabs[16] + offset"), set(&["offset"]));
    }

    #[test]
    fn test_keywords_functions_and_numbers_skipped() {
        assert_eq!(
            extract_dependencies("abs(a) + max(b, 1e5) + true"),
            set(&["a", "b"])
        );
        assert_eq!(extract_dependencies("x > 1 and not y"), set(&["x", "y"]));
    }

    #[test]
    fn test_quoted_strings_skipped() {
        assert_eq!(extract_dependencies("mode == \"heat cool\""), set(&["mode"]));
    }

    #[test]
    fn test_collection_queries_in_order() {
        let queries = extract_dynamic_queries(
            "sum(\"device_class:power\") + avg('area:kitchen|living') - count(label:critical)",
        );
        assert_eq!(
            queries,
            vec![
                DynamicQuery::new(QueryType::DeviceClass, "power", AggregationFunction::Sum),
                DynamicQuery::new(QueryType::Area, "kitchen|living", AggregationFunction::Avg),
                DynamicQuery::new(QueryType::Label, "critical", AggregationFunction::Count),
            ]
        );
    }

    #[test]
    fn test_malformed_pattern_captured_verbatim() {
        let queries = extract_dynamic_queries("count(\"device_class:door||\")");
        assert_eq!(queries[0].pattern, "door||");

        let queries = extract_dynamic_queries("sum(\"regex:sensor\\.(a|b\")");
        assert_eq!(queries[0].pattern, "sensor\\.(a|b");
    }

    #[test]
    fn test_collection_contents_are_not_static_dependencies() {
        let parsed = parse_formula_dependencies("sum(\"regex:sensor\\.power_.*\") + base", &HashMap::new());
        assert_eq!(parsed.static_dependencies, set(&["base"]));
        assert_eq!(parsed.dynamic_queries.len(), 1);
    }

    #[test]
    fn test_two_argument_min_is_not_a_collection() {
        assert!(extract_dynamic_queries("min(a, b)").is_empty());
        assert_eq!(extract_dependencies("min(a, b)"), set(&["a", "b"]));
    }

    #[test]
    fn test_unknown_query_type_located_but_untyped() {
        let formula = "sum(\"floor:ground\") + count(\"area:hall\")";
        let located = locate_dynamic_queries(formula);
        assert_eq!(located.len(), 2);
        assert_eq!(located[0].query_type, "floor");
        assert_eq!(located[0].pattern, "ground");
        assert_eq!(located[0].query(), None);
        assert_eq!(&formula[located[0].span.clone()], "sum(\"floor:ground\")");

        assert_eq!(
            extract_dynamic_queries(formula),
            vec![DynamicQuery::new(QueryType::Area, "hall", AggregationFunction::Count)]
        );
        assert!(extract_dependencies(formula).is_empty());
    }

    #[test]
    fn test_dotted_classification() {
        let mut variables = HashMap::new();
        variables.insert("battery".to_string(), VariableValue::reference("sensor.phone"));

        let parsed = parse_formula_dependencies(
            "sensor.power + battery.level + sensor.phone.temperature + obj.attr",
            &variables,
        );
        assert_eq!(
            parsed.static_dependencies,
            set(&["sensor.power", "battery", "sensor.phone", "obj"])
        );
        assert_eq!(
            parsed.dot_notation_refs,
            set(&["battery.level", "sensor.phone.temperature", "obj.attr"])
        );
    }

    #[test]
    fn test_reference_variables_add_entity_ids() {
        let mut variables = HashMap::new();
        variables.insert("base".to_string(), VariableValue::reference("sensor.base"));
        variables.insert("k".to_string(), VariableValue::literal(2.0));

        let parsed = parse_formula_dependencies("base * k", &variables);
        assert_eq!(parsed.static_dependencies, set(&["base", "k", "sensor.base"]));
    }

    #[test]
    fn test_never_fails_on_garbage() {
        for input in ["", "((((", "\"unterminated", "]]]", "..a..", "sum(", "1e"] {
            let _ = parse_formula_dependencies(input, &HashMap::new());
        }
    }

    #[test]
    fn test_variable_references_in_order() {
        let refs = extract_variable_references(
            "b + a * \"c\" + d.attr",
            ["a", "b", "c", "d", "unused"],
        );
        assert_eq!(refs, vec!["b", "a", "d"]);
    }
}
