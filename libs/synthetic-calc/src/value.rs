//! Runtime values and the per-evaluation context
//!
//! - [`Value`]: closed set of runtime value shapes
//! - [`ReferenceValue`]: a resolved value that remembers where it came from
//! - [`EvaluationContext`]: variable name to context entry, built fresh per evaluation

use chrono::{DateTime, FixedOffset, NaiveDate, SecondsFormat};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

/// Runtime value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    DateTime(DateTime<FixedOffset>),
    Date(NaiveDate),
    Duration(Duration),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view of primitive numbers only (no string parsing)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Short name of the value shape, used in log fields and error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::DateTime(_) => "datetime",
            Self::Date(_) => "date",
            Self::Duration(_) => "duration",
        }
    }

    /// Interpret a live state string.
    ///
    /// Integer text becomes `Int`, other numeric text becomes `Float`, anything
    /// else stays a `String`.
    pub fn from_state(state: &str) -> Self {
        let trimmed = state.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            return Self::Int(i);
        }
        match crate::type_analyzer::parse_numeric_str(trimmed) {
            Some(f) => Self::Float(f),
            None => Self::String(state.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(v) => write!(f, "{}", v),
            Self::String(s) => write!(f, "{}", s),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            },
            Self::Map(map) => {
                write!(f, "{{")?;
                for (i, (key, item)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, item)?;
                }
                write!(f, "}}")
            },
            Self::DateTime(dt) => write!(f, "{}", dt.to_rfc3339_opts(SecondsFormat::AutoSi, false)),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::Duration(d) => write!(f, "{}", d.as_secs_f64()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Self::DateTime(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<Duration> for Value {
    fn from(v: Duration) -> Self {
        Self::Duration(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::List(v)
    }
}

/// A resolved value paired with the identifier it was read from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceValue {
    reference: String,
    value: Value,
}

impl ReferenceValue {
    pub fn new(reference: impl Into<String>, value: Value) -> Self {
        Self {
            reference: reference.into(),
            value,
        }
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// One evaluation context entry
#[derive(Debug, Clone, PartialEq)]
pub enum ContextEntry {
    /// Literal with no reference identity
    Raw(Value),
    /// Value read from an external identifier
    Reference(ReferenceValue),
}

impl ContextEntry {
    pub fn reference(reference: impl Into<String>, value: Value) -> Self {
        Self::Reference(ReferenceValue::new(reference, value))
    }

    pub fn value(&self) -> &Value {
        match self {
            Self::Raw(v) => v,
            Self::Reference(r) => r.value(),
        }
    }

    /// Reference identifier, if this entry was read from one
    pub fn reference_id(&self) -> Option<&str> {
        match self {
            Self::Raw(_) => None,
            Self::Reference(r) => Some(r.reference()),
        }
    }
}

impl From<Value> for ContextEntry {
    fn from(v: Value) -> Self {
        Self::Raw(v)
    }
}

/// Variable name to entry mapping for a single evaluation.
///
/// Entries are only ever added: once a name is present its entry is never
/// replaced, so the reference half of a resolved variable cannot change.
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    entries: HashMap<String, ContextEntry>,
}

impl EvaluationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style seeding
    pub fn with(mut self, name: impl Into<String>, entry: impl Into<ContextEntry>) -> Self {
        self.insert(name, entry);
        self
    }

    /// Insert an entry unless the name is already present.
    ///
    /// Returns `false` when an existing entry was kept.
    pub fn insert(&mut self, name: impl Into<String>, entry: impl Into<ContextEntry>) -> bool {
        match self.entries.entry(name.into()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(entry.into());
                true
            },
        }
    }

    pub fn get(&self, name: &str) -> Option<&ContextEntry> {
        self.entries.get(name)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.entries.get(name).map(ContextEntry::value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ContextEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Plain name to value view, dropping reference identities
    pub fn flattened(&self) -> HashMap<String, Value> {
        self.entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.value().clone()))
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_from_state_numeric() {
        assert_eq!(Value::from_state("42"), Value::Int(42));
        assert_eq!(Value::from_state("25.5"), Value::Float(25.5));
        assert_eq!(Value::from_state(" -3.0 "), Value::Float(-3.0));
        assert_eq!(Value::from_state("on"), Value::from("on"));
        assert_eq!(Value::from_state("inf"), Value::from("inf"));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Float(50.0).to_string(), "50");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(
            Value::List(vec![Value::Int(1), Value::from("a")]).to_string(),
            "[1, a]"
        );
        assert_eq!(Value::Duration(Duration::from_secs(90)).to_string(), "90");
    }

    #[test]
    fn test_context_never_overwrites() {
        let mut ctx = EvaluationContext::new();
        assert!(ctx.insert("state", ContextEntry::reference("sensor.a", Value::Int(1))));
        assert!(!ctx.insert("state", Value::Int(2)));

        let entry = ctx.get("state").unwrap();
        assert_eq!(entry.reference_id(), Some("sensor.a"));
        assert_eq!(entry.value(), &Value::Int(1));
    }

    #[test]
    fn test_flattened_drops_references() {
        let ctx = EvaluationContext::new()
            .with("base", ContextEntry::reference("sensor.base", Value::Float(25.0)))
            .with("k", Value::Int(2));

        let flat = ctx.flattened();
        assert_eq!(flat.get("base"), Some(&Value::Float(25.0)));
        assert_eq!(flat.get("k"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_untagged_deserialize() {
        let v: Value = serde_json::from_str(r#"[1, 2.5, "x", true, null]"#).unwrap();
        assert_eq!(
            v,
            Value::List(vec![
                Value::Int(1),
                Value::Float(2.5),
                Value::from("x"),
                Value::Bool(true),
                Value::Null,
            ])
        );
    }
}
