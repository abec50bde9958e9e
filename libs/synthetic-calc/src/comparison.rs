//! Comparison operators and per-category comparison handlers
//!
//! [`ValueComparator::compare_values`] reduces an operand pair with the
//! [`TypeReducer`] and dispatches to the handler for the common category.
//! Handlers raise [`CalcError::UnsupportedComparison`] for combinations they do
//! not support; they never default to `false`.

use crate::error::{CalcError, Result};
use crate::type_analyzer::{TypeAnalyzer, TypeCategory};
use crate::type_reducer::{ReducedValue, TypeReducer};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOperator {
    /// Equal to (==)
    #[serde(rename = "==")]
    Equal,
    /// Not equal to (!=)
    #[serde(rename = "!=")]
    NotEqual,
    /// Less than (<)
    #[serde(rename = "<")]
    LessThan,
    /// Less than or equal to (<=)
    #[serde(rename = "<=")]
    LessThanOrEqual,
    /// Greater than (>)
    #[serde(rename = ">")]
    GreaterThan,
    /// Greater than or equal to (>=)
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    /// Substring / membership
    #[serde(rename = "in")]
    In,
    /// Negated substring / membership
    #[serde(rename = "not in")]
    NotIn,
}

impl ComparisonOperator {
    /// The six relational operators
    pub const RELATIONAL: [ComparisonOperator; 6] = [
        Self::Equal,
        Self::NotEqual,
        Self::LessThan,
        Self::LessThanOrEqual,
        Self::GreaterThan,
        Self::GreaterThanOrEqual,
    ];

    /// Get symbol representation
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::In => "in",
            Self::NotIn => "not in",
        }
    }

    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            Self::LessThan | Self::LessThanOrEqual | Self::GreaterThan | Self::GreaterThanOrEqual
        )
    }

    pub fn is_containment(&self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }

    /// Apply a relational operator to an ordering; `None` for containment
    pub fn apply_ordering(&self, ordering: Ordering) -> Option<bool> {
        match self {
            Self::Equal => Some(ordering == Ordering::Equal),
            Self::NotEqual => Some(ordering != Ordering::Equal),
            Self::LessThan => Some(ordering == Ordering::Less),
            Self::LessThanOrEqual => Some(ordering != Ordering::Greater),
            Self::GreaterThan => Some(ordering == Ordering::Greater),
            Self::GreaterThanOrEqual => Some(ordering != Ordering::Less),
            Self::In | Self::NotIn => None,
        }
    }
}

impl FromStr for ComparisonOperator {
    type Err = CalcError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "==" => Ok(Self::Equal),
            "!=" => Ok(Self::NotEqual),
            "<" => Ok(Self::LessThan),
            "<=" => Ok(Self::LessThanOrEqual),
            ">" => Ok(Self::GreaterThan),
            ">=" => Ok(Self::GreaterThanOrEqual),
            "in" => Ok(Self::In),
            "not in" => Ok(Self::NotIn),
            other => Err(CalcError::validation(format!(
                "Unknown comparison operator: '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Comparison strategy for one reduced category
pub trait ComparisonHandler: Send + Sync {
    /// Category this handler compares
    fn category(&self) -> TypeCategory;

    /// Whether the operator is meaningful for this category
    fn supports(&self, operator: ComparisonOperator) -> bool;

    /// Compare two reduced operands
    fn compare(
        &self,
        left: &ReducedValue,
        operator: ComparisonOperator,
        right: &ReducedValue,
    ) -> Result<bool>;
}

fn unsupported(left: &ReducedValue, operator: ComparisonOperator, right: &ReducedValue) -> CalcError {
    CalcError::unsupported_comparison(left, operator, right)
}

/// Numbers, including numeric text and booleans after reduction
pub struct NumericHandler;

impl ComparisonHandler for NumericHandler {
    fn category(&self) -> TypeCategory {
        TypeCategory::Numeric
    }

    fn supports(&self, operator: ComparisonOperator) -> bool {
        !operator.is_containment()
    }

    fn compare(
        &self,
        left: &ReducedValue,
        operator: ComparisonOperator,
        right: &ReducedValue,
    ) -> Result<bool> {
        let (ReducedValue::Numeric(l), ReducedValue::Numeric(r)) = (left, right) else {
            return Err(unsupported(left, operator, right));
        };
        let result = match operator {
            ComparisonOperator::Equal => (l - r).abs() < f64::EPSILON,
            ComparisonOperator::NotEqual => (l - r).abs() >= f64::EPSILON,
            ComparisonOperator::LessThan => l < r,
            ComparisonOperator::LessThanOrEqual => l <= r,
            ComparisonOperator::GreaterThan => l > r,
            ComparisonOperator::GreaterThanOrEqual => l >= r,
            ComparisonOperator::In | ComparisonOperator::NotIn => {
                return Err(unsupported(left, operator, right))
            },
        };
        Ok(result)
    }
}

/// Datetimes normalised to UTC
pub struct DateTimeHandler;

impl ComparisonHandler for DateTimeHandler {
    fn category(&self) -> TypeCategory {
        TypeCategory::DateTime
    }

    fn supports(&self, operator: ComparisonOperator) -> bool {
        !operator.is_containment()
    }

    fn compare(
        &self,
        left: &ReducedValue,
        operator: ComparisonOperator,
        right: &ReducedValue,
    ) -> Result<bool> {
        match (left, right) {
            (ReducedValue::DateTime(l), ReducedValue::DateTime(r)) => operator
                .apply_ordering(l.cmp(r))
                .ok_or_else(|| unsupported(left, operator, right)),
            _ => Err(unsupported(left, operator, right)),
        }
    }
}

/// `v`-prefixed versions
pub struct VersionHandler;

impl ComparisonHandler for VersionHandler {
    fn category(&self) -> TypeCategory {
        TypeCategory::Version
    }

    fn supports(&self, operator: ComparisonOperator) -> bool {
        !operator.is_containment()
    }

    fn compare(
        &self,
        left: &ReducedValue,
        operator: ComparisonOperator,
        right: &ReducedValue,
    ) -> Result<bool> {
        match (left, right) {
            (ReducedValue::Version(l), ReducedValue::Version(r)) => operator
                .apply_ordering(l.cmp(r))
                .ok_or_else(|| unsupported(left, operator, right)),
            _ => Err(unsupported(left, operator, right)),
        }
    }
}

/// Plain text: equality and case-sensitive substring containment only
pub struct StringHandler;

impl ComparisonHandler for StringHandler {
    fn category(&self) -> TypeCategory {
        TypeCategory::String
    }

    fn supports(&self, operator: ComparisonOperator) -> bool {
        !operator.is_ordering()
    }

    fn compare(
        &self,
        left: &ReducedValue,
        operator: ComparisonOperator,
        right: &ReducedValue,
    ) -> Result<bool> {
        let (ReducedValue::String(l), ReducedValue::String(r)) = (left, right) else {
            return Err(unsupported(left, operator, right));
        };
        match operator {
            ComparisonOperator::Equal => Ok(l == r),
            ComparisonOperator::NotEqual => Ok(l != r),
            // `left in right`: left is the needle
            ComparisonOperator::In => Ok(r.contains(l.as_str())),
            ComparisonOperator::NotIn => Ok(!r.contains(l.as_str())),
            _ => Err(unsupported(left, operator, right)),
        }
    }
}

/// Generic comparison on reduced values, used when a dedicated handler
/// declines an ordering on plain strings (codepoint order)
fn compare_reduced_generic(
    left: &ReducedValue,
    operator: ComparisonOperator,
    right: &ReducedValue,
) -> Result<bool> {
    let ordering = match (left, right) {
        (ReducedValue::String(l), ReducedValue::String(r)) => l.cmp(r),
        (ReducedValue::Numeric(l), ReducedValue::Numeric(r)) => {
            l.partial_cmp(r).ok_or_else(|| unsupported(left, operator, right))?
        },
        (ReducedValue::DateTime(l), ReducedValue::DateTime(r)) => l.cmp(r),
        (ReducedValue::Version(l), ReducedValue::Version(r)) => l.cmp(r),
        _ => return Err(unsupported(left, operator, right)),
    };
    operator
        .apply_ordering(ordering)
        .ok_or_else(|| unsupported(left, operator, right))
}

/// Type-aware comparison of runtime values
#[derive(Clone)]
pub struct ValueComparator {
    reducer: TypeReducer,
    handlers: Vec<Arc<dyn ComparisonHandler>>,
}

impl fmt::Debug for ValueComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueComparator")
            .field("reducer", &self.reducer)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl Default for ValueComparator {
    fn default() -> Self {
        Self::new(TypeAnalyzer::default())
    }
}

impl ValueComparator {
    pub fn new(analyzer: TypeAnalyzer) -> Self {
        Self {
            reducer: TypeReducer::new(analyzer),
            handlers: vec![
                Arc::new(NumericHandler),
                Arc::new(DateTimeHandler),
                Arc::new(VersionHandler),
                Arc::new(StringHandler),
            ],
        }
    }

    pub fn reducer(&self) -> &TypeReducer {
        &self.reducer
    }

    fn handler_for(&self, category: TypeCategory) -> Option<&Arc<dyn ComparisonHandler>> {
        self.handlers.iter().find(|h| h.category() == category)
    }

    /// Compare two values with the given operator.
    ///
    /// `null` only supports `==` / `!=` (null equals only null). A list on the
    /// right of `in` / `not in` is tested for an equal element.
    pub fn compare_values(
        &self,
        left: &Value,
        operator: ComparisonOperator,
        right: &Value,
    ) -> Result<bool> {
        if left.is_null() || right.is_null() {
            let both = left.is_null() && right.is_null();
            return match operator {
                ComparisonOperator::Equal => Ok(both),
                ComparisonOperator::NotEqual => Ok(!both),
                _ => Err(CalcError::unsupported_comparison(left, operator, right)),
            };
        }

        if let (true, Value::List(items)) = (operator.is_containment(), right) {
            let found = self.list_contains(left, items)?;
            return Ok(if operator == ComparisonOperator::In {
                found
            } else {
                !found
            });
        }

        let (l, r, category) = self.reducer.reduce_pair_for_comparison(left, right)?;
        let handler = self
            .handler_for(category)
            .ok_or_else(|| CalcError::unsupported_comparison(left, operator, right))?;

        if category == TypeCategory::String && operator.is_ordering() && !handler.supports(operator)
        {
            return compare_reduced_generic(&l, operator, &r);
        }
        handler.compare(&l, operator, &r)
    }

    /// Whether any element equals `needle`.
    ///
    /// Elements that cannot be compared with the needle do not match. The
    /// first comparison error is returned only when no element was comparable.
    fn list_contains(&self, needle: &Value, items: &[Value]) -> Result<bool> {
        let mut compared = false;
        let mut first_error = None;
        for item in items.iter().filter(|item| !item.is_null()) {
            match self.compare_values(needle, ComparisonOperator::Equal, item) {
                Ok(true) => return Ok(true),
                Ok(false) => compared = true,
                Err(e) => {
                    first_error.get_or_insert(e);
                },
            }
        }
        match first_error {
            Some(e) if !compared => Err(e),
            _ => Ok(false),
        }
    }

    /// Compare with an operator given as text
    pub fn compare_str(&self, left: &Value, operator: &str, right: &Value) -> Result<bool> {
        self.compare_values(left, operator.parse()?, right)
    }
}

static DEFAULT_COMPARATOR: LazyLock<ValueComparator> = LazyLock::new(ValueComparator::default);

/// Compare two values with the default comparator (no user type plugins)
pub fn compare_values(left: &Value, operator: &str, right: &Value) -> Result<bool> {
    DEFAULT_COMPARATOR.compare_str(left, operator, right)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_numeric_string_equals_number() {
        for (text, number) in [("50", 50.0), ("3.25", 3.25), ("-7", -7.0), ("1e2", 100.0)] {
            assert!(
                compare_values(&Value::from(text), "==", &Value::Float(number)).unwrap(),
                "{} == {}",
                text,
                number
            );
        }
        assert!(compare_values(&Value::from("50"), "==", &Value::Int(50)).unwrap());
    }

    #[test]
    fn test_numeric_ordering() {
        assert!(compare_values(&Value::Int(10), ">", &Value::from("9.5")).unwrap());
        assert!(compare_values(&Value::Float(2.0), "<=", &Value::Int(2)).unwrap());
        assert!(!compare_values(&Value::Bool(false), ">=", &Value::Int(1)).unwrap());
    }

    #[test]
    fn test_numeric_rejects_containment() {
        let err = compare_values(&Value::Int(1), "in", &Value::Int(10)).unwrap_err();
        assert!(matches!(err, CalcError::UnsupportedComparison { .. }));
    }

    #[test]
    fn test_version_prefix_mismatch_raises() {
        for (l, r) in [("v1.0.0", "1.0.0"), ("1.0.0", "v1.0.0"), ("v2.3.4", "hello")] {
            let err = compare_values(&Value::from(l), "==", &Value::from(r)).unwrap_err();
            assert!(matches!(err, CalcError::UnsupportedComparison { .. }), "{} vs {}", l, r);
        }
    }

    #[test]
    fn test_version_comparison() {
        assert!(compare_values(&Value::from("v1.10.0"), ">", &Value::from("v1.9.9")).unwrap());
        assert!(compare_values(&Value::from("v1.2.0"), "==", &Value::from("v1.2.0.0")).unwrap());
        assert!(compare_values(&Value::from("v1.2.0.1"), ">", &Value::from("v1.2.0")).unwrap());
    }

    #[test]
    fn test_datetime_comparison() {
        assert!(compare_values(
            &Value::from("2024-01-15T10:00:00Z"),
            "<",
            &Value::from("2024-01-15 11:00:00")
        )
        .unwrap());
        assert!(compare_values(
            &Value::from("2024-01-15T12:00:00+02:00"),
            "==",
            &Value::from("2024-01-15T10:00:00Z")
        )
        .unwrap());
    }

    #[test]
    fn test_string_containment() {
        assert!(compare_values(&Value::from("door"), "in", &Value::from("front_door")).unwrap());
        assert!(compare_values(&Value::from("Door"), "not in", &Value::from("front_door")).unwrap());
        assert!(compare_values(&Value::from(""), "in", &Value::from("anything")).unwrap());
    }

    #[test]
    fn test_string_handler_rejects_ordering() {
        let l = ReducedValue::String("a".to_string());
        let r = ReducedValue::String("b".to_string());
        let err = StringHandler
            .compare(&l, ComparisonOperator::LessThan, &r)
            .unwrap_err();
        assert!(matches!(err, CalcError::UnsupportedComparison { .. }));
    }

    #[test]
    fn test_string_ordering_uses_generic_path() {
        assert!(compare_values(&Value::from("apple"), "<", &Value::from("banana")).unwrap());
        assert!(!compare_values(&Value::from("b"), "<=", &Value::from("a")).unwrap());
    }

    #[test]
    fn test_list_membership() {
        let list = Value::List(vec![Value::from("heat"), Value::Int(5), Value::Null]);
        assert!(compare_values(&Value::from("5"), "in", &list).unwrap());
        assert!(compare_values(&Value::from("heat"), "in", &list).unwrap());
        assert!(compare_values(&Value::from("cool"), "not in", &list).unwrap());
    }

    #[test]
    fn test_list_membership_independent_of_order() {
        let needle = Value::from("v2.0.0");
        let first = Value::List(vec![Value::from("v2.0.0"), Value::from("abc")]);
        let last = Value::List(vec![Value::from("abc"), Value::from("v2.0.0")]);
        assert!(compare_values(&needle, "in", &first).unwrap());
        assert!(compare_values(&needle, "in", &last).unwrap());
        assert!(!compare_values(&needle, "not in", &last).unwrap());

        let mixed = Value::List(vec![Value::from("abc"), Value::from("v1.0.0")]);
        assert!(!compare_values(&needle, "in", &mixed).unwrap());
        assert!(compare_values(&needle, "not in", &mixed).unwrap());
    }

    #[test]
    fn test_list_without_comparable_element_raises() {
        let list = Value::List(vec![Value::from("abc"), Value::from("1.0.0")]);
        assert!(matches!(
            compare_values(&Value::from("v2.0.0"), "in", &list),
            Err(CalcError::UnsupportedComparison { .. })
        ));
        let empty = Value::List(vec![]);
        assert!(!compare_values(&Value::from("v2.0.0"), "in", &empty).unwrap());
    }

    #[test]
    fn test_null_operands() {
        assert!(compare_values(&Value::Null, "==", &Value::Null).unwrap());
        assert!(compare_values(&Value::Null, "!=", &Value::Int(0)).unwrap());
        assert!(compare_values(&Value::Null, "<", &Value::Int(0)).is_err());
    }

    #[test]
    fn test_unknown_operator() {
        assert!(matches!(
            compare_values(&Value::Int(1), "=>", &Value::Int(1)),
            Err(CalcError::Validation(_))
        ));
    }
}
