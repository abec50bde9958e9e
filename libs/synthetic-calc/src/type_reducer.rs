//! Pair reduction - bring two heterogeneous operands to a common representation
//!
//! Tiers are attempted in strict order and the first tier both operands
//! support wins: numeric, datetime, version, string.

use crate::error::{CalcError, Result};
use crate::type_analyzer::{to_datetime, to_version, TypeAnalyzer, TypeCategory, Version};
use crate::value::Value;
use chrono::{DateTime, Utc};
use std::fmt;

/// An operand after reduction
#[derive(Debug, Clone, PartialEq)]
pub enum ReducedValue {
    Numeric(f64),
    DateTime(DateTime<Utc>),
    Version(Version),
    String(String),
}

impl ReducedValue {
    pub fn category(&self) -> TypeCategory {
        match self {
            Self::Numeric(_) => TypeCategory::Numeric,
            Self::DateTime(_) => TypeCategory::DateTime,
            Self::Version(_) => TypeCategory::Version,
            Self::String(_) => TypeCategory::String,
        }
    }
}

impl fmt::Display for ReducedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(n) => write!(f, "{}", n),
            Self::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Self::Version(v) => write!(f, "{}", v),
            Self::String(s) => write!(f, "{}", s),
        }
    }
}

/// Reduces operand pairs using a [`TypeAnalyzer`] for numeric plugin views
#[derive(Debug, Clone, Default)]
pub struct TypeReducer {
    analyzer: TypeAnalyzer,
}

impl TypeReducer {
    pub fn new(analyzer: TypeAnalyzer) -> Self {
        Self { analyzer }
    }

    pub fn analyzer(&self) -> &TypeAnalyzer {
        &self.analyzer
    }

    /// Reduce both operands to the first category they share.
    ///
    /// A pair where exactly one side is a `v`-prefixed version is rejected
    /// instead of being compared as strings.
    pub fn reduce_pair_for_comparison(
        &self,
        left: &Value,
        right: &Value,
    ) -> Result<(ReducedValue, ReducedValue, TypeCategory)> {
        if left.is_null() || right.is_null() {
            return Err(CalcError::categorization(
                "null operands must be handled before reduction",
            ));
        }

        if let (Some(l), Some(r)) = (self.analyzer.to_numeric(left), self.analyzer.to_numeric(right))
        {
            return Ok((
                ReducedValue::Numeric(l),
                ReducedValue::Numeric(r),
                TypeCategory::Numeric,
            ));
        }

        if let (Some(l), Some(r)) = (to_datetime(left), to_datetime(right)) {
            return Ok((
                ReducedValue::DateTime(l),
                ReducedValue::DateTime(r),
                TypeCategory::DateTime,
            ));
        }

        match (to_version(left), to_version(right)) {
            (Some(l), Some(r)) => {
                return Ok((
                    ReducedValue::Version(l),
                    ReducedValue::Version(r),
                    TypeCategory::Version,
                ))
            },
            (Some(_), None) | (None, Some(_)) => {
                return Err(CalcError::unsupported_comparison(
                    left,
                    "version/string",
                    right,
                ))
            },
            (None, None) => {},
        }

        Ok((
            ReducedValue::String(left.to_string()),
            ReducedValue::String(right.to_string()),
            TypeCategory::String,
        ))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn reducer() -> TypeReducer {
        TypeReducer::default()
    }

    #[test]
    fn test_numeric_tier_wins() {
        let (l, r, cat) = reducer()
            .reduce_pair_for_comparison(&Value::from("50"), &Value::Int(50))
            .unwrap();
        assert_eq!(cat, TypeCategory::Numeric);
        assert_eq!(l, ReducedValue::Numeric(50.0));
        assert_eq!(r, ReducedValue::Numeric(50.0));
    }

    #[test]
    fn test_boolean_reduces_to_numeric() {
        let (l, _, cat) = reducer()
            .reduce_pair_for_comparison(&Value::Bool(true), &Value::Float(1.0))
            .unwrap();
        assert_eq!(cat, TypeCategory::Numeric);
        assert_eq!(l, ReducedValue::Numeric(1.0));
    }

    #[test]
    fn test_datetime_tier() {
        let (_, _, cat) = reducer()
            .reduce_pair_for_comparison(
                &Value::from("2024-01-15 10:30:00"),
                &Value::from("2024-01-15T10:30:00Z"),
            )
            .unwrap();
        assert_eq!(cat, TypeCategory::DateTime);
    }

    #[test]
    fn test_version_tier() {
        let (l, r, cat) = reducer()
            .reduce_pair_for_comparison(&Value::from("v1.2.3"), &Value::from("v1.10.0"))
            .unwrap();
        assert_eq!(cat, TypeCategory::Version);
        assert!(matches!((l, r), (ReducedValue::Version(a), ReducedValue::Version(b)) if a < b));
    }

    #[test]
    fn test_single_sided_version_rejected() {
        let err = reducer()
            .reduce_pair_for_comparison(&Value::from("v1.0.0"), &Value::from("1.0.0"))
            .unwrap_err();
        assert!(matches!(err, CalcError::UnsupportedComparison { .. }));
    }

    #[test]
    fn test_string_fallback() {
        let (l, r, cat) = reducer()
            .reduce_pair_for_comparison(&Value::from("heat"), &Value::Bool(true))
            .unwrap();
        assert_eq!(cat, TypeCategory::String);
        assert_eq!(l, ReducedValue::String("heat".to_string()));
        assert_eq!(r, ReducedValue::String("true".to_string()));
    }

    #[test]
    fn test_null_rejected() {
        assert!(reducer()
            .reduce_pair_for_comparison(&Value::Null, &Value::Int(1))
            .is_err());
    }
}
