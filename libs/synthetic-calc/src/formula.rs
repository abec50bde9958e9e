//! Formula configuration model

use crate::error::{CalcError, Result};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// A variable defined by its own sub-formula
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedVariable {
    pub formula: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub dependencies: BTreeSet<String>,
}

impl ComputedVariable {
    /// Create a computed variable, rejecting empty or whitespace-only formulas
    pub fn new(formula: impl Into<String>) -> Result<Self> {
        let computed = Self {
            formula: formula.into(),
            dependencies: BTreeSet::new(),
        };
        computed.validate()?;
        Ok(computed)
    }

    /// Declare extra dependencies beyond those found in the formula text
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.formula.trim().is_empty() {
            return Err(CalcError::validation(
                "Computed variable formula cannot be empty",
            ));
        }
        Ok(())
    }
}

/// Value of one entry in a formula's variable map.
///
/// Deserialization is untagged: `{formula: ...}` is computed, a plain string is
/// an external reference, and any other scalar is a literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    Computed(ComputedVariable),
    Reference(String),
    Literal(Value),
}

impl VariableValue {
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn reference(id: impl Into<String>) -> Self {
        Self::Reference(id.into())
    }

    pub fn computed(formula: impl Into<String>) -> Result<Self> {
        ComputedVariable::new(formula).map(Self::Computed)
    }

    pub fn is_computed(&self) -> bool {
        matches!(self, Self::Computed(_))
    }

    pub fn as_computed(&self) -> Option<&ComputedVariable> {
        match self {
            Self::Computed(c) => Some(c),
            _ => None,
        }
    }
}

/// Formula definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Formula {
    /// Formula identifier, never a key of its own variable map
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Expression text
    pub formula: String,
    #[serde(default)]
    pub variables: HashMap<String, VariableValue>,
}

impl Formula {
    pub fn new(id: impl Into<String>, formula: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            formula: formula.into(),
            variables: HashMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: VariableValue) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    /// Iterate over computed variables
    pub fn computed_variables(&self) -> impl Iterator<Item = (&str, &ComputedVariable)> {
        self.variables
            .iter()
            .filter_map(|(name, value)| value.as_computed().map(|c| (name.as_str(), c)))
    }

    /// Iterate over literal and external-reference variables
    pub fn simple_variables(&self) -> impl Iterator<Item = (&str, &VariableValue)> {
        self.variables
            .iter()
            .filter(|(_, value)| !value.is_computed())
            .map(|(name, value)| (name.as_str(), value))
    }

    pub fn validate(&self) -> Result<()> {
        if self.formula.trim().is_empty() {
            return Err(CalcError::validation(format!(
                "Formula '{}' has an empty expression",
                self.id
            )));
        }
        if self.variables.contains_key(&self.id) {
            return Err(CalcError::validation(format!(
                "Formula '{}' declares a variable with its own name",
                self.id
            )));
        }
        for (name, value) in &self.variables {
            if name.trim().is_empty() {
                return Err(CalcError::validation(format!(
                    "Formula '{}' declares an unnamed variable",
                    self.id
                )));
            }
            if let VariableValue::Computed(computed) = value {
                computed.validate().map_err(|e| CalcError::ComputedVariable {
                    name: name.clone(),
                    message: e.to_string(),
                })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_computed_variable_rejects_blank() {
        assert!(ComputedVariable::new("").is_err());
        assert!(ComputedVariable::new(" \t\n").is_err());
        assert!(ComputedVariable::new("a + 1").is_ok());
    }

    #[test]
    fn test_self_reference_rejected() {
        let formula = Formula::new("total", "total + 1")
            .with_variable("total", VariableValue::reference("sensor.total"));
        assert!(matches!(formula.validate(), Err(CalcError::Validation(_))));
    }

    #[test]
    fn test_deserialize_variables() {
        let json = r#"{
            "id": "power_total",
            "formula": "base * k + extra",
            "variables": {
                "base": "sensor.base",
                "k": 2.5,
                "enabled": true,
                "extra": {"formula": "base / 10"}
            }
        }"#;
        let formula: Formula = serde_json::from_str(json).unwrap();
        assert_eq!(
            formula.variables.get("base"),
            Some(&VariableValue::reference("sensor.base"))
        );
        assert_eq!(
            formula.variables.get("k"),
            Some(&VariableValue::literal(2.5))
        );
        assert_eq!(
            formula.variables.get("enabled"),
            Some(&VariableValue::literal(true))
        );
        assert!(formula.variables.get("extra").unwrap().is_computed());
        assert_eq!(formula.computed_variables().count(), 1);
        assert_eq!(formula.simple_variables().count(), 3);
        formula.validate().unwrap();
    }

    #[test]
    fn test_deserialized_blank_computed_fails_validation() {
        let json = r#"{"id": "x", "formula": "a", "variables": {"a": {"formula": "  "}}}"#;
        let formula: Formula = serde_json::from_str(json).unwrap();
        let err = formula.validate().unwrap_err();
        assert!(matches!(err, CalcError::ComputedVariable { ref name, .. } if name == "a"));
    }
}
