//! Type analysis - assigns every runtime value a [`TypeCategory`]
//!
//! Categories are checked in a fixed priority order (first match wins):
//!
//! | Priority | Input | Category |
//! |----------|-------|----------|
//! | 1 | `null` | error - callers branch on nullness first |
//! | 2 | bool | `Boolean` |
//! | 3 | datetime / date | `DateTime` |
//! | 4 | int / float | `Numeric` |
//! | 5 | `YYYY-MM-DD[THH:MM:SS[tz]]` text | `DateTime` |
//! | 6 | `v<n>.<n>.<n>[.<n>...][-suffix]` text | `Version` |
//! | 7 | registered user type | `UserDefined` |
//! | 8 | other text / anything else | `String` / `Unknown` |

use crate::error::{CalcError, Result};
use crate::value::Value;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, LazyLock};

#[allow(clippy::disallowed_methods)] // Pattern literals are fixed at compile time
static NUMERIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?$").expect("valid pattern")
});

#[allow(clippy::disallowed_methods)]
static STRICT_DATETIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}(?:T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?)?$")
        .expect("valid pattern")
});

#[allow(clippy::disallowed_methods)]
static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v(\d+(?:\.\d+){2,})(?:-([0-9A-Za-z][0-9A-Za-z.\-]*))?$")
        .expect("valid pattern")
});

/// Accepted datetime layouts, tried in order after RFC 3339
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

const DATETIME_TZ_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

/// Runtime type category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeCategory {
    Numeric,
    Boolean,
    DateTime,
    Version,
    String,
    UserDefined,
    Unknown,
}

impl TypeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Numeric => "numeric",
            Self::Boolean => "boolean",
            Self::DateTime => "datetime",
            Self::Version => "version",
            Self::String => "string",
            Self::UserDefined => "user_defined",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TypeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parsed `v`-prefixed version.
///
/// Missing trailing components compare as zero, so `v1.2.0 == v1.2.0.0`.
/// With equal components a suffixed version orders before the bare one
/// (`v1.0.0-beta < v1.0.0`); two suffixes compare as text.
#[derive(Debug, Clone)]
pub struct Version {
    components: Vec<u64>,
    suffix: Option<String>,
}

impl Version {
    /// Parse the strict `v<n>.<n>.<n>[.<n>...][-suffix]` grammar
    pub fn parse(text: &str) -> Option<Self> {
        let caps = VERSION_RE.captures(text.trim())?;
        let components = caps
            .get(1)?
            .as_str()
            .split('.')
            .map(|c| c.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()?;
        Some(Self {
            components,
            suffix: caps.get(2).map(|m| m.as_str().to_string()),
        })
    }

    pub fn components(&self) -> &[u64] {
        &self.components
    }

    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        for i in 0..len {
            let a = self.components.get(i).copied().unwrap_or(0);
            let b = other.components.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                non_eq => return non_eq,
            }
        }
        match (&self.suffix, &other.suffix) {
            (None, None) => Ordering::Equal,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.components.iter().map(u64::to_string).collect();
        write!(f, "v{}", parts.join("."))?;
        if let Some(suffix) = &self.suffix {
            write!(f, "-{}", suffix)?;
        }
        Ok(())
    }
}

/// Extension point for domain-specific value types.
///
/// A plugin claims values it recognises and may offer a numeric view of them
/// so they take part in numeric comparison.
pub trait UserTypePlugin: Send + Sync {
    /// Type name if this plugin recognises the value
    fn identify(&self, value: &Value) -> Option<String>;

    /// Numeric reduction, `None` when the value has no numeric form
    fn reduce_to_numeric(&self, value: &Value) -> Option<f64>;
}

/// Categorizes values, consulting registered user type plugins
#[derive(Clone, Default)]
pub struct TypeAnalyzer {
    plugins: Vec<Arc<dyn UserTypePlugin>>,
}

impl fmt::Debug for TypeAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeAnalyzer")
            .field("plugins", &self.plugins.len())
            .finish()
    }
}

impl TypeAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user type plugin; earlier registrations win
    pub fn register(&mut self, plugin: Arc<dyn UserTypePlugin>) {
        self.plugins.push(plugin);
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn UserTypePlugin>) -> Self {
        self.register(plugin);
        self
    }

    /// Assign a category by priority; `null` is rejected
    pub fn categorize_type(&self, value: &Value) -> Result<TypeCategory> {
        let category = match value {
            Value::Null => {
                return Err(CalcError::categorization(
                    "null has no category, check nullness before categorizing",
                ))
            },
            Value::Bool(_) => TypeCategory::Boolean,
            Value::DateTime(_) | Value::Date(_) => TypeCategory::DateTime,
            Value::Int(_) | Value::Float(_) => TypeCategory::Numeric,
            Value::String(s) if is_strict_datetime(s) => TypeCategory::DateTime,
            Value::String(s) if Version::parse(s).is_some() => TypeCategory::Version,
            other if self.user_type_name(other).is_some() => TypeCategory::UserDefined,
            Value::String(_) => TypeCategory::String,
            _ => TypeCategory::Unknown,
        };
        Ok(category)
    }

    /// Name reported by the first plugin that recognises the value
    pub fn user_type_name(&self, value: &Value) -> Option<String> {
        self.plugins.iter().find_map(|p| p.identify(value))
    }

    /// Numeric view: numbers, numeric text, booleans, then plugin reductions
    pub fn to_numeric(&self, value: &Value) -> Option<f64> {
        let builtin = match value {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => parse_numeric_str(s),
            _ => None,
        };
        builtin.or_else(|| {
            self.plugins
                .iter()
                .filter(|p| p.identify(value).is_some())
                .find_map(|p| p.reduce_to_numeric(value))
        })
    }
}

/// Parse numeric text; rejects `inf`, `nan` and other non-literal spellings
pub fn parse_numeric_str(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if !NUMERIC_RE.is_match(trimmed) {
        return None;
    }
    trimmed.parse::<f64>().ok()
}

/// Strict ISO-like date/time grammar that also parses as a real date
pub fn is_strict_datetime(text: &str) -> bool {
    STRICT_DATETIME_RE.is_match(text) && parse_datetime_str(text).is_some()
}

/// Parse text through the cascade of accepted datetime layouts
pub fn parse_datetime_str(text: &str) -> Option<DateTime<Utc>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in DATETIME_TZ_FORMATS {
        if let Ok(dt) = DateTime::<FixedOffset>::parse_from_str(trimmed, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    let naive_input = trimmed.strip_suffix('Z').unwrap_or(trimmed);
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(naive_input, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Datetime view of native datetimes, dates and datetime text
pub fn to_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::DateTime(dt) => Some(dt.with_timezone(&Utc)),
        Value::Date(d) => d
            .and_hms_opt(0, 0, 0)
            .map(|naive| Utc.from_utc_datetime(&naive)),
        Value::String(s) => parse_datetime_str(s),
        _ => None,
    }
}

/// Version view of `v`-prefixed version text
pub fn to_version(value: &Value) -> Option<Version> {
    match value {
        Value::String(s) => Version::parse(s),
        _ => None,
    }
}
