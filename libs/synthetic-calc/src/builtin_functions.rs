//! Built-in functions for expression evaluation
//!
//! All functions are stateless. Duration helpers return seconds so that
//! durations compose with ordinary arithmetic.

/// Scale a value by a factor
pub fn scale(value: f64, factor: f64) -> f64 {
    value * factor
}

/// Clamp a value to a range; an inverted range clamps to `max`
pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.max(min).min(max)
}

/// Absolute value
pub fn abs(value: f64) -> f64 {
    value.abs()
}

/// Minimum of the given values, `None` when empty
pub fn min(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}

/// Maximum of the given values, `None` when empty
pub fn max(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

/// Round to specified decimal places
pub fn round(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

/// Sign function: returns -1, 0, or 1
pub fn sign(value: f64) -> f64 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Minutes to seconds
pub fn minutes(value: f64) -> f64 {
    value * 60.0
}

/// Hours to seconds
pub fn hours(value: f64) -> f64 {
    value * 3600.0
}

/// Days to seconds
pub fn days(value: f64) -> f64 {
    value * 86400.0
}
