//! Evaluation result cache
//!
//! Keyed by formula identity, exact formula text, variable bindings and the
//! snapshot version of the live values it was computed from. Each key owns a
//! slot mutex so
//! concurrent callers for the same key wait for a single computation instead
//! of repeating it.

use crate::error::Result;
use crate::evaluator::EvaluationResult;
use crate::formula::Formula;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub formula_id: String,
    pub formula: String,
    /// Variable bindings as `(name, debug form)`, sorted by name
    pub variables: Vec<(String, String)>,
    pub snapshot: u64,
}

impl CacheKey {
    pub fn new(formula_id: impl Into<String>, formula: impl Into<String>, snapshot: u64) -> Self {
        Self {
            formula_id: formula_id.into(),
            formula: formula.into(),
            variables: Vec::new(),
            snapshot,
        }
    }

    /// Key for a formula definition, including its variable bindings
    pub fn for_formula(formula: &Formula, snapshot: u64) -> Self {
        let mut variables: Vec<(String, String)> = formula
            .variables
            .iter()
            .map(|(name, value)| (name.clone(), format!("{:?}", value)))
            .collect();
        variables.sort();
        Self {
            variables,
            ..Self::new(&formula.id, &formula.formula, snapshot)
        }
    }
}

type Slot = Arc<Mutex<Option<EvaluationResult>>>;

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Bounded result cache; overflowing the capacity clears it
#[derive(Debug)]
pub struct EvaluationCache {
    slots: DashMap<CacheKey, Slot>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EvaluationCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: DashMap::new(),
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn slot(&self, key: &CacheKey) -> Slot {
        if let Some(slot) = self.slots.get(key) {
            return slot.clone();
        }
        if self.slots.len() >= self.capacity {
            debug!(capacity = self.capacity, "Evaluation cache full, clearing");
            self.slots.clear();
        }
        self.slots.entry(key.clone()).or_default().clone()
    }

    /// Cached outcome for `key`, computing it at most once.
    ///
    /// Errors from `compute` are returned and not cached.
    pub fn get_or_compute<F>(&self, key: &CacheKey, compute: F) -> Result<EvaluationResult>
    where
        F: FnOnce() -> Result<EvaluationResult>,
    {
        let slot = self.slot(key);
        let mut guard = slot.lock();
        if let Some(cached) = guard.as_ref() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(cached.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let outcome = compute()?;
        *guard = Some(outcome.clone());
        Ok(outcome)
    }

    /// Cached outcome without computing
    pub fn get(&self, key: &CacheKey) -> Option<EvaluationResult> {
        let slot = self.slots.get(key)?.clone();
        let guard = slot.lock();
        guard.clone()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&self) {
        self.slots.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.slots.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::alternate_state::AlternateState;
    use crate::error::{AlternateStateDetected, CalcError};
    use crate::value::Value;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_computes_once_per_key() {
        let cache = EvaluationCache::new(16);
        let key = CacheKey::new("f", "a + b", 1);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let result = cache
                .get_or_compute(&key, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Ok(Value::Float(3.0)))
                })
                .unwrap();
            assert_eq!(result, Ok(Value::Float(3.0)));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits, 2);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_snapshot_is_part_of_key() {
        let cache = EvaluationCache::new(16);
        cache
            .get_or_compute(&CacheKey::new("f", "x", 1), || Ok(Ok(Value::Int(1))))
            .unwrap();
        let second = cache
            .get_or_compute(&CacheKey::new("f", "x", 2), || Ok(Ok(Value::Int(2))))
            .unwrap();
        assert_eq!(second, Ok(Value::Int(2)));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_variable_bindings_are_part_of_key() {
        use crate::formula::VariableValue;

        let base = Formula::new("f", "x * 2").with_variable("x", VariableValue::literal(1));
        let rebound = Formula::new("f", "x * 2").with_variable("x", VariableValue::literal(5));
        let as_reference =
            Formula::new("f", "x * 2").with_variable("x", VariableValue::reference("1"));

        let key = CacheKey::for_formula(&base, 1);
        assert_eq!(key, CacheKey::for_formula(&base.clone(), 1));
        assert_ne!(key, CacheKey::for_formula(&rebound, 1));
        assert_ne!(key, CacheKey::for_formula(&as_reference, 1));
        assert_ne!(key, CacheKey::new("f", "x * 2", 1));
    }

    #[test]
    fn test_alternate_state_outcome_cached() {
        let cache = EvaluationCache::new(4);
        let key = CacheKey::new("f", "x", 1);
        let signal = AlternateStateDetected::result(AlternateState::Unknown);
        cache
            .get_or_compute(&key, || Ok(Err(signal.clone())))
            .unwrap();
        assert_eq!(cache.get(&key), Some(Err(signal)));
    }

    #[test]
    fn test_errors_not_cached() {
        let cache = EvaluationCache::new(4);
        let key = CacheKey::new("f", "x", 1);
        assert!(cache
            .get_or_compute(&key, || Err(CalcError::validation("bad")))
            .is_err());
        assert_eq!(cache.get(&key), None);
        let ok = cache.get_or_compute(&key, || Ok(Ok(Value::Int(1)))).unwrap();
        assert_eq!(ok, Ok(Value::Int(1)));
    }

    #[test]
    fn test_overflow_clears() {
        let cache = EvaluationCache::new(2);
        for snapshot in 0..3 {
            cache
                .get_or_compute(&CacheKey::new("f", "x", snapshot), || Ok(Ok(Value::Null)))
                .unwrap();
        }
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&CacheKey::new("f", "x", 2)).is_some());
    }

    #[test]
    fn test_concurrent_callers_share_one_computation() {
        let cache = Arc::new(EvaluationCache::new(16));
        let calls = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::new("f", "slow", 7);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                let key = key.clone();
                thread::spawn(move || {
                    cache
                        .get_or_compute(&key, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(std::time::Duration::from_millis(20));
                            Ok(Ok(Value::Float(1.0)))
                        })
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), Ok(Value::Float(1.0)));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
