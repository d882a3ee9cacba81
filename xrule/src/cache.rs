//! Local and global caches
//!
//! Entries are keyed by the node, a snapshot of the values its free variables
//! held, and (for alignment-dependent nodes) the alignment. A changed
//! variable value or alignment is a different key, so entries never need
//! invalidating.

use crate::ast::NodeId;
use crate::document::{FactId, Taxonomy};
use crate::value::{Alignment, Shadow, Value, ValueSet};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub node: NodeId,
    pub vars: Vec<(String, Shadow)>,
    pub alignment: Option<Alignment>,
}

/// A constant or zero-argument function result. Single-valued expressions
/// collapse to one value; iterable ones keep the whole set.
#[derive(Debug, Clone)]
pub enum Computed {
    Single(Value),
    Set(ValueSet),
}

/// Per rule execution; dropped with its context
#[derive(Debug, Default)]
pub struct LocalCache {
    sets: FxHashMap<CacheKey, ValueSet>,
    scalars: FxHashMap<CacheKey, Value>,
    fact_alignments: FxHashMap<(NodeId, FactId), Option<Alignment>>,
}

impl LocalCache {
    pub fn get_set(&self, key: &CacheKey) -> Option<ValueSet> {
        self.sets.get(key).cloned()
    }

    pub fn put_set(&mut self, key: CacheKey, values: ValueSet) {
        self.sets.insert(key, values);
    }

    pub fn get_scalar(&self, key: &CacheKey) -> Option<Value> {
        self.scalars.get(key).cloned()
    }

    pub fn put_scalar(&mut self, key: CacheKey, value: Value) {
        self.scalars.insert(key, value);
    }

    /// Memoized alignment of a fact as seen by one factset
    pub fn fact_alignment(
        &mut self,
        factset: NodeId,
        fact: FactId,
        compute: impl FnOnce() -> Option<Alignment>,
    ) -> Option<Alignment> {
        self.fact_alignments
            .entry((factset, fact))
            .or_insert_with(compute)
            .clone()
    }
}

/// Shared by every rule of a run. Locks are never held across evaluation.
#[derive(Debug, Default)]
pub struct GlobalCache {
    constants: Mutex<FxHashMap<String, Arc<Computed>>>,
    constants_in_progress: Mutex<FxHashSet<String>>,
    functions: Mutex<FxHashMap<String, Arc<Computed>>>,
    expressions: Mutex<FxHashMap<CacheKey, Arc<ValueSet>>>,
    taxonomies: Mutex<FxHashMap<String, Arc<Taxonomy>>>,
}

impl GlobalCache {
    pub fn constant(&self, name: &str) -> Option<Arc<Computed>> {
        self.constants.lock().get(name).cloned()
    }

    pub fn store_constant(&self, name: &str, value: Computed) -> Arc<Computed> {
        let value = Arc::new(value);
        self.constants
            .lock()
            .insert(name.to_string(), value.clone());
        value
    }

    /// Mark a constant as being computed. Returns false when it already is,
    /// which means the constant refers to itself.
    pub fn begin_constant(&self, name: &str) -> bool {
        self.constants_in_progress.lock().insert(name.to_string())
    }

    pub fn end_constant(&self, name: &str) {
        self.constants_in_progress.lock().remove(name);
    }

    pub fn function(&self, name: &str) -> Option<Arc<Computed>> {
        self.functions.lock().get(name).cloned()
    }

    pub fn store_function(&self, name: &str, value: Computed) -> Arc<Computed> {
        let value = Arc::new(value);
        self.functions
            .lock()
            .insert(name.to_string(), value.clone());
        value
    }

    pub fn expression(&self, key: &CacheKey) -> Option<Arc<ValueSet>> {
        self.expressions.lock().get(key).cloned()
    }

    pub fn store_expression(&self, key: CacheKey, values: ValueSet) {
        self.expressions.lock().insert(key, Arc::new(values));
    }

    pub fn taxonomy(
        &self,
        url: &str,
        load: impl FnOnce() -> crate::XruleResult<Arc<Taxonomy>>,
    ) -> crate::XruleResult<Arc<Taxonomy>> {
        if let Some(found) = self.taxonomies.lock().get(url) {
            return Ok(found.clone());
        }
        let loaded = load()?;
        self.taxonomies
            .lock()
            .insert(url.to_string(), loaded.clone());
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(node: u64, var: i64) -> CacheKey {
        CacheKey {
            node: NodeId(node),
            vars: vec![("x".to_string(), Value::int(var).shadow())],
            alignment: None,
        }
    }

    #[test]
    fn different_snapshots_are_different_entries() {
        let mut cache = LocalCache::default();
        cache.put_scalar(key(1, 1), Value::int(10));
        assert_eq!(cache.get_scalar(&key(1, 1)), Some(Value::int(10)));
        assert_eq!(cache.get_scalar(&key(1, 2)), None);
    }

    #[test]
    fn numerically_equal_snapshots_share_an_entry() {
        let mut cache = LocalCache::default();
        cache.put_scalar(key(1, 1), Value::int(10));
        let float_key = CacheKey {
            node: NodeId(1),
            vars: vec![("x".to_string(), Value::float(1.0).shadow())],
            alignment: None,
        };
        assert!(cache.get_scalar(&float_key).is_some());
    }

    #[test]
    fn fact_alignment_is_computed_once() {
        let mut cache = LocalCache::default();
        let mut calls = 0;
        for _ in 0..3 {
            cache.fact_alignment(NodeId(1), FactId(4), || {
                calls += 1;
                None
            });
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn constant_recursion_guard() {
        let cache = GlobalCache::default();
        assert!(cache.begin_constant("c"));
        assert!(!cache.begin_constant("c"));
        cache.end_constant("c");
        assert!(cache.begin_constant("c"));
    }

    #[test]
    fn taxonomy_loads_once() {
        let cache = GlobalCache::default();
        let mut loads = 0;
        for _ in 0..2 {
            cache
                .taxonomy("http://example.com/t.xsd", || {
                    loads += 1;
                    Ok(Arc::new(Taxonomy::default()))
                })
                .unwrap();
        }
        assert_eq!(loads, 1);
    }
}
