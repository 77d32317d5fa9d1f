//! Parallel-map abstraction for candidate evaluation.
//!
//! Evaluation is a pure function of (candidate, shared read-only context),
//! so it can be dispatched to any executor that applies a function to many
//! inputs and returns results in input order. Completion order is never
//! relied on.

use rayon::prelude::*;

/// The map contract the search engine evaluates populations through.
pub trait ParallelMap: Sync {
    fn map<T, U, F>(&self, items: &[T], f: F) -> Vec<U>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> U + Sync + Send;
}

/// Rayon-backed work-stealing map.
#[derive(Debug, Default, Clone, Copy)]
pub struct RayonMap;

impl ParallelMap for RayonMap {
    fn map<T, U, F>(&self, items: &[T], f: F) -> Vec<U>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> U + Sync + Send,
    {
        items.par_iter().map(f).collect()
    }
}

/// Sequential map for tests and debugging.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialMap;

impl ParallelMap for SerialMap {
    fn map<T, U, F>(&self, items: &[T], f: F) -> Vec<U>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> U + Sync + Send,
    {
        items.iter().map(f).collect()
    }
}
